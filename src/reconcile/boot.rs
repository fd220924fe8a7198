//! Line-preserving merge into the boot options file.

use crate::options::{BootDirective, ConfigKey, KeyTarget, OptionValue};
use crate::store::BootConfigDocument;
use crate::store::boot::{Line, LineKind, MANAGED_MARKER, is_unconditional_section};

/// Output of a boot file merge before it is wrapped in a `Reconciliation`.
#[derive(Debug)]
pub(super) struct BootMerge {
    pub document: BootConfigDocument,
    pub applied: Vec<String>,
    pub dropped_duplicates: usize,
}

/// A desired line: which directive to match and the `key=value` to write.
struct Wanted<'k> {
    key: &'k ConfigKey,
    directive: BootDirective,
    line_key: &'static str,
    line_value: String,
    seen: bool,
}

/// Merge `entries` (already validated, in declaration order) into `doc`.
pub(super) fn merge(doc: &BootConfigDocument, entries: &[(&ConfigKey, &OptionValue)]) -> BootMerge {
    let mut wanted: Vec<Wanted<'_>> = entries
        .iter()
        .filter_map(|&(key, value)| match key.target {
            KeyTarget::Boot(directive) => {
                let (line_key, line_value) = directive.line_parts(&key.render_boot_value(value));
                Some(Wanted {
                    key,
                    directive,
                    line_key,
                    line_value,
                    seen: false,
                })
            }
            KeyTarget::Yaml => None,
        })
        .collect();

    let crlf = doc.lines().first().is_some_and(Line::is_crlf);
    let mut lines = Vec::with_capacity(doc.lines().len() + wanted.len() + 3);
    let mut dropped_duplicates = 0;
    let mut unconditional = true;
    let mut marker_at = None;

    for line in doc.lines() {
        match line.kind() {
            LineKind::Section(name) => unconditional = is_unconditional_section(name),
            LineKind::Comment
                if unconditional && marker_at.is_none() && line.text().trim() == MANAGED_MARKER =>
            {
                marker_at = Some(lines.len());
            }
            LineKind::Directive(d) if unconditional => {
                if let Some(w) = wanted
                    .iter_mut()
                    .find(|w| w.directive.matches(d.key, d.value))
                {
                    if w.seen {
                        tracing::debug!(
                            "dropping duplicate line for {}: {}",
                            w.key.name,
                            line.text()
                        );
                        dropped_duplicates += 1;
                    } else {
                        w.seen = true;
                        lines.push(line.rewritten(&d, w.line_key, &w.line_value));
                    }
                    continue;
                }
            }
            _ => {}
        }
        lines.push(line.clone());
    }

    let pending: Vec<Line> = wanted
        .iter()
        .filter(|w| !w.seen)
        .map(|w| Line::new(format!("{}={}", w.line_key, w.line_value)).with_crlf(crlf))
        .collect();

    let mut trailing_newline = doc.trailing_newline();
    if !pending.is_empty() {
        match marker_at {
            Some(marker) => {
                let end = lines
                    .iter()
                    .enumerate()
                    .skip(marker + 1)
                    .find(|(_, l)| matches!(l.kind(), LineKind::Blank | LineKind::Section(_)))
                    .map_or(lines.len(), |(i, _)| i);
                if end == lines.len() {
                    trailing_newline = true;
                }
                let tail = lines.split_off(end);
                lines.extend(pending);
                lines.extend(tail);
            }
            None => {
                if lines.last().is_some_and(|l| l.kind() != LineKind::Blank) {
                    lines.push(Line::new("").with_crlf(crlf));
                }
                if !unconditional {
                    lines.push(Line::new("[all]").with_crlf(crlf));
                }
                lines.push(Line::new(MANAGED_MARKER).with_crlf(crlf));
                lines.extend(pending);
                trailing_newline = true;
            }
        }
    }

    let applied = wanted.iter().map(|w| w.key.name.to_string()).collect();
    BootMerge {
        document: BootConfigDocument::from_lines(lines, trailing_newline),
        applied,
        dropped_duplicates,
    }
}
