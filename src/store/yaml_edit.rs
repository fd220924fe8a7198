//! In-place edits of block-style YAML source text.
//!
//! A scalar is replaced on its own line, or new `key: value` lines are
//! inserted under the deepest parent that already exists. Every other byte
//! of the text is kept. Paths that run through anything but plain block
//! mappings (flow nodes, sequences, multi-line scalars, anchors) are left to
//! the caller, which re-serialises the whole document instead.

use serde_yaml::Value;

/// How one source line takes part in the block structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry<'a> {
    /// Blank line, comment, or document marker.
    Trivia,
    /// A `key: value` mapping entry.
    Key {
        indent: usize,
        key: &'a str,
        /// Byte offset of the `:` that ends the key.
        colon: usize,
        /// Byte range of the inline value without a trailing comment; empty
        /// and starting right after the colon when there is no value.
        value: (usize, usize),
    },
    /// Any other content: a sequence item, a flow node, or a continuation
    /// line of a multi-line scalar.
    Other { indent: usize },
}

impl Entry<'_> {
    const fn indent(&self) -> Option<usize> {
        match self {
            Self::Trivia => None,
            Self::Key { indent, .. } | Self::Other { indent } => Some(*indent),
        }
    }
}

fn classify(line: &str) -> Entry<'_> {
    let body = line.trim_end_matches(['\n', '\r']);
    let rest = body.trim_start_matches(' ');
    let indent = body.len() - rest.len();
    let marker = indent == 0 && ["---", "...", "%"].iter().any(|m| rest.starts_with(m));
    if rest.trim().is_empty() || rest.starts_with('#') || marker {
        return Entry::Trivia;
    }
    key_entry(body, indent, rest).unwrap_or(Entry::Other { indent })
}

fn key_entry<'a>(body: &'a str, indent: usize, rest: &'a str) -> Option<Entry<'a>> {
    let (key, offset) = split_key(rest)?;
    let colon = indent + offset;
    let after = body.get(colon + 1..)?;
    let inline = after.get(..comment_start(after).unwrap_or(after.len()))?;
    let start = colon + 1 + (inline.len() - inline.trim_start().len());
    let end = colon + 1 + inline.trim_end().len();
    let value = if start < end {
        (start, end)
    } else {
        (colon + 1, colon + 1)
    };
    Some(Entry::Key {
        indent,
        key,
        colon,
        value,
    })
}

/// Split a mapping key off the start of `rest`: the key text without quotes
/// and the offset of the `:` that follows it.
fn split_key(rest: &str) -> Option<(&str, usize)> {
    let first = rest.chars().next()?;
    let (key, key_end) = match first {
        '\'' | '"' => {
            let close = rest.get(1..)?.find(first)? + 1;
            (rest.get(1..close)?, close + 1)
        }
        '?' | '{' | '[' | '&' | '*' | '!' | '|' | '>' | '@' | '`' => return None,
        '-' if rest.starts_with("- ") || rest.trim_end() == "-" => return None,
        _ => {
            let colon = rest
                .match_indices(':')
                .map(|(i, _)| i)
                .find(|&i| is_value_indicator(rest, i))?;
            let key = rest.get(..colon)?.trim_end();
            if key.contains(" #") {
                return None;
            }
            (key, key.len())
        }
    };
    let gap = rest.get(key_end..)?;
    let colon = key_end + (gap.len() - gap.trim_start().len());
    (rest.get(colon..)?.starts_with(':') && is_value_indicator(rest, colon))
        .then_some((key, colon))
}

/// A `:` ends a key only when followed by whitespace or the end of line.
fn is_value_indicator(text: &str, colon: usize) -> bool {
    matches!(text.as_bytes().get(colon + 1), None | Some(b' ' | b'\t'))
}

/// Offset of a `#` that starts a comment: outside quotes and after
/// whitespace.
fn comment_start(text: &str) -> Option<usize> {
    let mut quote = None;
    let mut after_space = true;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if after_space && (c == '\'' || c == '"') => quote = Some(c),
            None if after_space && c == '#' => return Some(i),
            None => {}
        }
        after_space = c == ' ' || c == '\t';
    }
    None
}

/// Whether `inline` is a complete single-line scalar (or nothing).
fn is_inline_scalar(inline: &str) -> bool {
    match inline.chars().next() {
        None => true,
        Some('{' | '[' | '|' | '>' | '&' | '*' | '!') => false,
        Some(q @ ('\'' | '"')) => inline.len() >= 2 && inline.ends_with(q),
        Some(_) => true,
    }
}

/// Inline values a missing child mapping may replace.
fn is_empty_mapping(inline: &str) -> bool {
    matches!(inline, "" | "{}" | "~" | "null" | "Null" | "NULL")
}

/// The entries nested under one key, or the whole document.
#[derive(Debug, Clone, Copy)]
struct Scope {
    /// Indentation of the owning key; `None` at the document root.
    parent: Option<usize>,
    /// Line index of the owning key.
    anchor: Option<usize>,
    start: usize,
    end: usize,
}

impl Scope {
    fn content<'l>(&self, lines: &'l [String]) -> impl Iterator<Item = (usize, Entry<'l>)> {
        lines
            .iter()
            .enumerate()
            .take(self.end)
            .skip(self.start)
            .map(|(i, line)| (i, classify(line)))
            .filter(|(_, entry)| !matches!(entry, Entry::Trivia))
    }

    /// Line of the entry named `segment` directly in this scope. `Some(None)`
    /// when there is none; `None` when the scope is not a block mapping.
    fn find(&self, lines: &[String], segment: &str) -> Option<Option<usize>> {
        let mut content = self.content(lines).peekable();
        let child = match content.peek() {
            None => return Some(None),
            Some((_, Entry::Key { indent, .. })) => *indent,
            Some(_) => return None,
        };
        for (i, entry) in content {
            match entry {
                Entry::Key { indent, key, .. } if indent == child && key == segment => {
                    return Some(Some(i));
                }
                Entry::Other { indent } if indent <= child => return None,
                _ => {}
            }
        }
        Some(None)
    }

    fn child_indent(&self, lines: &[String]) -> usize {
        self.content(lines)
            .next()
            .and_then(|(_, entry)| entry.indent())
            .unwrap_or_else(|| self.parent.map_or(0, |p| p + 2))
    }

    /// Where new entries go: after the scope's last content line.
    fn insert_at(&self, lines: &[String]) -> usize {
        self.content(lines)
            .last()
            .map(|(i, _)| i + 1)
            .or_else(|| self.anchor.map(|a| a + 1))
            .unwrap_or(lines.len())
    }
}

/// First line after `at` that is no longer nested under an entry indented
/// by `indent`.
fn block_end(lines: &[String], at: usize, indent: usize, limit: usize) -> usize {
    (at + 1..limit)
        .find(|&j| {
            lines
                .get(j)
                .and_then(|line| classify(line).indent())
                .is_some_and(|k| k <= indent)
        })
        .unwrap_or(limit)
}

/// Render `value` as it would appear after `key: `.
fn render_scalar(value: &Value) -> Option<String> {
    let text = serde_yaml::to_string(value).ok()?;
    let text = text.strip_suffix('\n')?;
    (!text.contains('\n')).then(|| text.to_string())
}

/// Set the scalar at `path` to `value` in `text`, or return `None` when that
/// cannot be done without rewriting other content.
pub(super) fn set_scalar(text: &str, path: &[&str], value: &Value) -> Option<String> {
    let rendered = render_scalar(value)?;
    let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = text.split_inclusive('\n').map(str::to_string).collect();
    let mut scope = Scope {
        parent: None,
        anchor: None,
        start: 0,
        end: lines.len(),
    };

    for (depth, segment) in path.iter().enumerate() {
        let Some(at) = scope.find(&lines, segment)? else {
            insert_entries(&mut lines, &scope, path.get(depth..)?, &rendered, newline)?;
            return Some(lines.concat());
        };
        let line = lines.get(at)?.clone();
        let Entry::Key {
            indent,
            colon,
            value: (start, end),
            ..
        } = classify(&line)
        else {
            return None;
        };
        let inline = line.get(start..end)?;
        let block = block_end(&lines, at, indent, scope.end);
        // `key:` followed by `- item` at the same indent is a sequence.
        if block < scope.end
            && lines
                .get(block)
                .is_some_and(|l| classify(l) == Entry::Other { indent })
        {
            return None;
        }
        let nested = lines
            .get(at + 1..block)?
            .iter()
            .any(|l| classify(l).indent().is_some());
        let head = line.get(..=colon)?;
        let tail = line.get(end..)?;

        if depth + 1 == path.len() {
            if nested || !is_inline_scalar(inline) {
                return None;
            }
            *lines.get_mut(at)? = format!("{head} {rendered}{tail}");
            return Some(lines.concat());
        }

        if nested {
            if !inline.is_empty() {
                return None;
            }
            scope = Scope {
                parent: Some(indent),
                anchor: Some(at),
                start: at + 1,
                end: block,
            };
        } else {
            if !is_empty_mapping(inline) {
                return None;
            }
            *lines.get_mut(at)? = format!("{head}{tail}");
            scope = Scope {
                parent: Some(indent),
                anchor: Some(at),
                start: at + 1,
                end: at + 1,
            };
        }
    }
    None
}

/// Insert `segments` as nested block entries at the end of `scope`, the
/// last one holding `rendered`.
fn insert_entries(
    lines: &mut Vec<String>,
    scope: &Scope,
    segments: &[&str],
    rendered: &str,
    newline: &str,
) -> Option<()> {
    let base = scope.child_indent(lines);
    let at = scope.insert_at(lines);
    if let Some(prev) = at.checked_sub(1).and_then(|p| lines.get_mut(p))
        && !prev.ends_with('\n')
    {
        prev.push_str(newline);
    }

    let mut added = Vec::with_capacity(segments.len());
    for (depth, segment) in segments.iter().enumerate() {
        let pad = " ".repeat(base + 2 * depth);
        let key = render_scalar(&Value::from(*segment))?;
        added.push(if depth + 1 == segments.len() {
            format!("{pad}{key}: {rendered}{newline}")
        } else {
            format!("{pad}{key}:{newline}")
        });
    }
    let tail = lines.split_off(at);
    lines.extend(added);
    lines.extend(tail);
    Some(())
}
