//! Path-wise merge into the service YAML mapping.

use serde_yaml::{Mapping, Value};

use crate::error::{Conflict, ConflictKind};
use crate::options::{ConfigKey, OptionValue};
use crate::store::ServiceYamlDocument;
use crate::store::yaml::shape_of;

/// Output of a YAML merge before it is wrapped in a `Reconciliation`.
#[derive(Debug)]
pub(super) struct YamlMerge {
    pub document: ServiceYamlDocument,
    pub applied: Vec<String>,
    pub conflicts: Vec<Conflict>,
}

/// Set each entry at its dotted path. A key whose path is blocked by a value
/// of the wrong shape is reported and skipped; the others still apply.
pub(super) fn merge(doc: &ServiceYamlDocument, entries: &[(&ConfigKey, &OptionValue)]) -> YamlMerge {
    let mut root = doc.root().clone();
    let mut applied = Vec::new();
    let mut conflicts = Vec::new();
    let mut edits = Vec::new();

    for &(key, value) in entries {
        let value = to_yaml(value);
        let changed = doc.get(key.name) != Some(&value);
        match set_path(&mut root, key.name, value.clone()) {
            Ok(()) => {
                applied.push(key.name.to_string());
                if changed {
                    edits.push((key.name, value));
                }
            }
            Err(kind) => {
                tracing::debug!("skipping {}: {kind}", key.name);
                conflicts.push(Conflict {
                    key: key.name.to_string(),
                    kind,
                });
            }
        }
    }

    YamlMerge {
        document: doc.clone().with_edits(root, &edits),
        applied,
        conflicts,
    }
}

fn to_yaml(value: &OptionValue) -> Value {
    match value {
        OptionValue::Flag(b) => Value::Bool(*b),
        OptionValue::Number(n) => Value::from(*n),
        OptionValue::Text(s) => Value::String(s.clone()),
    }
}

/// Write `value` at `path`, creating intermediate mappings. A `null`
/// intermediate is replaced by an empty mapping. Nothing is modified when a
/// conflict is returned.
fn set_path(root: &mut Mapping, path: &str, value: Value) -> Result<(), ConflictKind> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((leaf, parents)) = segments.split_last() else {
        return Ok(());
    };

    check_path(root, parents, leaf, path)?;

    let mut current = root;
    for segment in parents {
        let slot = current
            .entry(Value::from(*segment))
            .or_insert(Value::Null);
        if slot.is_null() {
            *slot = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(next) = slot else {
            return Ok(());
        };
        current = next;
    }
    current.insert(Value::from(*leaf), value);
    Ok(())
}

/// Walk the existing nodes along `parents` and `leaf` without mutating,
/// reporting the first node with an incompatible shape.
fn check_path(root: &Mapping, parents: &[&str], leaf: &str, path: &str) -> Result<(), ConflictKind> {
    let mut current = root;
    let mut walked = String::new();
    for segment in parents {
        if !walked.is_empty() {
            walked.push('.');
        }
        walked.push_str(segment);
        match current.get(*segment) {
            None | Some(Value::Null) => return Ok(()),
            Some(Value::Mapping(next)) => current = next,
            Some(other) => {
                return Err(ConflictKind::ShapeConflict {
                    path: walked,
                    expected: "a mapping",
                    found: shape_of(other),
                });
            }
        }
    }
    match current.get(leaf) {
        Some(existing @ (Value::Mapping(_) | Value::Sequence(_))) => {
            Err(ConflictKind::ShapeConflict {
                path: path.to_string(),
                expected: "a scalar",
                found: shape_of(existing),
            })
        }
        _ => Ok(()),
    }
}
