//! The daemon's YAML configuration as a `serde_yaml` mapping.
//!
//! An unmodified document renders as the exact text it was parsed from, so
//! loading and committing without changes never rewrites the file. Changes
//! are written into that text line by line, keeping comments and the layout
//! of everything else. Only when a changed path runs through a flow node or a
//! sequence is the whole document re-serialised, which loses comments.

use serde_yaml::{Mapping, Value};

use super::yaml_edit;
use super::{Artifact, ArtifactId};

/// Hierarchical service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceYamlDocument {
    root: Mapping,
    source: Option<String>,
}

impl ServiceYamlDocument {
    /// Parse YAML text. Empty or `null` content is an empty mapping.
    ///
    /// # Errors
    ///
    /// Returns the parser's diagnostic for invalid YAML, or a description of
    /// the root value when it is not a mapping.
    pub fn parse_str(text: &str) -> Result<Self, String> {
        let value: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(text).map_err(|e| e.to_string())?
        };
        let root = match value {
            Value::Null => Mapping::new(),
            Value::Mapping(m) => m,
            other => {
                return Err(format!(
                    "top-level value must be a mapping, found {}",
                    shape_of(&other)
                ));
            }
        };
        Ok(Self {
            root,
            source: Some(text.to_string()),
        })
    }

    /// Build a document from a mapping with no source text.
    #[must_use]
    pub const fn from_mapping(root: Mapping) -> Self {
        Self { root, source: None }
    }

    /// The root mapping.
    #[must_use]
    pub const fn root(&self) -> &Mapping {
        &self.root
    }

    /// Replace the root mapping with `root`, which must equal the current
    /// root with each `(dotted path, value)` of `edits` set.
    ///
    /// The edits are applied to the source text in place. The result is
    /// parsed again and kept only if it yields `root`; otherwise the document
    /// is re-serialised from `root` and a warning names the first path that
    /// could not be edited in place.
    #[must_use]
    pub fn with_edits(self, root: Mapping, edits: &[(&str, Value)]) -> Self {
        if root == self.root {
            return self;
        }
        let Some(source) = self.source else {
            return Self::from_mapping(root);
        };

        let mut text = source;
        for (path, value) in edits {
            let segments: Vec<&str> = path.split('.').collect();
            let Some(edited) = yaml_edit::set_scalar(&text, &segments, value) else {
                tracing::warn!(
                    "{path} runs through a flow or sequence node; rewriting the whole service config, comments are not kept"
                );
                return Self::from_mapping(root);
            };
            text = edited;
        }

        match Self::parse_str(&text) {
            Ok(doc) if doc.root == root => doc,
            _ => {
                tracing::warn!(
                    "in-place edit of the service config did not read back as intended; rewriting the whole file"
                );
                Self::from_mapping(root)
            }
        }
    }

    /// Value at a dotted path such as `radio.region`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.root.get(first)?;
        for segment in segments {
            current = current.as_mapping()?.get(segment)?;
        }
        Some(current)
    }

    /// Whether rendering will reproduce the parsed text verbatim.
    #[must_use]
    pub const fn is_pristine(&self) -> bool {
        self.source.is_some()
    }
}

/// Short description of a YAML node's shape, for conflict messages.
#[must_use]
pub const fn shape_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

impl Artifact for ServiceYamlDocument {
    const ID: ArtifactId = ArtifactId::ServiceYaml;

    fn parse(text: &str) -> Result<Self, String> {
        Self::parse_str(text)
    }

    fn render(&self) -> Result<String, String> {
        match &self.source {
            Some(text) => Ok(text.clone()),
            None => serde_yaml::to_string(&self.root).map_err(|e| e.to_string()),
        }
    }

    fn template() -> Self {
        Self::from_mapping(Mapping::new())
    }
}
