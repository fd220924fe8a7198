//! Reconciler: merges desired option values into an artifact document.
//!
//! The reconciler is pure. It takes the current document and the desired
//! [`Assignments`] and returns a new document plus a per-key report; only
//! the artifact store writes files.
//!
//! Every merge starts with the same pre-pass for both artifacts: names the
//! option model does not know, keys owned by the other artifact, and values
//! that fail validation become [`Conflict`]s and are skipped. The remaining
//! keys are merged line by line into the boot file or path by path into the
//! YAML mapping.
//!
//! Merging is idempotent: merging the same assignments into a merged
//! document renders byte-identically and reports `changed == false`.

mod boot;
mod yaml;

use crate::error::{Conflict, ConflictKind, ConflictReport};
use crate::options::{Assignments, ConfigKey, KeyTarget, OptionModel, OptionValue};
use crate::store::{Artifact, ArtifactId, BootConfigDocument, Document, ServiceYamlDocument};

/// Output of one merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation<D> {
    /// The merged document, ready to commit.
    pub document: D,
    /// Whether `document` renders differently from the input.
    pub changed: bool,
    /// Keys that were applied, in declaration order.
    pub applied: Vec<String>,
    /// Duplicate managed lines removed from the boot file.
    pub dropped_duplicates: usize,
    /// Keys that could not be applied.
    pub conflicts: Vec<Conflict>,
}

impl<D> Reconciliation<D> {
    /// Whether every desired key was applied.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// The conflicts as an error value, if there were any.
    #[must_use]
    pub fn conflict_report(&self) -> Option<ConflictReport> {
        (!self.conflicts.is_empty()).then(|| ConflictReport(self.conflicts.clone()))
    }

    fn map<E>(self, f: impl FnOnce(D) -> E) -> Reconciliation<E> {
        Reconciliation {
            document: f(self.document),
            changed: self.changed,
            applied: self.applied,
            dropped_duplicates: self.dropped_duplicates,
            conflicts: self.conflicts,
        }
    }
}

/// Merges assignments into documents according to an option model.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    model: OptionModel,
}

impl Reconciler {
    /// Create a reconciler for `model`.
    #[must_use]
    pub const fn new(model: OptionModel) -> Self {
        Self { model }
    }

    /// Merge into the boot options file.
    #[must_use]
    pub fn merge_boot(
        &self,
        doc: &BootConfigDocument,
        desired: &Assignments,
    ) -> Reconciliation<BootConfigDocument> {
        let (entries, conflicts) = self.prepare(ArtifactId::BootConfig, desired);
        let merged = boot::merge(doc, &entries);
        let changed = merged.document != *doc;
        if changed {
            tracing::debug!(
                "boot config: {} key(s) applied, {} duplicate(s) dropped",
                merged.applied.len(),
                merged.dropped_duplicates
            );
        }
        Reconciliation {
            document: merged.document,
            changed,
            applied: merged.applied,
            dropped_duplicates: merged.dropped_duplicates,
            conflicts,
        }
    }

    /// Merge into the service YAML.
    #[must_use]
    pub fn merge_service(
        &self,
        doc: &ServiceYamlDocument,
        desired: &Assignments,
    ) -> Reconciliation<ServiceYamlDocument> {
        let (entries, mut conflicts) = self.prepare(ArtifactId::ServiceYaml, desired);
        let merged = yaml::merge(doc, &entries);
        conflicts.extend(merged.conflicts);
        let changed = merged.document.render() != doc.render();
        Reconciliation {
            document: merged.document,
            changed,
            applied: merged.applied,
            dropped_duplicates: 0,
            conflicts,
        }
    }

    /// Merge into a document of either artifact.
    #[must_use]
    pub fn merge(&self, doc: &Document, desired: &Assignments) -> Reconciliation<Document> {
        match doc {
            Document::Boot(d) => self.merge_boot(d, desired).map(Document::Boot),
            Document::Service(d) => self.merge_service(d, desired).map(Document::Service),
        }
    }

    /// The value each managed key of `doc`'s artifact currently has, in
    /// declaration order. `None` means the key is not set.
    ///
    /// For the boot file the last matching unconditional line wins, the same
    /// line the firmware honours.
    #[must_use]
    pub fn current_values(&self, doc: &Document) -> Vec<(&'static ConfigKey, Option<String>)> {
        self.model
            .keys_for(doc.artifact())
            .map(|key| {
                let current = match (doc, key.target) {
                    (Document::Boot(boot), KeyTarget::Boot(directive)) => boot
                        .unconditional_directives()
                        .filter(|d| directive.matches(d.key, d.value))
                        .last()
                        .map(|d| directive.value_from(d.value).to_string()),
                    (Document::Service(service), KeyTarget::Yaml) => {
                        service.get(key.name).map(scalar_text)
                    }
                    _ => None,
                };
                (key, current)
            })
            .collect()
    }

    /// Pre-pass: accepted entries for `artifact` in declaration order, and
    /// conflicts for everything else in `desired`.
    fn prepare<'a>(
        &self,
        artifact: ArtifactId,
        desired: &'a Assignments,
    ) -> (Vec<(&'static ConfigKey, &'a OptionValue)>, Vec<Conflict>) {
        let mut conflicts = Vec::new();
        for (name, value) in desired {
            let kind = match self.model.key(name) {
                Err(_) => Some(ConflictKind::UnknownKey),
                Ok(key) if key.artifact() != artifact => Some(ConflictKind::WrongArtifact {
                    owner: key.artifact(),
                }),
                Ok(key) => self
                    .model
                    .validate(key, value)
                    .err()
                    .map(ConflictKind::InvalidValue),
            };
            if let Some(kind) = kind {
                conflicts.push(Conflict {
                    key: name.clone(),
                    kind,
                });
            }
        }

        let entries = self
            .model
            .keys_for(artifact)
            .filter_map(|key| {
                let value = desired.get(key.name)?;
                self.model.validate(key, value).ok()?;
                Some((key, value))
            })
            .collect();
        (entries, conflicts)
    }
}

/// Display text of a YAML node.
fn scalar_text(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "~".to_string(),
        other => serde_yaml::to_string(other)
            .map_or_else(|_| "?".to_string(), |s| s.trim_end().to_string()),
    }
}

/// A document type the reconciler can merge into.
pub trait Mergeable: Artifact {
    /// Merge `desired` into `self` with `reconciler`.
    fn reconcile(&self, reconciler: &Reconciler, desired: &Assignments) -> Reconciliation<Self>;
}

impl Mergeable for BootConfigDocument {
    fn reconcile(&self, reconciler: &Reconciler, desired: &Assignments) -> Reconciliation<Self> {
        reconciler.merge_boot(self, desired)
    }
}

impl Mergeable for ServiceYamlDocument {
    fn reconcile(&self, reconciler: &Reconciler, desired: &Assignments) -> Reconciliation<Self> {
        reconciler.merge_service(self, desired)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::OptionError;

    fn reconciler() -> Reconciler {
        Reconciler::new(OptionModel::builtin())
    }

    fn assign(pairs: &[(&str, OptionValue)]) -> Assignments {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn boot(text: &str) -> BootConfigDocument {
        BootConfigDocument::parse_str(text)
    }

    fn yaml(text: &str) -> ServiceYamlDocument {
        ServiceYamlDocument::parse_str(text).unwrap()
    }

    fn render<D: Artifact>(doc: &D) -> String {
        doc.render().unwrap()
    }

    // Boot file

    #[test]
    fn empty_boot_file_gets_managed_block() {
        let a = assign(&[
            ("spi_enable", true.into()),
            ("hat_overlay", "rak4631".into()),
        ]);
        let r = reconciler().merge_boot(&boot(""), &a);
        assert!(r.changed);
        assert!(r.is_clean());
        assert_eq!(
            render(&r.document),
            "# Managed by meshnode\ndtparam=spi=on\ndtoverlay=rak4631\n"
        );
        assert_eq!(r.applied, ["spi_enable", "hat_overlay"]);
    }

    #[test]
    fn existing_line_is_rewritten_in_place_with_comment() {
        let text = "dtparam=audio=on\n  dtparam=spi=off   # radio bus\narm_boost=1\n";
        let a = assign(&[("spi_enable", true.into())]);
        let r = reconciler().merge_boot(&boot(text), &a);
        assert_eq!(
            render(&r.document),
            "dtparam=audio=on\n  dtparam=spi=on   # radio bus\narm_boost=1\n"
        );
    }

    #[test]
    fn hat_overlay_switch_rewrites_one_line() {
        let text = "dtoverlay=vc4-kms-v3d\ndtoverlay=rak4631\n";
        let a = assign(&[("hat_overlay", "meshadv-mini".into())]);
        let r = reconciler().merge_boot(&boot(text), &a);
        assert_eq!(
            render(&r.document),
            "dtoverlay=vc4-kms-v3d\ndtoverlay=meshadv-mini\n"
        );
    }

    #[test]
    fn duplicate_managed_lines_are_collapsed() {
        let text = "dtparam=spi=off\nfoo=1\ndtparam=spi=on\n";
        let a = assign(&[("spi_enable", true.into())]);
        let r = reconciler().merge_boot(&boot(text), &a);
        assert_eq!(r.dropped_duplicates, 1);
        assert_eq!(render(&r.document), "dtparam=spi=on\nfoo=1\n");
    }

    #[test]
    fn conditional_sections_are_not_rewritten() {
        let text = "[pi4]\ndtparam=spi=off\n";
        let a = assign(&[("spi_enable", true.into())]);
        let r = reconciler().merge_boot(&boot(text), &a);
        assert_eq!(
            render(&r.document),
            "[pi4]\ndtparam=spi=off\n\n[all]\n# Managed by meshnode\ndtparam=spi=on\n"
        );
        let again = reconciler().merge_boot(&r.document, &a);
        assert!(!again.changed);
    }

    #[test]
    fn lines_under_all_are_rewritten() {
        let text = "[cm4]\notg_mode=1\n[all]\nenable_uart=0\n";
        let a = assign(&[("uart_enable", true.into())]);
        let r = reconciler().merge_boot(&boot(text), &a);
        assert_eq!(
            render(&r.document),
            "[cm4]\notg_mode=1\n[all]\nenable_uart=1\n"
        );
    }

    #[test]
    fn new_lines_join_existing_managed_block() {
        let text = "\
arm_boost=1

# Managed by meshnode
dtparam=spi=on

[pi5]
usb_max_current_enable=1
";
        let a = assign(&[
            ("spi_enable", true.into()),
            ("i2c_enable", true.into()),
        ]);
        let r = reconciler().merge_boot(&boot(text), &a);
        assert_eq!(
            render(&r.document),
            "\
arm_boost=1

# Managed by meshnode
dtparam=spi=on
dtparam=i2c_arm=on

[pi5]
usb_max_current_enable=1
"
        );
    }

    #[test]
    fn file_without_trailing_newline_gets_one_when_appending() {
        let a = assign(&[("spi_enable", true.into())]);
        let r = reconciler().merge_boot(&boot("arm_boost=1"), &a);
        assert_eq!(
            render(&r.document),
            "arm_boost=1\n\n# Managed by meshnode\ndtparam=spi=on\n"
        );
    }

    #[test]
    fn combined_dtparam_line_is_left_alone() {
        let text = "dtparam=i2c_arm=on,spi=on\n";
        let a = assign(&[("spi_enable", true.into())]);
        let r = reconciler().merge_boot(&boot(text), &a);
        assert!(render(&r.document).starts_with("dtparam=i2c_arm=on,spi=on\n"));
        assert!(render(&r.document).ends_with("dtparam=spi=on\n"));
    }

    #[test]
    fn unchanged_boot_file_reports_no_change() {
        let text = "# comment\ndtparam=spi=on\n";
        let a = assign(&[("spi_enable", true.into())]);
        let r = reconciler().merge_boot(&boot(text), &a);
        assert!(!r.changed);
        assert_eq!(render(&r.document), text);
    }

    #[test]
    fn boot_merge_is_idempotent() {
        let text = "\
# user settings
dtparam=audio=on
dtoverlay=waveshare-sx126x
[cm4]
otg_mode=1
";
        let a = assign(&[
            ("spi_enable", true.into()),
            ("hat_overlay", "rak4631".into()),
            ("gpio4_mode", "op,dh".into()),
            ("pps_overlay", "pps-gpio,gpiopin=17".into()),
        ]);
        let first = reconciler().merge_boot(&boot(text), &a);
        let second = reconciler().merge_boot(&first.document, &a);
        assert!(!second.changed);
        assert_eq!(render(&second.document), render(&first.document));
        let reparsed = boot(&render(&first.document));
        assert!(!reconciler().merge_boot(&reparsed, &a).changed);
    }

    // Pre-pass

    #[test]
    fn pre_pass_reports_unknown_wrong_artifact_and_invalid() {
        let a = assign(&[
            ("spi_enable", true.into()),
            ("radio.region", "US".into()),
            ("warp_drive", true.into()),
            ("hat_overlay", "not-a-hat".into()),
        ]);
        let r = reconciler().merge_boot(&boot(""), &a);
        assert_eq!(r.applied, ["spi_enable"]);
        let by_key = |k: &str| r.conflicts.iter().find(|c| c.key == k).unwrap().kind.clone();
        assert_eq!(
            by_key("radio.region"),
            ConflictKind::WrongArtifact {
                owner: ArtifactId::ServiceYaml
            }
        );
        assert_eq!(by_key("warp_drive"), ConflictKind::UnknownKey);
        assert!(matches!(
            by_key("hat_overlay"),
            ConflictKind::InvalidValue(OptionError::InvalidValue { .. })
        ));
        assert_eq!(r.conflict_report().unwrap().0.len(), 3);
    }

    // Service YAML

    #[test]
    fn yaml_sets_path_and_leaves_siblings() {
        let doc = yaml("network:\n  wifi: true\nradio: {}\n");
        let a = assign(&[("radio.region", "US".into())]);
        let r = reconciler().merge_service(&doc, &a);
        assert!(r.changed);
        assert_eq!(
            r.document.get("radio.region"),
            Some(&serde_yaml::Value::from("US"))
        );
        assert_eq!(
            r.document.get("network.wifi"),
            Some(&serde_yaml::Value::Bool(true))
        );
        assert_eq!(
            render(&r.document),
            "network:\n  wifi: true\nradio:\n  region: US\n"
        );
    }

    #[test]
    fn yaml_creates_missing_and_null_intermediates() {
        let doc = yaml("Webserver: ~\nother: 1\n");
        let a = assign(&[
            ("Webserver.Port", OptionValue::Number(8443)),
            ("General.MaxNodes", OptionValue::Number(100)),
        ]);
        let r = reconciler().merge_service(&doc, &a);
        assert!(r.is_clean());
        assert_eq!(
            render(&r.document),
            "Webserver:\n  Port: 8443\nother: 1\nGeneral:\n  MaxNodes: 100\n"
        );
    }

    #[test]
    fn yaml_shape_conflict_is_isolated() {
        let doc = yaml("radio: sx1262\nLogging: {}\n");
        let a = assign(&[
            ("radio.region", "US".into()),
            ("Logging.LogLevel", "debug".into()),
        ]);
        let r = reconciler().merge_service(&doc, &a);
        assert_eq!(r.applied, ["Logging.LogLevel"]);
        assert_eq!(r.conflicts.len(), 1);
        assert_eq!(
            r.conflicts.first().unwrap().kind,
            ConflictKind::ShapeConflict {
                path: "radio".to_string(),
                expected: "a mapping",
                found: "a string",
            }
        );
        assert_eq!(
            r.document.get("Logging.LogLevel"),
            Some(&serde_yaml::Value::from("debug"))
        );
        assert_eq!(
            r.document.get("radio"),
            Some(&serde_yaml::Value::from("sx1262"))
        );
    }

    #[test]
    fn yaml_leaf_holding_mapping_is_a_conflict() {
        let doc = yaml("Lora:\n  Module:\n    chip: sx1262\n");
        let a = assign(&[("Lora.Module", "sx1262".into())]);
        let r = reconciler().merge_service(&doc, &a);
        assert!(!r.changed);
        let ConflictKind::ShapeConflict { path, found, .. } = &r.conflicts.first().unwrap().kind
        else {
            panic!("expected shape conflict");
        };
        assert_eq!(path, "Lora.Module");
        assert_eq!(*found, "a mapping");
    }

    #[test]
    fn yaml_no_op_merge_keeps_source_and_comments() {
        let text = "# node config\nradio:\n  region: US # set by installer\n";
        let doc = yaml(text);
        let a = assign(&[("radio.region", "US".into())]);
        let r = reconciler().merge_service(&doc, &a);
        assert!(!r.changed);
        assert_eq!(render(&r.document), text);
    }

    #[test]
    fn yaml_merge_is_idempotent() {
        let doc = yaml("Lora:\n  Module: auto\nradio:\n  region: EU_868\n");
        let a = assign(&[
            ("radio.region", "US".into()),
            ("Lora.Module", "sx1262".into()),
            ("Webserver.Port", OptionValue::Number(9443)),
        ]);
        let first = reconciler().merge_service(&doc, &a);
        let second = reconciler().merge_service(&first.document, &a);
        assert!(!second.changed);
        assert_eq!(render(&second.document), render(&first.document));
        let reparsed = yaml(&render(&first.document));
        let third = reconciler().merge_service(&reparsed, &a);
        assert!(!third.changed);
        assert_eq!(render(&third.document), render(&first.document));
    }

    #[test]
    fn merge_dispatches_on_document() {
        let a = assign(&[("spi_enable", true.into()), ("radio.region", "US".into())]);
        let r = reconciler().merge(&Document::Boot(boot("")), &a);
        assert_eq!(r.applied, ["spi_enable"]);
        assert_eq!(r.document.artifact(), ArtifactId::BootConfig);
        let r = reconciler().merge(&Document::Service(ServiceYamlDocument::template()), &a);
        assert_eq!(r.applied, ["radio.region"]);
    }

    #[test]
    fn current_values_read_the_winning_line() {
        let doc = Document::Boot(boot(
            "dtparam=spi=off\ndtparam=spi=on\n[pi4]\nenable_uart=0\n[all]\ndtoverlay=rak4631\n",
        ));
        let values = reconciler().current_values(&doc);
        let get = |name: &str| {
            values
                .iter()
                .find(|(k, _)| k.name == name)
                .and_then(|(_, v)| v.clone())
        };
        assert_eq!(get("spi_enable").as_deref(), Some("on"));
        assert_eq!(get("uart_enable"), None, "conditional lines do not count");
        assert_eq!(get("hat_overlay").as_deref(), Some("rak4631"));

        let doc = Document::Service(yaml("radio:\n  region: US\nWebserver:\n  Port: 443\n"));
        let values = reconciler().current_values(&doc);
        assert!(values.iter().all(|(k, _)| k.artifact() == ArtifactId::ServiceYaml));
        assert!(values.contains(&(
            OptionModel::builtin().key("Webserver.Port").unwrap(),
            Some("443".to_string())
        )));
    }
}
