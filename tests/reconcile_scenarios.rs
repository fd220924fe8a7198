#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::wildcard_imports,
    clippy::indexing_slicing
)]
//! End-to-end reconciliation against real files: load from the store, merge,
//! commit, reload.
//!
//! Covers idempotence, preservation of operator content, conflict isolation,
//! and stale-read detection.

mod common;

use common::{NodeFixture, assign};
use meshnode_cli::error::{ConflictKind, StoreError};
use meshnode_cli::options::{Assignments, KeyTarget, OptionModel, OptionValue};
use meshnode_cli::reconcile::Reconciler;
use meshnode_cli::store::boot::LineKind;
use meshnode_cli::store::{Artifact, BootConfigDocument, CommitOutcome, ServiceYamlDocument};

fn reconciler() -> Reconciler {
    Reconciler::new(OptionModel::builtin())
}

/// Parse `(key, text)` pairs the way the command line does.
fn parsed(pairs: &[(&str, &str)]) -> Assignments {
    let model = OptionModel::builtin();
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), model.parse_value(k, v).unwrap()))
        .collect()
}

/// Lines of `text` without their `\n`; a `\r` stays on the line.
fn raw_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive('\n').map(|l| l.trim_end_matches('\n'))
}

/// Whether a boot line is one the desired keys may rewrite or drop.
fn is_managed(line: &str, desired: &Assignments) -> bool {
    let LineKind::Directive(d) = LineKind::classify(line.trim_end_matches('\r')) else {
        return false;
    };
    let model = OptionModel::builtin();
    desired.keys().any(|name| {
        model
            .key(name)
            .is_ok_and(|key| matches!(key.target, KeyTarget::Boot(b) if b.matches(d.key, d.value)))
    })
}

/// Every input line the merge does not own appears in the output, in order
/// and byte for byte.
fn assert_untouched_lines_kept(case: &str, input: &str, output: &str, desired: &Assignments) {
    let mut out = raw_lines(output);
    for line in raw_lines(input).filter(|l| !is_managed(l, desired)) {
        assert!(
            out.any(|o| o == line),
            "{case}: {line:?} missing or moved in\n{output}"
        );
    }
}

// ---------------------------------------------------------------------------
// Boot config
// ---------------------------------------------------------------------------

#[test]
fn empty_boot_config_gets_exactly_the_managed_lines() {
    let node = NodeFixture::new();
    let store = node.store();
    let desired = assign(&[
        ("spi_enable", OptionValue::Flag(true)),
        ("hat_overlay", OptionValue::from("rak4631")),
    ]);

    let snap = store.load_or_template::<BootConfigDocument>().unwrap();
    let merged = reconciler().merge_boot(&snap.document, &desired);
    assert!(merged.is_clean());
    store.commit(&snap.fingerprint, &merged.document).unwrap();

    let reloaded = store.load::<BootConfigDocument>().unwrap();
    let directives: Vec<String> = reloaded
        .document
        .unconditional_directives()
        .map(|d| format!("{}={}", d.key, d.value))
        .collect();
    assert_eq!(directives, ["dtparam=spi=on", "dtoverlay=rak4631"]);

    let again = reconciler().merge_boot(&reloaded.document, &desired);
    assert!(!again.changed);
    let outcome = store.commit(&reloaded.fingerprint, &again.document).unwrap();
    assert_eq!(outcome, CommitOutcome::Unchanged);
}

#[test]
fn stock_config_is_preserved_around_the_managed_block() {
    let node = NodeFixture::new().with_boot(
        "# For more options and information see\n\
         # http://rptl.io/configtxt\n\
         \n\
         #dtparam=i2c_arm=on\n\
         dtparam=audio=on\n\
         \n\
         [cm4]\n\
         otg_mode=1\n\
         \n\
         [all]\n",
    );
    let store = node.store();
    let desired = assign(&[
        ("spi_enable", OptionValue::Flag(true)),
        ("i2c_enable", OptionValue::Flag(true)),
        ("hat_overlay", OptionValue::from("rak4631")),
    ]);

    let snap = store.load::<BootConfigDocument>().unwrap();
    let merged = reconciler().merge_boot(&snap.document, &desired);
    let outcome = store.commit(&snap.fingerprint, &merged.document).unwrap();
    assert!(matches!(
        &outcome,
        CommitOutcome::Committed { backup: Some(backup), .. } if backup.starts_with(node.backup_dir())
    ));

    insta::assert_snapshot!(node.read(&node.boot_path()), @r"
    # For more options and information see
    # http://rptl.io/configtxt

    #dtparam=i2c_arm=on
    dtparam=audio=on

    [cm4]
    otg_mode=1

    [all]

    # Managed by meshnode
    dtparam=spi=on
    dtparam=i2c_arm=on
    dtoverlay=rak4631
    ");
}

#[test]
fn switching_hat_rewrites_the_overlay_line_in_place() {
    let node = NodeFixture::new().with_boot("dtparam=spi=on\ndtoverlay=waveshare-sx126x\n");
    let store = node.store();
    let snap = store.load::<BootConfigDocument>().unwrap();
    let merged = reconciler().merge_boot(
        &snap.document,
        &assign(&[("hat_overlay", OptionValue::from("rak4631"))]),
    );
    store.commit(&snap.fingerprint, &merged.document).unwrap();
    assert_eq!(
        node.read(&node.boot_path()),
        "dtparam=spi=on\ndtoverlay=rak4631\n"
    );
}

#[test]
fn duplicate_managed_lines_collapse_to_one() {
    let node = NodeFixture::new().with_boot("enable_uart=0\n# note\nenable_uart=1\n");
    let store = node.store();
    let snap = store.load::<BootConfigDocument>().unwrap();
    let merged = reconciler().merge_boot(
        &snap.document,
        &assign(&[("uart_enable", OptionValue::Flag(true))]),
    );
    assert_eq!(merged.dropped_duplicates, 1);
    store.commit(&snap.fingerprint, &merged.document).unwrap();
    assert_eq!(node.read(&node.boot_path()), "enable_uart=1\n# note\n");
}

/// `(case, input, assignments, expected output)`.
const BOOT_EDGE_CASES: &[(&str, &str, &[(&str, &str)], &str)] = &[
    (
        "spi turned on in place",
        "dtparam=spi=off\n",
        &[("spi_enable", "on")],
        "dtparam=spi=on\n",
    ),
    (
        "spi off into an empty file",
        "",
        &[("spi_enable", "off")],
        "# Managed by meshnode\ndtparam=spi=off\n",
    ),
    (
        "i2c keeps indent and inline comment",
        "  dtparam=i2c_arm=off   # sensors\n",
        &[("i2c_enable", "true")],
        "  dtparam=i2c_arm=on   # sensors\n",
    ),
    (
        "uart only outside conditional sections",
        "[cm4]\nenable_uart=0\n[all]\nenable_uart=0\n",
        &[("uart_enable", "1")],
        "[cm4]\nenable_uart=0\n[all]\nenable_uart=1\n",
    ),
    (
        "uart overlay switched within its family",
        "dtoverlay=uart1\ndtoverlay=vc4-kms-v3d\n",
        &[("uart_overlay", "uart0")],
        "dtoverlay=uart0\ndtoverlay=vc4-kms-v3d\n",
    ),
    (
        "hat replaced and spi overlay at the end of its range",
        "dtoverlay=waveshare-sx126x # old hat\n",
        &[("hat_overlay", "rak4631"), ("spi_overlay", "spi0-2cs")],
        "dtoverlay=rak4631 # old hat\n\n# Managed by meshnode\ndtoverlay=spi0-2cs\n",
    ),
    (
        "gpio4 mode with an inner space",
        "gpio=4=op,dl\n",
        &[("gpio4_mode", "op, dh")],
        "gpio=4=op, dh\n",
    ),
    (
        "pps overlay with several parameters",
        "dtoverlay=pps-gpio,gpiopin=18\n",
        &[("pps_overlay", "pps-gpio,gpiopin=17,assert_falling_edge=true")],
        "dtoverlay=pps-gpio,gpiopin=17,assert_falling_edge=true\n",
    ),
    (
        "crlf file gets crlf lines",
        "dtparam=audio=on\r\n",
        &[("spi_enable", "on"), ("uart_enable", "0")],
        "dtparam=audio=on\r\n\r\n# Managed by meshnode\r\ndtparam=spi=on\r\nenable_uart=0\r\n",
    ),
    (
        "missing final newline",
        "dtparam=audio=on",
        &[("spi_enable", "on")],
        "dtparam=audio=on\n\n# Managed by meshnode\ndtparam=spi=on\n",
    ),
    (
        "existing managed block grows in place",
        "# Managed by meshnode\ndtparam=spi=on\n\n[pi4]\narm_boost=1\n",
        &[("spi_enable", "on"), ("i2c_enable", "on")],
        "# Managed by meshnode\ndtparam=spi=on\ndtparam=i2c_arm=on\n\n[pi4]\narm_boost=1\n",
    ),
    (
        "conditional tail gets an all section",
        "[pi4]\narm_boost=1\n",
        &[("spi_enable", "on")],
        "[pi4]\narm_boost=1\n\n[all]\n# Managed by meshnode\ndtparam=spi=on\n",
    ),
    (
        "duplicate lines collapse",
        "enable_uart=1\n#keep\nenable_uart=1\n",
        &[("uart_enable", "on")],
        "enable_uart=1\n#keep\n",
    ),
];

#[test]
fn every_boot_key_at_its_edges_merges_idempotently() {
    for &(case, input, pairs, expected) in BOOT_EDGE_CASES {
        let desired = parsed(pairs);
        let doc = BootConfigDocument::parse_str(input);

        let first = reconciler().merge_boot(&doc, &desired);
        assert!(first.is_clean(), "{case}: {:?}", first.conflicts);
        let once = first.document.render_text();
        assert_eq!(once, expected, "{case}");
        assert_untouched_lines_kept(case, input, &once, &desired);

        let second = reconciler().merge_boot(&BootConfigDocument::parse_str(&once), &desired);
        assert!(!second.changed, "{case}: second merge changed the file");
        let twice = second.document.render_text();
        assert_eq!(twice, once, "{case}");

        let third = reconciler().merge_boot(&BootConfigDocument::parse_str(&twice), &desired);
        assert!(!third.changed, "{case}: third merge changed the file");
        assert_eq!(third.document.render_text(), once, "{case}");
    }
}

#[test]
fn unreadable_boot_values_are_conflicts_and_leave_the_file_alone() {
    let input = "# stock\ngpio=4=op,dl\ndtoverlay=pps-gpio,gpiopin=18\n";
    let cases: &[(&str, &str)] = &[
        ("gpio4_mode", "op=dh"),
        ("gpio4_mode", "op,dh "),
        ("gpio4_mode", " op,dh"),
        ("gpio4_mode", ""),
        ("gpio4_mode", "op #dh"),
        ("pps_overlay", "pps-gpio,gpiopin=17\t"),
        ("pps_overlay", "gpio-pps"),
        ("hat_overlay", "lilygo"),
    ];
    for &(key, text) in cases {
        let desired = assign(&[(key, OptionValue::from(text))]);
        let doc = BootConfigDocument::parse_str(input);
        let merged = reconciler().merge_boot(&doc, &desired);
        assert_eq!(merged.conflicts.len(), 1, "{key}={text:?}");
        assert!(
            matches!(merged.conflicts[0].kind, ConflictKind::InvalidValue(_)),
            "{key}={text:?}"
        );
        assert!(merged.applied.is_empty(), "{key}={text:?}");
        assert!(!merged.changed, "{key}={text:?}");
        assert_eq!(merged.document.render_text(), input, "{key}={text:?}");
    }
}

// ---------------------------------------------------------------------------
// Service YAML
// ---------------------------------------------------------------------------

#[test]
fn region_is_added_and_siblings_untouched() {
    let node = NodeFixture::new().with_service("network:\n  wifi: true\nradio: {}\n");
    let store = node.store();
    let snap = store.load::<ServiceYamlDocument>().unwrap();
    let merged = reconciler().merge_service(
        &snap.document,
        &assign(&[("radio.region", OptionValue::from("US"))]),
    );
    assert!(merged.changed);
    store.commit(&snap.fingerprint, &merged.document).unwrap();

    let value: serde_yaml::Value =
        serde_yaml::from_str(&node.read(&node.service_path())).unwrap();
    let expected: serde_yaml::Value =
        serde_yaml::from_str("network:\n  wifi: true\nradio:\n  region: US\n").unwrap();
    assert_eq!(value, expected);

    let reloaded = store.load::<ServiceYamlDocument>().unwrap();
    let again = reconciler().merge_service(
        &reloaded.document,
        &assign(&[("radio.region", OptionValue::from("US"))]),
    );
    assert!(!again.changed);
}

#[test]
fn shape_conflict_does_not_block_other_keys() {
    let node = NodeFixture::new().with_service("radio: [sx1262]\nWebserver: {}\n");
    let store = node.store();
    let snap = store.load::<ServiceYamlDocument>().unwrap();
    let merged = reconciler().merge_service(
        &snap.document,
        &assign(&[
            ("radio.region", OptionValue::from("US")),
            ("Webserver.Port", OptionValue::Number(9443)),
        ]),
    );
    assert_eq!(merged.conflicts.len(), 1);
    assert_eq!(merged.conflicts[0].key, "radio.region");
    assert!(matches!(
        merged.conflicts[0].kind,
        ConflictKind::ShapeConflict { .. }
    ));
    assert_eq!(merged.applied, ["Webserver.Port"]);
    assert_eq!(
        merged.document.get("Webserver.Port"),
        Some(&serde_yaml::Value::from(9443))
    );
}

#[test]
fn unmodified_yaml_keeps_comments() {
    let text = "# operator notes\nradio:\n  region: US # keep me\n";
    let node = NodeFixture::new().with_service(text);
    let store = node.store();
    let snap = store.load::<ServiceYamlDocument>().unwrap();
    let merged = reconciler().merge_service(
        &snap.document,
        &assign(&[("radio.region", OptionValue::from("US"))]),
    );
    assert!(!merged.changed);
    let outcome = store.commit(&snap.fingerprint, &merged.document).unwrap();
    assert_eq!(outcome, CommitOutcome::Unchanged);
    assert_eq!(node.read(&node.service_path()), text);
}

/// `(case, input, assignments, expected output)`. Only the edited values
/// differ between input and expected output.
const YAML_EDIT_CASES: &[(&str, &str, &[(&str, &str)], &str)] = &[
    (
        "comments and flow nodes elsewhere",
        "# operator notes\nLogging:\n  LogLevel: info   # keep quiet\nGPS: {SerialPath: '/dev/ttyS0'}\nradio: {}\n",
        &[("radio.region", "US")],
        "# operator notes\nLogging:\n  LogLevel: info   # keep quiet\nGPS: {SerialPath: '/dev/ttyS0'}\nradio:\n  region: US\n",
    ),
    (
        "leaf replaced before its comment",
        "Lora:\n  Module: auto # chip\n  CS: 21\n",
        &[("Lora.Module", "sx1262")],
        "Lora:\n  Module: sx1262 # chip\n  CS: 21\n",
    ),
    (
        "new section after the last entry",
        "# top\nLora:\n  Module: sx1262\n\n# trailing note\n",
        &[("Webserver.Port", "8443")],
        "# top\nLora:\n  Module: sx1262\nWebserver:\n  Port: 8443\n\n# trailing note\n",
    ),
    (
        "sibling at the existing indent",
        "General:\n    MaxNodes: 50\n",
        &[("General.MaxMessageQueue", "100")],
        "General:\n    MaxNodes: 50\n    MaxMessageQueue: 100\n",
    ),
    (
        "crlf kept for inserted lines",
        "Lora:\r\n  Module: auto\r\n",
        &[("Logging.LogLevel", "debug")],
        "Lora:\r\n  Module: auto\r\nLogging:\r\n  LogLevel: debug\r\n",
    ),
    (
        "null parent filled in",
        "Webserver: ~   # defaults\n",
        &[("Webserver.Port", "9443")],
        "Webserver:   # defaults\n  Port: 9443\n",
    ),
    (
        "two edits under a document marker",
        "---\n# daemon\nLogging:\n  LogLevel: info\n  TraceFile: /tmp/t # dbg\nWebserver:\n  Port: 443\n",
        &[("Logging.LogLevel", "warn"), ("Webserver.Port", "9443")],
        "---\n# daemon\nLogging:\n  LogLevel: warn\n  TraceFile: /tmp/t # dbg\nWebserver:\n  Port: 9443\n",
    ),
];

#[test]
fn yaml_edits_keep_everything_else_byte_for_byte() {
    for &(case, input, pairs, expected) in YAML_EDIT_CASES {
        let desired = parsed(pairs);
        let doc = ServiceYamlDocument::parse_str(input).unwrap();

        let first = reconciler().merge_service(&doc, &desired);
        assert!(first.is_clean(), "{case}: {:?}", first.conflicts);
        assert!(first.changed, "{case}");
        assert!(first.document.is_pristine(), "{case}: fell back to a rewrite");
        let once = first.document.render().unwrap();
        assert_eq!(once, expected, "{case}");

        let reparsed = ServiceYamlDocument::parse_str(&once).unwrap();
        let second = reconciler().merge_service(&reparsed, &desired);
        assert!(!second.changed, "{case}: second merge changed the file");
        let twice = second.document.render().unwrap();
        assert_eq!(twice, once, "{case}");

        let third =
            reconciler().merge_service(&ServiceYamlDocument::parse_str(&twice).unwrap(), &desired);
        assert!(!third.changed, "{case}");
        assert_eq!(third.document.render().unwrap(), once, "{case}");
    }
}

#[test]
fn edit_through_a_flow_mapping_rewrites_the_file_once() {
    let input = "Lora: {Module: auto}\n# note\n";
    let desired = parsed(&[("Lora.Module", "sx1262")]);
    let doc = ServiceYamlDocument::parse_str(input).unwrap();

    let first = reconciler().merge_service(&doc, &desired);
    assert!(first.is_clean());
    assert!(!first.document.is_pristine());
    let once = first.document.render().unwrap();
    assert_eq!(once, "Lora:\n  Module: sx1262\n");

    let second =
        reconciler().merge_service(&ServiceYamlDocument::parse_str(&once).unwrap(), &desired);
    assert!(!second.changed);
    assert_eq!(second.document.render().unwrap(), once);
}

// ---------------------------------------------------------------------------
// Stale reads
// ---------------------------------------------------------------------------

#[test]
fn external_edit_between_load_and_commit_is_refused() {
    let node = NodeFixture::new().with_boot("dtparam=spi=off\n");
    let store = node.store();
    let snap = store.load::<BootConfigDocument>().unwrap();
    let merged = reconciler().merge_boot(
        &snap.document,
        &assign(&[("spi_enable", OptionValue::Flag(true))]),
    );

    std::fs::write(node.boot_path(), "dtparam=spi=off\ndtparam=audio=on\n").unwrap();
    let err = store.commit(&snap.fingerprint, &merged.document).unwrap_err();
    assert!(matches!(err, StoreError::StaleRead { .. }));
    assert_eq!(
        node.read(&node.boot_path()),
        "dtparam=spi=off\ndtparam=audio=on\n"
    );
}

#[test]
fn file_created_after_template_load_is_refused() {
    let node = NodeFixture::new();
    let store = node.store();
    let snap = store.load_or_template::<ServiceYamlDocument>().unwrap();
    let merged = reconciler().merge_service(
        &snap.document,
        &assign(&[("radio.region", OptionValue::from("EU_868"))]),
    );

    std::fs::write(node.service_path(), "radio: {}\n").unwrap();
    assert!(matches!(
        store.commit(&snap.fingerprint, &merged.document),
        Err(StoreError::StaleRead { .. })
    ));
}
