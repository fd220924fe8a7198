//! Board and HAT detection from the device tree.
use std::fmt;
use std::path::Path;

use crate::options::{Assignments, OptionValue};

/// Where the kernel exposes the device tree.
pub const DEVICE_TREE: &str = "/proc/device-tree";

/// Vendor and product strings from a HAT's identification EEPROM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HatInfo {
    /// `hat/vendor`, or `"Unknown"` if only the product is present.
    pub vendor: String,
    /// `hat/product`, or `"Unknown"` if only the vendor is present.
    pub product: String,
}

/// Detected hardware.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hardware {
    /// Board model string, e.g. `Raspberry Pi 5 Model B Rev 1.0`.
    pub model: Option<String>,
    /// Attached HAT, if it carries an EEPROM.
    pub hat: Option<HatInfo>,
}

impl Hardware {
    /// Detect hardware from the running kernel's device tree.
    #[must_use]
    pub fn detect() -> Self {
        Self::detect_in(Path::new(DEVICE_TREE))
    }

    /// Detect hardware from a device tree rooted at `root`.
    ///
    /// Unreadable or missing nodes are treated as absent.
    #[must_use]
    pub fn detect_in(root: &Path) -> Self {
        let model = read_node(&root.join("model"));
        let product = read_node(&root.join("hat/product"));
        let vendor = read_node(&root.join("hat/vendor"));
        let hat = (product.is_some() || vendor.is_some()).then(|| HatInfo {
            vendor: vendor.unwrap_or_else(|| "Unknown".to_string()),
            product: product.unwrap_or_else(|| "Unknown".to_string()),
        });
        tracing::debug!("detected model {model:?}, hat {hat:?}");
        Self { model, hat }
    }

    /// Whether the board is a Raspberry Pi 5.
    #[must_use]
    pub fn is_pi5(&self) -> bool {
        self.model
            .as_deref()
            .is_some_and(|m| m.contains("Raspberry Pi 5"))
    }

    /// Board-specific adjustments to a selection.
    ///
    /// The Pi 5 routes the GPIO header UART through `uart0`, so enabling the
    /// UART there also selects that overlay unless one was chosen. Other
    /// boards get no UART overlay unless one was chosen explicitly.
    pub fn apply_board_rules(&self, selection: &mut Assignments, explicit: &Assignments) {
        let uart_on = selection.get("uart_enable") == Some(&OptionValue::Flag(true));
        if self.is_pi5() && uart_on {
            selection
                .entry("uart_overlay".to_string())
                .or_insert_with(|| OptionValue::from("uart0"));
        } else if !explicit.contains_key("uart_overlay") {
            selection.remove("uart_overlay");
        }
    }
}

impl fmt::Display for Hardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.model.as_deref().unwrap_or("Unknown board"))?;
        match &self.hat {
            Some(hat) => write!(f, " with {} {}", hat.vendor, hat.product),
            None => write!(f, ", no HAT EEPROM"),
        }
    }
}

/// Read a device-tree string node, dropping NUL terminators and whitespace.
fn read_node(path: &Path) -> Option<String> {
    let raw = std::fs::read(path).ok()?;
    let text = String::from_utf8_lossy(&raw).replace('\0', "");
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Whether an interactive display session is available.
#[must_use]
pub fn display_available() -> bool {
    display_available_with(|name| std::env::var_os(name))
}

fn display_available_with(var: impl Fn(&str) -> Option<std::ffi::OsString>) -> bool {
    ["DISPLAY", "WAYLAND_DISPLAY"]
        .iter()
        .any(|name| var(name).is_some_and(|v| !v.is_empty()))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn tree(model: &str, hat: Option<(&str, &str)>) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model"), format!("{model}\0")).unwrap();
        if let Some((vendor, product)) = hat {
            std::fs::create_dir(dir.path().join("hat")).unwrap();
            std::fs::write(dir.path().join("hat/vendor"), format!("{vendor}\0")).unwrap();
            std::fs::write(dir.path().join("hat/product"), format!("{product}\0")).unwrap();
        }
        dir
    }

    #[test]
    fn detects_model_and_hat_without_nul() {
        let dir = tree(
            "Raspberry Pi 5 Model B Rev 1.0",
            Some(("RAKwireless", "RAK6421 WisBlock Pi HAT")),
        );
        let hw = Hardware::detect_in(dir.path());
        assert_eq!(hw.model.as_deref(), Some("Raspberry Pi 5 Model B Rev 1.0"));
        let hat = hw.hat.as_ref().unwrap();
        assert_eq!(hat.vendor, "RAKwireless");
        assert!(hw.is_pi5());
        assert_eq!(
            hw.to_string(),
            "Raspberry Pi 5 Model B Rev 1.0 with RAKwireless RAK6421 WisBlock Pi HAT"
        );
    }

    #[test]
    fn missing_tree_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let hw = Hardware::detect_in(&dir.path().join("absent"));
        assert_eq!(hw, Hardware::default());
        assert!(!hw.is_pi5());
        assert_eq!(hw.to_string(), "Unknown board, no HAT EEPROM");
    }

    #[test]
    fn pi4_is_not_pi5() {
        let dir = tree("Raspberry Pi 4 Model B Rev 1.4", None);
        assert!(!Hardware::detect_in(dir.path()).is_pi5());
    }

    fn selection(pairs: &[(&str, OptionValue)]) -> Assignments {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn pi5_with_uart_gets_uart0_overlay() {
        let hw = Hardware {
            model: Some("Raspberry Pi 5 Model B".to_string()),
            hat: None,
        };
        let mut s = selection(&[("uart_enable", OptionValue::Flag(true))]);
        hw.apply_board_rules(&mut s, &Assignments::new());
        assert_eq!(s.get("uart_overlay"), Some(&OptionValue::from("uart0")));
    }

    #[test]
    fn other_boards_drop_implicit_uart_overlay() {
        let hw = Hardware::default();
        let mut s = selection(&[
            ("uart_enable", OptionValue::Flag(true)),
            ("uart_overlay", OptionValue::from("uart0")),
        ]);
        hw.apply_board_rules(&mut s, &Assignments::new());
        assert!(!s.contains_key("uart_overlay"));

        let explicit = selection(&[("uart_overlay", OptionValue::from("uart3"))]);
        let mut s = explicit.clone();
        hw.apply_board_rules(&mut s, &explicit);
        assert_eq!(s.get("uart_overlay"), Some(&OptionValue::from("uart3")));
    }

    #[test]
    fn display_detection() {
        let none = |_: &str| None;
        assert!(!display_available_with(none));
        let empty = |_: &str| Some(OsString::new());
        assert!(!display_available_with(empty));
        let wayland = |n: &str| (n == "WAYLAND_DISPLAY").then(|| OsString::from("wayland-0"));
        assert!(display_available_with(wayland));
    }
}
