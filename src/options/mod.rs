//! Option model: every configuration key meshnode is allowed to manage.
//!
//! Each [`ConfigKey`] names the artifact it lives in, its value type, and a
//! default. Boot keys also carry the [`BootDirective`] that maps them onto a
//! `config.txt` line; service keys use their dotted name as the YAML path.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::OptionError;
use crate::store::ArtifactId;

/// How a boolean flag is spelled in the boot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagStyle {
    /// `on` / `off`
    OnOff,
    /// `1` / `0`
    OneZero,
}

impl FlagStyle {
    /// Text for a flag value in this style.
    #[must_use]
    pub const fn render(self, value: bool) -> &'static str {
        match (self, value) {
            (Self::OnOff, true) => "on",
            (Self::OnOff, false) => "off",
            (Self::OneZero, true) => "1",
            (Self::OneZero, false) => "0",
        }
    }
}

/// Declared type of a key's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Boolean flag.
    Flag(FlagStyle),
    /// One of a fixed set of strings.
    Choice(&'static [&'static str]),
    /// Integer within an inclusive range.
    Number {
        /// Smallest allowed value.
        min: i64,
        /// Largest allowed value.
        max: i64,
    },
    /// Free single-line text.
    Text,
}

impl ValueType {
    /// Human-readable description of allowed values.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Flag(_) => "a boolean (true/false)".to_string(),
            Self::Choice(choices) => format!("one of: {}", choices.join(", ")),
            Self::Number { min, max } => format!("an integer between {min} and {max}"),
            Self::Text => "single-line text".to_string(),
        }
    }
}

/// How a boot key maps onto a `config.txt` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDirective {
    /// `name=value`, e.g. `enable_uart=1`.
    Setting {
        /// Directive key.
        name: &'static str,
    },
    /// `directive=name=value`, e.g. `dtparam=spi=on`.
    Param {
        /// Directive key, e.g. `dtparam` or `gpio`.
        directive: &'static str,
        /// Parameter name.
        name: &'static str,
    },
    /// `dtoverlay=value` where the overlay name belongs to `family`.
    Overlay {
        /// Overlay names recognised as this key.
        family: &'static [&'static str],
    },
}

impl BootDirective {
    /// Whether a directive line with `key` and `value` is this key's line.
    ///
    /// A `Param` line only matches when it sets a single parameter, so
    /// combined lines such as `dtparam=i2c_arm=on,spi=on` stay untouched.
    #[must_use]
    pub fn matches(&self, key: &str, value: &str) -> bool {
        match self {
            Self::Setting { name } => key == *name,
            Self::Param { directive, name } => {
                key == *directive
                    && value
                        .split_once('=')
                        .is_some_and(|(param, rest)| param == *name && !rest.contains('='))
            }
            Self::Overlay { family } => {
                key == "dtoverlay" && family.iter().any(|f| *f == overlay_name(value))
            }
        }
    }

    /// The `(key, value)` pair written for a rendered value.
    #[must_use]
    pub fn line_parts(&self, rendered: &str) -> (&'static str, String) {
        match self {
            Self::Setting { name } => (*name, rendered.to_string()),
            Self::Param { directive, name } => (*directive, format!("{name}={rendered}")),
            Self::Overlay { .. } => ("dtoverlay", rendered.to_string()),
        }
    }

    /// Extract this key's value from a matching line's value.
    #[must_use]
    pub fn value_from<'a>(&self, line_value: &'a str) -> &'a str {
        match self {
            Self::Param { .. } => line_value
                .split_once('=')
                .map_or(line_value, |(_, rest)| rest),
            Self::Setting { .. } | Self::Overlay { .. } => line_value,
        }
    }
}

/// Overlay name: the text before the first `,`.
fn overlay_name(value: &str) -> &str {
    value.split(',').next().unwrap_or(value).trim()
}

/// Which artifact a key lives in, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTarget {
    /// A line of the boot options file.
    Boot(BootDirective),
    /// The key's dotted name inside the service YAML.
    Yaml,
}

/// A single manageable setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigKey {
    /// Unique key name.
    pub name: &'static str,
    /// One-line description shown by `meshnode keys`.
    pub description: &'static str,
    /// Declared value type.
    pub value_type: ValueType,
    /// Default value, as CLI text.
    pub default: &'static str,
    /// Where the key is stored.
    pub target: KeyTarget,
}

impl ConfigKey {
    /// Artifact that owns this key.
    #[must_use]
    pub const fn artifact(&self) -> ArtifactId {
        match self.target {
            KeyTarget::Boot(_) => ArtifactId::BootConfig,
            KeyTarget::Yaml => ArtifactId::ServiceYaml,
        }
    }

    /// Text written to the boot file for `value`.
    #[must_use]
    pub fn render_boot_value(&self, value: &OptionValue) -> String {
        match (self.value_type, value) {
            (ValueType::Flag(style), OptionValue::Flag(b)) => style.render(*b).to_string(),
            _ => value.to_string(),
        }
    }
}

/// A typed value for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Boolean flag.
    Flag(bool),
    /// Integer.
    Number(i64),
    /// Text (choices and free text).
    Text(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        Self::Flag(b)
    }
}

impl From<i64> for OptionValue {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Desired values by key name, ordered by name.
pub type Assignments = BTreeMap<String, OptionValue>;

const SPI_OVERLAYS: &[&str] = &["spi0-0cs", "spi0-1cs", "spi0-2cs"];
const UART_OVERLAYS: &[&str] = &["uart0", "uart1", "uart2", "uart3", "uart4", "uart5"];
/// Device-tree overlays of the supported radio HATs.
pub const HAT_OVERLAYS: &[&str] = &[
    "rak4631",
    "meshadv-mini",
    "waveshare-sx126x",
    "adafruit-rfm9x",
    "ebyte-e22",
];
const PPS_OVERLAYS: &[&str] = &["pps-gpio"];

/// LoRa region codes accepted by the daemon.
pub const REGIONS: &[&str] = &[
    "US", "EU_868", "EU_433", "ANZ", "CN", "IN", "JP", "KR", "MY_433", "MY_919", "RU", "SG_923",
    "TH", "TW", "UA_433", "UA_868", "UNSET",
];

const RADIO_MODULES: &[&str] = &[
    "auto", "sx1262", "sx1268", "sx1280", "RF95", "lr1110", "lr1120", "lr1121", "llcc68",
];

const LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error"];

const BUILTIN_KEYS: &[ConfigKey] = &[
    ConfigKey {
        name: "spi_enable",
        description: "Enable the SPI bus used by the radio",
        value_type: ValueType::Flag(FlagStyle::OnOff),
        default: "true",
        target: KeyTarget::Boot(BootDirective::Param {
            directive: "dtparam",
            name: "spi",
        }),
    },
    ConfigKey {
        name: "spi_overlay",
        description: "SPI chip-select overlay",
        value_type: ValueType::Choice(SPI_OVERLAYS),
        default: "spi0-0cs",
        target: KeyTarget::Boot(BootDirective::Overlay {
            family: SPI_OVERLAYS,
        }),
    },
    ConfigKey {
        name: "i2c_enable",
        description: "Enable the I2C bus for displays and sensors",
        value_type: ValueType::Flag(FlagStyle::OnOff),
        default: "true",
        target: KeyTarget::Boot(BootDirective::Param {
            directive: "dtparam",
            name: "i2c_arm",
        }),
    },
    ConfigKey {
        name: "uart_enable",
        description: "Enable the primary UART",
        value_type: ValueType::Flag(FlagStyle::OneZero),
        default: "false",
        target: KeyTarget::Boot(BootDirective::Setting {
            name: "enable_uart",
        }),
    },
    ConfigKey {
        name: "uart_overlay",
        description: "UART overlay (Pi 5 needs uart0 for GPS)",
        value_type: ValueType::Choice(UART_OVERLAYS),
        default: "uart0",
        target: KeyTarget::Boot(BootDirective::Overlay {
            family: UART_OVERLAYS,
        }),
    },
    ConfigKey {
        name: "hat_overlay",
        description: "Device-tree overlay of the radio HAT",
        value_type: ValueType::Choice(HAT_OVERLAYS),
        default: "rak4631",
        target: KeyTarget::Boot(BootDirective::Overlay {
            family: HAT_OVERLAYS,
        }),
    },
    ConfigKey {
        name: "gpio4_mode",
        description: "GPIO 4 mode, e.g. op,dh to power the radio",
        value_type: ValueType::Text,
        default: "op,dh",
        target: KeyTarget::Boot(BootDirective::Param {
            directive: "gpio",
            name: "4",
        }),
    },
    ConfigKey {
        name: "pps_overlay",
        description: "GPS pulse-per-second overlay with parameters",
        value_type: ValueType::Text,
        default: "pps-gpio,gpiopin=17",
        target: KeyTarget::Boot(BootDirective::Overlay {
            family: PPS_OVERLAYS,
        }),
    },
    ConfigKey {
        name: "radio.region",
        description: "LoRa region code",
        value_type: ValueType::Choice(REGIONS),
        default: "UNSET",
        target: KeyTarget::Yaml,
    },
    ConfigKey {
        name: "Lora.Module",
        description: "Radio chip driver",
        value_type: ValueType::Choice(RADIO_MODULES),
        default: "auto",
        target: KeyTarget::Yaml,
    },
    ConfigKey {
        name: "Logging.LogLevel",
        description: "Daemon log level",
        value_type: ValueType::Choice(LOG_LEVELS),
        default: "info",
        target: KeyTarget::Yaml,
    },
    ConfigKey {
        name: "Webserver.Port",
        description: "HTTPS port of the built-in web server",
        value_type: ValueType::Number { min: 1, max: 65535 },
        default: "9443",
        target: KeyTarget::Yaml,
    },
    ConfigKey {
        name: "Webserver.RootPath",
        description: "Directory the web client is served from",
        value_type: ValueType::Text,
        default: "/usr/share/meshtasticd/web",
        target: KeyTarget::Yaml,
    },
    ConfigKey {
        name: "General.MaxNodes",
        description: "Maximum nodes kept in the node database",
        value_type: ValueType::Number { min: 1, max: 1000 },
        default: "200",
        target: KeyTarget::Yaml,
    },
    ConfigKey {
        name: "General.MaxMessageQueue",
        description: "Outgoing message queue length",
        value_type: ValueType::Number { min: 1, max: 1000 },
        default: "100",
        target: KeyTarget::Yaml,
    },
];

/// The set of keys meshnode manages.
#[derive(Debug, Clone, Copy)]
pub struct OptionModel {
    keys: &'static [ConfigKey],
}

impl OptionModel {
    /// The built-in key set.
    #[must_use]
    pub const fn builtin() -> Self {
        Self { keys: BUILTIN_KEYS }
    }

    /// Every key, in declaration order.
    #[must_use]
    pub const fn keys(&self) -> &'static [ConfigKey] {
        self.keys
    }

    /// Keys owned by `artifact`, in declaration order.
    pub fn keys_for(&self, artifact: ArtifactId) -> impl Iterator<Item = &'static ConfigKey> {
        self.keys.iter().filter(move |k| k.artifact() == artifact)
    }

    /// Look up a key by name.
    ///
    /// # Errors
    ///
    /// Returns [`OptionError::UnknownKey`] if no such key is declared.
    pub fn key(&self, name: &str) -> Result<&'static ConfigKey, OptionError> {
        self.keys
            .iter()
            .find(|k| k.name == name)
            .ok_or_else(|| OptionError::UnknownKey(name.to_string()))
    }

    /// Check `value` against the key's declared type.
    ///
    /// # Errors
    ///
    /// Returns [`OptionError::InvalidValue`] listing the allowed values when
    /// `value` has the wrong type or is out of range.
    pub fn validate(&self, key: &ConfigKey, value: &OptionValue) -> Result<(), OptionError> {
        let ok = match (&key.value_type, value) {
            (ValueType::Flag(_), OptionValue::Flag(_)) => true,
            (ValueType::Choice(choices), OptionValue::Text(s)) => choices.iter().any(|c| c == s),
            (ValueType::Number { min, max }, OptionValue::Number(n)) => (*min..=*max).contains(n),
            (ValueType::Text, OptionValue::Text(s)) => text_is_valid(key, s),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(OptionError::InvalidValue {
                key: key.name.to_string(),
                value: value.to_string(),
                allowed: allowed_for(key),
            })
        }
    }

    /// Convert CLI text into a typed value for `key_name` and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`OptionError::UnknownKey`] for undeclared keys and
    /// [`OptionError::InvalidValue`] when the text does not convert or
    /// validate.
    pub fn parse_value(&self, key_name: &str, text: &str) -> Result<OptionValue, OptionError> {
        let key = self.key(key_name)?;
        let invalid = || OptionError::InvalidValue {
            key: key.name.to_string(),
            value: text.to_string(),
            allowed: allowed_for(key),
        };
        let value = match key.value_type {
            ValueType::Flag(_) => OptionValue::Flag(parse_flag(text).ok_or_else(invalid)?),
            ValueType::Number { .. } => {
                OptionValue::Number(text.trim().parse().map_err(|_| invalid())?)
            }
            ValueType::Choice(_) | ValueType::Text => OptionValue::Text(text.to_string()),
        };
        self.validate(key, &value)?;
        Ok(value)
    }

    /// Split assignments by owning artifact. Unknown names are returned
    /// separately.
    #[must_use]
    pub fn split_by_artifact(&self, assignments: &Assignments) -> SplitAssignments {
        let mut split = SplitAssignments::default();
        for (name, value) in assignments {
            match self.key(name) {
                Ok(key) => match key.artifact() {
                    ArtifactId::BootConfig => split.boot.insert(name.clone(), value.clone()),
                    ArtifactId::ServiceYaml => split.service.insert(name.clone(), value.clone()),
                },
                Err(_) => split.unknown.insert(name.clone(), value.clone()),
            };
        }
        split
    }
}

impl Default for OptionModel {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Assignments grouped by the artifact that owns each key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitAssignments {
    /// Boot config keys.
    pub boot: Assignments,
    /// Service YAML keys.
    pub service: Assignments,
    /// Names not declared in the model.
    pub unknown: Assignments,
}

fn parse_flag(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "1" | "yes" => Some(true),
        "false" | "off" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Boot values must read back unchanged from the line they are written to:
/// the line parser splits off surrounding whitespace and ` #` comments, and
/// a `Param` line only matches while its value holds no further `=`.
fn text_is_valid(key: &ConfigKey, text: &str) -> bool {
    if text.contains(['\n', '\r']) {
        return false;
    }
    match key.target {
        KeyTarget::Boot(directive) => {
            let shape_ok = match directive {
                BootDirective::Overlay { family } => {
                    family.iter().any(|f| *f == overlay_name(text))
                }
                BootDirective::Param { .. } => !text.contains('='),
                BootDirective::Setting { .. } => true,
            };
            shape_ok && !text.contains('#') && !text.is_empty() && text.trim() == text
        }
        KeyTarget::Yaml => true,
    }
}

fn allowed_for(key: &ConfigKey) -> String {
    match (key.value_type, key.target) {
        (ValueType::Text, KeyTarget::Boot(BootDirective::Overlay { family })) => {
            format!("an overlay named {} with optional parameters", family.join(" or "))
        }
        (ValueType::Text, KeyTarget::Boot(BootDirective::Param { .. })) => {
            "non-empty single-line text without '#', '=' or surrounding spaces".to_string()
        }
        (ValueType::Text, KeyTarget::Boot(_)) => {
            "non-empty single-line text without '#' or surrounding spaces".to_string()
        }
        (value_type, _) => value_type.describe(),
    }
}
