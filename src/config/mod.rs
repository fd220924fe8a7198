//! Operator settings: file locations, install channel, and the default
//! option selection.
//!
//! Settings come from an optional TOML file (see [`DEFAULT_SETTINGS_PATH`]);
//! every field has a default so a missing file or a partial one is fine.
//! Command-line flags override individual fields after loading.
pub mod toml_loader;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::options::{Assignments, OptionModel, OptionValue};

/// Where the settings file is looked up when `--settings` is not given.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/meshnode/settings.toml";

/// All operator settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Artifact and state file locations.
    pub paths: Paths,
    /// Package installation options.
    pub install: InstallSettings,
    /// Default option selection.
    pub selection: SelectionSettings,
}

/// Artifact and state file locations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    /// Boot options file.
    pub boot_config: PathBuf,
    /// Daemon YAML configuration.
    pub service_config: PathBuf,
    /// Persisted step record.
    pub state_file: PathBuf,
    /// Directory receiving a copy of each artifact before it is replaced;
    /// `None` disables backups.
    pub backup_dir: Option<PathBuf>,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            boot_config: PathBuf::from("/boot/firmware/config.txt"),
            service_config: PathBuf::from("/etc/meshtasticd/config.yaml"),
            state_file: PathBuf::from("/var/lib/meshnode/steps.json"),
            backup_dir: Some(PathBuf::from("/etc/meshtasticd_backups")),
        }
    }
}

/// Release channel of the daemon package repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Tested releases.
    #[default]
    Beta,
    /// Pre-releases.
    Alpha,
    /// Nightly builds.
    Daily,
}

impl Channel {
    /// Every channel.
    pub const ALL: [Self; 3] = [Self::Beta, Self::Alpha, Self::Daily];

    /// Lowercase name used in repository paths.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Beta => "beta",
            Self::Alpha => "alpha",
            Self::Daily => "daily",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Package installation options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallSettings {
    /// Package repository channel.
    pub channel: Channel,
    /// Distribution directory in the package repository.
    pub os_version: String,
    /// Prefix privileged commands with `sudo`.
    pub use_sudo: bool,
    /// Include the step that opens the daemon config in a desktop editor.
    pub open_editor: bool,
    /// Seconds to wait before retrying an `apt-get` call blocked by a lock.
    pub apt_retry_secs: u64,
    /// Bundled board config to enable from `available.d`, replacing any other
    /// in `config.d`. Chosen from the HAT overlay when unset.
    pub hat_config: Option<String>,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            channel: Channel::Beta,
            os_version: "Raspbian_12".to_string(),
            use_sudo: true,
            open_editor: false,
            apt_retry_secs: 10,
            hat_config: None,
        }
    }
}

/// Default option selection, layered under the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionSettings {
    /// HAT profile name.
    pub hat: Option<String>,
    /// Extra key assignments; keys with dots must be quoted in TOML.
    pub options: BTreeMap<String, OptionValue>,
}

impl SelectionSettings {
    /// Convert `options` into validated assignments.
    ///
    /// Values are re-parsed from their text form, so `"on"` and `true` are
    /// both accepted for flags.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unknown key or invalid value.
    pub fn assignments(&self, model: &OptionModel) -> Result<Assignments> {
        self.options
            .iter()
            .map(|(name, value)| {
                let parsed = model
                    .parse_value(name, &value.to_string())
                    .context("in [selection.options] of the settings file")?;
                Ok((name.clone(), parsed))
            })
            .collect()
    }
}

impl Settings {
    /// Load settings from `path`, or from [`DEFAULT_SETTINGS_PATH`].
    ///
    /// A missing default file yields the defaults; an explicitly named
    /// file must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an explicit
    /// `path` does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                anyhow::ensure!(p.exists(), "settings file not found: {}", p.display());
                toml_loader::load_config(p)
            }
            None => toml_loader::load_config(Path::new(DEFAULT_SETTINGS_PATH)),
        }
    }
}
