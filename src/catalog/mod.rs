//! Fixed registry of supported radio HAT profiles.
//!
//! A profile is a named bundle of option assignments. Profiles are static
//! data; selecting one never mutates it.

use crate::error::CatalogError;
use crate::options::{Assignments, OptionModel};

/// One supported hardware attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    /// Profile name used on the command line.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Case-insensitive substrings of the HAT EEPROM product or vendor
    /// strings that identify this profile.
    pub detect: &'static [&'static str],
    /// Key name and value text pairs applied by this profile.
    pub settings: &'static [(&'static str, &'static str)],
}

const PROFILES: &[Profile] = &[
    Profile {
        name: "meshadv-mini",
        description: "MeshAdv Mini (E22-900M22S) with GPS",
        detect: &["meshadv mini", "meshadv-mini"],
        settings: &[
            ("spi_enable", "on"),
            ("i2c_enable", "on"),
            ("hat_overlay", "meshadv-mini"),
            ("gpio4_mode", "op,dh"),
            ("uart_enable", "on"),
            ("pps_overlay", "pps-gpio,gpiopin=17"),
            ("Lora.Module", "sx1262"),
        ],
    },
    Profile {
        name: "meshadv-pi-hat",
        description: "MeshAdv Pi Hat (E22 1W module)",
        detect: &["meshadv pi hat", "meshadv-pi"],
        settings: &[
            ("spi_enable", "on"),
            ("hat_overlay", "ebyte-e22"),
            ("Lora.Module", "sx1262"),
        ],
    },
    Profile {
        name: "rak4631",
        description: "RAKwireless WisBlock RAK4631 Pi HAT",
        detect: &["rakwireless", "rak4631", "wisblock"],
        settings: &[
            ("spi_enable", "on"),
            ("i2c_enable", "on"),
            ("hat_overlay", "rak4631"),
            ("Lora.Module", "sx1262"),
        ],
    },
    Profile {
        name: "waveshare-sx126x",
        description: "Waveshare SX126x LoRa HAT",
        detect: &["waveshare"],
        settings: &[
            ("spi_enable", "on"),
            ("hat_overlay", "waveshare-sx126x"),
            ("Lora.Module", "sx1262"),
        ],
    },
    Profile {
        name: "adafruit-rfm9x",
        description: "Adafruit RFM95W LoRa Radio Bonnet",
        detect: &["adafruit", "rfm9"],
        settings: &[
            ("spi_enable", "on"),
            ("spi_overlay", "spi0-1cs"),
            ("hat_overlay", "adafruit-rfm9x"),
            ("Lora.Module", "RF95"),
        ],
    },
];

/// Profiles bound to the option model that validates them.
#[derive(Debug, Clone, Copy)]
pub struct ProfileCatalog {
    model: OptionModel,
    profiles: &'static [Profile],
}

impl ProfileCatalog {
    /// The built-in catalog.
    #[must_use]
    pub const fn builtin(model: OptionModel) -> Self {
        Self {
            model,
            profiles: PROFILES,
        }
    }

    /// Every profile, in catalog order.
    #[must_use]
    pub const fn list_profiles(&self) -> &'static [Profile] {
        self.profiles
    }

    /// Look up a profile by name.
    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&'static Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Typed assignments for the named profile.
    ///
    /// # Errors
    ///
    /// * [`CatalogError::UnknownProfile`] when no profile has this name.
    /// * [`CatalogError::InvalidProfile`] when an entry fails validation.
    pub fn resolve(&self, name: &str) -> Result<Assignments, CatalogError> {
        let profile = self
            .profile(name)
            .ok_or_else(|| CatalogError::UnknownProfile {
                name: name.to_string(),
                available: self
                    .profiles
                    .iter()
                    .map(|p| p.name)
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;
        profile
            .settings
            .iter()
            .map(|(key, text)| {
                let value = self.model.parse_value(key, text).map_err(|source| {
                    CatalogError::InvalidProfile {
                        name: profile.name.to_string(),
                        source,
                    }
                })?;
                Ok(((*key).to_string(), value))
            })
            .collect()
    }

    /// The profile identified by HAT EEPROM strings, if exactly one matches.
    #[must_use]
    pub fn detect(&self, product: &str, vendor: &str) -> Option<&'static Profile> {
        let haystack = format!("{product} {vendor}").to_lowercase();
        let mut matches = self
            .profiles
            .iter()
            .filter(|p| p.detect.iter().any(|hint| haystack.contains(hint)));
        let first = matches.next()?;
        matches.next().is_none().then_some(first)
    }
}
