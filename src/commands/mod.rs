pub mod apply;
pub mod avahi;
pub mod catalog;
pub mod install;
pub mod remove;
pub mod service;
pub mod status;
pub mod steps;
pub mod version;

use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::catalog::ProfileCatalog;
use crate::cli::{GlobalOpts, PrivilegeOpts, SelectionOpts};
use crate::config::{InstallSettings, Settings};
use crate::exec::{Executor, SystemExecutor};
use crate::logging::{Log, Logger};
use crate::options::{Assignments, OptionModel};
use crate::platform::{self, Hardware};
use crate::steps::StepContext;
use crate::store::ArtifactStore;

/// Shared state produced by the common command setup sequence.
///
/// Loads the settings file, applies the global command-line overrides, and
/// detects the hardware so that each command does not have to repeat the
/// boilerplate.
#[derive(Debug)]
pub struct CommandSetup {
    /// Settings with command-line overrides applied.
    pub settings: Settings,
    /// Detected board and HAT.
    pub hardware: Hardware,
    /// Preview mode.
    pub dry_run: bool,
}

impl CommandSetup {
    /// Load settings and detect hardware.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file cannot be read or parsed.
    pub fn init(global: &GlobalOpts, log: &Logger) -> Result<Self> {
        Self::with_hardware(global, Hardware::detect(), log)
    }

    /// [`CommandSetup::init`] with already-detected hardware.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file cannot be read or parsed.
    pub fn with_hardware(global: &GlobalOpts, hardware: Hardware, log: &Logger) -> Result<Self> {
        let mut settings =
            Settings::load(global.settings.as_deref()).context("loading settings")?;
        apply_overrides(&mut settings, global);
        log.debug(&format!("boot config: {}", settings.paths.boot_config.display()));
        log.debug(&format!(
            "service config: {}",
            settings.paths.service_config.display()
        ));
        log.debug(&format!("hardware: {hardware}"));
        Ok(Self {
            settings,
            hardware,
            dry_run: global.dry_run,
        })
    }

    /// The artifact store for the configured paths.
    #[must_use]
    pub fn store(&self) -> ArtifactStore {
        let paths = &self.settings.paths;
        ArtifactStore::new(&paths.boot_config, &paths.service_config)
            .with_backup_dir(paths.backup_dir.clone())
    }

    /// Install settings with `--no-sudo` applied.
    #[must_use]
    pub fn install_settings(&self, privilege: &PrivilegeOpts) -> InstallSettings {
        let mut install = self.settings.install.clone();
        if privilege.no_sudo {
            install.use_sudo = false;
        }
        install
    }

    /// A step context that runs real commands.
    #[must_use]
    pub fn step_context(
        &self,
        install: InstallSettings,
        selection: Assignments,
        log: &Arc<Logger>,
    ) -> StepContext {
        StepContext {
            store: self.store(),
            selection,
            install,
            executor: Arc::new(SystemExecutor) as Arc<dyn Executor>,
            log: Arc::clone(log) as Arc<dyn Log>,
            dry_run: self.dry_run,
            display_available: platform::display_available(),
        }
    }

    /// Build the desired assignments.
    ///
    /// Layers, lowest first: the HAT profile, the settings file's
    /// `[selection.options]`, then `--region` and `--set`. The profile is
    /// `--hat`, else the settings file's `hat`, else the one matching the
    /// HAT EEPROM. Board rules run last.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown profile, key, or invalid value.
    pub fn build_selection(&self, opts: &SelectionOpts, log: &Logger) -> Result<Assignments> {
        let model = OptionModel::builtin();
        let catalog = ProfileCatalog::builtin(model);

        let profile = opts
            .hat
            .clone()
            .or_else(|| self.settings.selection.hat.clone())
            .or_else(|| {
                let hat = self.hardware.hat.as_ref()?;
                let found = catalog.detect(&hat.product, &hat.vendor)?;
                log.info(&format!("detected HAT profile: {}", found.name));
                Some(found.name.to_string())
            });

        let mut selection = match &profile {
            Some(name) => catalog.resolve(name)?,
            None => {
                log.warn("no HAT profile selected or detected; use --hat to pick one");
                Assignments::new()
            }
        };

        let mut explicit = self.settings.selection.assignments(&model)?;
        if let Some(region) = &opts.region {
            explicit.insert(
                "radio.region".to_string(),
                model.parse_value("radio.region", region)?,
            );
        }
        for (key, text) in &opts.set {
            let value = model
                .parse_value(key, text)
                .with_context(|| format!("--set {key}={text}"))?;
            explicit.insert(key.clone(), value);
        }

        selection.extend(explicit.clone());
        self.hardware.apply_board_rules(&mut selection, &explicit);
        log.debug(&format!("selection has {} key(s)", selection.len()));
        Ok(selection)
    }
}

/// Apply the global path flags on top of the settings file.
fn apply_overrides(settings: &mut Settings, global: &GlobalOpts) {
    let paths = &mut settings.paths;
    if let Some(p) = &global.boot_config {
        paths.boot_config.clone_from(p);
    }
    if let Some(p) = &global.service_config {
        paths.service_config.clone_from(p);
    }
    if let Some(p) = &global.state_file {
        paths.state_file.clone_from(p);
    }
    if global.no_backup {
        paths.backup_dir = None;
    } else if let Some(p) = &global.backup_dir {
        paths.backup_dir = Some(p.clone());
    }
}
