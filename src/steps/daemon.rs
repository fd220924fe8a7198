use anyhow::Result;

use super::StepContext;
use super::apply::ApplyServiceConfig;
use super::apt::{apt_remove, apt_update, install_packages, recover_apt_locks};
use super::hat_config::InstallHatConfig;
use super::repository::{AddPackageRepository, remove_repositories};
use crate::sequencer::{Step, StepResult, step_deps};
use crate::store::ArtifactId;

/// Daemon package and systemd unit name.
pub const DAEMON: &str = "meshtasticd";

/// Install the mesh daemon from the package repository.
#[derive(Debug)]
pub struct InstallDaemon;

impl Step for InstallDaemon {
    fn name(&self) -> &str {
        "Install daemon"
    }

    step_deps![AddPackageRepository];

    fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        if ctx.package_installed(DAEMON)? {
            return Ok(StepResult::AlreadyDone(format!("{DAEMON} is installed")));
        }
        if ctx.dry_run {
            ctx.log.dry_run(&format!("would install {DAEMON}"));
            return Ok(StepResult::DryRun);
        }

        let keep = ctx.store.path(ArtifactId::ServiceYaml).exists();
        if keep {
            ctx.log
                .debug("existing service config found, keeping it during install");
        }
        recover_apt_locks(ctx)?;
        apt_update(ctx)?;
        install_packages(ctx, &[DAEMON], keep)?;
        ctx.log.info(&format!("installed {DAEMON}"));
        Ok(StepResult::Ok)
    }
}

/// Enable the daemon unit and start it.
#[derive(Debug)]
pub struct EnableService;

impl Step for EnableService {
    fn name(&self) -> &str {
        "Enable service"
    }

    step_deps![InstallDaemon, ApplyServiceConfig, InstallHatConfig];

    fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        let enabled = ctx
            .executor
            .run_unchecked("systemctl", &["is-enabled", DAEMON])?
            .success;
        let active = ctx
            .executor
            .run_unchecked("systemctl", &["is-active", DAEMON])?
            .success;
        if enabled && active {
            return Ok(StepResult::AlreadyDone(format!(
                "{DAEMON} is enabled and running"
            )));
        }
        if ctx.dry_run {
            ctx.log
                .dry_run(&format!("would enable and start {DAEMON}"));
            return Ok(StepResult::DryRun);
        }

        if !enabled {
            ctx.run_admin("systemctl", &["enable", DAEMON])?;
        }
        if !active {
            ctx.run_admin("systemctl", &["start", DAEMON])?;
        }
        ctx.log.info(&format!("{DAEMON} is enabled and running"));
        Ok(StepResult::Ok)
    }
}

/// A change of a systemd unit's running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ServiceControl {
    /// Start the unit if it is not running.
    Start,
    /// Stop the unit if it is running.
    Stop,
    /// Stop and start the unit.
    Restart,
}

impl ServiceControl {
    /// The `systemctl` verb.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

/// Whether a systemd unit is running.
///
/// # Errors
///
/// Returns an error if `systemctl` cannot be spawned.
pub fn is_active(ctx: &StepContext, unit: &str) -> Result<bool> {
    Ok(ctx
        .executor
        .run_unchecked("systemctl", &["is-active", unit])?
        .success)
}

/// Start, stop, or restart `unit`. Returns whether anything was run.
///
/// # Errors
///
/// Returns an error if `systemctl` fails.
pub fn control_service(ctx: &StepContext, unit: &str, action: ServiceControl) -> Result<bool> {
    let active = is_active(ctx, unit)?;
    let needed = match action {
        ServiceControl::Start => !active,
        ServiceControl::Stop => active,
        ServiceControl::Restart => true,
    };
    if !needed {
        let state = if active { "running" } else { "stopped" };
        ctx.log.info(&format!("{unit} is already {state}"));
        return Ok(false);
    }
    let verb = action.verb();
    if ctx.dry_run {
        ctx.log.dry_run(&format!("would {verb} {unit}"));
        return Ok(false);
    }
    ctx.run_admin("systemctl", &[verb, unit])?;
    ctx.log.info(&format!("{unit}: {verb} done"));
    Ok(true)
}

/// Stop and disable the daemon, remove its package, then its repository
/// files. The daemon's configuration files are kept.
///
/// # Errors
///
/// Returns an error if lock recovery, `systemctl`, `apt-get`, or deleting a
/// repository file fails.
pub fn remove_daemon(ctx: &StepContext) -> Result<()> {
    let active = is_active(ctx, DAEMON)?;
    let enabled = ctx
        .executor
        .run_unchecked("systemctl", &["is-enabled", DAEMON])?
        .success;
    let installed = ctx.package_installed(DAEMON)?;

    if ctx.dry_run {
        if active || enabled {
            ctx.log.dry_run(&format!("would stop and disable {DAEMON}"));
        }
        if installed {
            ctx.log.dry_run(&format!("would remove the {DAEMON} package"));
        }
    } else {
        if active {
            ctx.run_admin("systemctl", &["stop", DAEMON])?;
        }
        if enabled {
            ctx.run_admin("systemctl", &["disable", DAEMON])?;
        }
        if installed {
            recover_apt_locks(ctx)?;
            apt_remove(ctx, &[DAEMON])?;
            ctx.log.info(&format!("removed {DAEMON}"));
        } else {
            ctx.log.info(&format!("{DAEMON} is not installed"));
        }
    }
    remove_repositories(ctx)?;
    Ok(())
}
