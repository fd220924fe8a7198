use anyhow::{Context as _, Result};

use super::StepContext;
use super::apt::apt_install;
use super::daemon::InstallDaemon;
use crate::sequencer::{Step, StepResult, step_deps};

const AVAHI: &str = "avahi-daemon";
const SERVICES_DIR: &str = "/etc/avahi/services";
const SERVICE_FILE: &str = "/etc/avahi/services/meshtastic.service";

/// mDNS record advertising the daemon's TCP API on port 4403.
pub const SERVICE_DEFINITION: &str = r#"<?xml version="1.0" standalone="no"?><!--*-nxml-*-->
<!DOCTYPE service-group SYSTEM "avahi-service.dtd">
<service-group>
<name>Meshtastic</name>
<service protocol="ipv4"><type>_meshtastic._tcp</type><port>4403</port></service>
</service-group>
"#;

/// Advertise the node on the local network through Avahi.
#[derive(Debug)]
pub struct ConfigureAvahi;

impl Step for ConfigureAvahi {
    fn name(&self) -> &str {
        "Configure Avahi"
    }

    step_deps![InstallDaemon];

    fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        let installed = ctx.package_installed(AVAHI)?;
        let current = ctx.executor.run_unchecked("cat", &[SERVICE_FILE])?;
        let defined = current.success && current.stdout == SERVICE_DEFINITION;
        let active = ctx
            .executor
            .run_unchecked("systemctl", &["is-active", AVAHI])?
            .success;
        if installed && defined && active {
            return Ok(StepResult::AlreadyDone(
                "mDNS service already advertised".to_string(),
            ));
        }
        if ctx.dry_run {
            ctx.log
                .dry_run(&format!("would advertise the node via {SERVICE_FILE}"));
            return Ok(StepResult::DryRun);
        }

        if !installed {
            apt_install(ctx, &[AVAHI], false).context("installing avahi-daemon")?;
        }
        if !defined {
            ctx.run_admin("mkdir", &["-p", SERVICES_DIR])?;
            ctx.write_root_file(SERVICE_FILE, SERVICE_DEFINITION)?;
        }
        ctx.run_admin("systemctl", &["enable", AVAHI])?;
        ctx.run_admin("systemctl", &["start", AVAHI])?;
        ctx.log.info("advertising _meshtastic._tcp on port 4403");
        Ok(StepResult::Ok)
    }
}

/// Stop advertising the node: stop and disable Avahi and delete the service
/// file. The package stays installed. Returns whether anything changed.
///
/// # Errors
///
/// Returns an error if `systemctl` or deleting the file fails.
pub fn disable_avahi(ctx: &StepContext) -> Result<bool> {
    let active = ctx
        .executor
        .run_unchecked("systemctl", &["is-active", AVAHI])?
        .success;
    let enabled = ctx
        .executor
        .run_unchecked("systemctl", &["is-enabled", AVAHI])?
        .success;
    let defined = ctx
        .executor
        .run_unchecked("test", &["-e", SERVICE_FILE])?
        .success;
    if !(active || enabled || defined) {
        ctx.log.info("Avahi is already disabled");
        return Ok(false);
    }
    if ctx.dry_run {
        ctx.log
            .dry_run(&format!("would stop {AVAHI} and remove {SERVICE_FILE}"));
        return Ok(false);
    }

    if active {
        ctx.run_admin("systemctl", &["stop", AVAHI])?;
    }
    if enabled {
        ctx.run_admin("systemctl", &["disable", AVAHI])?;
    }
    if defined {
        ctx.run_admin("rm", &["-f", SERVICE_FILE])?;
    }
    ctx.log.info("the node is no longer advertised over mDNS");
    Ok(true)
}
