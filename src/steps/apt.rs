//! Package manager calls that survive a held or interrupted dpkg database.
//!
//! An unattended upgrade running at first boot, or an install cut short by a
//! power loss, leaves `apt-get` failing with a lock error. Before installing,
//! [`recover_apt_locks`] finishes any interrupted configuration and reports
//! lock holders; each `apt-get` call is then retried a few times while the
//! lock is busy.

use std::time::Duration;

use anyhow::Result;

use super::StepContext;
use crate::exec::ExecResult;

/// Lock files dpkg and apt take while they run.
pub const LOCK_FILES: [&str; 3] = [
    "/var/lib/dpkg/lock",
    "/var/lib/dpkg/lock-frontend",
    "/var/cache/apt/archives/lock",
];

/// How many times an `apt-get` call is tried while the lock is busy.
const ATTEMPTS: u32 = 3;

/// `apt-get` diagnostics that mean another package operation is in the way.
const LOCK_ERRORS: [&str; 2] = ["Could not get lock", "dpkg was interrupted"];

/// `apt-get install` options that keep an existing config file instead of
/// prompting for it.
const KEEP_CONFFILES: [&str; 4] = [
    "-o",
    "Dpkg::Options::=--force-confdef",
    "-o",
    "Dpkg::Options::=--force-confold",
];

/// Finish an interrupted dpkg run and warn about processes holding the
/// package locks.
///
/// Lock holders are reported, never killed; [`apt_get`] waits for them.
///
/// # Errors
///
/// Returns an error if `dpkg --configure -a` fails.
pub fn recover_apt_locks(ctx: &StepContext) -> Result<()> {
    let audit = ctx.executor.run_unchecked("dpkg", &["--audit"])?;
    if !audit.success || !audit.stdout.trim().is_empty() {
        ctx.log
            .warn("dpkg was interrupted earlier; finishing with dpkg --configure -a");
        ctx.run_admin("dpkg", &["--configure", "-a"])?;
    }

    if !ctx.executor.which("lsof") {
        ctx.log.debug("lsof not found, not checking package locks");
        return Ok(());
    }
    for lock in LOCK_FILES {
        let holders = ctx.run_admin_unchecked("lsof", &[lock])?;
        if holders.success && !holders.stdout.trim().is_empty() {
            ctx.log.warn(&format!(
                "{lock} is held by another process; apt-get will wait for it"
            ));
            ctx.log.debug(holders.stdout.trim());
        }
    }
    Ok(())
}

fn is_lock_error(error: &anyhow::Error) -> bool {
    let text = format!("{error:#}");
    LOCK_ERRORS.iter().any(|marker| text.contains(marker))
}

/// Run a privileged `apt-get` command line, retrying while the package lock
/// is busy. `program` is `apt-get` itself or `env` with `apt-get` among
/// `args`.
///
/// # Errors
///
/// Returns the last failure once the attempts are used up, or the first
/// failure that is not a lock error.
pub fn apt_get(ctx: &StepContext, program: &str, args: &[&str]) -> Result<ExecResult> {
    let mut attempt = 1;
    loop {
        match ctx.run_admin(program, args) {
            Err(e) if attempt < ATTEMPTS && is_lock_error(&e) => {
                ctx.log.warn(&format!(
                    "package manager busy (attempt {attempt} of {ATTEMPTS}), retrying in {}s",
                    ctx.install.apt_retry_secs
                ));
                std::thread::sleep(Duration::from_secs(ctx.install.apt_retry_secs));
                if format!("{e:#}").contains("dpkg was interrupted") {
                    ctx.run_admin("dpkg", &["--configure", "-a"])?;
                }
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// `apt-get update`, retried while the lock is busy.
///
/// # Errors
///
/// See [`apt_get`].
pub fn apt_update(ctx: &StepContext) -> Result<()> {
    apt_get(ctx, "apt-get", &["update"])?;
    Ok(())
}

/// Install Debian packages non-interactively, without lock recovery.
///
/// # Errors
///
/// See [`apt_get`].
pub fn install_packages(ctx: &StepContext, packages: &[&str], keep_conffiles: bool) -> Result<()> {
    let mut args = vec!["DEBIAN_FRONTEND=noninteractive", "apt-get", "install", "-y"];
    if keep_conffiles {
        args.extend(KEEP_CONFFILES);
    }
    args.extend(packages);
    apt_get(ctx, "env", &args)?;
    Ok(())
}

/// Recover the package locks, then install Debian packages.
///
/// # Errors
///
/// Returns an error if recovery or `apt-get` fails.
pub fn apt_install(ctx: &StepContext, packages: &[&str], keep_conffiles: bool) -> Result<()> {
    recover_apt_locks(ctx)?;
    install_packages(ctx, packages, keep_conffiles)
}

/// Remove Debian packages non-interactively.
///
/// # Errors
///
/// See [`apt_get`].
pub fn apt_remove(ctx: &StepContext, packages: &[&str]) -> Result<()> {
    let mut args = vec!["DEBIAN_FRONTEND=noninteractive", "apt-get", "remove", "-y"];
    args.extend(packages);
    apt_get(ctx, "env", &args)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::steps::test_helpers::{MockExecutor, TestContext, make_context_with};

    const LOCKED: &str =
        "E: Could not get lock /var/lib/dpkg/lock-frontend. It is held by process 812 (unattended-upgr)";

    #[test]
    fn clean_audit_runs_nothing_else() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { ctx, executor, .. } = make_context_with(dir.path(), MockExecutor::default());
        recover_apt_locks(&ctx).unwrap();
        assert_eq!(executor.calls(), ["dpkg --audit"]);
    }

    #[test]
    fn interrupted_dpkg_is_configured() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { ctx, executor, .. } = make_context_with(
            dir.path(),
            MockExecutor::with_responses(vec![(true, "The following packages are only half configured")]),
        );
        recover_apt_locks(&ctx).unwrap();
        assert_eq!(executor.calls(), ["dpkg --audit", "dpkg --configure -a"]);
    }

    #[test]
    fn held_locks_are_reported_not_killed() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { ctx, executor, .. } = make_context_with(
            dir.path(),
            MockExecutor::with_responses(vec![
                (true, ""),
                (false, ""),
                (true, "COMMAND PID\nunattende 812"),
                (false, ""),
            ])
            .with_programs(&["lsof"]),
        );
        recover_apt_locks(&ctx).unwrap();
        let calls = executor.calls();
        assert_eq!(
            calls[1..],
            [
                "lsof /var/lib/dpkg/lock",
                "lsof /var/lib/dpkg/lock-frontend",
                "lsof /var/cache/apt/archives/lock",
            ]
        );
        assert!(!calls.iter().any(|c| c.contains("kill") || c.starts_with("rm")));
    }

    #[test]
    fn busy_lock_is_retried_until_it_clears() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { ctx, executor, .. } = make_context_with(
            dir.path(),
            MockExecutor::with_responses(vec![(false, LOCKED), (false, LOCKED)]),
        );
        apt_update(&ctx).unwrap();
        assert_eq!(executor.calls(), ["apt-get update"; 3]);
    }

    #[test]
    fn busy_lock_gives_up_after_the_last_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { ctx, executor, .. } = make_context_with(
            dir.path(),
            MockExecutor::with_responses(vec![(false, LOCKED); 3]),
        );
        let err = install_packages(&ctx, &["pipx"], false).unwrap_err();
        assert!(err.to_string().contains("Could not get lock"), "{err}");
        assert_eq!(executor.calls().len(), 3);
    }

    #[test]
    fn interrupted_install_is_configured_before_the_retry() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { ctx, executor, .. } = make_context_with(
            dir.path(),
            MockExecutor::with_responses(vec![(
                false,
                "E: dpkg was interrupted, you must manually run 'dpkg --configure -a'",
            )]),
        );
        install_packages(&ctx, &["pipx"], false).unwrap();
        assert_eq!(
            executor.calls(),
            [
                "env DEBIAN_FRONTEND=noninteractive apt-get install -y pipx",
                "dpkg --configure -a",
                "env DEBIAN_FRONTEND=noninteractive apt-get install -y pipx",
            ]
        );
    }

    #[test]
    fn other_failures_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { ctx, executor, .. } = make_context_with(
            dir.path(),
            MockExecutor::with_responses(vec![(false, "E: Unable to locate package nope")]),
        );
        assert!(apt_remove(&ctx, &["nope"]).is_err());
        assert_eq!(executor.calls().len(), 1);
    }
}
