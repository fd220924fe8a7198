//! The setup steps that take a fresh Raspberry Pi OS image to a running
//! mesh node.
//!
//! Each step is idempotent: it checks the system first and reports
//! [`StepResult::AlreadyDone`] when there is nothing to change, so running a
//! step again after a crash or a manual fix is safe.
pub mod apply;
pub mod apt;
pub mod avahi;
pub mod daemon;
pub mod editor;
pub mod hat_config;
pub mod python_cli;
pub mod repository;

use std::sync::Arc;

use anyhow::Result;

use crate::config::InstallSettings;
use crate::exec::{ExecResult, Executor};
use crate::logging::Log;
use crate::options::Assignments;
use crate::sequencer::Step;
#[cfg(doc)]
use crate::sequencer::StepResult;
use crate::store::ArtifactStore;

/// Everything a step may touch.
pub struct StepContext {
    /// Artifact files.
    pub store: ArtifactStore,
    /// Desired option values for both artifacts.
    pub selection: Assignments,
    /// Package installation options.
    pub install: InstallSettings,
    /// Command executor (for testing or real system calls).
    pub executor: Arc<dyn Executor>,
    /// Logger for output and step recording.
    pub log: Arc<dyn Log>,
    /// Report what would change without changing anything.
    pub dry_run: bool,
    /// Whether an interactive display session is available.
    pub display_available: bool,
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("store", &self.store)
            .field("selection", &self.selection)
            .field("install", &self.install)
            .field("executor", &self.executor)
            .field("log", &"<dyn Log>")
            .field("dry_run", &self.dry_run)
            .field("display_available", &self.display_available)
            .finish()
    }
}

impl StepContext {
    /// Run a privileged command, through `sudo` when configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be spawned or exits non-zero.
    pub fn run_admin(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        if self.install.use_sudo {
            self.executor.run("sudo", &prefixed(program, args))
        } else {
            self.executor.run(program, args)
        }
    }

    /// [`StepContext::run_admin`] that reports a non-zero exit in the result
    /// instead of failing.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be spawned.
    pub fn run_admin_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        if self.install.use_sudo {
            self.executor.run_unchecked("sudo", &prefixed(program, args))
        } else {
            self.executor.run_unchecked(program, args)
        }
    }

    /// [`StepContext::run_admin`] with `input` on standard input.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be spawned or exits non-zero.
    pub fn run_admin_with_input(
        &self,
        program: &str,
        args: &[&str],
        input: &str,
    ) -> Result<ExecResult> {
        if self.install.use_sudo {
            self.executor
                .run_with_input("sudo", &prefixed(program, args), input)
        } else {
            self.executor.run_with_input(program, args, input)
        }
    }

    /// Write `content` to a root-owned file via `tee`.
    ///
    /// # Errors
    ///
    /// Returns an error if `tee` fails.
    pub fn write_root_file(&self, path: &str, content: &str) -> Result<()> {
        self.run_admin_with_input("tee", &[path], content)?;
        Ok(())
    }

    /// Whether a Debian package is installed.
    ///
    /// # Errors
    ///
    /// Returns an error if `dpkg-query` cannot be spawned.
    pub fn package_installed(&self, package: &str) -> Result<bool> {
        let result = self
            .executor
            .run_unchecked("dpkg-query", &["-W", "-f=${Status}", package])?;
        Ok(result.success && result.stdout.contains("install ok installed"))
    }
}

fn prefixed<'a>(program: &'a str, args: &[&'a str]) -> Vec<&'a str> {
    std::iter::once(program).chain(args.iter().copied()).collect()
}

/// The complete set of setup steps, in the order they are listed to the
/// operator.
///
/// Execution order is derived from each step's dependencies; among eligible
/// steps the first listed runs first.
#[must_use]
pub fn all_setup_steps(include_editor: bool) -> Vec<Box<dyn Step>> {
    let mut steps: Vec<Box<dyn Step>> = vec![
        Box::new(repository::AddPackageRepository),
        Box::new(daemon::InstallDaemon),
        Box::new(apply::ApplyBootConfig),
        Box::new(apply::ApplyServiceConfig),
        Box::new(hat_config::InstallHatConfig),
        Box::new(daemon::EnableService),
        Box::new(python_cli::InstallPythonCli),
        Box::new(avahi::ConfigureAvahi),
    ];
    if include_editor {
        steps.push(Box::new(editor::OpenConfigEditor));
    }
    steps
}


#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::test_helpers::{MockExecutor, make_context, make_context_with};
    use super::*;

    #[test]
    fn run_admin_prefixes_sudo_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = make_context(dir.path());
        t.ctx.run_admin("apt-get", &["update"]).unwrap();
        t.ctx.install.use_sudo = true;
        t.ctx.run_admin("apt-get", &["update"]).unwrap();
        assert_eq!(
            t.executor.calls(),
            ["apt-get update", "sudo apt-get update"]
        );
    }

    #[test]
    fn run_admin_unchecked_keeps_failures_in_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = make_context_with(
            dir.path(),
            MockExecutor::with_responses(vec![(false, "")]),
        );
        t.ctx.install.use_sudo = true;
        let result = t.ctx.run_admin_unchecked("lsof", &["/var/lib/dpkg/lock"]).unwrap();
        assert!(!result.success);
        assert_eq!(t.executor.calls(), ["sudo lsof /var/lib/dpkg/lock"]);
    }

    #[test]
    fn write_root_file_uses_tee() {
        let dir = tempfile::tempdir().unwrap();
        let t = make_context(dir.path());
        t.ctx.write_root_file("/etc/x.list", "deb x /\n").unwrap();
        assert_eq!(t.executor.calls(), ["tee /etc/x.list <<< deb x /"]);
    }

    #[test]
    fn package_installed_reads_dpkg_status() {
        let dir = tempfile::tempdir().unwrap();
        let t = make_context_with(
            dir.path(),
            MockExecutor::with_responses(vec![
                (true, "install ok installed"),
                (false, ""),
            ]),
        );
        assert!(t.ctx.package_installed("meshtasticd").unwrap());
        assert!(!t.ctx.package_installed("avahi-daemon").unwrap());
    }

    #[test]
    fn editor_step_is_optional() {
        let names = |steps: Vec<Box<dyn Step>>| -> Vec<String> {
            steps.iter().map(|s| s.name().to_string()).collect()
        };
        let with = names(all_setup_steps(true));
        let without = names(all_setup_steps(false));
        assert_eq!(with.len(), without.len() + 1);
        assert_eq!(with.last().map(String::as_str), Some("Open config editor"));
    }

    #[test]
    fn only_the_editor_needs_a_display() {
        let needs: Vec<_> = all_setup_steps(true)
            .iter()
            .filter(|s| s.requires_display())
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(needs, ["Open config editor"]);
    }
}
