use anyhow::{Context as _, Result};

use super::StepContext;
use super::apt::apt_install;
use crate::sequencer::{Step, StepResult};

/// The pipx requirement for the command-line client.
const CLI_PACKAGE: &str = "meshtastic[cli]";

/// Install the Python `meshtastic` command-line client with pipx.
///
/// pipx installs into the invoking user's environment, so only the pipx
/// package itself goes through `sudo`.
#[derive(Debug)]
pub struct InstallPythonCli;

impl Step for InstallPythonCli {
    fn name(&self) -> &str {
        "Install Python CLI"
    }

    fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        if ctx.executor.which("meshtastic") {
            return Ok(StepResult::AlreadyDone("meshtastic is on PATH".to_string()));
        }
        if ctx.executor.which("pipx") {
            let listed = ctx.executor.run_unchecked("pipx", &["list", "--short"])?;
            if listed.success && listed.stdout.lines().any(|l| l.starts_with("meshtastic ")) {
                return Ok(StepResult::AlreadyDone(
                    "installed with pipx; open a new shell to use it".to_string(),
                ));
            }
        }
        if ctx.dry_run {
            ctx.log.dry_run(&format!("would pipx install {CLI_PACKAGE}"));
            return Ok(StepResult::DryRun);
        }

        if !ctx.executor.which("pipx") {
            apt_install(ctx, &["pipx"], false).context("installing pipx")?;
        }
        ctx.executor
            .run("pipx", &["install", CLI_PACKAGE])
            .context("installing the meshtastic CLI")?;
        let path = ctx.executor.run_unchecked("pipx", &["ensurepath"])?;
        if !path.success {
            ctx.log.warn(&format!(
                "pipx ensurepath failed; add ~/.local/bin to PATH yourself: {}",
                path.stderr.trim()
            ));
        }
        ctx.log.info("installed the meshtastic CLI");
        Ok(StepResult::Ok)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::steps::test_helpers::{MockExecutor, TestContext, make_context_with};

    #[test]
    fn cli_on_path_is_already_done() {
        let dir = tempfile::tempdir().unwrap();
        let t = make_context_with(
            dir.path(),
            MockExecutor::default().with_programs(&["meshtastic"]),
        );
        assert!(matches!(
            InstallPythonCli.run(&t.ctx).unwrap(),
            StepResult::AlreadyDone(_)
        ));
        assert!(t.executor.calls().is_empty());
    }

    #[test]
    fn installs_pipx_first_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { ctx, executor, .. } = make_context_with(dir.path(), MockExecutor::default());
        assert_eq!(InstallPythonCli.run(&ctx).unwrap(), StepResult::Ok);
        assert_eq!(
            executor.calls(),
            [
                "dpkg --audit",
                "env DEBIAN_FRONTEND=noninteractive apt-get install -y pipx",
                "pipx install meshtastic[cli]",
                "pipx ensurepath",
            ]
        );
    }

    #[test]
    fn ensurepath_failure_only_warns() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { ctx, log, .. } = make_context_with(
            dir.path(),
            MockExecutor::with_responses(vec![(true, ""), (true, ""), (false, "")])
                .with_programs(&["pipx"]),
        );
        assert_eq!(InstallPythonCli.run(&ctx).unwrap(), StepResult::Ok);
        assert_eq!(log.failure_count(), 0);
    }

    #[test]
    fn pipx_listing_counts_as_installed() {
        let dir = tempfile::tempdir().unwrap();
        let t = make_context_with(
            dir.path(),
            MockExecutor::with_responses(vec![(true, "meshtastic 2.5.4\n")])
                .with_programs(&["pipx"]),
        );
        assert!(matches!(
            InstallPythonCli.run(&t.ctx).unwrap(),
            StepResult::AlreadyDone(_)
        ));
    }
}
