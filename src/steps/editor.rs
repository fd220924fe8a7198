use anyhow::{Result, bail};

use super::StepContext;
use super::apply::ApplyServiceConfig;
use crate::sequencer::{Step, StepResult, step_deps};
use crate::store::ArtifactId;

/// Terminal emulators to try, with the flag that introduces the command.
const TERMINALS: &[(&str, &str)] = &[
    ("x-terminal-emulator", "-e"),
    ("gnome-terminal", "--"),
    ("xterm", "-e"),
    ("lxterminal", "-e"),
    ("mate-terminal", "-e"),
    ("konsole", "-e"),
];

/// Open the daemon config in `nano` inside a desktop terminal for manual
/// review.
#[derive(Debug)]
pub struct OpenConfigEditor;

impl Step for OpenConfigEditor {
    fn name(&self) -> &str {
        "Open config editor"
    }

    step_deps![ApplyServiceConfig];

    fn requires_display(&self) -> bool {
        true
    }

    fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        let Some((terminal, flag)) = TERMINALS
            .iter()
            .copied()
            .find(|(name, _)| ctx.executor.which(name))
        else {
            bail!("no terminal emulator found");
        };
        let path = ctx.store.path(ArtifactId::ServiceYaml).to_string_lossy();
        if ctx.dry_run {
            ctx.log
                .dry_run(&format!("would open {path} in {terminal}"));
            return Ok(StepResult::DryRun);
        }

        let mut args = vec![flag];
        if ctx.install.use_sudo {
            args.push("sudo");
        }
        args.extend(["nano", &*path]);
        ctx.log.debug(&format!("opening {path} in {terminal}"));
        ctx.executor.run(terminal, &args)?;
        Ok(StepResult::Ok)
    }
}
