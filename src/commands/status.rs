//! Command: show hardware, managed values, and setup progress.
use std::fmt::Write as _;

use anyhow::{Context as _, Result};

use super::CommandSetup;
use crate::catalog::ProfileCatalog;
use crate::cli::GlobalOpts;
use crate::logging::Logger;
use crate::options::OptionModel;
use crate::reconcile::Reconciler;
use crate::sequencer::Sequencer;
use crate::steps::all_setup_steps;
use crate::store::{ArtifactId, Fingerprint};

/// Run the status command.
///
/// # Errors
///
/// Returns an error if settings or the step record cannot be read.
pub fn run(global: &GlobalOpts, log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;
    print!("{}", render(&setup)?);
    Ok(())
}

fn render(setup: &CommandSetup) -> Result<String> {
    let model = OptionModel::builtin();
    let mut out = String::new();

    let _ = writeln!(out, "Hardware: {}", setup.hardware);
    let detected = setup.hardware.hat.as_ref().and_then(|hat| {
        ProfileCatalog::builtin(model).detect(&hat.product, &hat.vendor)
    });
    let _ = writeln!(
        out,
        "HAT profile: {}",
        detected.map_or("none detected", |p| p.name)
    );

    let store = setup.store();
    let reconciler = Reconciler::new(model);
    for id in ArtifactId::ALL {
        let _ = write!(out, "\n{id} ({})", store.path(id).display());
        let snapshot = match store.load_document(id) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let _ = writeln!(out, ": unreadable: {e}");
                continue;
            }
        };
        if snapshot.fingerprint == Fingerprint::Absent {
            out.push_str(", missing");
        }
        out.push_str(":\n");
        for (key, value) in reconciler.current_values(&snapshot.document) {
            let _ = writeln!(
                out,
                "  {:<18} {}",
                key.name,
                value.as_deref().unwrap_or("-")
            );
        }
    }

    let seq = Sequencer::open(
        all_setup_steps(setup.settings.install.open_editor),
        &setup.settings.paths.state_file,
    )
    .context("reading the step record")?;
    let _ = writeln!(out, "\nSteps ({}):", setup.settings.paths.state_file.display());
    for entry in seq.entries() {
        let _ = write!(out, "  {:<8} {}", entry.state.to_string(), entry.name);
        if let Some(message) = &entry.message {
            let _ = write!(out, " ({message})");
        }
        out.push('\n');
    }
    if seq.reboot_required() {
        out.push_str("\nReboot required for boot config changes.\n");
    }
    Ok(out)
}
