use anyhow::{Context as _, Result};

use super::StepContext;
use crate::config::{Channel, InstallSettings};
use crate::sequencer::{Step, StepResult};

/// Where the signing keys of configured repositories live.
const TRUSTED_KEYS_DIR: &str = "/etc/apt/trusted.gpg.d";
const SOURCES_DIR: &str = "/etc/apt/sources.list.d";

/// Locations derived from the install channel and OS version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Base URL of the channel's package directory, ending in `/`.
    pub url: String,
    /// APT source list file.
    pub list_file: String,
    /// Dearmored signing key.
    pub key_file: String,
}

impl Repository {
    /// The repository for `settings`.
    #[must_use]
    pub fn for_settings(settings: &InstallSettings) -> Self {
        let channel = settings.channel;
        Self {
            url: format!(
                "http://download.opensuse.org/repositories/network:/Meshtastic:/{channel}/{}/",
                settings.os_version
            ),
            list_file: format!("{SOURCES_DIR}/network:Meshtastic:{channel}.list"),
            key_file: format!("{TRUSTED_KEYS_DIR}/network_Meshtastic_{channel}.gpg"),
        }
    }

    /// Content of the source list file.
    #[must_use]
    pub fn source_line(&self) -> String {
        format!("deb {} /\n", self.url)
    }
}

/// Delete the source list and key of every channel. Returns the files that
/// were removed.
///
/// # Errors
///
/// Returns an error if a file exists but cannot be removed.
pub fn remove_repositories(ctx: &StepContext) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for channel in Channel::ALL {
        let repo = Repository::for_settings(&InstallSettings {
            channel,
            ..ctx.install.clone()
        });
        for file in [repo.list_file, repo.key_file] {
            if !ctx.executor.run_unchecked("test", &["-e", &file])?.success {
                continue;
            }
            if ctx.dry_run {
                ctx.log.dry_run(&format!("would remove {file}"));
            } else {
                ctx.run_admin("rm", &["-f", &file])?;
                ctx.log.info(&format!("removed {file}"));
            }
            removed.push(file);
        }
    }
    Ok(removed)
}

/// Register the daemon's APT repository and its signing key.
#[derive(Debug)]
pub struct AddPackageRepository;

impl Step for AddPackageRepository {
    fn name(&self) -> &str {
        "Add package repository"
    }

    fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        let repo = Repository::for_settings(&ctx.install);
        let line = repo.source_line();

        let listed = ctx.executor.run_unchecked("cat", &[repo.list_file.as_str()])?;
        let keyed = ctx
            .executor
            .run_unchecked("test", &["-s", &repo.key_file])?
            .success;
        if listed.success && listed.stdout == line && keyed {
            return Ok(StepResult::AlreadyDone(format!(
                "{} channel already configured",
                ctx.install.channel
            )));
        }
        if ctx.dry_run {
            ctx.log.dry_run(&format!("would add {}", repo.url));
            return Ok(StepResult::DryRun);
        }

        ctx.write_root_file(&repo.list_file, &line)
            .context("writing the APT source list")?;
        let key = ctx
            .executor
            .run("curl", &["-fsSL", &format!("{}Release.key", repo.url)])
            .context("downloading the repository key")?;
        ctx.run_admin_with_input(
            "gpg",
            &["--dearmor", "--yes", "-o", &repo.key_file],
            &key.stdout,
        )
        .context("installing the repository key")?;
        ctx.run_admin("chmod", &["644", &repo.key_file])?;
        ctx.log.info(&format!("added {}", repo.url));
        Ok(StepResult::Ok)
    }
}
