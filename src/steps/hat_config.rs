//! Enable the daemon's bundled radio config for the attached HAT.
//!
//! The daemon package ships one YAML file per supported board under
//! `available.d/` next to its main config, sometimes grouped in a folder per
//! vendor. A board is enabled by copying its file into `config.d/`, which the
//! daemon merges over `config.yaml` at startup.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};

use super::StepContext;
use super::daemon::InstallDaemon;
use crate::sequencer::{Step, StepResult, step_deps};
use crate::store::ArtifactId;

/// Board configs shipped with the daemon and the ones it loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HatConfigDirs {
    /// `available.d`: every bundled board config.
    pub available: PathBuf,
    /// `config.d`: the configs the daemon loads.
    pub enabled: PathBuf,
}

impl HatConfigDirs {
    /// The directories beside the daemon's `config.yaml`.
    #[must_use]
    pub fn beside(service_config: &Path) -> Self {
        let dir = service_config.parent().unwrap_or_else(|| Path::new("."));
        Self {
            available: dir.join("available.d"),
            enabled: dir.join("config.d"),
        }
    }
}

/// Names of the `.yaml` files directly in `dir`, sorted. A missing directory
/// has none.
///
/// # Errors
///
/// Returns an error if `dir` exists but cannot be read.
pub fn yaml_files(dir: &Path) -> Result<Vec<String>> {
    Ok(entries(dir)?
        .into_iter()
        .filter(|(_, is_dir)| !is_dir)
        .map(|(name, _)| name)
        .filter(|name| name.ends_with(".yaml"))
        .collect())
}

/// Bundled configs that can be selected: `.yaml` files and folders in
/// `available.d`, sorted.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub fn available_configs(dirs: &HatConfigDirs) -> Result<Vec<String>> {
    Ok(entries(&dirs.available)?
        .into_iter()
        .filter(|(name, is_dir)| *is_dir || name.ends_with(".yaml"))
        .map(|(name, _)| name)
        .collect())
}

fn entries(dir: &Path) -> Result<Vec<(String, bool)>> {
    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", dir.display())),
    };
    let mut found = Vec::new();
    for entry in listing {
        let entry = entry.with_context(|| format!("reading {}", dir.display()))?;
        let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
        found.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
    }
    found.sort();
    Ok(found)
}

/// Resolve a config name to one YAML file under `available`.
///
/// `name` is a file, a folder holding exactly one file, or `folder/file`.
///
/// # Errors
///
/// Returns an error when nothing by that name exists, or a folder holds no
/// YAML file or more than one.
pub fn resolve(available: &Path, name: &str) -> Result<PathBuf> {
    let path = available.join(name);
    if path.is_file() {
        return Ok(path);
    }
    if !path.is_dir() {
        bail!("no HAT config named '{name}' in {}", available.display());
    }
    match yaml_files(&path)?.as_slice() {
        [] => bail!("{} holds no YAML config", path.display()),
        [only] => Ok(path.join(only)),
        several => bail!(
            "{} holds several configs ({}); name one as '{name}/<file>'",
            path.display(),
            several.join(", ")
        ),
    }
}

/// Lower-case substrings that identify bundled configs for the selected
/// overlay: the overlay name and its vendor prefix.
fn hints(ctx: &StepContext) -> Vec<String> {
    let Some(overlay) = ctx.selection.get("hat_overlay") else {
        return Vec::new();
    };
    let overlay = overlay.to_string().to_lowercase();
    let mut hints = vec![overlay.clone()];
    if let Some((vendor, _)) = overlay.split_once('-')
        && vendor.len() >= 3
    {
        hints.push(vendor.to_string());
    }
    hints
}

/// The bundled config whose name alone matches the selected overlay.
fn auto_select(ctx: &StepContext, candidates: &[String]) -> Option<String> {
    let hints = hints(ctx);
    let matches: Vec<&str> = candidates
        .iter()
        .map(String::as_str)
        .filter(|name| {
            let lower = name.to_lowercase();
            hints.iter().any(|hint| lower.contains(hint.as_str()))
        })
        .collect();
    match matches.as_slice() {
        [only] => Some((*only).to_string()),
        [] => None,
        several => {
            ctx.log.warn(&format!(
                "several HAT configs match: {}; set install.hat_config to pick one",
                several.join(", ")
            ));
            None
        }
    }
}

fn same_content(a: &Path, b: &Path) -> bool {
    matches!((fs::read(a), fs::read(b)), (Ok(x), Ok(y)) if x == y)
}

/// Copy the HAT's bundled radio config into `config.d`.
#[derive(Debug)]
pub struct InstallHatConfig;

impl Step for InstallHatConfig {
    fn name(&self) -> &str {
        "Install HAT config"
    }

    step_deps![InstallDaemon];

    fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        let dirs = HatConfigDirs::beside(ctx.store.path(ArtifactId::ServiceYaml));
        let requested = ctx.install.hat_config.as_deref();
        let name = match requested {
            Some(name) => name.to_string(),
            None => {
                let candidates = available_configs(&dirs)?;
                let Some(name) = auto_select(ctx, &candidates) else {
                    return Ok(StepResult::AlreadyDone(format!(
                        "no bundled config matches the HAT among {} in {}",
                        candidates.len(),
                        dirs.available.display()
                    )));
                };
                name
            }
        };
        let source = resolve(&dirs.available, &name)?;
        let Some(file_name) = source.file_name().map(|n| n.to_string_lossy().into_owned())
        else {
            bail!("{} has no file name", source.display());
        };
        let target = dirs.enabled.join(&file_name);

        let existing = yaml_files(&dirs.enabled)?;
        if existing == [file_name.as_str()] && same_content(&source, &target) {
            return Ok(StepResult::AlreadyDone(format!("{file_name} is enabled")));
        }
        let stale: Vec<&String> = existing.iter().filter(|n| **n != file_name).collect();
        if requested.is_none() && !stale.is_empty() {
            return Ok(StepResult::AlreadyDone(format!(
                "{} already holds {}; set install.hat_config to replace it",
                dirs.enabled.display(),
                existing.join(", ")
            )));
        }
        if ctx.dry_run {
            ctx.log
                .dry_run(&format!("would enable {name} in {}", dirs.enabled.display()));
            return Ok(StepResult::DryRun);
        }

        let enabled = dirs.enabled.to_string_lossy();
        ctx.run_admin("mkdir", &["-p", &*enabled])?;
        for old in stale {
            let old = dirs.enabled.join(old);
            ctx.run_admin("rm", &["-f", &*old.to_string_lossy()])?;
            ctx.log.info(&format!("removed {}", old.display()));
        }
        let (source, target) = (source.to_string_lossy(), target.to_string_lossy());
        ctx.run_admin("cp", &[&*source, &*target])?;
        ctx.log.info(&format!("enabled {name} in {enabled}"));
        Ok(StepResult::Ok)
    }
}
