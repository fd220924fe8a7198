// Shared helpers for integration tests.
//
// Provides a temporary-directory-backed node layout and a fluent builder so
// each integration test can set up isolated artifact files without repeating
// filesystem boilerplate.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use meshnode_cli::config::InstallSettings;
use meshnode_cli::exec::{ExecResult, Executor};
use meshnode_cli::logging::{Log, Logger};
use meshnode_cli::options::{Assignments, OptionValue};
use meshnode_cli::steps::StepContext;
use meshnode_cli::store::ArtifactStore;

/// Build assignments from `(key, value)` pairs.
pub fn assign(pairs: &[(&str, OptionValue)]) -> Assignments {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// An executor that records command lines and fails any program listed in
/// `failing`. Everything else succeeds with empty output.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    failing: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    /// Make every later call of `program` fail.
    pub fn fail(&self, program: &str) {
        self.failing.lock().expect("lock").push(program.to_string());
    }

    /// Stop failing anything.
    pub fn heal(&self) {
        self.failing.lock().expect("lock").clear();
    }

    /// Command lines run so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    fn record(&self, program: &str, args: &[&str]) -> ExecResult {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().expect("lock").push(line);
        let success = !self
            .failing
            .lock()
            .expect("lock")
            .iter()
            .any(|p| p == program);
        ExecResult {
            stdout: String::new(),
            stderr: if success { String::new() } else { format!("{program}: scripted failure") },
            success,
            code: Some(i32::from(!success)),
        }
    }

    fn checked(result: ExecResult) -> Result<ExecResult> {
        anyhow::ensure!(result.success, "{}", result.stderr);
        Ok(result)
    }
}

impl Executor for RecordingExecutor {
    fn run(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        Self::checked(self.record(program, args))
    }

    fn run_with_input(&self, program: &str, args: &[&str], _input: &str) -> Result<ExecResult> {
        Self::checked(self.record(program, args))
    }

    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        Ok(self.record(program, args))
    }

    fn which(&self, _program: &str) -> bool {
        false
    }
}

/// An isolated node layout backed by a [`tempfile::TempDir`].
pub struct NodeFixture {
    /// Temporary directory holding the artifacts and the step record.
    pub root: tempfile::TempDir,
}

impl NodeFixture {
    /// Create an empty layout: no artifacts, no step record.
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("create temp dir"),
        }
    }

    /// Write the boot options file.
    #[must_use]
    pub fn with_boot(self, text: &str) -> Self {
        std::fs::write(self.boot_path(), text).expect("write config.txt");
        self
    }

    /// Write the daemon YAML configuration.
    #[must_use]
    pub fn with_service(self, text: &str) -> Self {
        std::fs::write(self.service_path(), text).expect("write config.yaml");
        self
    }

    /// Path of the boot options file.
    pub fn boot_path(&self) -> PathBuf {
        self.root.path().join("config.txt")
    }

    /// Path of the daemon YAML configuration.
    pub fn service_path(&self) -> PathBuf {
        self.root.path().join("config.yaml")
    }

    /// Path of the step record.
    pub fn state_path(&self) -> PathBuf {
        self.root.path().join("steps.json")
    }

    /// Path of the backup directory.
    pub fn backup_dir(&self) -> PathBuf {
        self.root.path().join("backups")
    }

    /// A store over this layout, with backups enabled.
    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(self.boot_path(), self.service_path())
            .with_backup_dir(Some(self.backup_dir()))
    }

    /// Current text of `path`.
    pub fn read(&self, path: &Path) -> String {
        std::fs::read_to_string(path).expect("read artifact")
    }

    /// A step context over this layout running commands on `executor`.
    pub fn context(
        &self,
        selection: Assignments,
        executor: Arc<RecordingExecutor>,
    ) -> (StepContext, Arc<Logger>) {
        let log = Arc::new(Logger::default());
        let ctx = StepContext {
            store: self.store(),
            selection,
            install: InstallSettings {
                use_sudo: false,
                apt_retry_secs: 0,
                ..InstallSettings::default()
            },
            executor: executor as Arc<dyn Executor>,
            log: Arc::clone(&log) as Arc<dyn Log>,
            dry_run: false,
            display_available: false,
        };
        (ctx, log)
    }
}
