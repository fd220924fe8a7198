//! Persisted step states (`steps.json`).
use std::fmt;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::atomic_write;

/// Lifecycle state of a setup step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    /// Not yet run, or reset for retry.
    #[default]
    Pending,
    /// Started but not finished.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with an error; blocks dependents until retried.
    Failed,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One step's persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEntry {
    /// Step name.
    pub name: String,
    /// Current state.
    pub state: StepState,
    /// When the state last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Failure reason or other detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepEntry {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: StepState::Pending,
            updated_at: None,
            message: None,
        }
    }

    /// Move to `state`, stamping the current time.
    pub fn transition(&mut self, state: StepState, message: Option<String>) {
        self.state = state;
        self.message = message;
        self.updated_at = Some(Utc::now());
    }
}

/// The whole persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepRecord {
    /// A committed boot config change needs a reboot to take effect.
    #[serde(default)]
    pub reboot_required: bool,
    /// Step states in declaration order.
    #[serde(default)]
    pub steps: Vec<StepEntry>,
}

impl StepRecord {
    /// Read the record at `path`; a missing file is an empty record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Parse`] for malformed JSON and
    /// [`StoreError::Permission`] / [`StoreError::Io`] on read failure.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(StoreError::from_io(path, e)),
        };
        serde_json::from_str(&text).map_err(|e| StoreError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Atomically write the record to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Permission`] / [`StoreError::Io`] when the file
    /// cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let mut json = serde_json::to_string_pretty(self).map_err(|e| StoreError::Render {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        json.push('\n');
        atomic_write(path, json.as_bytes()).map_err(|e| StoreError::from_io(path, e))
    }

    /// Rebuild the entry list for the declared `names`, in that order.
    ///
    /// Entries for undeclared names are dropped, missing ones start pending,
    /// and a `running` entry (left by a crash mid-step) goes back to pending.
    #[must_use]
    pub fn aligned(mut self, names: &[&str]) -> Self {
        let steps = names
            .iter()
            .map(|name| {
                let mut entry = self
                    .steps
                    .iter()
                    .position(|e| e.name == *name)
                    .map_or_else(|| StepEntry::pending(name), |i| self.steps.swap_remove(i));
                if entry.state == StepState::Running {
                    tracing::warn!("step '{name}' was interrupted; it will run again");
                    entry.transition(StepState::Pending, None);
                }
                entry
            })
            .collect();
        for dropped in &self.steps {
            tracing::debug!("dropping record of undeclared step '{}'", dropped.name);
        }
        Self {
            reboot_required: self.reboot_required,
            steps,
        }
    }

    /// The entry for `name`.
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&StepEntry> {
        self.steps.iter().find(|e| e.name == name)
    }

    pub(super) fn entry_mut(&mut self, name: &str) -> Option<&mut StepEntry> {
        self.steps.iter_mut().find(|e| e.name == name)
    }
}
