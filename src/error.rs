//! Domain-specific error types for the meshnode engine.
//!
//! Internal modules return typed errors (e.g., [`StoreError`], [`OptionError`])
//! while command handlers at the CLI boundary convert them to [`anyhow::Error`]
//! via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! MeshnodeError
//! ├── Store(StoreError)         : NotFound, Parse, Render, StaleRead, Permission, Io
//! ├── Option(OptionError)       : UnknownKey, InvalidValue
//! ├── Catalog(CatalogError)     : UnknownProfile, InvalidProfile
//! └── Sequencer(SequencerError) : graph validation, eligibility, StepFailed
//! ```
//!
//! Per-key merge problems are not errors of the whole pass: they are
//! collected as [`Conflict`]s and returned next to the merged document.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::ArtifactId;

/// Top-level error type for the meshnode engine.
#[derive(Error, Debug)]
pub enum MeshnodeError {
    /// Loading or committing an artifact failed.
    #[error("Artifact store error: {0}")]
    Store(#[from] StoreError),

    /// A configuration key or value was rejected.
    #[error("Option error: {0}")]
    Option(#[from] OptionError),

    /// A hardware profile could not be resolved.
    #[error("Profile catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The setup step sequencer rejected an operation.
    #[error("Step sequencer error: {0}")]
    Sequencer(#[from] SequencerError),
}

/// Errors raised by the artifact store while loading or committing files.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The artifact file does not exist.
    #[error("{artifact} not found at {}", .path.display())]
    NotFound {
        /// Which artifact was requested.
        artifact: ArtifactId,
        /// Path that was checked.
        path: PathBuf,
    },

    /// The file exists but is not valid for its expected format.
    #[error("cannot parse {}: {message}", .path.display())]
    Parse {
        /// Path of the unreadable file.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// The document cannot be serialised back to its file format.
    #[error("cannot serialise {}: {message}", .path.display())]
    Render {
        /// Path the document was going to be written to.
        path: PathBuf,
        /// Serialiser diagnostic.
        message: String,
    },

    /// The file changed on disk between `load` and `commit`.
    #[error("{} was modified by someone else since it was loaded; reload and retry", .path.display())]
    StaleRead {
        /// Path of the file that changed.
        path: PathBuf,
    },

    /// The target path is not writable.
    #[error("permission denied: {}", .path.display())]
    Permission {
        /// Path that could not be written.
        path: PathBuf,
    },

    /// Any other device or filesystem failure.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl StoreError {
    /// Classify an I/O error for `path`, separating permission failures.
    #[must_use]
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            Self::Permission { path }
        } else {
            Self::Io { path, source }
        }
    }
}

/// Errors raised by the option model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    /// No key with this name is declared.
    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),

    /// The value does not fit the key's declared type or allowed set.
    #[error("invalid value '{value}' for {key}: expected {allowed}")]
    InvalidValue {
        /// Key being assigned.
        key: String,
        /// Offending value, as text.
        value: String,
        /// Human-readable description of the allowed values.
        allowed: String,
    },
}

/// Errors raised by the profile catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The requested profile name is not in the catalog.
    #[error("unknown hat profile '{name}' (available: {available})")]
    UnknownProfile {
        /// Requested name.
        name: String,
        /// Comma-separated list of known profiles.
        available: String,
    },

    /// A catalog entry carries a value the option model rejects.
    #[error("hat profile '{name}' is invalid: {source}")]
    InvalidProfile {
        /// Profile name.
        name: String,
        /// Validation failure.
        source: OptionError,
    },
}

/// Errors raised by the step sequencer.
#[derive(Error, Debug)]
pub enum SequencerError {
    /// No step with this name is registered.
    #[error("unknown setup step '{0}'")]
    UnknownStep(String),

    /// Two registered steps share a name.
    #[error("duplicate setup step '{0}'")]
    DuplicateStep(String),

    /// A step depends on a step that is not registered.
    #[error("step '{0}' depends on a step that is not registered")]
    MissingDependency(String),

    /// The dependency graph contains a cycle.
    #[error("step dependency cycle detected among: {0}")]
    DependencyCycle(String),

    /// The step cannot start in its current state.
    #[error("step '{step}' cannot start: {reason}")]
    NotEligible {
        /// Step name.
        step: String,
        /// Why it is not eligible.
        reason: String,
    },

    /// One or more steps ended in the `failed` state.
    #[error("{} step(s) failed: {}", .steps.len(), .steps.join(", "))]
    StepFailed {
        /// Names of the failed steps.
        steps: Vec<String>,
    },

    /// Reading or writing the persisted step record failed.
    #[error(transparent)]
    Record(#[from] StoreError),
}

/// Why a single desired assignment could not be applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// The document holds a value of an incompatible shape at `path`.
    #[error("shape conflict at '{path}': expected {expected}, found {found}")]
    ShapeConflict {
        /// Dotted path where the mismatch was found.
        path: String,
        /// Shape the assignment needs.
        expected: &'static str,
        /// Shape currently in the document.
        found: &'static str,
    },

    /// The value failed validation against the option model.
    #[error("{0}")]
    InvalidValue(OptionError),

    /// The key belongs to the other artifact.
    #[error("key is managed in {owner}")]
    WrongArtifact {
        /// Artifact that owns the key.
        owner: ArtifactId,
    },

    /// The key is not declared in the option model.
    #[error("unknown configuration key")]
    UnknownKey,
}

/// A desired assignment that was skipped during reconciliation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{key}: {kind}")]
pub struct Conflict {
    /// Name of the key that was not applied.
    pub key: String,
    /// Reason it was not applied.
    pub kind: ConflictKind,
}

/// Every conflict from one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport(pub Vec<Conflict>);

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} key(s) could not be applied", self.0.len())?;
        for conflict in &self.0 {
            write!(f, "\n  {conflict}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConflictReport {}
