//! Artifact store: the only component that reads or writes artifact files.
//!
//! A [`Snapshot`] pairs a parsed document with the [`Fingerprint`] of the
//! bytes it was parsed from. [`ArtifactStore::commit`] refuses to write when
//! the file on disk no longer matches that fingerprint, so an edit made by
//! someone else between load and commit is never overwritten.

pub mod atomic;
pub mod boot;
pub mod fingerprint;
pub mod yaml;
mod yaml_edit;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use atomic::atomic_write;
pub use boot::BootConfigDocument;
pub use fingerprint::Fingerprint;
pub use yaml::ServiceYamlDocument;

/// Identifies one of the two managed configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactId {
    /// Boot-firmware options file (`config.txt`).
    BootConfig,
    /// Daemon service configuration (`config.yaml`).
    ServiceYaml,
}

impl ArtifactId {
    /// Both artifacts, boot config first.
    pub const ALL: [Self; 2] = [Self::BootConfig, Self::ServiceYaml];
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BootConfig => write!(f, "boot config"),
            Self::ServiceYaml => write!(f, "service config"),
        }
    }
}

/// A document type the store can load and commit.
pub trait Artifact: Sized {
    /// Which artifact this document type represents.
    const ID: ArtifactId;

    /// Parse file content.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when `text` is not valid for the format.
    fn parse(text: &str) -> Result<Self, String>;

    /// Serialise to file content.
    ///
    /// # Errors
    ///
    /// Returns the serialiser's diagnostic when the document holds values the
    /// format cannot express.
    fn render(&self) -> Result<String, String>;

    /// Starting document used when the file does not exist yet.
    fn template() -> Self;
}

/// A parsed document of either artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// Boot options file.
    Boot(BootConfigDocument),
    /// Service YAML file.
    Service(ServiceYamlDocument),
}

impl Document {
    /// Artifact this document belongs to.
    #[must_use]
    pub const fn artifact(&self) -> ArtifactId {
        match self {
            Self::Boot(_) => ArtifactId::BootConfig,
            Self::Service(_) => ArtifactId::ServiceYaml,
        }
    }

    /// Serialise to file content.
    ///
    /// # Errors
    ///
    /// See [`Artifact::render`].
    pub fn render(&self) -> Result<String, String> {
        match self {
            Self::Boot(doc) => doc.render(),
            Self::Service(doc) => doc.render(),
        }
    }
}

/// A document together with the fingerprint of the bytes it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<D> {
    /// Parsed document.
    pub document: D,
    /// Fingerprint of the file at load time.
    pub fingerprint: Fingerprint,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The rendered document matched the file; nothing was written.
    Unchanged,
    /// The file was replaced.
    Committed {
        /// Fingerprint of the new content.
        fingerprint: Fingerprint,
        /// Where the previous content was copied, if anywhere.
        backup: Option<PathBuf>,
    },
}

/// File locations managed by the store.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    boot_config: PathBuf,
    service_config: PathBuf,
    backup_dir: Option<PathBuf>,
}

impl ArtifactStore {
    /// Create a store for the given artifact paths.
    #[must_use]
    pub fn new(boot_config: impl Into<PathBuf>, service_config: impl Into<PathBuf>) -> Self {
        Self {
            boot_config: boot_config.into(),
            service_config: service_config.into(),
            backup_dir: None,
        }
    }

    /// Copy each file into `dir` before it is replaced.
    #[must_use]
    pub fn with_backup_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.backup_dir = dir;
        self
    }

    /// Path of an artifact on disk.
    #[must_use]
    pub fn path(&self, id: ArtifactId) -> &Path {
        match id {
            ArtifactId::BootConfig => &self.boot_config,
            ArtifactId::ServiceYaml => &self.service_config,
        }
    }

    /// Load and parse an artifact.
    ///
    /// # Errors
    ///
    /// * [`StoreError::NotFound`] if the file does not exist.
    /// * [`StoreError::Parse`] if the content is not valid UTF-8 or not valid
    ///   for the artifact's format.
    /// * [`StoreError::Permission`] / [`StoreError::Io`] on read failure.
    pub fn load<D: Artifact>(&self) -> Result<Snapshot<D>, StoreError> {
        let path = self.path(D::ID);
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    artifact: D::ID,
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(StoreError::from_io(path, e)),
        };
        let fingerprint = Fingerprint::of_bytes(&bytes);
        let text = String::from_utf8(bytes).map_err(|e| StoreError::Parse {
            path: path.to_path_buf(),
            message: format!("not valid UTF-8: {e}"),
        })?;
        let document = D::parse(&text).map_err(|message| StoreError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        tracing::debug!("loaded {} from {} ({fingerprint})", D::ID, path.display());
        Ok(Snapshot {
            document,
            fingerprint,
        })
    }

    /// Load an artifact, starting from its empty template when the file is
    /// missing.
    ///
    /// # Errors
    ///
    /// Same as [`ArtifactStore::load`], except that a missing file is not an
    /// error.
    pub fn load_or_template<D: Artifact>(&self) -> Result<Snapshot<D>, StoreError> {
        match self.load::<D>() {
            Err(StoreError::NotFound { path, .. }) => {
                tracing::debug!("{} missing at {}, using template", D::ID, path.display());
                Ok(Snapshot {
                    document: D::template(),
                    fingerprint: Fingerprint::Absent,
                })
            }
            other => other,
        }
    }

    /// Load either artifact by id, falling back to its template.
    ///
    /// # Errors
    ///
    /// Same as [`ArtifactStore::load_or_template`].
    pub fn load_document(&self, id: ArtifactId) -> Result<Snapshot<Document>, StoreError> {
        Ok(match id {
            ArtifactId::BootConfig => {
                let s = self.load_or_template::<BootConfigDocument>()?;
                Snapshot {
                    document: Document::Boot(s.document),
                    fingerprint: s.fingerprint,
                }
            }
            ArtifactId::ServiceYaml => {
                let s = self.load_or_template::<ServiceYamlDocument>()?;
                Snapshot {
                    document: Document::Service(s.document),
                    fingerprint: s.fingerprint,
                }
            }
        })
    }

    /// Write `document` over the artifact loaded with fingerprint `base`.
    ///
    /// # Errors
    ///
    /// * [`StoreError::StaleRead`] if the file changed since it was loaded;
    ///   nothing is written.
    /// * [`StoreError::Render`] if the document cannot be serialised.
    /// * [`StoreError::Permission`] if the target or backup cannot be written.
    /// * [`StoreError::Io`] on any other filesystem failure.
    pub fn commit<D: Artifact>(
        &self,
        base: &Fingerprint,
        document: &D,
    ) -> Result<CommitOutcome, StoreError> {
        let rendered = document.render().map_err(|message| StoreError::Render {
            path: self.path(D::ID).to_path_buf(),
            message,
        })?;
        self.commit_rendered(D::ID, base, &rendered)
    }

    /// [`ArtifactStore::commit`] for a [`Document`] of either kind.
    ///
    /// # Errors
    ///
    /// Same as [`ArtifactStore::commit`].
    pub fn commit_document(
        &self,
        base: &Fingerprint,
        document: &Document,
    ) -> Result<CommitOutcome, StoreError> {
        let id = document.artifact();
        let rendered = document.render().map_err(|message| StoreError::Render {
            path: self.path(id).to_path_buf(),
            message,
        })?;
        self.commit_rendered(id, base, &rendered)
    }

    fn commit_rendered(
        &self,
        id: ArtifactId,
        base: &Fingerprint,
        rendered: &str,
    ) -> Result<CommitOutcome, StoreError> {
        let path = self.path(id);
        let current = Fingerprint::of_file(path).map_err(|e| StoreError::from_io(path, e))?;
        if &current != base {
            tracing::debug!(
                "{} changed on disk: loaded {base}, now {current}",
                path.display()
            );
            return Err(StoreError::StaleRead {
                path: path.to_path_buf(),
            });
        }

        let new_fingerprint = Fingerprint::of_bytes(rendered.as_bytes());
        if new_fingerprint == current {
            return Ok(CommitOutcome::Unchanged);
        }

        let backup = match (&self.backup_dir, &current) {
            (Some(dir), Fingerprint::Sha256(_)) => Some(backup_file(path, dir)?),
            _ => None,
        };

        atomic_write(path, rendered.as_bytes()).map_err(|e| StoreError::from_io(path, e))?;
        tracing::debug!("committed {id} to {} ({new_fingerprint})", path.display());
        Ok(CommitOutcome::Committed {
            fingerprint: new_fingerprint,
            backup,
        })
    }
}

/// Copy `path` to `<dir>/<name>.<UTC timestamp>.bak`.
fn backup_file(path: &Path, dir: &Path) -> Result<PathBuf, StoreError> {
    let name = path
        .file_name()
        .map_or_else(|| "artifact".into(), |n| n.to_string_lossy());
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let target = dir.join(format!("{name}.{stamp}.bak"));
    fs::create_dir_all(dir).map_err(|e| StoreError::from_io(dir, e))?;
    fs::copy(path, &target).map_err(|e| StoreError::from_io(&target, e))?;
    tracing::debug!("backed up {} to {}", path.display(), target.display());
    Ok(target)
}
