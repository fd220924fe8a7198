//! Content fingerprints used to detect concurrent edits between load and commit.
use std::fmt;
use std::io;
use std::path::Path;

use sha2::{Digest as _, Sha256};

/// Identity of a file's content at a point in time.
///
/// # Examples
///
/// ```
/// use meshnode_cli::store::Fingerprint;
///
/// let a = Fingerprint::of_bytes(b"dtparam=spi=on\n");
/// let b = Fingerprint::of_bytes(b"dtparam=spi=on\n");
/// assert_eq!(a, b);
/// assert_ne!(a, Fingerprint::Absent);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    /// The file did not exist.
    Absent,
    /// Hex-encoded SHA-256 of the file's bytes.
    Sha256(String),
}

impl Fingerprint {
    /// Fingerprint an in-memory byte buffer.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self::Sha256(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Fingerprint the file at `path`, or [`Fingerprint::Absent`] if missing.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than `NotFound`.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Self::of_bytes(&bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::Absent),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Sha256(hex) => write!(f, "sha256:{}", hex.get(..12).unwrap_or(hex)),
        }
    }
}
