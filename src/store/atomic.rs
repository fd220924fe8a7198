//! Write-to-temporary-then-rename file replacement.
//!
//! The new content is written to `.<name>.tmp` next to the target, flushed to
//! disk, and renamed over the target. A crash at any point leaves either the
//! previous file or the complete new one in place, never a partial write.
//! Source and destination share a directory, so the rename stays on one
//! filesystem.

use std::fs::{self, File};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

/// Atomically replace `path` with `content`.
///
/// Creates missing parent directories. When the target already exists its
/// permission bits are carried over to the replacement.
///
/// # Errors
///
/// Returns the underlying I/O error if the temporary file cannot be created,
/// written, synced, or renamed. The temporary file is removed on failure.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_path_for(path)?;
    if let Err(e) = write_and_sync(&temp_path, content, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    sync_parent(path);
    Ok(())
}

/// `.<file name>.tmp` in the same directory as `target`.
fn temp_path_for(target: &Path) -> io::Result<PathBuf> {
    let name = target.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", target.display()),
        )
    })?;
    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(name);
    temp_name.push(".tmp");
    Ok(target.with_file_name(temp_name))
}

fn write_and_sync(temp_path: &Path, content: &[u8], target: &Path) -> io::Result<()> {
    let mut file = File::create(temp_path)?;
    file.write_all(content)?;
    file.sync_all()?;
    if let Ok(meta) = fs::metadata(target) {
        fs::set_permissions(temp_path, meta.permissions())?;
    }
    Ok(())
}

/// Flush the directory entry for the rename; best effort.
fn sync_parent(path: &Path) {
    #[cfg(unix)]
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
    #[cfg(not(unix))]
    let _ = path;
}
