//! Utility functions

use crate::error::RexError;
use eyre::{Context, Result};
use std::fs::{self, File, Permissions};
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Mode for every mount-point directory we create
pub const MOUNT_POINT_MODE: u32 = 0o755;

/// Check if path is a directory
pub fn is_dir<P: AsRef<Path>>(path: P) -> Result<bool> {
    Ok(fs::metadata(path.as_ref())?.is_dir())
}

/// Ensure a directory exists with given permissions
pub fn ensure_dir<P: AsRef<Path>>(path: P, mode: u32) -> Result<()> {
    let path = path.as_ref();

    log::info!("mkdir -m {:o} {}", mode, path.display());
    match fs::create_dir(path) {
        Ok(()) => {}
        // Someone else got there first
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            if !is_dir(path)? {
                return Err(RexError::NotADirectory {
                    path: path.to_path_buf(),
                }
                .into());
            }
            return Ok(());
        }
        Err(e) => return Err(e).wrap_err_with(|| format!("mkdir '{}' failed", path.display())),
    }
    fs::set_permissions(path, Permissions::from_mode(mode))
        .wrap_err_with(|| format!("chmod '{}' failed", path.display()))?;

    Ok(())
}

/// Ensure a file exists with given permissions
pub fn ensure_file<P: AsRef<Path>>(path: P, mode: u32) -> Result<()> {
    let path = path.as_ref();

    if !path.exists() {
        log::info!("touch {}", path.display());
        File::create(path).wrap_err_with(|| format!("create '{}' failed", path.display()))?;
        fs::set_permissions(path, Permissions::from_mode(mode))?;
    }

    Ok(())
}

/// Ancestors of `path` (itself included) that do not exist yet, shallowest
/// first.
///
/// Walking stops at the first component that exists; if that component is
/// not a directory nothing can be created beneath it.
pub fn missing_ancestors<P: AsRef<Path>>(path: P) -> Result<Vec<PathBuf>> {
    let mut missing = Vec::new();

    for ancestor in path.as_ref().ancestors() {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        match fs::metadata(ancestor) {
            Ok(meta) if meta.is_dir() => break,
            Ok(_) => {
                return Err(RexError::NotADirectory {
                    path: ancestor.to_path_buf(),
                }
                .into());
            }
            // ENOTDIR means something higher up is in the way; keep walking to find it
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                missing.push(ancestor.to_path_buf())
            }
            Err(e) => {
                return Err(e).wrap_err_with(|| format!("stat '{}' failed", ancestor.display()));
            }
        }
    }

    missing.reverse();
    Ok(missing)
}

/// Create `path` and every missing parent with `mode`.
///
/// Succeeds without doing anything when the directory already exists.
pub fn create_dirs<P: AsRef<Path>>(path: P, mode: u32) -> Result<()> {
    for dir in missing_ancestors(path)? {
        ensure_dir(&dir, mode)?;
    }
    Ok(())
}

/// Create parent directories with given permissions
pub fn create_parent_dirs<P: AsRef<Path>>(path: P, mode: u32) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        create_dirs(parent, mode)?;
    }
    Ok(())
}
