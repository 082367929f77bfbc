//! Scratch roots, work directories, and reclaiming them
//!
//! Every invocation gets its own `rex.XXXXXX` directory under a shared base
//! area. It is removed only when the launch fails before handoff; after a
//! successful handoff it holds the live mounts of the running command and is
//! left for `rex-clean`.

use crate::mount::mount_points;
use eyre::{Context, Result, bail};
use nix::unistd::mkdtemp;
use std::collections::HashSet;
use std::fs::{self, DirBuilder, Permissions};
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Where scratch roots live unless `--scratch-base` says otherwise
pub const DEFAULT_SCRATCH_BASE: &str = "/tmp/.rex";

/// Name prefix that marks a scratch root as ours
pub const SCRATCH_PREFIX: &str = "rex.";

/// Infix between the upper layer's path and the random suffix
pub const WORK_DIR_INFIX: &str = ".work.";

const BASE_MODE: u32 = 0o775;
const ROOT_MODE: u32 = 0o755;

/// Create the shared base area, tolerating a concurrent creator
pub fn ensure_base<P: AsRef<Path>>(base: P) -> Result<()> {
    let base = base.as_ref();

    log::debug!("mkdir -m {:o} {}", BASE_MODE, base.display());
    match DirBuilder::new().mode(BASE_MODE).create(base) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e).wrap_err_with(|| format!("mkdir '{}' failed", base.display())),
    }
}

/// Does `name` look like a scratch root created by us?
pub fn is_scratch_root_name(name: &str) -> bool {
    name.strip_prefix(SCRATCH_PREFIX).is_some_and(|suffix| {
        suffix.len() == 6 && suffix.bytes().all(|b| b.is_ascii_alphanumeric())
    })
}

fn make_temp_dir(template: PathBuf) -> Result<PathBuf> {
    mkdtemp(&template).wrap_err_with(|| format!("mkdtemp '{}' failed", template.display()))
}

/// Set `mode` on a directory we just created; remove it if that fails
fn chmod_or_discard(path: &Path, mode: u32) -> Result<()> {
    if let Err(e) = fs::set_permissions(path, Permissions::from_mode(mode)) {
        if let Err(rm) = remove_tree(path) {
            log::error!("{:#}", rm);
        }
        return Err(e).wrap_err_with(|| format!("chmod '{}' failed", path.display()));
    }
    Ok(())
}

/// The per-invocation directory that becomes the sandbox's `/`
#[derive(Debug)]
pub struct ScratchRoot {
    path: PathBuf,
}

impl ScratchRoot {
    /// Allocate a fresh, uniquely named scratch root under `base`
    pub fn allocate<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref();
        ensure_base(base)?;

        let path = make_temp_dir(base.join(format!("{}XXXXXX", SCRATCH_PREFIX)))?;
        // mkdtemp leaves it 0700, which would become the sandbox root's mode
        chmod_or_discard(&path, ROOT_MODE)?;

        log::info!("root is '{}'", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the scratch root. Only for the failure path.
    pub fn reclaim(self) -> Result<()> {
        remove_tree(&self.path)
    }
}

/// Overlay bookkeeping space, a sibling of the writable layer's source
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    pub fn allocate<P: AsRef<Path>>(upper: P) -> Result<Self> {
        let mut template = upper.as_ref().as_os_str().to_owned();
        template.push(WORK_DIR_INFIX);
        template.push("XXXXXX");

        let path = make_temp_dir(PathBuf::from(template))
            .wrap_err("failed to create work directory")?;

        log::debug!("workdir '{}'", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the work directory. Only for the failure path.
    pub fn reclaim(self) -> Result<()> {
        remove_tree(&self.path)
    }
}

/// Recursively delete `path` without leaving its filesystem.
///
/// Directories that are mount points (listed in the mount table, or on
/// another device) are skipped and counted as failures instead of being
/// emptied through the mount. Every failure is logged and removal continues
/// with the next entry.
pub fn remove_tree<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    log::info!("rm -rf --one-file-system {}", path.display());

    // Resolve the parent only; a symlinked `path` is unlinked, not followed
    let Some(name) = path.file_name() else {
        bail!("refusing to remove '{}'", path.display());
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let parent = fs::canonicalize(parent)
        .wrap_err_with(|| format!("realpath '{}' failed", parent.display()))?;
    let dev = fs::metadata(&parent)
        .wrap_err_with(|| format!("stat '{}' failed", parent.display()))?
        .dev();
    let path = parent.join(name);

    let mounted = mount_points().unwrap_or_else(|e| {
        log::warn!("could not read the mount table: {:#}", e);
        HashSet::new()
    });

    let remover = Remover { dev, mounted };
    let failures = remover.remove(&path);
    if failures > 0 {
        bail!(
            "failed to remove {} entr{} under '{}'",
            failures,
            if failures == 1 { "y" } else { "ies" },
            path.display()
        );
    }
    Ok(())
}

struct Remover {
    dev: u64,
    mounted: HashSet<PathBuf>,
}

impl Remover {
    /// Returns the number of entries that could not be removed
    fn remove(&self, path: &Path) -> usize {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return 0,
            Err(e) => {
                log::error!("stat '{}' failed: {}", path.display(), e);
                return 1;
            }
        };

        if self.mounted.contains(path) || (meta.is_dir() && meta.dev() != self.dev) {
            log::error!("'{}' is still a mount point, not removing", path.display());
            return 1;
        }

        if !meta.is_dir() {
            return match fs::remove_file(path) {
                Ok(()) => 0,
                Err(e) => {
                    log::error!("unlink '{}' failed: {}", path.display(), e);
                    1
                }
            };
        }

        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("opendir '{}' failed: {}", path.display(), e);
                return 1;
            }
        };

        let mut failures = 0;
        for entry in entries {
            match entry {
                Ok(entry) => failures += self.remove(&entry.path()),
                Err(e) => {
                    log::error!("readdir '{}' failed: {}", path.display(), e);
                    failures += 1;
                }
            }
        }

        if failures == 0 {
            if let Err(e) = fs::remove_dir(path) {
                log::error!("rmdir '{}' failed: {}", path.display(), e);
                failures += 1;
            }
        }
        failures
    }
}

/// Delete the whole base area. A missing base is not an error.
pub fn reclaim_base<P: AsRef<Path>>(base: P) -> Result<()> {
    let base = base.as_ref();

    match fs::metadata(base) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::debug!("'{}' does not exist, nothing to clean", base.display());
            return Ok(());
        }
        Err(e) => return Err(e).wrap_err_with(|| format!("stat '{}' failed", base.display())),
    }

    if let Ok(entries) = fs::read_dir(base) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !is_scratch_root_name(&name) {
                log::warn!("'{}' in {} is not a scratch root", name, base.display());
            }
        }
    }

    remove_tree(base)
}
