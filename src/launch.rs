//! chdir, chroot, exec
//!
//! Once `chroot` succeeds the launcher can no longer reach the scratch root by
//! its host path, and once `exec` succeeds none of its code runs again.

use crate::error::RexError;
use crate::plan::mirror_under;
use eyre::{Context, Report, Result, eyre};
use nix::unistd::{chdir, chroot};
use std::convert::Infallible;
use std::os::unix::process::CommandExt;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

/// Why the handoff did not happen
#[derive(Debug)]
pub struct HandoffError {
    /// The process is already inside the new root
    pub chrooted: bool,
    pub error: Report,
}

impl HandoffError {
    fn before_chroot(error: Report) -> Self {
        Self {
            chrooted: false,
            error,
        }
    }

    fn after_chroot(error: Report) -> Self {
        Self {
            chrooted: true,
            error,
        }
    }
}

/// Working directory inside the sandbox.
///
/// `--cd` wins over the launcher's own directory; a relative `--cd` is taken
/// relative to the launcher's directory. The result is normalised lexically
/// and may not climb above `/`, since it is re-based under the scratch root.
pub fn sandbox_cwd(requested: Option<&Path>, original: &Path) -> Result<PathBuf> {
    let joined = match requested {
        Some(dir) => original.join(dir),
        None => original.to_path_buf(),
    };

    let mut cwd = PathBuf::from("/");
    for component in joined.components() {
        match component {
            Component::Normal(part) => cwd.push(part),
            Component::ParentDir => {
                if !cwd.pop() {
                    return Err(RexError::CwdOutsideRoot { path: joined }.into());
                }
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    Ok(cwd)
}

/// Enter `root` with `cwd` as working directory and replace this process
/// with `command`.
///
/// Only returns on failure.
pub fn handoff(root: &Path, cwd: &Path, command: &[String]) -> Result<Infallible, HandoffError> {
    let Some((program, args)) = command.split_first() else {
        return Err(HandoffError::before_chroot(eyre!("No command specified")));
    };

    let cd_full = mirror_under(root, cwd);
    log::info!("cd '{}'", cd_full.display());
    chdir(&cd_full)
        .wrap_err_with(|| format!("chdir '{}' failed", cd_full.display()))
        .map_err(HandoffError::before_chroot)?;

    log::info!("chroot '{}'", root.display());
    chroot(root)
        .wrap_err_with(|| format!("chroot '{}' failed", root.display()))
        .map_err(HandoffError::before_chroot)?;

    // From here on the scratch root is out of reach. Enter the working
    // directory again so symlinks on the way resolve inside the new root.
    chdir(cwd)
        .wrap_err_with(|| format!("chdir '{}' inside the sandbox failed", cwd.display()))
        .map_err(HandoffError::after_chroot)?;

    log::info!("exec '{}'", program);
    let err = Command::new(program).args(args).exec();

    Err(HandoffError::after_chroot(
        Report::new(err).wrap_err(format!("exec '{}' failed", program)),
    ))
}
