//! Bind mount operations

use eyre::{Context, Result, bail};
use nix::mount::{MsFlags, mount};
use std::path::Path;

/// Bind `source` onto `dest`.
///
/// A plain `MS_BIND`: not recursive, and not remounted read-only, so the
/// sandbox can write through to the source.
pub fn bind_mount<P: AsRef<Path>, Q: AsRef<Path>>(source: P, dest: Q) -> Result<()> {
    let source = source.as_ref();
    let dest = dest.as_ref();

    if !source.exists() {
        bail!("Bind mount source not found: {}", source.display());
    }

    log::info!("mount --bind {} {}", source.display(), dest.display());
    mount(
        Some(source),
        dest,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .wrap_err_with(|| {
        format!(
            "Failed to bind mount {} to {}",
            source.display(),
            dest.display()
        )
    })?;
    log::debug!("Bind mount completed successfully");

    Ok(())
}
