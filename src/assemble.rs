//! Turning a mount plan into mounts under the scratch root
//!
//! Order matters:
//! 1. every sub-mount's mount point is created in the bare scratch root,
//! 2. the overlay is mounted on the scratch root (which is also its most
//!    precedent lower layer, so those mount points show through),
//! 3. the sub-mounts are bound onto the merged view.

use crate::bind_mount::bind_mount;
use crate::mount::{OverlayOptions, mount_overlay, unmount};
use crate::plan::MountPlan;
use crate::utils::{MOUNT_POINT_MODE, create_dirs, create_parent_dirs, ensure_file};
use eyre::{Result, bail};
use std::path::{Path, PathBuf};

/// Overlay request for `plan` mounted onto `root`
pub fn overlay_options(
    plan: &MountPlan,
    root: &Path,
    workdir: Option<&Path>,
) -> Result<OverlayOptions> {
    let mut lowerdirs = vec![root.to_path_buf()];
    lowerdirs.extend(plan.lower_layers().map(|layer| layer.source.clone()));

    let (upperdir, workdir) = match (plan.upper_layer(), workdir) {
        (Some(upper), Some(workdir)) => (Some(upper.source.clone()), Some(workdir.to_path_buf())),
        (Some(upper), None) => bail!(
            "writable layer {} needs a work directory",
            upper.source.display()
        ),
        (None, _) => (None, None),
    };

    Ok(OverlayOptions {
        lowerdirs,
        upperdir,
        workdir,
    })
}

/// Mounts made so far for one scratch root
#[derive(Debug)]
pub struct Assembly {
    root: PathBuf,
    mounted: Vec<PathBuf>,
}

impl Assembly {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            mounted: Vec::new(),
        }
    }

    #[cfg(test)]
    fn root(&self) -> &Path {
        &self.root
    }

    /// Mount targets in the order they were mounted
    #[cfg(test)]
    fn mounted(&self) -> &[PathBuf] {
        &self.mounted
    }

    /// Run all three steps. On error, whatever was mounted stays recorded for
    /// `detach`.
    pub fn assemble(&mut self, plan: &MountPlan, workdir: Option<&Path>) -> Result<()> {
        self.prepare_mount_points(plan)?;
        self.mount_layers(plan, workdir)?;
        self.bind_submounts(plan)?;
        Ok(())
    }

    /// Create every sub-mount target inside the bare scratch root
    pub fn prepare_mount_points(&self, plan: &MountPlan) -> Result<()> {
        for sub in &plan.submounts {
            let target = sub.target(&self.root);
            if sub.source.is_dir() {
                create_dirs(&target, MOUNT_POINT_MODE)?;
            } else {
                create_parent_dirs(&target, MOUNT_POINT_MODE)?;
                ensure_file(&target, 0o644)?;
            }
        }
        Ok(())
    }

    /// Mount the overlay on the scratch root, if the plan has any layers
    pub fn mount_layers(&mut self, plan: &MountPlan, workdir: Option<&Path>) -> Result<()> {
        if plan.layers.is_empty() {
            log::debug!("no layers, scratch root stays a plain directory");
            return Ok(());
        }

        let overlay = overlay_options(plan, &self.root, workdir)?;
        mount_overlay(&self.root, &overlay)?;
        self.mounted.push(self.root.clone());
        Ok(())
    }

    /// Bind every sub-mount onto its mirrored target. The first failure aborts.
    pub fn bind_submounts(&mut self, plan: &MountPlan) -> Result<()> {
        for sub in plan.submounts_in_mount_order() {
            let target = sub.target(&self.root);
            bind_mount(&sub.source, &target)?;
            self.mounted.push(target);
        }
        Ok(())
    }

    /// Lazily unmount everything this assembly mounted, newest first.
    ///
    /// Keeps going past failures; the error reports how many were left.
    pub fn detach(&mut self) -> Result<()> {
        let mut failed = 0;
        while let Some(target) = self.mounted.pop() {
            if let Err(e) = unmount(&target) {
                log::error!("{:#}", e);
                failed += 1;
            }
        }
        if failed > 0 {
            bail!("{} mount(s) under {} could not be detached", failed, self.root.display());
        }
        Ok(())
    }
}
