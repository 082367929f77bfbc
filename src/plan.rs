//! Mount plan: which directories become overlay layers and which are
//! bind-mounted beneath the sandbox root

use crate::dirspec::{DirectorySpec, TargetSpecifier};
use crate::error::RexError;
use eyre::Result;
use std::path::{Path, PathBuf};

/// A directory merged at the sandbox root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub source: PathBuf,
    /// Set for the `--upper` directory
    pub writable: bool,
}

/// A directory bind-mounted at its own absolute path inside the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubMount {
    pub source: PathBuf,
    pub writable: bool,
}

impl SubMount {
    /// Absolute host path of the mount point: `root` followed by the source path
    pub fn target(&self, root: &Path) -> PathBuf {
        mirror_under(root, &self.source)
    }
}

/// Re-base an absolute path under `root`
pub fn mirror_under(root: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix("/") {
        Ok(rel) if rel.as_os_str().is_empty() => root.to_path_buf(),
        Ok(rel) => root.join(rel),
        Err(_) => root.join(path),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountPlan {
    /// Most precedent first
    pub layers: Vec<Layer>,
    pub submounts: Vec<SubMount>,
}

impl MountPlan {
    /// Classify resolved directories.
    ///
    /// `upper` comes first in input order and is classified by the same rule
    /// as every other directory; the writable flag only tags it.
    pub fn build(specs: &[DirectorySpec], upper: Option<&DirectorySpec>) -> Result<Self> {
        let mut plan = MountPlan::default();

        let tagged = upper
            .map(|spec| (spec, true))
            .into_iter()
            .chain(specs.iter().map(|spec| (spec, false)));

        for (spec, writable) in tagged {
            match &spec.target {
                TargetSpecifier::Root => plan.layers.push(Layer {
                    source: spec.source.clone(),
                    writable,
                }),
                TargetSpecifier::Mirror => plan.submounts.push(SubMount {
                    source: spec.source.clone(),
                    writable,
                }),
                TargetSpecifier::Explicit(_) => {
                    return Err(RexError::NotImplemented {
                        spec: spec.raw.clone(),
                    }
                    .into());
                }
            }
        }

        if plan.is_empty() {
            return Err(RexError::EmptyPlan.into());
        }

        log::debug!(
            "plan: {} layer(s), {} sub-mount(s)",
            plan.layers.len(),
            plan.submounts.len()
        );
        Ok(plan)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.submounts.is_empty()
    }

    /// The writable layer, when `--upper` classified as a layer
    pub fn upper_layer(&self) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.writable)
    }

    /// Source of the `--upper` directory, however it was classified
    pub fn writable_source(&self) -> Option<&Path> {
        self.layers
            .iter()
            .find(|layer| layer.writable)
            .map(|layer| layer.source.as_path())
            .or_else(|| {
                self.submounts
                    .iter()
                    .find(|sub| sub.writable)
                    .map(|sub| sub.source.as_path())
            })
    }

    /// Layers that are mounted read-only, in precedence order
    pub fn lower_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter().filter(|layer| !layer.writable)
    }

    /// Sub-mounts ordered so that a mount point nested inside another
    /// sub-mount is bound after its parent
    pub fn submounts_in_mount_order(&self) -> Vec<&SubMount> {
        let mut ordered: Vec<&SubMount> = self.submounts.iter().collect();
        ordered.sort_by_key(|sub| sub.source.components().count());
        ordered
    }
}
