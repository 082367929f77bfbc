//! Main sandbox execution logic

use crate::assemble::Assembly;
use crate::cli::Args;
use crate::dirspec::{DirectorySpec, resolve_all};
use crate::launch::{HandoffError, handoff, sandbox_cwd};
use crate::mount::check_option_path;
use crate::plan::MountPlan;
use crate::scratch::{SCRATCH_PREFIX, ScratchRoot, WorkDir};
use eyre::{Context, Report, Result};
use std::convert::Infallible;
use std::path::PathBuf;

/// Everything one launch needs, captured up front
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub dirs: Vec<String>,
    pub upper: Option<String>,
    pub cd: Option<PathBuf>,
    pub command: Vec<String>,
    pub scratch_base: PathBuf,
    /// The launcher's own working directory at startup
    pub original_cwd: PathBuf,
}

/// How a launch ended, given that it did not hand off
#[derive(Debug)]
pub enum LaunchFailure {
    /// Nothing was created yet
    Rejected(Report),
    /// Failed while building the sandbox; our own resources were reclaimed
    Construction(Report),
    /// chdir, chroot or exec failed
    Handoff(HandoffError),
}

impl LaunchFailure {
    pub fn into_report(self) -> Report {
        match self {
            LaunchFailure::Rejected(e) | LaunchFailure::Construction(e) => e,
            LaunchFailure::Handoff(HandoffError { error, .. }) => error,
        }
    }
}

/// Scratch root plus optional work directory, owned until handoff
struct Allocation {
    root: ScratchRoot,
    workdir: Option<WorkDir>,
}

impl Allocation {
    /// Failure path only: detach our mounts, then remove what we created.
    ///
    /// If any mount is still attached the directories are left alone, since
    /// removing them would reach into the mounted sources.
    fn reclaim(self, assembly: &mut Assembly) {
        if let Err(e) = assembly.detach() {
            log::error!(
                "{:#}; leaving {} for rex-clean",
                e,
                self.root.path().display()
            );
            return;
        }
        if let Some(workdir) = self.workdir {
            if let Err(e) = workdir.reclaim() {
                log::error!("{:#}", e);
            }
        }
        if let Err(e) = self.root.reclaim() {
            log::error!("{:#}", e);
        }
    }
}

impl LaunchConfig {
    /// Create launch config from CLI arguments
    pub fn from_args(args: &Args) -> Result<Self> {
        let original_cwd = std::env::current_dir().wrap_err("getcwd failed")?;
        let scratch_base = original_cwd.join(&args.scratch_base);

        Ok(Self {
            dirs: args.dirs.clone(),
            upper: args.upper.clone(),
            cd: args.cd.clone(),
            command: args.command.clone(),
            scratch_base,
            original_cwd,
        })
    }

    /// Resolve directories and classify them. No side effects.
    pub fn plan(&self) -> Result<MountPlan> {
        let specs = resolve_all(&self.dirs)?;
        let upper = self
            .upper
            .as_deref()
            .map(DirectorySpec::resolve)
            .transpose()?;

        let plan = MountPlan::build(&specs, upper.as_ref())?;

        if !plan.layers.is_empty() {
            check_option_path(&self.scratch_base.join(SCRATCH_PREFIX))?;
            for layer in &plan.layers {
                check_option_path(&layer.source)?;
            }
        }
        if self.upper.is_some() && plan.upper_layer().is_none() {
            log::warn!("--upper is not a layer (no trailing ':'); it will be bind-mounted");
        }
        Ok(plan)
    }

    /// Build the sandbox and hand off to the command.
    ///
    /// There is no `Ok` value: on success this process has become the
    /// command. Every return is a failure, already cleaned up as far as the
    /// stage allows.
    pub fn launch(&self) -> Result<Infallible, LaunchFailure> {
        let cwd = sandbox_cwd(self.cd.as_deref(), &self.original_cwd)
            .map_err(LaunchFailure::Rejected)?;
        let plan = self.plan().map_err(LaunchFailure::Rejected)?;

        let root = ScratchRoot::allocate(&self.scratch_base).map_err(LaunchFailure::Construction)?;
        let mut assembly = Assembly::new(root.path());

        let workdir = match plan.writable_source() {
            Some(upper) => match WorkDir::allocate(&upper) {
                Ok(workdir) => Some(workdir),
                Err(e) => {
                    Allocation {
                        root,
                        workdir: None,
                    }
                    .reclaim(&mut assembly);
                    return Err(LaunchFailure::Construction(e));
                }
            },
            None => None,
        };
        let allocation = Allocation { root, workdir };

        let workdir_path = allocation.workdir.as_ref().map(|w| w.path().to_path_buf());
        if let Err(e) = assembly.assemble(&plan, workdir_path.as_deref()) {
            allocation.reclaim(&mut assembly);
            return Err(LaunchFailure::Construction(e));
        }

        let Err(failure) = handoff(allocation.root.path(), &cwd, &self.command);

        if failure.chrooted {
            log::error!(
                "exec failed inside the sandbox; {} stays mounted until rex-clean",
                allocation.root.path().display()
            );
        } else {
            allocation.reclaim(&mut assembly);
        }
        Err(LaunchFailure::Handoff(failure))
    }
}
