//! Command-line interface

use crate::scratch::DEFAULT_SCRATCH_BASE;
use clap::Parser;
use std::path::PathBuf;

const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[derive(Parser, Debug)]
#[command(name = "rex")]
#[command(version)]
#[command(about = "Run a command chrooted into a root assembled from existing directories")]
#[command(
    long_about = "Rex builds a throwaway root directory, merges the given layer directories \
                  onto it with overlayfs, bind-mounts the remaining directories at their own \
                  absolute paths, then chroots into it and execs the command.\n\n\
                  DIR is either PATH (bind-mounted at PATH inside the sandbox) or PATH: \
                  (merged at the sandbox root; earlier layers win)."
)]
pub struct Args {
    /// The directory to change to inside the sandbox (defaults to the current directory)
    #[arg(short = 'c', long = "cd", value_name = "DIR")]
    pub cd: Option<PathBuf>,

    /// Writable top layer; takes the same PATH or PATH: form as DIR
    #[arg(short = 'u', long, value_name = "DIR")]
    pub upper: Option<String>,

    /// Where per-invocation scratch roots are created
    #[arg(long, value_name = "DIR", default_value = DEFAULT_SCRATCH_BASE)]
    pub scratch_base: PathBuf,

    /// Set logging level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Directories to assemble into the sandbox
    #[arg(value_name = "DIR")]
    pub dirs: Vec<String>,

    /// The command and arguments to run, after `--`
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Args {
    /// Validate the arguments
    pub fn validate(&self) -> eyre::Result<()> {
        if self.command.is_empty() {
            eyre::bail!("need arguments after '--'");
        }

        if self.dirs.is_empty() && self.upper.is_none() {
            eyre::bail!("No directories specified");
        }

        validate_log_level(&self.log_level)
    }
}

#[derive(Parser, Debug)]
#[command(name = "rex-clean")]
#[command(version)]
#[command(about = "Remove every scratch root left behind by rex")]
#[command(
    long_about = "Deletes the scratch base directory and everything in it. Run it when no \
                  sandbox is active (e.g. at boot); directories that are still mount points \
                  are left in place and reported."
)]
pub struct CleanArgs {
    /// The scratch base directory to remove
    #[arg(long, value_name = "DIR", default_value = DEFAULT_SCRATCH_BASE)]
    pub scratch_base: PathBuf,

    /// Set logging level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Reject anything env_logger would not understand as a level
pub fn validate_log_level(level: &str) -> eyre::Result<()> {
    if !VALID_LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
        eyre::bail!(
            "Invalid log level '{}'. Valid levels are: error, warn, info, debug, trace",
            level
        );
    }
    Ok(())
}
