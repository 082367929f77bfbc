//! Rex - run a command inside a root assembled from existing directories
//!
//! Layers (`PATH:`) are merged at the sandbox root with overlayfs, other
//! directories are bind-mounted at their own absolute paths, and the command
//! is exec'd after a chroot into the result.

pub mod assemble;
pub mod bind_mount;
pub mod cli;
pub mod dirspec;
pub mod error;
pub mod launch;
pub mod mount;
pub mod plan;
pub mod sandbox;
pub mod scratch;
pub mod utils;

pub use cli::{Args, CleanArgs};
pub use error::RexError;
pub use sandbox::{LaunchConfig, LaunchFailure};
