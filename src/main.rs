//! Rex - run a command inside a root assembled from existing directories

use clap::Parser;
use eyre::Result;
use nix::unistd::{getgid, getuid};

use rex::cli::Args;
use rex::sandbox::{LaunchConfig, LaunchFailure};

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    args.validate()?;

    // Initialize logging - use --log-level if set, otherwise respect RUST_LOG
    // If RUST_LOG is set, it takes precedence over --log-level
    if std::env::var("RUST_LOG").is_err() {
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(&args.log_level),
        )
        .init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default()).init();
    }

    log::info!("Starting rex");
    log::debug!("Real UID: {}, Real GID: {}", getuid(), getgid());

    let config = LaunchConfig::from_args(&args)?;
    let Err(failure) = config.launch();

    if let LaunchFailure::Handoff(handoff) = &failure {
        log::error!("handoff failed: {:#}", handoff.error);
    }
    Err(failure.into_report())
}
