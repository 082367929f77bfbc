//! rex-clean - remove the scratch area left behind by rex

use clap::Parser;
use eyre::Result;

use rex::cli::{CleanArgs, validate_log_level};
use rex::scratch::reclaim_base;

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = CleanArgs::parse();
    validate_log_level(&args.log_level)?;

    if std::env::var("RUST_LOG").is_err() {
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(&args.log_level),
        )
        .init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default()).init();
    }

    reclaim_base(&args.scratch_base)
}
