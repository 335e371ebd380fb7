use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use iconfe::{cli, logger};

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let log_path = args.log_file.clone().unwrap_or_else(logger::default_log_path);
    logger::init_with_path(&log_path, level);
    log::info!("IconFE {} starting", env!("CARGO_PKG_VERSION"));

    cli::run(args)
}
