//! The `zufsd` binary: argv parsing and process wiring only (spec 4.M).
//! None of crates A-L depend on this crate.

mod clap_args;
mod signal;

use std::process::ExitCode;

use clap_args::Args;
use zufs_core::{Config, Result, error, info};
use zufs_daemon::Daemon;

fn main() -> ExitCode {
	match run() {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("{e}");
			ExitCode::FAILURE
		},
	}
}

fn run() -> Result<()> {
	let args = Args::parse();
	let config = resolve_config(&args)?;

	zufs_core::log::init(&config.log_level);

	// Block the shutdown signals on this, the process's only thread so far,
	// before the daemon spawns anything: every thread it creates inherits
	// this mask, so SIGINT/SIGTERM is only ever observed here.
	let signals = signal::block_shutdown_signals()?;

	let daemon = Daemon::new(config, Vec::new());
	daemon.start()?;
	info!("zufsd running, waiting for shutdown signal");

	signal::wait_for_one(&signals)?;

	daemon.stop();
	Ok(())
}

fn resolve_config(args: &Args) -> Result<Config> {
	let mut config = Config::load(args.config.as_deref())?;

	if let Some(level) = &args.log_level {
		config.log_level.clone_from(level);
	}

	if let Some(root_path) = &args.root_path {
		config.root_path.clone_from(root_path);
	}

	Ok(config)
}
