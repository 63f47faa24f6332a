//! Argv surface for the `zufsd` binary (spec 4.M). Every field is optional:
//! omitted flags fall back to whatever `Config::load` already resolved from
//! the config file / `ZUFS_`-prefixed environment variables.

use std::path::PathBuf;

use clap::Parser;

/// User-space dispatch daemon for a kernel-assisted filesystem.
#[derive(Parser, Debug)]
#[command(name = "zufsd", version, about)]
pub struct Args {
	/// Path to a TOML config file, layered under `ZUFS_`-prefixed env vars.
	#[arg(long, value_name = "PATH")]
	pub config: Option<PathBuf>,

	/// Overrides `Config::log_level`, e.g. `info` or `zufs_dispatch=debug`.
	#[arg(long, value_name = "FILTER")]
	pub log_level: Option<String>,

	/// Overrides `Config::root_path`, the kernel transport's IOCTL root.
	#[arg(long, value_name = "PATH")]
	pub root_path: Option<PathBuf>,
}

impl Args {
	#[must_use]
	pub fn parse() -> Self { <Self as Parser>::parse() }
}
