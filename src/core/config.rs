use std::path::PathBuf;

use figment::{
	Figment,
	providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::Result;

/// How the daemon should lock its worker mappings against being paged out.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MlockMode {
	#[default]
	None,
	Current,
	Future,
	CurrentAndFuture,
}

impl MlockMode {
	/// The `mlockall(2)` flags this mode corresponds to, or `None` if nothing
	/// should be locked.
	#[must_use]
	pub fn flags(self) -> Option<nix::sys::mman::MlockAllFlags> {
		use nix::sys::mman::MlockAllFlags as F;

		match self {
			Self::None => None,
			Self::Current => Some(F::MCL_CURRENT),
			Self::Future => Some(F::MCL_FUTURE),
			Self::CurrentAndFuture => Some(F::MCL_CURRENT | F::MCL_FUTURE),
		}
	}
}

fn default_root_path() -> PathBuf { PathBuf::from("/sys/fs/zuf") }

fn default_log_level() -> String { String::from("info") }

/// Daemon-wide configuration, resolved once before the [`crate::Daemon`] is
/// constructed.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
	/// Path to the kernel transport's IOCTL root.
	#[serde(default = "default_root_path")]
	pub root_path: PathBuf,

	/// A [`tracing_subscriber::EnvFilter`] directive string.
	#[serde(default = "default_log_level")]
	pub log_level: String,

	#[serde(default)]
	pub mlock_mode: MlockMode,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			root_path: default_root_path(),
			log_level: default_log_level(),
			mlock_mode: MlockMode::default(),
		}
	}
}

impl Config {
	/// Loads configuration by layering an optional TOML file under
	/// environment variables prefixed `ZUFS_` (env wins over file, matching
	/// the precedence used elsewhere in this workspace's config layer).
	pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
		let mut figment = Figment::from(figment::providers::Serialized::defaults(Config::default()));

		if let Some(path) = path {
			figment = figment.merge(Toml::file(path));
		}

		figment = figment.merge(Env::prefixed("ZUFS_"));

		Ok(figment.extract()?)
	}
}

impl From<figment::Error> for crate::Error {
	fn from(e: figment::Error) -> Self { crate::Error::Internal(e.to_string()) }
}
