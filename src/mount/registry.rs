//! The table of compiled-in filesystem types the mount thread registers with
//! the kernel at startup (spec 4.G step 4) and looks up by name on `MOUNT`.

use std::{collections::HashMap, sync::Arc};

use zufs_core::{Error, Result};
use zufs_dispatch::FsType;

#[derive(Default)]
pub struct FsRegistry {
	types: HashMap<String, Arc<dyn FsType>>,
}

impl FsRegistry {
	#[must_use]
	pub fn new(types: Vec<Arc<dyn FsType>>) -> Self {
		Self {
			types: types.into_iter().map(|fs| (fs.name().to_owned(), fs)).collect(),
		}
	}

	pub fn get(&self, name: &str) -> Result<Arc<dyn FsType>> {
		self.types.get(name).cloned().ok_or_else(|| Error::NotFound(format!("unknown filesystem type {name:?}")))
	}

	pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn FsType>> { self.types.values() }
}

#[cfg(test)]
mod tests {
	use zufs_core::Result;

	use super::*;

	struct Noop(&'static str);
	impl FsType for Noop {
		fn name(&self) -> &str { self.0 }

		fn sbi_alloc(&self) -> Result<Arc<dyn zufs_dispatch::SuperblockOps>> { unimplemented!() }
	}

	#[test]
	fn looks_up_registered_types_by_name() {
		let registry = FsRegistry::new(vec![Arc::new(Noop("zuf")) as Arc<dyn FsType>]);
		assert!(registry.get("zuf").is_ok());
		assert!(matches!(registry.get("nope"), Err(zufs_core::Error::NotFound(_))));
	}
}
