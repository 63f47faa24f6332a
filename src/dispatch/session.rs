use std::sync::Arc;

use crate::{registry::Registry, vtables::SuperblockOps};

/// Everything the dispatcher needs for one mounted superblock: its vtable
/// plus the registry of inode-infos opened against it.
pub struct Session {
	pub sbi: Arc<dyn SuperblockOps>,
	pub inodes: Registry,
}

impl Session {
	#[must_use]
	pub fn new(sbi: Arc<dyn SuperblockOps>) -> Self {
		Self {
			sbi,
			inodes: Registry::new(),
		}
	}
}
