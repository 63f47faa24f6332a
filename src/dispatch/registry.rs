//! The live inode-info table a superblock owns: a registry from the opaque
//! handles published into reply buffers back to the [`InodeOps`] trait
//! object the dispatcher calls into.
//!
//! Modeled per the "cyclic references" design note: the superblock owns this
//! registry; an inode-info's back-reference to its superblock does not, by
//! itself, keep the superblock alive.

use std::{
	collections::HashMap,
	sync::{
		Arc, Mutex,
		atomic::{AtomicU64, Ordering},
	},
};

use zufs_core::{Error, Result};

use crate::vtables::{InodeHandle, InodeOps};

#[derive(Default)]
pub struct Registry {
	next: AtomicU64,
	live: Mutex<HashMap<InodeHandle, Arc<dyn InodeOps>>>,
}

impl Registry {
	#[must_use]
	pub fn new() -> Self { Self::default() }

	/// Registers a freshly-opened inode, returning the handle published to
	/// the reply buffer.
	pub fn register(&self, ops: Arc<dyn InodeOps>) -> InodeHandle {
		// handle 0 is never issued, so callers can use it as "no inode".
		let handle = self.next.fetch_add(1, Ordering::Relaxed) + 1;
		self.live.lock().expect("registry lock poisoned").insert(handle, ops);
		handle
	}

	pub fn get(&self, handle: InodeHandle) -> Result<Arc<dyn InodeOps>> {
		self.live
			.lock()
			.expect("registry lock poisoned")
			.get(&handle)
			.cloned()
			.ok_or_else(|| Error::NotFound(format!("no live inode for handle {handle}")))
	}

	/// Removes and returns an inode-info, unconditionally: both the
	/// `FREE_INODE` and `EVICT_INODE` paths end with this regardless of
	/// which branch they took beforehand.
	pub fn remove(&self, handle: InodeHandle) -> Result<Arc<dyn InodeOps>> {
		self.live
			.lock()
			.expect("registry lock poisoned")
			.remove(&handle)
			.ok_or_else(|| Error::NotFound(format!("no live inode for handle {handle}")))
	}

	#[must_use]
	pub fn len(&self) -> usize { self.live.lock().expect("registry lock poisoned").len() }

	#[must_use]
	pub fn is_empty(&self) -> bool { self.len() == 0 }
}
