//! The mount thread: the singleton that brings topology discovery and
//! filesystem-type registration up at daemon startup, starts the worker pool
//! on the first successful mount, and dispatches `MOUNT`/`UMOUNT`/`REMOUNT`/
//! `DEBUG_READ`/`DEBUG_WRITE` messages for the rest of the process's life
//! (spec Section 4.G).

pub mod message;
pub mod registry;
pub mod thread;

pub use registry::FsRegistry;
pub use thread::MountThread;
