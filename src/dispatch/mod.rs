//! The operation dispatcher: demultiplexes a tagged request header into a
//! capability call against the filesystem implementation bound to the
//! request's superblock or inode (spec Section 4.H).

pub mod codec;
pub mod dispatcher;
pub mod registry;
pub mod session;
pub mod vtables;

pub use dispatcher::dispatch;
pub use registry::Registry;
pub use session::Session;
pub use vtables::{FsType, Ino, InodeHandle, InodeOps, PmemRegion, SbiInit, SuperblockOps};
