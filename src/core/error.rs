/// Errors surfaced by the dispatch core.
///
/// Every variant maps to exactly one POSIX errno via [`Error::errno`]; callers
/// at the kernel boundary use [`Error::to_kernel_errno`] to get the negated
/// value written into an operation header.
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// A syscall or IOCTL against the kernel transport failed.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[cfg(unix)]
	#[error("I/O error: {0}")]
	Nix(#[from] nix::Error),

	/// Thread/attribute creation or an allocation failed.
	#[error("resource exhausted: {0}")]
	Resource(String),

	/// A bad operation code, cpu index, node id, or channel count.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// The filesystem's capability vtable does not implement this operation.
	#[error("operation not supported: {0}")]
	Unsupported(String),

	/// A lookup, e.g. of a dentry name, found nothing.
	#[error("not found: {0}")]
	NotFound(String),

	/// A context, thread-local slot, or registration already exists.
	#[error("already exists: {0}")]
	AlreadyExists(String),

	/// An ioctl was issued against an inode whose vtable has no `ioctl`.
	#[error("not a typewriter: {0}")]
	NotATTY(String),

	/// An unrecognized xattr request subtype.
	#[error("bad address: {0}")]
	BadAddress(String),

	/// Anything else, generally a configuration or programming error that
	/// does not need its own kind.
	#[error("{0}")]
	Internal(String),
}

impl Error {
	/// The positive errno this error corresponds to, by the same convention
	/// the original kernel-facing code uses internally.
	#[must_use]
	pub fn errno(&self) -> i32 {
		match self {
			Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
			#[cfg(unix)]
			Self::Nix(e) => *e as i32,
			Self::Resource(..) => libc::ENOMEM,
			Self::InvalidArgument(..) => libc::EINVAL,
			Self::Unsupported(..) => libc::ENOTSUP,
			Self::NotFound(..) => libc::ENOENT,
			Self::AlreadyExists(..) => libc::EEXIST,
			Self::NotATTY(..) => libc::ENOTTY,
			Self::BadAddress(..) => libc::EFAULT,
			Self::Internal(..) => libc::EIO,
		}
	}

	/// Negates [`Error::errno`] for a write-back into an operation header.
	/// Centralizing this means every write-back site goes through one
	/// function, per the kernel sign convention.
	#[must_use]
	pub fn to_kernel_errno(&self) -> i32 { -self.errno() }
}
