//! Demultiplexes a tagged operation header into a single capability call,
//! per the routing table in spec Section 4.H.

use zufs_core::{Error, Result, debug};
use zufs_transport::{OperationCode, OperationHeader};

use crate::{codec as c, session::Session};

const XATTR_GET: u8 = 0;
const XATTR_SET: u8 = 1;
const XATTR_LIST: u8 = 2;

/// Calls the single capability matching `header.operation`, writing its
/// reply in place into `api_region[header.offset..][..header.len]` and
/// `header.err` in kernel sign convention. Returns the same value written to
/// `header.err`.
pub fn dispatch(session: &Session, api_region: &mut [u8], header: &mut OperationHeader) -> i32 {
	let code = match header.operation_code() {
		Ok(code) => code,
		Err(_) => {
			debug!(op = header.operation, "dispatch: unknown operation code");
			header.set_ok();
			return 0;
		},
	};

	debug!(op = code.name(), offset = header.offset, len = header.len, "dispatch");

	let result = dispatch_inner(session, api_region, header, code);
	match &result {
		Ok(()) => header.set_ok(),
		Err(e) => header.set_result(e),
	}
	header.err
}

fn payload<'a>(api_region: &'a mut [u8], header: &OperationHeader) -> Result<&'a mut [u8]> {
	let start = usize::try_from(header.offset).map_err(|_| Error::InvalidArgument("header offset overflow".into()))?;
	let len = usize::try_from(header.len).map_err(|_| Error::InvalidArgument("header len overflow".into()))?;
	api_region
		.get_mut(start..start + len)
		.ok_or_else(|| Error::InvalidArgument(format!("header offset/len {start}..+{len} out of range")))
}

fn dispatch_inner(
	session: &Session,
	api_region: &mut [u8],
	header: &OperationHeader,
	code: OperationCode,
) -> Result<()> {
	let buf = payload(api_region, header)?;

	match code {
		OperationCode::Break => Ok(()),

		OperationCode::NewInode => new_inode(session, buf, header.tmpfile()),
		OperationCode::FreeInode => free_inode(session, buf),
		OperationCode::EvictInode => evict_inode(session, buf, header.lookup_race()),
		OperationCode::Lookup => lookup(session, buf),
		OperationCode::AddDentry => add_dentry(session, buf),
		OperationCode::RemoveDentry => remove_dentry(session, buf),
		OperationCode::Rename => rename(session, buf),
		OperationCode::Readdir => readdir(session, buf),
		OperationCode::Clone | OperationCode::Copy => clone_range(session, buf),
		OperationCode::Read => read(session, buf),
		OperationCode::PreRead => pre_read(session, buf),
		OperationCode::Write => write(session, buf),
		OperationCode::GetBlock => get_block(session, buf),
		OperationCode::PutBlock => put_block(session, buf),
		OperationCode::MmapClose => mmap_close(session, buf),
		OperationCode::GetSymlink => get_symlink(session, buf),
		OperationCode::Setattr => setattr(session, buf),
		OperationCode::Sync => sync(session, buf),
		OperationCode::Fallocate => fallocate(session, buf),
		OperationCode::Llseek => llseek(session, buf),
		OperationCode::Ioctl => ioctl(session, buf),
		OperationCode::Xattr => xattr(session, buf),
		OperationCode::Statfs => session.sbi.statfs(buf),

		// These five belong to the mount thread's message loop, not the
		// per-operation dispatcher; reaching them here is the same
		// "unknown op" case the original logs and no-ops.
		OperationCode::Mount
		| OperationCode::Umount
		| OperationCode::Remount
		| OperationCode::DebugRead
		| OperationCode::DebugWrite => {
			debug!(op = code.name(), "dispatch: mount-thread operation reached the operation dispatcher");
			Ok(())
		},
	}
}

fn new_inode(session: &Session, buf: &mut [u8], tmpfile: bool) -> Result<()> {
	let dir = c::get_u64(buf, 0)?;
	let name_len = usize::from(c::get_u16(buf, 8)?);
	let name = c::get_str(buf, 10, name_len)?.to_owned();

	let ino = session.sbi.new_inode(dir, tmpfile)?;

	if !tmpfile {
		if let Err(e) = session.sbi.add_dentry(dir, &name, ino) {
			let _ = session.sbi.free_inode(ino);
			return Err(e);
		}
	}

	let ops = session.sbi.open_inode(ino)?;
	let handle = session.inodes.register(ops);

	c::put_u64(buf, 0, ino)?;
	c::put_u64(buf, 8, handle)
}

fn free_inode(session: &Session, buf: &[u8]) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	let ops = session.inodes.remove(handle)?;
	session.sbi.free_inode(ops.ino())
}

fn evict_inode(session: &Session, buf: &[u8], lookup_race: bool) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	let ops = session.inodes.remove(handle)?;
	if lookup_race {
		return Ok(());
	}
	ops.evict()
}

fn lookup(session: &Session, buf: &mut [u8]) -> Result<()> {
	let dir = c::get_u64(buf, 0)?;
	let dir_parent = c::get_u64(buf, 8)?;
	let name_len = usize::from(c::get_u16(buf, 16)?);
	let name = c::get_str(buf, 18, name_len)?;

	let ino = match name {
		"." => dir,
		".." => dir_parent,
		name => session.sbi.lookup(dir, name)?.ok_or_else(|| Error::NotFound(name.to_owned()))?,
	};

	let ops = session.sbi.open_inode(ino)?;
	let handle = session.inodes.register(ops);

	c::put_u64(buf, 0, ino)?;
	c::put_u64(buf, 8, handle)
}

fn decode_dentry(buf: &[u8]) -> Result<(u64, u64, &str)> {
	let dir = c::get_u64(buf, 0)?;
	let ino = c::get_u64(buf, 8)?;
	let name_len = usize::from(c::get_u16(buf, 16)?);
	let name = c::get_str(buf, 18, name_len)?;
	Ok((dir, ino, name))
}

fn add_dentry(session: &Session, buf: &[u8]) -> Result<()> {
	let (dir, ino, name) = decode_dentry(buf)?;
	session.sbi.add_dentry(dir, name, ino)
}

fn remove_dentry(session: &Session, buf: &[u8]) -> Result<()> {
	let (dir, _ino, name) = decode_dentry(buf)?;
	session.sbi.remove_dentry(dir, name)
}

fn rename(session: &Session, buf: &[u8]) -> Result<()> {
	let old_dir = c::get_u64(buf, 0)?;
	let new_dir = c::get_u64(buf, 8)?;
	let old_len = usize::from(c::get_u16(buf, 16)?);
	let new_len = usize::from(c::get_u16(buf, 18)?);
	let old_name = c::get_str(buf, 20, old_len)?.to_owned();
	let new_name = c::get_str(buf, 20 + old_len, new_len)?.to_owned();
	session.sbi.rename(old_dir, &old_name, new_dir, &new_name)
}

fn readdir(session: &Session, buf: &mut [u8]) -> Result<()> {
	let dir = c::get_u64(buf, 0)?;
	let cookie = c::get_u64(buf, 8)?;
	let written = session.sbi.readdir(dir, cookie, &mut buf[16..])?;
	c::put_u64(buf, 8, written as u64)
}

fn clone_range(session: &Session, buf: &mut [u8]) -> Result<()> {
	let src_handle = c::get_u64(buf, 0)?;
	let dst_handle = c::get_u64(buf, 8)?;
	let src = session.inodes.get(src_handle)?.ino();
	let dst = session.inodes.get(dst_handle)?.ino();
	session.sbi.clone_range(src, dst, &mut buf[16..])
}

fn read(session: &Session, buf: &mut [u8]) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	let file_offset = c::get_u64(buf, 8)?;
	let inode = session.inodes.get(handle)?;
	let n = inode.read(&mut buf[16..], file_offset)?;
	c::put_u64(buf, 8, n as u64)
}

fn pre_read(session: &Session, buf: &mut [u8]) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	let file_offset = c::get_u64(buf, 8)?;
	let inode = session.inodes.get(handle)?;
	let n = inode.pre_read(&mut buf[16..], file_offset)?;
	c::put_u64(buf, 8, n as u64)
}

fn write(session: &Session, buf: &mut [u8]) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	let file_offset = c::get_u64(buf, 8)?;
	let inode = session.inodes.get(handle)?;
	let n = inode.write(&buf[16..], file_offset)?;
	c::put_u64(buf, 8, n as u64)
}

fn get_block(session: &Session, buf: &mut [u8]) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	let index = c::get_u64(buf, 8)?;
	let block = session.inodes.get(handle)?.get_block(index)?;
	c::put_u64(buf, 0, block)
}

fn put_block(session: &Session, buf: &[u8]) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	let index = c::get_u64(buf, 8)?;
	session.inodes.get(handle)?.put_block(index)
}

fn mmap_close(session: &Session, buf: &[u8]) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	session.inodes.get(handle)?.mmap_close()
}

fn get_symlink(session: &Session, buf: &mut [u8]) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	let link = session.inodes.get(handle)?.get_symlink()?;
	let len = u16::try_from(link.len()).map_err(|_| Error::InvalidArgument("symlink body too long".into()))?;
	if buf.len() < 2 + link.len() {
		return Err(Error::InvalidArgument("reply buffer too small for symlink body".into()));
	}
	c::put_u16(buf, 0, len)?;
	buf[2..2 + link.len()].copy_from_slice(&link);
	Ok(())
}

fn setattr(session: &Session, buf: &[u8]) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	session.inodes.get(handle)?.setattr(&buf[8..])
}

fn sync(session: &Session, buf: &[u8]) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	session.inodes.get(handle)?.sync()
}

fn fallocate(session: &Session, buf: &[u8]) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	session.inodes.get(handle)?.fallocate(&buf[8..])
}

fn llseek(session: &Session, buf: &mut [u8]) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	let offset = c::get_i64(buf, 8)?;
	let whence = c::get_u32(buf, 16)? as i32;
	let new_offset = session.inodes.get(handle)?.seek(offset, whence)?;
	c::put_u64(buf, 0, new_offset)
}

fn ioctl(session: &Session, buf: &mut [u8]) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	let cmd = c::get_u32(buf, 8)?;
	let inode = session.inodes.get(handle)?;
	let (head, rest) = buf.split_at_mut(12);
	let _ = head;
	inode.ioctl(cmd, rest)
}

fn xattr(session: &Session, buf: &mut [u8]) -> Result<()> {
	let handle = c::get_u64(buf, 0)?;
	let subtype = buf.get(8).copied().ok_or_else(|| Error::InvalidArgument("missing xattr subtype".into()))?;
	let name_len = usize::from(c::get_u16(buf, 9)?);
	let inode = session.inodes.get(handle)?;

	match subtype {
		XATTR_GET => {
			let name = c::get_str(buf, 15, name_len)?.to_owned();
			let n = inode.getxattr(&name, &mut buf[15 + name_len..])?;
			c::put_u32(buf, 11, n as u32)
		},
		XATTR_SET => {
			let value_len = usize::try_from(c::get_u32(buf, 11)?).expect("u32 fits usize");
			let name = c::get_str(buf, 15, name_len)?.to_owned();
			let value = buf
				.get(15 + name_len..15 + name_len + value_len)
				.ok_or_else(|| Error::InvalidArgument("xattr value out of range".into()))?
				.to_vec();
			inode.setxattr(&name, &value)
		},
		XATTR_LIST => {
			let n = inode.listxattr(&mut buf[15 + name_len..])?;
			c::put_u32(buf, 11, n as u32)
		},
		other => Err(Error::BadAddress(format!("unknown xattr subtype {other}"))),
	}
}
