//! Small fixed-width helpers for reading and writing dispatcher request/reply
//! fields directly in the shared operation buffer, native-endian (the buffer
//! never crosses a machine boundary).

use zufs_core::{Error, Result};

fn bounds(buf: &[u8], offset: usize, len: usize) -> Result<()> {
	if offset.checked_add(len).is_none_or(|end| end > buf.len()) {
		return Err(Error::InvalidArgument(format!(
			"field at {offset}..+{len} out of range for a {}-byte buffer",
			buf.len()
		)));
	}
	Ok(())
}

pub fn get_u64(buf: &[u8], offset: usize) -> Result<u64> {
	bounds(buf, offset, 8)?;
	Ok(u64::from_ne_bytes(buf[offset..offset + 8].try_into().expect("checked above")))
}

pub fn put_u64(buf: &mut [u8], offset: usize, value: u64) -> Result<()> {
	bounds(buf, offset, 8)?;
	buf[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
	Ok(())
}

pub fn get_u32(buf: &[u8], offset: usize) -> Result<u32> {
	bounds(buf, offset, 4)?;
	Ok(u32::from_ne_bytes(buf[offset..offset + 4].try_into().expect("checked above")))
}

pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) -> Result<()> {
	bounds(buf, offset, 4)?;
	buf[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
	Ok(())
}

pub fn get_u16(buf: &[u8], offset: usize) -> Result<u16> {
	bounds(buf, offset, 2)?;
	Ok(u16::from_ne_bytes(buf[offset..offset + 2].try_into().expect("checked above")))
}

pub fn put_u16(buf: &mut [u8], offset: usize, value: u16) -> Result<()> {
	bounds(buf, offset, 2)?;
	buf[offset..offset + 2].copy_from_slice(&value.to_ne_bytes());
	Ok(())
}

pub fn get_i64(buf: &[u8], offset: usize) -> Result<i64> {
	bounds(buf, offset, 8)?;
	Ok(i64::from_ne_bytes(buf[offset..offset + 8].try_into().expect("checked above")))
}

pub fn get_str<'a>(buf: &'a [u8], offset: usize, len: usize) -> Result<&'a str> {
	bounds(buf, offset, len)?;
	std::str::from_utf8(&buf[offset..offset + len])
		.map_err(|e| Error::InvalidArgument(format!("name is not valid utf-8: {e}")))
}
