//! Indirect blocks: a meta header followed by a dense array of big-endian
//! block addresses (zero = hole).

use super::header::{BlockType, MetaHeader, META_HEADER_SIZE};
use crate::error::{Gfs2Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Size in bytes of one pointer slot.
pub const POINTER_SIZE: usize = 8;

/// Number of pointer slots that fit in one indirect block of `block_size`
/// bytes, given the generation's indirect header size.
pub fn fanout(block_size: usize, indirect_header_size: usize) -> usize {
	(block_size.saturating_sub(indirect_header_size)) / POINTER_SIZE
}

/// Reads the pointer array of an indirect block, honoring the generation's
/// header size. Returns pointers in ascending on-disk order, holes
/// (zero-valued pointers) included.
pub fn decode_pointers(block: &[u8], indirect_header_size: usize) -> Result<Vec<u64>> {
	if block.len() < indirect_header_size {
		return Err(Gfs2Error::malformed(0, "block too short for indirect header"));
	}
	let header = MetaHeader::decode(block).map_err(|e| Gfs2Error::malformed(0, e))?;
	if !header.is_valid_magic() || header.block_type() != Some(BlockType::Indirect) {
		return Err(Gfs2Error::malformed(0, "not an indirect block"));
	}
	let mut out = Vec::new();
	let mut c = Cursor::new(&block[indirect_header_size..]);
	while let Ok(ptr) = c.read_u64::<BigEndian>() {
		out.push(ptr);
	}
	Ok(out)
}

/// Reads a dense big-endian pointer array starting at `offset`, without
/// validating any meta header. Used where the array lives inside a block
/// whose meta header describes the *container* (a dinode), not the array
/// itself — the dinode's own direct pointers and an exhash directory's
/// inline hash table both read this way.
pub fn read_pointers_at(block: &[u8], offset: usize) -> Vec<u64> {
	if offset > block.len() {
		return Vec::new();
	}
	let mut out = Vec::new();
	let mut c = Cursor::new(&block[offset..]);
	while let Ok(ptr) = c.read_u64::<BigEndian>() {
		out.push(ptr);
	}
	out
}

/// Writes a dense big-endian pointer array starting at `offset`, without
/// touching any meta header. The counterpart to [`read_pointers_at`].
pub fn write_pointers_at(block: &mut [u8], offset: usize, ptrs: &[u64]) -> Result<()> {
	if offset + ptrs.len() * POINTER_SIZE > block.len() {
		return Err(Gfs2Error::constraint("pointer array does not fit in block"));
	}
	let mut c = Cursor::new(&mut block[offset..]);
	for &ptr in ptrs {
		c.write_u64::<BigEndian>(ptr).map_err(Gfs2Error::Io)?;
	}
	Ok(())
}

/// Encodes a header plus a pointer array into `block`, zero-padding any
/// remaining fan-out slots (expressing trailing holes).
pub fn encode_pointers(block: &mut [u8], indirect_header_size: usize, ptrs: &[u64]) -> Result<()> {
	let header = MetaHeader::new(BlockType::Indirect, 0);
	header
		.encode(&mut block[..META_HEADER_SIZE])
		.map_err(Gfs2Error::Io)?;
	let max_ptrs = fanout(block.len(), indirect_header_size);
	if ptrs.len() > max_ptrs {
		return Err(Gfs2Error::constraint("pointer array exceeds indirect fan-out"));
	}
	let mut c = Cursor::new(&mut block[indirect_header_size..]);
	for &ptr in ptrs {
		c.write_u64::<BigEndian>(ptr).map_err(Gfs2Error::Io)?;
	}
	Ok(())
}
