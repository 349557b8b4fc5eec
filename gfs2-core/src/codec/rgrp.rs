//! Resource group header and bitmap block codec.
//!
//! A resource group is a contiguous run of `rg_length` blocks: the header
//! block, then `rg_length - 1` bitmap blocks, then `rg_data` data blocks.
//! Each data block has a 2-bit state packed MSB-first within bitmap bytes.

use super::header::{BlockType, MetaHeader, META_HEADER_SIZE};
use crate::error::{Gfs2Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Number of bits used per data block's allocation state.
pub const BITS_PER_BLOCK: u32 = 2;
/// Data blocks described per byte of bitmap (`8 / BITS_PER_BLOCK`).
pub const BLOCKS_PER_BYTE: u32 = 8 / BITS_PER_BLOCK;

/// Two-bit allocation state of one data block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockState {
	Free,
	/// Data block in use by file content.
	Data,
	/// Unlinked (current generation) / free-meta (legacy generation).
	UnlinkedOrFreeMeta,
	/// Dinode (current generation) / used-meta (legacy generation).
	DinodeOrUsedMeta,
}

impl BlockState {
	pub fn from_bits(bits: u8) -> Self {
		match bits & 0b11 {
			0 => BlockState::Free,
			1 => BlockState::Data,
			2 => BlockState::UnlinkedOrFreeMeta,
			_ => BlockState::DinodeOrUsedMeta,
		}
	}

	pub fn to_bits(self) -> u8 {
		match self {
			BlockState::Free => 0,
			BlockState::Data => 1,
			BlockState::UnlinkedOrFreeMeta => 2,
			BlockState::DinodeOrUsedMeta => 3,
		}
	}
}

/// Size of the fixed portion of an [`RgHeader`] following the meta header.
pub const RG_HEADER_SIZE: usize = META_HEADER_SIZE + 4 + 4 + 4 + 4 + 4 + 4 + 4;

/// Header of the first block of a resource group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgHeader {
	pub flags: u32,
	pub free: u32,
	pub dinodes: u32,
	pub rg_format: u32,
	pub skip: u32,
	pub igeneration_hi: u32,
	pub igeneration_lo: u32,
}

impl RgHeader {
	pub fn decode(block: &[u8]) -> Result<Self> {
		if block.len() < RG_HEADER_SIZE {
			return Err(Gfs2Error::malformed(0, "block too short for rg header"));
		}
		let header = MetaHeader::decode(block).map_err(|e| Gfs2Error::malformed(0, e))?;
		if !header.is_valid_magic() || header.block_type() != Some(BlockType::RgHeader) {
			return Err(Gfs2Error::malformed(0, "not an rg header block"));
		}
		let mut c = Cursor::new(&block[META_HEADER_SIZE..]);
		Ok(Self {
			flags: c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?,
			free: c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?,
			dinodes: c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?,
			rg_format: c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?,
			skip: c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?,
			igeneration_hi: c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?,
			igeneration_lo: c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?,
		})
	}

	pub fn encode(&self, block: &mut [u8]) -> Result<()> {
		if block.len() < RG_HEADER_SIZE {
			return Err(Gfs2Error::constraint("block too short for rg header"));
		}
		MetaHeader::new(BlockType::RgHeader, 0)
			.encode(&mut block[..META_HEADER_SIZE])
			.map_err(Gfs2Error::Io)?;
		let mut c = Cursor::new(&mut block[META_HEADER_SIZE..]);
		c.write_u32::<BigEndian>(self.flags).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.free).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.dinodes)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.rg_format)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.skip).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.igeneration_hi)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.igeneration_lo)
			.map_err(Gfs2Error::Io)?;
		Ok(())
	}
}

/// Byte offset at which bitmap bits begin within a bitmap block.
///
/// The first bitmap block of a resource group carries its bits after the RG
/// header (`RG_HEADER_SIZE`); every subsequent bitmap block carries its bits
/// after a plain meta header (`META_HEADER_SIZE`).
pub fn bitmap_bit_offset(is_first_bitmap_block: bool) -> usize {
	if is_first_bitmap_block {
		RG_HEADER_SIZE
	} else {
		META_HEADER_SIZE
	}
}

/// Writes a plain meta header into a non-first bitmap block.
pub fn encode_bitmap_block_header(block: &mut [u8]) -> Result<()> {
	if block.len() < META_HEADER_SIZE {
		return Err(Gfs2Error::constraint("block too short for bitmap header"));
	}
	MetaHeader::new(BlockType::RgBitmap, 0)
		.encode(&mut block[..META_HEADER_SIZE])
		.map_err(Gfs2Error::Io)?;
	Ok(())
}

/// Reads the 2-bit state of data-block index `i` (0-based, relative to the
/// first data block this bitmap block describes) out of the bitmap payload
/// that follows `bit_offset`.
pub fn read_cell(block: &[u8], bit_offset: usize, i: u32) -> Result<BlockState> {
	let byte_index = bit_offset + (i / BLOCKS_PER_BYTE) as usize;
	let byte = *block
		.get(byte_index)
		.ok_or_else(|| Gfs2Error::malformed(0, "bitmap cell out of bounds"))?;
	let shift = 8 - BITS_PER_BLOCK * (i % BLOCKS_PER_BYTE + 1);
	Ok(BlockState::from_bits((byte >> shift) & 0b11))
}

/// Writes the 2-bit state of data-block index `i` into the bitmap payload.
pub fn write_cell(block: &mut [u8], bit_offset: usize, i: u32, state: BlockState) -> Result<()> {
	let byte_index = bit_offset + (i / BLOCKS_PER_BYTE) as usize;
	let byte = block
		.get_mut(byte_index)
		.ok_or_else(|| Gfs2Error::malformed(0, "bitmap cell out of bounds"))?;
	let shift = 8 - BITS_PER_BLOCK * (i % BLOCKS_PER_BYTE + 1);
	let mask = 0b11u8 << shift;
	*byte = (*byte & !mask) | (state.to_bits() << shift);
	Ok(())
}

/// Number of data-block cells a bitmap block of `block_size` bytes can hold
/// given the bit offset its header consumes.
pub fn cells_per_bitmap_block(block_size: usize, bit_offset: usize) -> u32 {
	((block_size - bit_offset) as u32) * BLOCKS_PER_BYTE
}

/// One rindex record: the persistent, per-RG catalog entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RindexRecord {
	pub addr: u64,
	pub length: u32,
	pub data0: u64,
	pub data: u32,
	pub bitbytes: u32,
}

/// Encoded size of one [`RindexRecord`].
pub const RINDEX_RECORD_SIZE: usize = 8 + 4 + 8 + 4 + 4;

impl RindexRecord {
	pub fn decode(bytes: &[u8]) -> Result<Self> {
		if bytes.len() < RINDEX_RECORD_SIZE {
			return Err(Gfs2Error::malformed(0, "rindex record too short"));
		}
		let mut c = Cursor::new(bytes);
		Ok(Self {
			addr: c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?,
			length: c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?,
			data0: c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?,
			data: c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?,
			bitbytes: c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?,
		})
	}

	pub fn encode(&self, out: &mut [u8]) -> Result<()> {
		if out.len() < RINDEX_RECORD_SIZE {
			return Err(Gfs2Error::constraint("rindex record buffer too short"));
		}
		let mut c = Cursor::new(out);
		c.write_u64::<BigEndian>(self.addr).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.length)
			.map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.data0)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.data).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.bitbytes)
			.map_err(Gfs2Error::Io)?;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn cell_round_trip() {
		let mut block = vec![0u8; 64];
		let off = META_HEADER_SIZE;
		for i in 0..8 {
			write_cell(&mut block, off, i, BlockState::from_bits((i % 4) as u8)).unwrap();
		}
		for i in 0..8 {
			assert_eq!(
				read_cell(&block, off, i).unwrap().to_bits(),
				(i % 4) as u8
			);
		}
	}

	#[test]
	fn rindex_round_trip() {
		let r = RindexRecord {
			addr: 100,
			length: 10,
			data0: 110,
			data: 2000,
			bitbytes: 500,
		};
		let mut buf = [0u8; RINDEX_RECORD_SIZE];
		r.encode(&mut buf).unwrap();
		assert_eq!(RindexRecord::decode(&buf).unwrap(), r);
	}

	#[test]
	fn header_round_trip() {
		let h = RgHeader {
			flags: 0,
			free: 100,
			dinodes: 2,
			rg_format: 1,
			skip: 0,
			igeneration_hi: 0,
			igeneration_lo: 1,
		};
		let mut block = vec![0u8; 512];
		h.encode(&mut block).unwrap();
		assert_eq!(RgHeader::decode(&block).unwrap(), h);
	}
}
