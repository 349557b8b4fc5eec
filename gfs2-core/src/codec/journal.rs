//! Journal record kinds: log header, log descriptor, log buffer.

use super::header::{BlockType, MetaHeader, META_HEADER_SIZE};
use crate::error::{Gfs2Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Size of the fixed portion of a [`LogHeader`] following the meta header.
pub const LOG_HEADER_SIZE: usize = META_HEADER_SIZE + 8 + 8 + 8 + 4 + 4 + 4 + 4;

/// A transaction-delimiting log header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogHeader {
	pub sequence: u64,
	pub tail: u64,
	pub blkno: u64,
	pub local_total: u32,
	pub local_free: u32,
	pub local_dinodes: u32,
	pub flags: u32,
}

impl LogHeader {
	pub fn decode(block: &[u8]) -> Result<Self> {
		if block.len() < LOG_HEADER_SIZE {
			return Err(Gfs2Error::malformed(0, "block too short for log header"));
		}
		let header = MetaHeader::decode(block).map_err(|e| Gfs2Error::malformed(0, e))?;
		if !header.is_valid_magic() || header.block_type() != Some(BlockType::LogHeader) {
			return Err(Gfs2Error::malformed(0, "not a log header block"));
		}
		let mut c = Cursor::new(&block[META_HEADER_SIZE..]);
		Ok(Self {
			sequence: c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?,
			tail: c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?,
			blkno: c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?,
			local_total: c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?,
			local_free: c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?,
			local_dinodes: c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?,
			flags: c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?,
		})
	}

	pub fn encode(&self, block: &mut [u8]) -> Result<()> {
		if block.len() < LOG_HEADER_SIZE {
			return Err(Gfs2Error::constraint("block too short for log header"));
		}
		MetaHeader::new(BlockType::LogHeader, 0)
			.encode(&mut block[..META_HEADER_SIZE])
			.map_err(Gfs2Error::Io)?;
		let mut c = Cursor::new(&mut block[META_HEADER_SIZE..]);
		c.write_u64::<BigEndian>(self.sequence)
			.map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.tail).map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.blkno).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.local_total)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.local_free)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.local_dinodes)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.flags).map_err(Gfs2Error::Io)?;
		Ok(())
	}
}

/// Kind of block a log descriptor enumerates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorType {
	Metadata,
	Revoke,
	JournaledData,
	Other(u32),
}

impl DescriptorType {
	fn from_code(code: u32) -> Self {
		match code {
			1 => DescriptorType::Metadata,
			2 => DescriptorType::Revoke,
			3 => DescriptorType::JournaledData,
			other => DescriptorType::Other(other),
		}
	}

	fn code(self) -> u32 {
		match self {
			DescriptorType::Metadata => 1,
			DescriptorType::Revoke => 2,
			DescriptorType::JournaledData => 3,
			DescriptorType::Other(c) => c,
		}
	}
}

/// Size of the fixed portion of a [`LogDescriptor`] header, before its
/// pointer array (which may overflow into following log-buffer blocks).
pub const LOG_DESCRIPTOR_HEADER_SIZE: usize = META_HEADER_SIZE + 4 + 4 + 4;

/// A log descriptor: enumerates referenced blocks of one kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogDescriptor {
	pub descriptor_type: DescriptorType,
	pub length: u32,
	/// Block count (`data1` in the original naming).
	pub block_count: u32,
	/// Pointers that fit within this block (the block's payload region);
	/// more may follow in subsequent log-buffer blocks up to `block_count`.
	pub pointers: Vec<u64>,
}

impl LogDescriptor {
	pub fn decode(block: &[u8]) -> Result<Self> {
		if block.len() < LOG_DESCRIPTOR_HEADER_SIZE {
			return Err(Gfs2Error::malformed(0, "block too short for log descriptor"));
		}
		let header = MetaHeader::decode(block).map_err(|e| Gfs2Error::malformed(0, e))?;
		if !header.is_valid_magic() || header.block_type() != Some(BlockType::LogDescriptor) {
			return Err(Gfs2Error::malformed(0, "not a log descriptor block"));
		}
		let mut c = Cursor::new(&block[META_HEADER_SIZE..]);
		let type_code = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let length = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let block_count = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;

		let mut pointers = Vec::new();
		let mut pc = Cursor::new(&block[LOG_DESCRIPTOR_HEADER_SIZE..]);
		while let Ok(ptr) = pc.read_u64::<BigEndian>() {
			if ptr == 0 {
				break;
			}
			pointers.push(ptr);
			if pointers.len() as u32 >= block_count {
				break;
			}
		}

		Ok(Self {
			descriptor_type: DescriptorType::from_code(type_code),
			length,
			block_count,
			pointers,
		})
	}

	pub fn encode(&self, block: &mut [u8]) -> Result<()> {
		if block.len() < LOG_DESCRIPTOR_HEADER_SIZE {
			return Err(Gfs2Error::constraint("block too short for log descriptor"));
		}
		MetaHeader::new(BlockType::LogDescriptor, 0)
			.encode(&mut block[..META_HEADER_SIZE])
			.map_err(Gfs2Error::Io)?;
		let mut c = Cursor::new(&mut block[META_HEADER_SIZE..]);
		c.write_u32::<BigEndian>(self.descriptor_type.code())
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.length)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.block_count)
			.map_err(Gfs2Error::Io)?;

		let mut pc = Cursor::new(&mut block[LOG_DESCRIPTOR_HEADER_SIZE..]);
		for &ptr in &self.pointers {
			pc.write_u64::<BigEndian>(ptr).map_err(Gfs2Error::Io)?;
		}
		Ok(())
	}

	/// Reads any pointers continuing into a log-buffer block, up to
	/// `block_count` pointers total already seen via `already_read`.
	pub fn continue_pointers(block: &[u8], already_read: usize, block_count: u32) -> Vec<u64> {
		let mut out = Vec::new();
		let mut c = Cursor::new(&block[META_HEADER_SIZE..]);
		while (already_read + out.len()) < block_count as usize {
			match c.read_u64::<BigEndian>() {
				Ok(0) | Err(_) => break,
				Ok(ptr) => out.push(ptr),
			}
		}
		out
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn log_header_round_trip() {
		let h = LogHeader {
			sequence: 7,
			tail: 1,
			blkno: 2,
			local_total: 10,
			local_free: 3,
			local_dinodes: 1,
			flags: 0,
		};
		let mut block = vec![0u8; 512];
		h.encode(&mut block).unwrap();
		assert_eq!(LogHeader::decode(&block).unwrap(), h);
	}

	#[test]
	fn log_descriptor_round_trip() {
		let d = LogDescriptor {
			descriptor_type: DescriptorType::Metadata,
			length: 1,
			block_count: 3,
			pointers: vec![10, 20, 30],
		};
		let mut block = vec![0u8; 512];
		d.encode(&mut block).unwrap();
		let d2 = LogDescriptor::decode(&block).unwrap();
		assert_eq!(d2.pointers, d.pointers);
		assert_eq!(d2.descriptor_type, DescriptorType::Metadata);
	}
}
