//! Extended attribute header and data block indirection.

use super::header::{BlockType, MetaHeader, META_HEADER_SIZE};
use crate::error::{Gfs2Error, Result};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// Size of the fixed portion of an [`EaRecord`], excluding its trailing
/// block-pointer array.
pub const EA_RECORD_HEADER_SIZE: usize = 4 + 4 + 1 + 1 + 1 + 1;

/// One extended-attribute record within an EA header block: `num_ptrs`
/// block pointers follow immediately after the record header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EaRecord {
	pub rec_len: u32,
	pub value_len: u32,
	pub name_len: u8,
	pub ea_type: u8,
	pub flags: u8,
	pub num_ptrs: u8,
	pub pointers: Vec<u64>,
}

/// Parses every EA record out of an EA header (or EA-data-continuation)
/// block, stopping at the first record whose `rec_len` is zero (end of
/// list) or out of bounds.
pub fn decode_records(block: &[u8]) -> Result<Vec<EaRecord>> {
	let header = MetaHeader::decode(block).map_err(|e| Gfs2Error::malformed(0, e))?;
	if !header.is_valid_magic() || header.block_type() != Some(BlockType::EaHeader) {
		return Err(Gfs2Error::malformed(0, "not an EA header block"));
	}

	let mut records = Vec::new();
	let mut offset = META_HEADER_SIZE;
	loop {
		if offset + EA_RECORD_HEADER_SIZE > block.len() {
			break;
		}
		let mut c = Cursor::new(&block[offset..]);
		let rec_len = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		if rec_len == 0 {
			break;
		}
		let value_len = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let name_len = c.read_u8().map_err(Gfs2Error::Io)?;
		let ea_type = c.read_u8().map_err(Gfs2Error::Io)?;
		let flags = c.read_u8().map_err(Gfs2Error::Io)?;
		let num_ptrs = c.read_u8().map_err(Gfs2Error::Io)?;

		let mut pointers = Vec::with_capacity(num_ptrs as usize);
		for _ in 0..num_ptrs {
			let mut buf = [0u8; 8];
			c.read_exact(&mut buf).map_err(Gfs2Error::Io)?;
			pointers.push(u64::from_be_bytes(buf));
		}

		records.push(EaRecord {
			rec_len,
			value_len,
			name_len,
			ea_type,
			flags,
			num_ptrs,
			pointers,
		});

		if (rec_len as usize) < EA_RECORD_HEADER_SIZE {
			return Err(Gfs2Error::malformed(0, "EA record rec_len too small"));
		}
		offset += rec_len as usize;
		if offset >= block.len() {
			break;
		}
	}
	Ok(records)
}

#[cfg(test)]
mod test {
	use super::*;
	use byteorder::WriteBytesExt;
	use std::io::Write;

	fn write_record(block: &mut [u8], offset: usize, ptrs: &[u64]) -> usize {
		let rec_len = EA_RECORD_HEADER_SIZE + ptrs.len() * 8;
		let mut c = Cursor::new(&mut block[offset..]);
		c.write_u32::<BigEndian>(rec_len as u32).unwrap();
		c.write_u32::<BigEndian>(4).unwrap();
		c.write_u8(3).unwrap();
		c.write_u8(1).unwrap();
		c.write_u8(0).unwrap();
		c.write_u8(ptrs.len() as u8).unwrap();
		for &p in ptrs {
			c.write_all(&p.to_be_bytes()).unwrap();
		}
		rec_len
	}

	#[test]
	fn parses_records_with_pointers() {
		let mut block = vec![0u8; 512];
		MetaHeader::new(BlockType::EaHeader, 0)
			.encode(&mut block[..META_HEADER_SIZE])
			.unwrap();
		write_record(&mut block, META_HEADER_SIZE, &[100, 101]);

		let records = decode_records(&block).unwrap();
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].pointers, vec![100, 101]);
	}
}
