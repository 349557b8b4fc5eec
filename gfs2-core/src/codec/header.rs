//! The meta header every metadata block begins with: `{magic, type, format}`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

/// Fixed 32-bit constant every metadata block starts with.
pub const META_MAGIC: u32 = 0x01160119;

/// Size in bytes of an encoded [`MetaHeader`].
pub const META_HEADER_SIZE: usize = 4 + 4 + 4;

/// The block type carried in a meta header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockType {
	Superblock,
	RgHeader,
	RgBitmap,
	Dinode,
	Indirect,
	Leaf,
	JournaledData,
	LogHeader,
	LogDescriptor,
	EaHeader,
	EaData,
	LogBuffer,
	QuotaChange,
}

impl BlockType {
	/// The on-disk type code. Values follow libgfs2's `gfs2_metatype`
	/// enumeration order.
	pub fn code(self) -> u32 {
		match self {
			BlockType::Superblock => 1,
			BlockType::RgHeader => 2,
			BlockType::RgBitmap => 3,
			BlockType::Dinode => 4,
			BlockType::Indirect => 5,
			BlockType::Leaf => 6,
			BlockType::JournaledData => 7,
			BlockType::EaHeader => 8,
			BlockType::EaData => 9,
			BlockType::LogDescriptor => 10,
			BlockType::LogHeader => 11,
			BlockType::LogBuffer => 12,
			BlockType::QuotaChange => 13,
		}
	}

	pub fn from_code(code: u32) -> Option<Self> {
		Some(match code {
			1 => BlockType::Superblock,
			2 => BlockType::RgHeader,
			3 => BlockType::RgBitmap,
			4 => BlockType::Dinode,
			5 => BlockType::Indirect,
			6 => BlockType::Leaf,
			7 => BlockType::JournaledData,
			8 => BlockType::EaHeader,
			9 => BlockType::EaData,
			10 => BlockType::LogDescriptor,
			11 => BlockType::LogHeader,
			12 => BlockType::LogBuffer,
			13 => BlockType::QuotaChange,
			_ => return None,
		})
	}
}

/// `{magic, type, format}` header present at the start of every metadata
/// block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetaHeader {
	pub magic: u32,
	pub mh_type: u32,
	pub format: u32,
}

impl MetaHeader {
	pub fn new(block_type: BlockType, format: u32) -> Self {
		Self {
			magic: META_MAGIC,
			mh_type: block_type.code(),
			format,
		}
	}

	pub fn decode(bytes: &[u8]) -> io::Result<Self> {
		let mut c = Cursor::new(bytes);
		let magic = c.read_u32::<BigEndian>()?;
		let mh_type = c.read_u32::<BigEndian>()?;
		let format = c.read_u32::<BigEndian>()?;
		Ok(Self {
			magic,
			mh_type,
			format,
		})
	}

	pub fn encode(&self, out: &mut [u8]) -> io::Result<()> {
		let mut c = Cursor::new(out);
		c.write_u32::<BigEndian>(self.magic)?;
		c.write_u32::<BigEndian>(self.mh_type)?;
		c.write_u32::<BigEndian>(self.format)?;
		Ok(())
	}

	/// Reads a header from any reader positioned at a block boundary,
	/// without consuming the rest of the block.
	pub fn read_from<R: Read>(mut r: R) -> io::Result<Self> {
		let magic = r.read_u32::<BigEndian>()?;
		let mh_type = r.read_u32::<BigEndian>()?;
		let format = r.read_u32::<BigEndian>()?;
		Ok(Self {
			magic,
			mh_type,
			format,
		})
	}

	pub fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
		w.write_u32::<BigEndian>(self.magic)?;
		w.write_u32::<BigEndian>(self.mh_type)?;
		w.write_u32::<BigEndian>(self.format)
	}

	pub fn is_valid_magic(&self) -> bool {
		self.magic == META_MAGIC
	}

	pub fn block_type(&self) -> Option<BlockType> {
		BlockType::from_code(self.mh_type)
	}
}

/// Reads the meta header of `bytes` and returns its [`BlockType`] only if
/// the magic matches and the type is recognized. This is `classify` from
/// the specification's codec contract.
pub fn classify(bytes: &[u8]) -> Option<BlockType> {
	if bytes.len() < META_HEADER_SIZE {
		return None;
	}
	let header = MetaHeader::decode(bytes).ok()?;
	if !header.is_valid_magic() {
		return None;
	}
	header.block_type()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn round_trip() {
		let h = MetaHeader::new(BlockType::Dinode, 1);
		let mut buf = [0u8; META_HEADER_SIZE];
		h.encode(&mut buf).unwrap();
		let h2 = MetaHeader::decode(&buf).unwrap();
		assert_eq!(h, h2);
		assert_eq!(classify(&buf), Some(BlockType::Dinode));
	}

	#[test]
	fn bad_magic_is_unclassified() {
		let buf = [0u8; META_HEADER_SIZE];
		assert_eq!(classify(&buf), None);
	}
}
