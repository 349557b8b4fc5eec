//! The singleton superblock.

use super::dinode::InodeNumber;
use super::header::{BlockType, MetaHeader, META_HEADER_SIZE};
use crate::error::{Gfs2Error, Result};
use crate::generation::Generation;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

/// The byte offset of the superblock from the beginning of the device, as
/// given in the specification's external interfaces section:
/// `0x10 * 4096 / B` blocks in, expressed here directly in bytes since `B`
/// is not yet known before the superblock is read.
pub const SUPERBLOCK_BYTE_OFFSET: u64 = 0x10 * 4096;

const LOCKPROTO_LEN: usize = 64;
const LOCKTABLE_LEN: usize = 64;
const UUID_LEN: usize = 16;

/// `fs_format`: distinguishes the current generation from the legacy one.
pub const FS_FORMAT_CURRENT: u32 = 1801;
pub const FS_FORMAT_LEGACY: u32 = 1309;

/// Size in bytes of the encoded superblock payload (excluding the meta
/// header, which precedes it in the same block).
pub const SUPERBLOCK_SIZE: usize =
	4 + 4 + 4 + 4 + 8 + 8 + LOCKPROTO_LEN + LOCKTABLE_LEN + UUID_LEN;

/// In-memory representation of the superblock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Superblock {
	pub fs_format: u32,
	pub multihost_format: u32,
	pub block_size: u32,
	pub block_size_shift: u32,
	pub master_dir_inum: u64,
	pub root_dir_inum: u64,
	pub lockproto: [u8; LOCKPROTO_LEN],
	pub locktable: [u8; LOCKTABLE_LEN],
	pub uuid: [u8; UUID_LEN],
}

impl Superblock {
	pub fn generation(&self) -> Generation {
		if self.fs_format == FS_FORMAT_LEGACY {
			Generation::Legacy
		} else {
			Generation::Current
		}
	}

	/// Validates the invariant `block_size == 1 << block_size_shift`.
	pub fn validate(&self) -> Result<()> {
		if self.block_size != 1u32 << self.block_size_shift {
			return Err(Gfs2Error::malformed(
				0,
				format!(
					"block_size {} does not match block_size_shift {}",
					self.block_size, self.block_size_shift
				),
			));
		}
		if !self.block_size.is_power_of_two() {
			return Err(Gfs2Error::malformed(0, "block_size is not a power of two"));
		}
		Ok(())
	}

	/// Decodes a superblock from a whole block buffer (header + payload).
	pub fn decode(block: &[u8]) -> Result<Self> {
		if block.len() < META_HEADER_SIZE + SUPERBLOCK_SIZE {
			return Err(Gfs2Error::malformed(0, "block too short for superblock"));
		}
		let header = MetaHeader::decode(block)
			.map_err(|e| Gfs2Error::malformed(0, format!("header decode failed: {e}")))?;
		if !header.is_valid_magic() || header.block_type() != Some(BlockType::Superblock) {
			return Err(Gfs2Error::malformed(0, "not a superblock block"));
		}

		let mut c = Cursor::new(&block[META_HEADER_SIZE..]);
		let fs_format = c
			.read_u32::<BigEndian>()
			.map_err(|e| Gfs2Error::malformed(0, e))?;
		let multihost_format = c
			.read_u32::<BigEndian>()
			.map_err(|e| Gfs2Error::malformed(0, e))?;
		let block_size = c
			.read_u32::<BigEndian>()
			.map_err(|e| Gfs2Error::malformed(0, e))?;
		let block_size_shift = c
			.read_u32::<BigEndian>()
			.map_err(|e| Gfs2Error::malformed(0, e))?;
		let master_dir_inum = c
			.read_u64::<BigEndian>()
			.map_err(|e| Gfs2Error::malformed(0, e))?;
		let root_dir_inum = c
			.read_u64::<BigEndian>()
			.map_err(|e| Gfs2Error::malformed(0, e))?;

		let mut lockproto = [0u8; LOCKPROTO_LEN];
		std::io::Read::read_exact(&mut c, &mut lockproto)
			.map_err(|e| Gfs2Error::malformed(0, e))?;
		let mut locktable = [0u8; LOCKTABLE_LEN];
		std::io::Read::read_exact(&mut c, &mut locktable)
			.map_err(|e| Gfs2Error::malformed(0, e))?;
		let mut uuid = [0u8; UUID_LEN];
		std::io::Read::read_exact(&mut c, &mut uuid).map_err(|e| Gfs2Error::malformed(0, e))?;

		let sb = Self {
			fs_format,
			multihost_format,
			block_size,
			block_size_shift,
			master_dir_inum,
			root_dir_inum,
			lockproto,
			locktable,
			uuid,
		};
		sb.validate()?;
		Ok(sb)
	}

	/// Encodes the superblock (header + payload) into a whole block buffer.
	/// The buffer must be at least `block_size` long; any trailing space is
	/// left untouched (the caller zero-fills the block first).
	pub fn encode(&self, block: &mut [u8]) -> Result<()> {
		if block.len() < META_HEADER_SIZE + SUPERBLOCK_SIZE {
			return Err(Gfs2Error::constraint("block too short for superblock"));
		}
		let header = MetaHeader::new(BlockType::Superblock, 0);
		header
			.encode(&mut block[..META_HEADER_SIZE])
			.map_err(Gfs2Error::Io)?;

		let mut c = Cursor::new(&mut block[META_HEADER_SIZE..]);
		c.write_u32::<BigEndian>(self.fs_format)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.multihost_format)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.block_size)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.block_size_shift)
			.map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.master_dir_inum)
			.map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.root_dir_inum)
			.map_err(Gfs2Error::Io)?;
		c.write_all(&self.lockproto).map_err(Gfs2Error::Io)?;
		c.write_all(&self.locktable).map_err(Gfs2Error::Io)?;
		c.write_all(&self.uuid).map_err(Gfs2Error::Io)?;
		Ok(())
	}

	pub fn lockproto_str(&self) -> String {
		String::from_utf8_lossy(&self.lockproto)
			.trim_end_matches('\0')
			.to_string()
	}

	pub fn locktable_str(&self) -> String {
		String::from_utf8_lossy(&self.locktable)
			.trim_end_matches('\0')
			.to_string()
	}
}

/// Reads just `fs_format` out of a whole-block superblock buffer, without
/// committing to either generation's field layout. Callers use this to
/// decide which of [`Superblock::decode`] / [`LegacySuperblock::decode`] to
/// apply, since the two generations diverge immediately after
/// `multihost_format`.
pub fn peek_fs_format(block: &[u8]) -> Result<u32> {
	if block.len() < META_HEADER_SIZE + 4 {
		return Err(Gfs2Error::malformed(0, "block too short to hold fs_format"));
	}
	let mut c = Cursor::new(&block[META_HEADER_SIZE..]);
	c.read_u32::<BigEndian>().map_err(|e| Gfs2Error::malformed(0, e))
}

/// The legacy generation's superblock: an extra `flags` field before
/// `block_size`, an extra `seg_size` field after `block_size_shift`, and
/// its system inodes (`jindex`, `rindex`, root, `quota`, `license`) named
/// directly rather than through a master directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacySuperblock {
	pub fs_format: u32,
	pub multihost_format: u32,
	pub flags: u32,
	pub block_size: u32,
	pub block_size_shift: u32,
	pub seg_size: u32,
	pub jindex_di: InodeNumber,
	pub rindex_di: InodeNumber,
	pub root_di: InodeNumber,
	pub lockproto: [u8; LOCKPROTO_LEN],
	pub locktable: [u8; LOCKTABLE_LEN],
	pub quota_di: InodeNumber,
	pub license_di: InodeNumber,
}

/// Encoded size of the legacy superblock payload (excluding its meta
/// header): `fs_format, multihost_format, flags, bsize, bsize_shift,
/// seg_size` (6 x u32) + 5 inums (2 x u64 each) + lockproto + locktable.
pub const LEGACY_SUPERBLOCK_SIZE: usize = 4 * 6 + 16 * 5 + LOCKPROTO_LEN + LOCKTABLE_LEN;

fn read_inum(c: &mut Cursor<&[u8]>) -> Result<InodeNumber> {
	let formal_ino = c.read_u64::<BigEndian>().map_err(|e| Gfs2Error::malformed(0, e))?;
	let addr = c.read_u64::<BigEndian>().map_err(|e| Gfs2Error::malformed(0, e))?;
	Ok(InodeNumber { formal_ino, addr })
}

fn write_inum(c: &mut Cursor<&mut [u8]>, inum: InodeNumber) -> Result<()> {
	c.write_u64::<BigEndian>(inum.formal_ino).map_err(Gfs2Error::Io)?;
	c.write_u64::<BigEndian>(inum.addr).map_err(Gfs2Error::Io)?;
	Ok(())
}

impl LegacySuperblock {
	pub fn validate(&self) -> Result<()> {
		if self.block_size != 1u32 << self.block_size_shift {
			return Err(Gfs2Error::malformed(
				0,
				format!(
					"block_size {} does not match block_size_shift {}",
					self.block_size, self.block_size_shift
				),
			));
		}
		Ok(())
	}

	pub fn decode(block: &[u8]) -> Result<Self> {
		if block.len() < META_HEADER_SIZE + LEGACY_SUPERBLOCK_SIZE {
			return Err(Gfs2Error::malformed(0, "block too short for legacy superblock"));
		}
		let header = MetaHeader::decode(block).map_err(|e| Gfs2Error::malformed(0, format!("header decode failed: {e}")))?;
		if !header.is_valid_magic() || header.block_type() != Some(BlockType::Superblock) {
			return Err(Gfs2Error::malformed(0, "not a superblock block"));
		}

		let mut c = Cursor::new(&block[META_HEADER_SIZE..]);
		let fs_format = c.read_u32::<BigEndian>().map_err(|e| Gfs2Error::malformed(0, e))?;
		let multihost_format = c.read_u32::<BigEndian>().map_err(|e| Gfs2Error::malformed(0, e))?;
		let flags = c.read_u32::<BigEndian>().map_err(|e| Gfs2Error::malformed(0, e))?;
		let block_size = c.read_u32::<BigEndian>().map_err(|e| Gfs2Error::malformed(0, e))?;
		let block_size_shift = c.read_u32::<BigEndian>().map_err(|e| Gfs2Error::malformed(0, e))?;
		let seg_size = c.read_u32::<BigEndian>().map_err(|e| Gfs2Error::malformed(0, e))?;
		let jindex_di = read_inum(&mut c)?;
		let rindex_di = read_inum(&mut c)?;
		let root_di = read_inum(&mut c)?;

		let mut lockproto = [0u8; LOCKPROTO_LEN];
		std::io::Read::read_exact(&mut c, &mut lockproto).map_err(|e| Gfs2Error::malformed(0, e))?;
		let mut locktable = [0u8; LOCKTABLE_LEN];
		std::io::Read::read_exact(&mut c, &mut locktable).map_err(|e| Gfs2Error::malformed(0, e))?;

		let quota_di = read_inum(&mut c)?;
		let license_di = read_inum(&mut c)?;

		let sb = Self {
			fs_format,
			multihost_format,
			flags,
			block_size,
			block_size_shift,
			seg_size,
			jindex_di,
			rindex_di,
			root_di,
			lockproto,
			locktable,
			quota_di,
			license_di,
		};
		sb.validate()?;
		Ok(sb)
	}

	pub fn encode(&self, block: &mut [u8]) -> Result<()> {
		if block.len() < META_HEADER_SIZE + LEGACY_SUPERBLOCK_SIZE {
			return Err(Gfs2Error::constraint("block too short for legacy superblock"));
		}
		let header = MetaHeader::new(BlockType::Superblock, 0);
		header.encode(&mut block[..META_HEADER_SIZE]).map_err(Gfs2Error::Io)?;

		let mut c = Cursor::new(&mut block[META_HEADER_SIZE..]);
		c.write_u32::<BigEndian>(self.fs_format).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.multihost_format).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.flags).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.block_size).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.block_size_shift).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.seg_size).map_err(Gfs2Error::Io)?;
		write_inum(&mut c, self.jindex_di)?;
		write_inum(&mut c, self.rindex_di)?;
		write_inum(&mut c, self.root_di)?;
		c.write_all(&self.lockproto).map_err(Gfs2Error::Io)?;
		c.write_all(&self.locktable).map_err(Gfs2Error::Io)?;
		write_inum(&mut c, self.quota_di)?;
		write_inum(&mut c, self.license_di)?;
		Ok(())
	}

	pub fn lockproto_str(&self) -> String {
		String::from_utf8_lossy(&self.lockproto).trim_end_matches('\0').to_string()
	}

	pub fn locktable_str(&self) -> String {
		String::from_utf8_lossy(&self.locktable).trim_end_matches('\0').to_string()
	}
}
