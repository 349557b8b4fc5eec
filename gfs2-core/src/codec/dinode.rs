//! Dinodes: the on-disk inode, occupying exactly one block.

use super::header::{BlockType, MetaHeader, META_HEADER_SIZE};
use crate::error::{Gfs2Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

bitflags::bitflags! {
	/// Dinode flags relevant to the walkers. Only the bits this crate acts
	/// on are named; unrecognized bits round-trip unchanged.
	#[derive(Clone, Copy, Debug, PartialEq, Eq)]
	pub struct DinodeFlags: u32 {
		/// Directory entries are distributed across an exhash leaf table.
		const EXHASH = 0x0000_0008;
		/// Inode belongs to the filesystem's own bookkeeping (rindex,
		/// jindex, journals, per_node, inum, statfs, quota, ...).
		const SYSTEM = 0x0000_0001;
		/// Data blocks are journaled (written through the journal rather
		/// than directly).
		const JDATA = 0x0000_0010;
	}
}

/// `{formal_ino, addr}`: a stable inode number paired with the block
/// currently holding its dinode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InodeNumber {
	pub formal_ino: u64,
	pub addr: u64,
}

/// File mode bits interpreted by the walker to distinguish directories
/// from regular files.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

/// In-memory dinode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dinode {
	pub inum: InodeNumber,
	pub mode: u32,
	pub uid: u32,
	pub gid: u32,
	pub nlink: u32,
	pub size: u64,
	pub blocks: u64,
	pub atime: u64,
	pub mtime: u64,
	pub ctime: u64,
	pub major: u32,
	pub minor: u32,
	pub goal_meta: u64,
	pub goal_data: u64,
	pub flags: DinodeFlags,
	pub payload_format: u32,
	pub height: u32,
	pub depth: u32,
	pub entries: u32,
	pub eattr: u64,
}

impl Dinode {
	pub fn is_dir(&self) -> bool {
		self.mode & S_IFMT == S_IFDIR
	}

	pub fn is_regular(&self) -> bool {
		self.mode & S_IFMT == S_IFREG
	}

	/// A regular file of height 0 is "stuffed": its data lives inline
	/// after the dinode header, within the same block.
	pub fn is_stuffed(&self) -> bool {
		self.is_regular() && self.height == 0
	}

	pub fn is_system(&self) -> bool {
		self.flags.contains(DinodeFlags::SYSTEM)
	}

	pub fn is_exhash(&self) -> bool {
		self.is_dir() && self.flags.contains(DinodeFlags::EXHASH)
	}

	pub fn decode(block: &[u8]) -> Result<Self> {
		if block.len() < Self::ENCODED_SIZE {
			return Err(Gfs2Error::malformed(0, "block too short for dinode"));
		}
		let header = MetaHeader::decode(block).map_err(|e| Gfs2Error::malformed(0, e))?;
		if !header.is_valid_magic() || header.block_type() != Some(BlockType::Dinode) {
			return Err(Gfs2Error::malformed(0, "not a dinode block"));
		}

		let mut c = Cursor::new(&block[META_HEADER_SIZE..]);
		let formal_ino = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		let addr = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		let mode = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let uid = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let gid = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let nlink = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let size = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		let blocks = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		let atime = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		let mtime = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		let ctime = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		let major = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let minor = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let goal_meta = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		let goal_data = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		let flags_raw = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let payload_format = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let height = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let depth = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let entries = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let eattr = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;

		Ok(Self {
			inum: InodeNumber { formal_ino, addr },
			mode,
			uid,
			gid,
			nlink,
			size,
			blocks,
			atime,
			mtime,
			ctime,
			major,
			minor,
			goal_meta,
			goal_data,
			flags: DinodeFlags::from_bits_retain(flags_raw),
			payload_format,
			height,
			depth,
			entries,
			eattr,
		})
	}

	pub fn encode(&self, block: &mut [u8]) -> Result<()> {
		if block.len() < Self::ENCODED_SIZE {
			return Err(Gfs2Error::constraint("block too short for dinode"));
		}
		let header = MetaHeader::new(BlockType::Dinode, 0);
		header
			.encode(&mut block[..META_HEADER_SIZE])
			.map_err(Gfs2Error::Io)?;

		let mut c = Cursor::new(&mut block[META_HEADER_SIZE..]);
		c.write_u64::<BigEndian>(self.inum.formal_ino)
			.map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.inum.addr)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.mode).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.uid).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.gid).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.nlink)
			.map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.size).map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.blocks)
			.map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.atime).map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.mtime).map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.ctime).map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.major)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.minor)
			.map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.goal_meta)
			.map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.goal_data)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.flags.bits())
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.payload_format)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.height)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.depth)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.entries)
			.map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.eattr)
			.map_err(Gfs2Error::Io)?;
		Ok(())
	}

	/// Byte offset within the dinode block at which stuffed-file data (or
	/// the dinode's own indirect pointer array) begins.
	pub const ENCODED_SIZE: usize = META_HEADER_SIZE
		+ 8 + 8 // inum
		+ 4 + 4 + 4 + 4 // mode, uid, gid, nlink
		+ 8 + 8 // size, blocks
		+ 8 + 8 + 8 // times
		+ 4 + 4 // major, minor
		+ 8 + 8 // goals
		+ 4 + 4 + 4 + 4 + 4 // flags, payload_format, height, depth, entries
		+ 8; // eattr
}
