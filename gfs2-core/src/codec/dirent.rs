//! Directory leaf blocks and the variable-length directory entries they
//! hold.

use super::dinode::InodeNumber;
use super::header::{BlockType, MetaHeader, META_HEADER_SIZE};
use crate::error::{Gfs2Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Size of the fixed portion of a [`LeafHeader`] following the meta header.
pub const LEAF_HEADER_SIZE: usize = META_HEADER_SIZE + 2 + 2 + 4 + 8 + 8 + 8 + 8;

/// Size of the fixed portion of one [`DirEntry`], excluding the variable
/// length name.
pub const DIRENT_HEADER_SIZE: usize = 8 + 8 + 8 + 2 + 2 + 1 + 1 + 2;

/// Header of a directory leaf block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeafHeader {
	pub depth: u16,
	pub entries: u16,
	pub dirent_format: u32,
	pub next: u64,
	pub inode: u64,
	pub dist: u64,
	pub nsec: u64,
}

impl LeafHeader {
	pub fn decode(block: &[u8]) -> Result<Self> {
		if block.len() < LEAF_HEADER_SIZE {
			return Err(Gfs2Error::malformed(0, "block too short for leaf header"));
		}
		let header = MetaHeader::decode(block).map_err(|e| Gfs2Error::malformed(0, e))?;
		if !header.is_valid_magic() || header.block_type() != Some(BlockType::Leaf) {
			return Err(Gfs2Error::malformed(0, "not a leaf block"));
		}
		let mut c = Cursor::new(&block[META_HEADER_SIZE..]);
		let depth = c.read_u16::<BigEndian>().map_err(Gfs2Error::Io)?;
		let entries = c.read_u16::<BigEndian>().map_err(Gfs2Error::Io)?;
		let dirent_format = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let next = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		let inode = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		let dist = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		let nsec = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		Ok(Self {
			depth,
			entries,
			dirent_format,
			next,
			inode,
			dist,
			nsec,
		})
	}

	pub fn encode(&self, block: &mut [u8]) -> Result<()> {
		if block.len() < LEAF_HEADER_SIZE {
			return Err(Gfs2Error::constraint("block too short for leaf header"));
		}
		MetaHeader::new(BlockType::Leaf, 0)
			.encode(&mut block[..META_HEADER_SIZE])
			.map_err(Gfs2Error::Io)?;
		let mut c = Cursor::new(&mut block[META_HEADER_SIZE..]);
		c.write_u16::<BigEndian>(self.depth).map_err(Gfs2Error::Io)?;
		c.write_u16::<BigEndian>(self.entries)
			.map_err(Gfs2Error::Io)?;
		c.write_u32::<BigEndian>(self.dirent_format)
			.map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.next).map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.inode).map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.dist).map_err(Gfs2Error::Io)?;
		c.write_u64::<BigEndian>(self.nsec).map_err(Gfs2Error::Io)?;
		Ok(())
	}
}

/// Directory entry type, carried in `{type}` for readers that care (exposed
/// for completeness; the walker does not branch on it).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirEntryType {
	Regular,
	Directory,
	Symlink,
	Other(u8),
}

/// A single directory entry: `{inum, hash, rec_len, name_len, type, rahead, name}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
	pub inum: InodeNumber,
	pub hash: u32,
	pub rec_len: u16,
	pub entry_type: DirEntryType,
	pub rahead: u8,
	pub name: Vec<u8>,
}

impl DirEntry {
	/// `inum.addr == 0` is a sentinel hole, skipped by consumers.
	pub fn is_hole(&self) -> bool {
		self.inum.addr == 0
	}

	/// Decodes one entry at `offset` in `block`. Returns the entry and its
	/// `rec_len`, or an error if `rec_len` is out of bounds
	/// (`< DIRENT_HEADER_SIZE` or `> block.len()`).
	pub fn decode_at(block: &[u8], offset: usize) -> Result<(Self, usize)> {
		if offset + DIRENT_HEADER_SIZE > block.len() {
			return Err(Gfs2Error::malformed(0, "dirent header runs past block"));
		}
		let mut c = Cursor::new(&block[offset..]);
		let formal_ino = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		let addr = c.read_u64::<BigEndian>().map_err(Gfs2Error::Io)?;
		let hash = c.read_u32::<BigEndian>().map_err(Gfs2Error::Io)?;
		let rec_len = c.read_u16::<BigEndian>().map_err(Gfs2Error::Io)?;
		let name_len = c.read_u16::<BigEndian>().map_err(Gfs2Error::Io)?;
		let entry_type_raw = c.read_u8().map_err(Gfs2Error::Io)?;
		let rahead = c.read_u8().map_err(Gfs2Error::Io)?;
		let _reserved = c.read_u16::<BigEndian>().map_err(Gfs2Error::Io)?;

		if (rec_len as usize) < DIRENT_HEADER_SIZE || offset + rec_len as usize > block.len() {
			return Err(Gfs2Error::malformed(
				0,
				format!("dirent rec_len {rec_len} out of bounds"),
			));
		}
		let name_start = offset + DIRENT_HEADER_SIZE;
		let name_end = name_start + name_len as usize;
		if name_end > offset + rec_len as usize {
			return Err(Gfs2Error::malformed(0, "dirent name_len exceeds rec_len"));
		}
		let name = block[name_start..name_end].to_vec();

		let entry_type = match entry_type_raw {
			0 => DirEntryType::Other(0),
			1 => DirEntryType::Regular,
			2 => DirEntryType::Directory,
			7 => DirEntryType::Symlink,
			other => DirEntryType::Other(other),
		};

		Ok((
			Self {
				inum: InodeNumber { formal_ino, addr },
				hash,
				rec_len,
				entry_type,
				rahead,
				name,
			},
			rec_len as usize,
		))
	}

	/// Iterates every entry in a leaf block's entry region
	/// (`[LEAF_HEADER_SIZE, block.len())`), skipping holes, stopping at the
	/// first decode error or when the region is exhausted.
	pub fn iter_leaf(block: &[u8]) -> DirEntryIter<'_> {
		Self::iter_at(block, LEAF_HEADER_SIZE)
	}

	/// Iterates entries starting at an arbitrary byte offset. A directory
	/// without `EXHASH` stores its entries inline in the dinode block,
	/// starting right after the dinode header rather than a leaf header;
	/// callers pass `Dinode::ENCODED_SIZE` for that case.
	pub fn iter_at(block: &[u8], offset: usize) -> DirEntryIter<'_> {
		DirEntryIter { block, offset }
	}
}

/// Lazy, non-restartable, ascending-order iterator over the directory
/// entries of one leaf block.
pub struct DirEntryIter<'a> {
	block: &'a [u8],
	offset: usize,
}

impl<'a> Iterator for DirEntryIter<'a> {
	type Item = Result<DirEntry>;

	fn next(&mut self) -> Option<Self::Item> {
		while self.offset + DIRENT_HEADER_SIZE <= self.block.len() {
			match DirEntry::decode_at(self.block, self.offset) {
				Ok((entry, rec_len)) => {
					self.offset += rec_len;
					if entry.is_hole() {
						continue;
					}
					return Some(Ok(entry));
				}
				Err(e) => {
					// Stop the iterator; one malformed entry invalidates
					// the rest of the block's offsets.
					self.offset = self.block.len();
					return Some(Err(e));
				}
			}
		}
		None
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn write_entry(block: &mut [u8], offset: usize, addr: u64, name: &[u8], rec_len: u16) {
		let mut c = Cursor::new(&mut block[offset..]);
		c.write_u64::<BigEndian>(addr).unwrap(); // formal_ino
		c.write_u64::<BigEndian>(addr).unwrap();
		c.write_u32::<BigEndian>(0).unwrap();
		c.write_u16::<BigEndian>(rec_len).unwrap();
		c.write_u16::<BigEndian>(name.len() as u16).unwrap();
		c.write_u8(1).unwrap();
		c.write_u8(0).unwrap();
		c.write_u16::<BigEndian>(0).unwrap();
		block[offset + DIRENT_HEADER_SIZE..offset + DIRENT_HEADER_SIZE + name.len()]
			.copy_from_slice(name);
	}

	#[test]
	fn iterate_skips_holes() {
		let mut block = vec![0u8; 512];
		let h = LeafHeader {
			depth: 0,
			entries: 2,
			dirent_format: 0,
			next: 0,
			inode: 1,
			dist: 0,
			nsec: 0,
		};
		h.encode(&mut block).unwrap();

		write_entry(&mut block, LEAF_HEADER_SIZE, 0, b"", 32); // hole
		write_entry(&mut block, LEAF_HEADER_SIZE + 32, 9, b"foo", 32);

		let names: Vec<_> = DirEntry::iter_leaf(&block)
			.map(|e| e.unwrap().name)
			.collect();
		assert_eq!(names, vec![b"foo".to_vec()]);
	}

	#[test]
	fn rejects_bad_rec_len() {
		let mut block = vec![0u8; 512];
		let h = LeafHeader {
			depth: 0,
			entries: 1,
			dirent_format: 0,
			next: 0,
			inode: 1,
			dist: 0,
			nsec: 0,
		};
		h.encode(&mut block).unwrap();
		write_entry(&mut block, LEAF_HEADER_SIZE, 9, b"foo", 4); // too short

		let first = DirEntry::iter_leaf(&block).next().unwrap();
		assert!(first.is_err());
	}
}
