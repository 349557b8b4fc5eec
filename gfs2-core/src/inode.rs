//! Height-based indirect tree traversal, exhash directory leaf-chain
//! traversal, and extended-attribute indirection.
//!
//! Given a dinode, produces the sequence of blocks reachable from it. The
//! walk never panics on malformed data: a subtree that fails to classify
//! is reported as a [`WalkEvent::Malformed`] event and the walker
//! continues with the next sibling pointer.

use crate::block_io::BlockDevice;
use crate::codec::dinode::Dinode;
use crate::codec::dirent::{DirEntry, LeafHeader};
use crate::codec::eattr;
use crate::codec::header::{classify, BlockType};
use crate::codec::indirect;
use crate::error::Result;
use crate::generation::Generation;

/// The role a yielded block plays relative to the dinode it was reached
/// from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
	Indirect,
	Data,
	DirLeaf,
	EaHeader,
	EaData,
}

/// One event from the walk: either a successfully classified block, or a
/// malformed subtree that was skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalkEvent {
	Block { addr: u64, role: Role },
	Malformed { addr: u64, reason: String },
}

/// Walks every block reachable from `dinode`'s indirect tree, directory
/// leaves and extended attributes, honoring generation-specific indirect
/// header sizes. Returns the full (finite) sequence of events in
/// traversal order; this is not restartable.
pub fn walk(dev: &mut BlockDevice, dinode: &Dinode, generation: Generation) -> Result<Vec<WalkEvent>> {
	let mut events = Vec::new();
	let header_size = generation.indirect_header_size();

	if dinode.is_stuffed() {
		// Data lives inline after the dinode header; no further blocks.
	} else if dinode.is_dir() {
		if dinode.is_exhash() {
			walk_exhash_dir(dev, dinode, header_size, &mut events)?;
		} else {
			// A directory without EXHASH is a single-block leaf list: the
			// dinode block itself.
			events.push(WalkEvent::Block {
				addr: dinode.inum.addr,
				role: Role::DirLeaf,
			});
		}
	} else if dinode.is_regular() && dinode.height > 0 {
		let leaves = collect_leaf_pointers(dev, dinode.inum.addr, dinode.height, header_size, &mut events)?;
		for addr in leaves {
			events.push(WalkEvent::Block {
				addr,
				role: Role::Data,
			});
		}
	}

	if dinode.eattr != 0 {
		walk_eattr(dev, dinode.eattr, header_size, &mut events)?;
	}

	Ok(events)
}

/// Reads the direct pointer array held inside the dinode block itself
/// (the root of the indirect tree, or an exhash directory's inline hash
/// table when its height is zero).
fn root_pointers(dev: &mut BlockDevice, addr: u64) -> Result<Vec<u64>> {
	let buffer = dev.acquire(addr)?;
	let block = buffer.data.clone();
	dev.release(buffer)?;
	Ok(indirect::read_pointers_at(&block, Dinode::ENCODED_SIZE))
}

/// Walks the indirect tree rooted at the dinode block `addr`, returning
/// the leaf-level pointers reached at `height` 1 (these are data blocks
/// for a regular file, or leaf blocks for an exhash hash table).
/// Intermediate `Indirect` blocks are reported as events as they're
/// visited; the leaves themselves are returned rather than pushed, since
/// callers treat them differently (plain data vs. directory leaves that
/// still need deduplication and chain-following).
fn collect_leaf_pointers(
	dev: &mut BlockDevice,
	addr: u64,
	height: u32,
	header_size: usize,
	events: &mut Vec<WalkEvent>,
) -> Result<Vec<u64>> {
	let root = root_pointers(dev, addr)?;
	collect_from_pointers(dev, root, height, header_size, events)
}

/// Resolves one level of `pointers` found at `height`: height 1 pointers
/// are leaves, returned as-is; deeper pointers are `Indirect` blocks to
/// recurse into.
fn collect_from_pointers(
	dev: &mut BlockDevice,
	pointers: Vec<u64>,
	height: u32,
	header_size: usize,
	events: &mut Vec<WalkEvent>,
) -> Result<Vec<u64>> {
	let mut leaves = Vec::new();
	for ptr in pointers {
		if ptr == 0 {
			continue;
		}
		if height <= 1 {
			leaves.push(ptr);
			continue;
		}
		let child = dev.acquire(ptr)?;
		let child_block = child.data.clone();
		dev.release(child)?;
		match classify(&child_block) {
			Some(BlockType::Indirect) => {
				events.push(WalkEvent::Block {
					addr: ptr,
					role: Role::Indirect,
				});
				match indirect::decode_pointers(&child_block, header_size) {
					Ok(ptrs) => {
						let deeper = collect_from_pointers(dev, ptrs, height - 1, header_size, events)?;
						leaves.extend(deeper);
					}
					Err(e) => events.push(WalkEvent::Malformed {
						addr: ptr,
						reason: e.to_string(),
					}),
				}
			}
			_ => events.push(WalkEvent::Malformed {
				addr: ptr,
				reason: "expected indirect block".to_string(),
			}),
		}
	}
	Ok(leaves)
}

/// Walks an exhash directory: its hash table (inline in the dinode block
/// at height 0, or reached through an indirect tree otherwise) yields
/// leaf-block pointers, with consecutive duplicates (bucket sharing)
/// coalesced; for each unique pointer, the leaf's `next` chain is
/// followed to completion.
fn walk_exhash_dir(
	dev: &mut BlockDevice,
	dinode: &Dinode,
	header_size: usize,
	events: &mut Vec<WalkEvent>,
) -> Result<()> {
	let leaf_pointers = if dinode.height == 0 {
		root_pointers(dev, dinode.inum.addr)?
	} else {
		collect_leaf_pointers(dev, dinode.inum.addr, dinode.height, header_size, events)?
	};

	let mut prev = None;
	for ptr in leaf_pointers {
		if ptr == 0 {
			continue;
		}
		if prev == Some(ptr) {
			continue; // duplicate consecutive pointer: shared bucket
		}
		prev = Some(ptr);
		walk_leaf_chain(dev, ptr, events)?;
	}
	Ok(())
}

/// Follows a directory leaf's `next` chain to completion, yielding each
/// leaf block.
fn walk_leaf_chain(dev: &mut BlockDevice, mut addr: u64, events: &mut Vec<WalkEvent>) -> Result<()> {
	loop {
		let buffer = dev.acquire(addr)?;
		let block = buffer.data.clone();
		dev.release(buffer)?;

		let header = match LeafHeader::decode(&block) {
			Ok(h) => h,
			Err(e) => {
				events.push(WalkEvent::Malformed {
					addr,
					reason: e.to_string(),
				});
				return Ok(());
			}
		};
		events.push(WalkEvent::Block {
			addr,
			role: Role::DirLeaf,
		});
		if header.next == 0 {
			return Ok(());
		}
		addr = header.next;
	}
}

/// Reads a regular file's content in block order, up to `dinode.size`
/// bytes: inline for a stuffed file, or by following its (possibly
/// two-level) indirect tree otherwise. Used by the layout planner to pull
/// a small system file (the rindex) back into memory, not meant for
/// arbitrarily large files.
pub fn read_file_bytes(dev: &mut BlockDevice, dinode: &Dinode, generation: Generation) -> Result<Vec<u8>> {
	let size = dinode.size as usize;
	if dinode.is_stuffed() {
		let buffer = dev.acquire(dinode.inum.addr)?;
		let block = buffer.data.clone();
		dev.release(buffer)?;
		let start = Dinode::ENCODED_SIZE;
		let end = (start + size).min(block.len());
		return Ok(block[start..end].to_vec());
	}

	let header_size = generation.indirect_header_size();
	let mut events = Vec::new();
	let leaves = collect_leaf_pointers(dev, dinode.inum.addr, dinode.height, header_size, &mut events)?;
	let mut out = Vec::with_capacity(size);
	for addr in leaves {
		if out.len() >= size {
			break;
		}
		let buffer = dev.acquire(addr)?;
		let remaining = size - out.len();
		let take = remaining.min(buffer.data.len());
		out.extend_from_slice(&buffer.data[..take]);
		dev.release(buffer)?;
	}
	Ok(out)
}

/// Lists the directory entries of one already-fetched exhash leaf block.
pub fn leaf_entries(block: &[u8]) -> Vec<Result<DirEntry>> {
	DirEntry::iter_leaf(block).collect()
}

/// Lists the directory entries of a non-`EXHASH` directory's dinode
/// block, where entries begin right after the dinode header rather than
/// a leaf header.
pub fn linear_dir_entries(block: &[u8]) -> Vec<Result<DirEntry>> {
	DirEntry::iter_at(block, Dinode::ENCODED_SIZE).collect()
}

/// Walks extended-attribute indirection rooted at `eattr`. If `eattr`
/// classifies as an EA header, its records are scanned and every
/// referenced EA-data block is yielded. If `eattr` is itself an indirect
/// block, the walk recurses one level before looking for the EA header.
fn walk_eattr(
	dev: &mut BlockDevice,
	eattr: u64,
	header_size: usize,
	events: &mut Vec<WalkEvent>,
) -> Result<()> {
	let buffer = dev.acquire(eattr)?;
	let block = buffer.data.clone();
	dev.release(buffer)?;

	match classify(&block) {
		Some(BlockType::EaHeader) => {
			events.push(WalkEvent::Block {
				addr: eattr,
				role: Role::EaHeader,
			});
			match eattr::decode_records(&block) {
				Ok(records) => {
					for record in records {
						for ptr in record.pointers {
							if ptr != 0 {
								events.push(WalkEvent::Block {
									addr: ptr,
									role: Role::EaData,
								});
							}
						}
					}
				}
				Err(e) => events.push(WalkEvent::Malformed {
					addr: eattr,
					reason: e.to_string(),
				}),
			}
		}
		Some(BlockType::Indirect) => {
			events.push(WalkEvent::Block {
				addr: eattr,
				role: Role::Indirect,
			});
			match indirect::decode_pointers(&block, header_size) {
				Ok(ptrs) => {
					for ptr in ptrs {
						if ptr != 0 {
							walk_eattr(dev, ptr, header_size, events)?;
						}
					}
				}
				Err(e) => events.push(WalkEvent::Malformed {
					addr: eattr,
					reason: e.to_string(),
				}),
			}
		}
		_ => events.push(WalkEvent::Malformed {
			addr: eattr,
			reason: "eattr block did not classify as EA header or indirect".to_string(),
		}),
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::codec::dinode::{DinodeFlags, InodeNumber, S_IFDIR, S_IFREG};
	use crate::codec::header::{MetaHeader, META_HEADER_SIZE};
	use std::io::Write as _;

	fn device(block_size: u32, blocks: u64) -> BlockDevice {
		let mut tmp = tempfile::tempfile().unwrap();
		tmp.write_all(&vec![0u8; (block_size as u64 * blocks) as usize])
			.unwrap();
		BlockDevice::open(tmp, block_size).unwrap()
	}

	fn base_dinode(addr: u64, mode: u32) -> Dinode {
		Dinode {
			inum: InodeNumber {
				formal_ino: addr,
				addr,
			},
			mode,
			uid: 0,
			gid: 0,
			nlink: 1,
			size: 10,
			blocks: 1,
			atime: 0,
			mtime: 0,
			ctime: 0,
			major: 0,
			minor: 0,
			goal_meta: 0,
			goal_data: 0,
			flags: DinodeFlags::empty(),
			payload_format: 0,
			height: 0,
			depth: 0,
			entries: 0,
			eattr: 0,
		}
	}

	fn write_block(dev: &mut BlockDevice, addr: u64, data: Vec<u8>) {
		let mut buf = dev.acquire(addr).unwrap();
		buf.data = data;
		buf.mark_dirty();
		dev.release(buf).unwrap();
	}

	#[test]
	fn stuffed_file_yields_nothing() {
		let mut dev = device(512, 4);
		let d = base_dinode(0, S_IFREG | 0o644);
		let events = walk(&mut dev, &d, Generation::Current).unwrap();
		assert!(events.is_empty());
	}

	#[test]
	fn height_one_file_yields_direct_data_blocks() {
		let mut dev = device(512, 8);
		let mut d = base_dinode(1, S_IFREG | 0o644);
		d.height = 1;

		let mut root = vec![0u8; 512];
		MetaHeader::new(BlockType::Dinode, 0)
			.encode(&mut root[..META_HEADER_SIZE])
			.unwrap();
		indirect::read_pointers_at(&root, Dinode::ENCODED_SIZE); // sanity: empty before write
		let ptrs = [2u64, 0, 3];
		{
			use byteorder::{BigEndian, WriteBytesExt};
			use std::io::Cursor;
			let mut c = Cursor::new(&mut root[Dinode::ENCODED_SIZE..]);
			for p in ptrs {
				c.write_u64::<BigEndian>(p).unwrap();
			}
		}
		write_block(&mut dev, 1, root);

		let events = walk(&mut dev, &d, Generation::Current).unwrap();
		let data_addrs: Vec<u64> = events
			.into_iter()
			.filter_map(|e| match e {
				WalkEvent::Block { addr, role: Role::Data } => Some(addr),
				_ => None,
			})
			.collect();
		assert_eq!(data_addrs, vec![2, 3]);
	}

	#[test]
	fn two_level_indirect_tree_recurses() {
		let mut dev = device(512, 16);
		let mut d = base_dinode(1, S_IFREG | 0o644);
		d.height = 2;

		let mut root = vec![0u8; 512];
		MetaHeader::new(BlockType::Dinode, 0)
			.encode(&mut root[..META_HEADER_SIZE])
			.unwrap();
		{
			use byteorder::{BigEndian, WriteBytesExt};
			use std::io::Cursor;
			let mut c = Cursor::new(&mut root[Dinode::ENCODED_SIZE..]);
			c.write_u64::<BigEndian>(5).unwrap(); // points at an Indirect block
		}
		write_block(&mut dev, 1, root);

		let mut indirect_block = vec![0u8; 512];
		indirect::encode_pointers(&mut indirect_block, META_HEADER_SIZE, &[9, 10]).unwrap();
		write_block(&mut dev, 5, indirect_block);

		let events = walk(&mut dev, &d, Generation::Current).unwrap();
		let mut saw_indirect = false;
		let mut data_addrs = Vec::new();
		for e in events {
			match e {
				WalkEvent::Block { addr: 5, role: Role::Indirect } => saw_indirect = true,
				WalkEvent::Block { addr, role: Role::Data } => data_addrs.push(addr),
				_ => {}
			}
		}
		assert!(saw_indirect);
		assert_eq!(data_addrs, vec![9, 10]);
	}

	#[test]
	fn non_exhash_dir_yields_its_own_block() {
		let mut dev = device(512, 4);
		let d = base_dinode(2, S_IFDIR | 0o755);
		let events = walk(&mut dev, &d, Generation::Current).unwrap();
		assert_eq!(
			events,
			vec![WalkEvent::Block {
				addr: 2,
				role: Role::DirLeaf
			}]
		);
	}

	#[test]
	fn exhash_dir_dedups_consecutive_leaf_pointers_and_follows_chain() {
		let mut dev = device(512, 16);
		let mut d = base_dinode(1, S_IFDIR | 0o755);
		d.flags = DinodeFlags::EXHASH;
		d.height = 0;

		let mut root = vec![0u8; 512];
		MetaHeader::new(BlockType::Dinode, 0)
			.encode(&mut root[..META_HEADER_SIZE])
			.unwrap();
		{
			use byteorder::{BigEndian, WriteBytesExt};
			use std::io::Cursor;
			let mut c = Cursor::new(&mut root[Dinode::ENCODED_SIZE..]);
			// two buckets share leaf 8, third points at leaf 9
			for p in [8u64, 8, 9] {
				c.write_u64::<BigEndian>(p).unwrap();
			}
		}
		write_block(&mut dev, 1, root);

		let leaf8 = LeafHeader {
			depth: 0,
			entries: 0,
			dirent_format: 0,
			next: 0,
			inode: 1,
			dist: 0,
			nsec: 0,
		};
		let mut leaf8_block = vec![0u8; 512];
		leaf8.encode(&mut leaf8_block).unwrap();
		write_block(&mut dev, 8, leaf8_block);

		let leaf9 = LeafHeader {
			depth: 0,
			entries: 0,
			dirent_format: 0,
			next: 0,
			inode: 1,
			dist: 0,
			nsec: 0,
		};
		let mut leaf9_block = vec![0u8; 512];
		leaf9.encode(&mut leaf9_block).unwrap();
		write_block(&mut dev, 9, leaf9_block);

		let events = walk(&mut dev, &d, Generation::Current).unwrap();
		let leaves: Vec<u64> = events
			.into_iter()
			.filter_map(|e| match e {
				WalkEvent::Block { addr, role: Role::DirLeaf } => Some(addr),
				_ => None,
			})
			.collect();
		assert_eq!(leaves, vec![8, 9]);
	}

	#[test]
	fn eattr_header_yields_data_blocks() {
		let mut dev = device(512, 8);
		let mut d = base_dinode(1, S_IFREG | 0o644);
		d.eattr = 3;

		let mut ea_block = vec![0u8; 512];
		MetaHeader::new(BlockType::EaHeader, 0)
			.encode(&mut ea_block[..META_HEADER_SIZE])
			.unwrap();
		{
			use byteorder::{BigEndian, WriteBytesExt};
			use std::io::{Cursor, Write};
			let mut c = Cursor::new(&mut ea_block[META_HEADER_SIZE..]);
			c.write_u32::<BigEndian>(super::eattr::EA_RECORD_HEADER_SIZE as u32 + 8)
				.unwrap();
			c.write_u32::<BigEndian>(4).unwrap();
			c.write_u8(3).unwrap();
			c.write_u8(1).unwrap();
			c.write_u8(0).unwrap();
			c.write_u8(1).unwrap();
			c.write_all(&42u64.to_be_bytes()).unwrap();
		}
		write_block(&mut dev, 3, ea_block);

		let events = walk(&mut dev, &d, Generation::Current).unwrap();
		assert!(events.iter().any(|e| matches!(
			e,
			WalkEvent::Block {
				addr: 42,
				role: Role::EaData
			}
		)));
	}

	#[test]
	fn read_file_bytes_reads_stuffed_content() {
		let mut dev = device(512, 4);
		let mut d = base_dinode(0, S_IFREG | 0o644);
		d.size = 5;
		let mut block = vec![0u8; 512];
		MetaHeader::new(BlockType::Dinode, 0)
			.encode(&mut block[..META_HEADER_SIZE])
			.unwrap();
		block[Dinode::ENCODED_SIZE..Dinode::ENCODED_SIZE + 5].copy_from_slice(b"hello");
		write_block(&mut dev, 0, block);

		let bytes = read_file_bytes(&mut dev, &d, Generation::Current).unwrap();
		assert_eq!(bytes, b"hello");
	}

	#[test]
	fn read_file_bytes_follows_indirect_tree() {
		let mut dev = device(512, 8);
		let mut d = base_dinode(1, S_IFREG | 0o644);
		d.height = 1;
		d.size = 512 + 3;

		let mut root = vec![0u8; 512];
		MetaHeader::new(BlockType::Dinode, 0)
			.encode(&mut root[..META_HEADER_SIZE])
			.unwrap();
		{
			use byteorder::{BigEndian, WriteBytesExt};
			use std::io::Cursor;
			let mut c = Cursor::new(&mut root[Dinode::ENCODED_SIZE..]);
			c.write_u64::<BigEndian>(2).unwrap();
			c.write_u64::<BigEndian>(3).unwrap();
		}
		write_block(&mut dev, 1, root);

		let block2 = vec![0xAAu8; 512];
		write_block(&mut dev, 2, block2);
		let mut block3 = vec![0u8; 512];
		block3[0..3].copy_from_slice(b"xyz");
		write_block(&mut dev, 3, block3);

		let bytes = read_file_bytes(&mut dev, &d, Generation::Current).unwrap();
		assert_eq!(bytes.len(), 515);
		assert_eq!(&bytes[..512], &[0xAAu8; 512][..]);
		assert_eq!(&bytes[512..515], b"xyz");
	}

	#[test]
	fn malformed_child_is_reported_not_fatal() {
		let mut dev = device(512, 8);
		let mut d = base_dinode(1, S_IFREG | 0o644);
		d.height = 2;

		let mut root = vec![0u8; 512];
		MetaHeader::new(BlockType::Dinode, 0)
			.encode(&mut root[..META_HEADER_SIZE])
			.unwrap();
		{
			use byteorder::{BigEndian, WriteBytesExt};
			use std::io::Cursor;
			let mut c = Cursor::new(&mut root[Dinode::ENCODED_SIZE..]);
			c.write_u64::<BigEndian>(5).unwrap();
		}
		write_block(&mut dev, 1, root);
		// block 5 left zeroed: fails to classify as Indirect

		let events = walk(&mut dev, &d, Generation::Current).unwrap();
		assert_eq!(events.len(), 1);
		assert!(matches!(events[0], WalkEvent::Malformed { addr: 5, .. }));
	}
}
