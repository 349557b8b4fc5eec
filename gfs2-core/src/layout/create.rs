//! Filesystem creation: size the device, place resource groups, write the
//! superblock, journals and master directory.
//!
//! Journals are planned and written first so their placement is
//! predictable for an operator inspecting a fresh image with a hex
//! viewer; then the remaining space is carved into resource groups; then
//! the master directory and system files are built on top of the first
//! general-purpose RG; the superblock is committed last, after `fsync`,
//! so a crash mid-creation leaves the device indistinguishable from an
//! unformatted one.

use std::fs::File;

use log::info;
use uuid::Uuid;

use crate::block_io::BlockDevice;
use crate::codec::dinode::{Dinode, DinodeFlags, InodeNumber, S_IFDIR, S_IFREG};
use crate::codec::dirent::{DirEntryType, DIRENT_HEADER_SIZE};
use crate::codec::indirect;
use crate::codec::rgrp::{encode_bitmap_block_header, BlockState, RgHeader};
use crate::codec::superblock::{Superblock, FS_FORMAT_CURRENT, SUPERBLOCK_BYTE_OFFSET};
use crate::error::{Gfs2Error, Result};
use crate::generation::Generation;
use crate::rgindex::{RgIndex, Rgrp};

use super::options::LayoutOptions;
use super::plan::{self, Topology};

/// Outcome of a successful [`create_filesystem`] call.
#[derive(Clone, Debug)]
pub struct CreateSummary {
	pub block_size: u32,
	pub device_len_blocks: u64,
	pub rg_count: usize,
	pub journal_inodes: Vec<InodeNumber>,
	pub master_dir_inum: InodeNumber,
	pub root_dir_inum: InodeNumber,
	pub uuid: [u8; 16],
}

/// Builds a fresh filesystem on `file`, per the options given. Only the
/// current generation is produced (the legacy generation is a read-side
/// concern here; see `DESIGN.md`).
pub fn create_filesystem(file: File, topology: Topology, options: &LayoutOptions) -> Result<CreateSummary> {
	options.validate()?;

	let block_size = plan::choose_block_size(options.block_size, &topology, 4096, page_size())?;
	let alignment = plan::choose_alignment(options.stripe_unit, options.stripe_width, block_size, &topology);
	let mut dev = BlockDevice::open(file, block_size)?;
	let device_len_blocks = dev.device_len_blocks();

	let mut rgindex = RgIndex::new(alignment);
	let generation = Generation::Current;
	let header_size = generation.indirect_header_size();

	let sb_block = SUPERBLOCK_BYTE_OFFSET / block_size as u64;
	let mut next_addr = rgindex.align(sb_block + 1);

	info!("planning {} journal(s)", options.journal_count);
	let journal_size_blocks = plan::space_for_data(
		block_size,
		options.journal_size_mb_or_default() * super::constants::MEBIBYTE,
	);

	let max_journal_blocks = max_two_level_capacity(block_size, header_size);
	if journal_size_blocks > max_journal_blocks {
		return Err(Gfs2Error::constraint(format!(
			"requested journal size ({journal_size_blocks} blocks) exceeds the {max_journal_blocks} \
			 blocks this planner's two-level indirect tree can address at a {block_size}-byte block size"
		)));
	}

	let mut journal_inodes = Vec::with_capacity(options.journal_count as usize);
	let mut journal_rg_addrs = Vec::with_capacity(options.journal_count as usize);
	for j in 0..options.journal_count {
		let rg_addr = rgindex.align(next_addr);
		if rg_addr > next_addr {
			dev.zero_fill(next_addr, rg_addr - next_addr)?;
		}
		let inum = place_journal(&mut dev, &mut rgindex, rg_addr, journal_size_blocks, header_size)?;
		info!("journal {j} placed at block {}", inum.addr);
		journal_inodes.push(inum);
		journal_rg_addrs.push(rg_addr);
		next_addr = rgindex
			.iter()
			.map(|rg| rg.data0 + rg.data as u64)
			.max()
			.unwrap_or(next_addr);
	}

	info!("planning general-purpose resource groups");
	let rg_size_blocks = plan::space_for_data(block_size, options.rg_size_mb_or_default() * super::constants::MEBIBYTE);
	let rg_count = rgindex.plan(device_len_blocks, next_addr, rg_size_blocks);
	for i in 0..rg_count {
		let rg_addr = rgindex.align(next_addr);
		if rg_addr > next_addr {
			dev.zero_fill(next_addr, rg_addr - next_addr)?;
		}
		let remaining = device_len_blocks.saturating_sub(rg_addr);
		let span = if i + 1 == rg_count { remaining } else { rg_size_blocks.min(remaining) };
		let rg = place_plain_rg(&mut dev, &mut rgindex, rg_addr, span)?;
		next_addr = rg.data0 + rg.data as u64;
	}

	info!("building master directory and system files");
	let first_rg = rgindex
		.iter()
		.find(|rg| rg.data > 0 && !journal_rg_addrs.contains(&rg.addr))
		.copied()
		.ok_or_else(|| Gfs2Error::constraint("no resource group available for system files"))?;
	let mut alloc = Allocator::new(first_rg);

	let root_dinode_addr = alloc.alloc(&mut dev, &rgindex)?;
	let master_dinode_addr = alloc.alloc(&mut dev, &rgindex)?;
	let rindex_addr = alloc.alloc(&mut dev, &rgindex)?;
	let jindex_addr = alloc.alloc(&mut dev, &rgindex)?;
	let per_node_addr = alloc.alloc(&mut dev, &rgindex)?;
	let inum_addr = alloc.alloc(&mut dev, &rgindex)?;
	let statfs_addr = alloc.alloc(&mut dev, &rgindex)?;
	let quota_addr = alloc.alloc(&mut dev, &rgindex)?;

	write_stuffed_file_dinode(&mut dev, inum_addr, S_IFREG | 0o600, true, &[])?;
	write_stuffed_file_dinode(&mut dev, statfs_addr, S_IFREG | 0o600, true, &[])?;
	write_stuffed_file_dinode(&mut dev, quota_addr, S_IFREG | 0o600, true, &[])?;
	write_linear_dir_dinode(&mut dev, per_node_addr, &[])?;

	let jindex_children: Vec<(InodeNumber, String)> = journal_inodes
		.iter()
		.enumerate()
		.map(|(i, inum)| (*inum, format!("journal{i}")))
		.collect();
	write_linear_dir_dinode(&mut dev, jindex_addr, &jindex_children)?;

	let rindex_bytes = rgindex.to_rindex_bytes()?;
	write_stuffed_or_tree_file(&mut dev, &mut alloc, &rgindex, rindex_addr, &rindex_bytes, true, header_size)?;

	let master_children = vec![
		(InodeNumber { formal_ino: rindex_addr, addr: rindex_addr }, "rindex".to_string()),
		(InodeNumber { formal_ino: jindex_addr, addr: jindex_addr }, "jindex".to_string()),
		(InodeNumber { formal_ino: per_node_addr, addr: per_node_addr }, "per_node".to_string()),
		(InodeNumber { formal_ino: inum_addr, addr: inum_addr }, "inum".to_string()),
		(InodeNumber { formal_ino: statfs_addr, addr: statfs_addr }, "statfs".to_string()),
		(InodeNumber { formal_ino: quota_addr, addr: quota_addr }, "quota".to_string()),
	];
	write_linear_dir_dinode(&mut dev, master_dinode_addr, &master_children)?;
	write_linear_dir_dinode(&mut dev, root_dinode_addr, &[])?;

	let uuid = options.uuid.unwrap_or_else(|| *Uuid::new_v4().as_bytes());

	info!("committing superblock");
	dev.flush()?;
	let sb = build_superblock(block_size, master_dinode_addr, root_dinode_addr, options, uuid)?;
	let mut sb_block_bytes = vec![0u8; block_size as usize];
	sb.encode(&mut sb_block_bytes)?;
	let mut buf = dev.acquire(sb_block)?;
	buf.data = sb_block_bytes;
	buf.mark_dirty();
	dev.release(buf)?;
	dev.flush()?;

	Ok(CreateSummary {
		block_size,
		device_len_blocks,
		rg_count: rgindex.len(),
		journal_inodes,
		master_dir_inum: InodeNumber { formal_ino: master_dinode_addr, addr: master_dinode_addr },
		root_dir_inum: InodeNumber { formal_ino: root_dinode_addr, addr: root_dinode_addr },
		uuid,
	})
}

fn page_size() -> u32 {
	let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
	if ps > 0 {
		ps as u32
	} else {
		4096
	}
}

fn build_superblock(
	block_size: u32,
	master_dir_inum: u64,
	root_dir_inum: u64,
	options: &LayoutOptions,
	uuid: [u8; 16],
) -> Result<Superblock> {
	let mut lockproto = [0u8; 64];
	let proto = options.lock_proto.as_bytes();
	lockproto[..proto.len()].copy_from_slice(proto);
	let mut locktable = [0u8; 64];
	let table = options.lock_table.as_bytes();
	locktable[..table.len()].copy_from_slice(table);

	Ok(Superblock {
		fs_format: FS_FORMAT_CURRENT,
		multihost_format: 0,
		block_size,
		block_size_shift: block_size.trailing_zeros(),
		master_dir_inum,
		root_dir_inum,
		lockproto,
		locktable,
		uuid,
	})
}

/// Plans and writes one journal's dedicated RG: header, bitmaps, the
/// journal's own dinode, and its (possibly indirect) data tree.
fn place_journal(
	dev: &mut BlockDevice,
	rgindex: &mut RgIndex,
	rg_addr: u64,
	journal_size_blocks: u64,
	header_size: usize,
) -> Result<InodeNumber> {
	let block_size = dev.block_size();
	let (height, indirect_blocks) = plan_tree_shape(block_size, header_size, journal_size_blocks)?;
	// +1 for the journal's own dinode block.
	let total_data = 1 + indirect_blocks + journal_size_blocks;
	let rg_length = plan::rg_length_for_data(block_size, total_data);
	let data0 = rg_addr + rg_length as u64;

	let rg = Rgrp {
		addr: rg_addr,
		length: rg_length,
		data0,
		data: total_data as u32,
		bitbytes: (total_data as u32).div_ceil(crate::codec::rgrp::BLOCKS_PER_BYTE),
	};
	write_rg_header_and_bitmaps(dev, &rg)?;
	dev.zero_fill(data0, total_data)?;
	rgindex.insert(rg);

	let dinode_addr = data0;
	let first_meta = data0 + 1;
	let indirect_addrs: Vec<u64> = (0..indirect_blocks).map(|i| first_meta + i).collect();
	let data_addrs: Vec<u64> = (0..journal_size_blocks).map(|i| first_meta + indirect_blocks + i).collect();

	let root_pointers = build_data_tree(dev, height, &indirect_addrs, &data_addrs, header_size)?;

	let inum = InodeNumber { formal_ino: dinode_addr, addr: dinode_addr };
	let dinode = Dinode {
		inum,
		mode: S_IFREG | 0o600,
		uid: 0,
		gid: 0,
		nlink: 1,
		size: journal_size_blocks * block_size as u64,
		blocks: total_data,
		atime: 0,
		mtime: 0,
		ctime: 0,
		major: 0,
		minor: 0,
		goal_meta: dinode_addr,
		goal_data: data_addrs.first().copied().unwrap_or(dinode_addr),
		flags: DinodeFlags::SYSTEM,
		payload_format: 0,
		height,
		depth: 0,
		entries: 0,
		eattr: 0,
	};
	write_dinode_with_root_pointers(dev, &dinode, &root_pointers)?;

	rgindex.set_state(dev, &rg, dinode_addr, BlockState::DinodeOrUsedMeta)?;
	for addr in &indirect_addrs {
		rgindex.set_state(dev, &rg, *addr, BlockState::DinodeOrUsedMeta)?;
	}
	for addr in &data_addrs {
		rgindex.set_state(dev, &rg, *addr, BlockState::Data)?;
	}

	Ok(inum)
}

pub(super) fn place_plain_rg(dev: &mut BlockDevice, rgindex: &mut RgIndex, rg_addr: u64, span: u64) -> Result<Rgrp> {
	let block_size = dev.block_size();
	// rg_length depends on data, and data depends on rg_length; a couple
	// of fixed-point iterations converge since bitmap block counts grow
	// far slower than data block counts.
	let mut data = span.saturating_sub(2);
	for _ in 0..4 {
		let rg_length = plan::rg_length_for_data(block_size, data) as u64;
		let new_data = span.saturating_sub(rg_length);
		if new_data == data {
			break;
		}
		data = new_data;
	}
	let rg_length = plan::rg_length_for_data(block_size, data);
	if rg_length < crate::rgindex::MIN_RG_LENGTH {
		return Err(Gfs2Error::constraint("resource group too small"));
	}
	let data0 = rg_addr + rg_length as u64;
	let rg = Rgrp {
		addr: rg_addr,
		length: rg_length,
		data0,
		data: data as u32,
		bitbytes: (data as u32).div_ceil(crate::codec::rgrp::BLOCKS_PER_BYTE),
	};
	write_rg_header_and_bitmaps(dev, &rg)?;
	dev.zero_fill(data0, data)?;
	rgindex.insert(rg);
	Ok(rg)
}

fn write_rg_header_and_bitmaps(dev: &mut BlockDevice, rg: &Rgrp) -> Result<()> {
	let block_size = dev.block_size() as usize;
	let mut header_block = vec![0u8; block_size];
	RgHeader {
		flags: 0,
		free: rg.data,
		dinodes: 0,
		rg_format: 0,
		skip: 0,
		igeneration_hi: 0,
		igeneration_lo: 0,
	}
	.encode(&mut header_block)?;
	let mut buf = dev.acquire(rg.addr)?;
	buf.data = header_block;
	buf.mark_dirty();
	dev.release(buf)?;

	for i in 0..rg.bitmap_block_count() {
		let mut bitmap_block = vec![0u8; block_size];
		encode_bitmap_block_header(&mut bitmap_block)?;
		let mut buf = dev.acquire(rg.addr + 1 + i as u64)?;
		buf.data = bitmap_block;
		buf.mark_dirty();
		dev.release(buf)?;
	}
	Ok(())
}

/// Largest number of data blocks this planner's two-level indirect tree
/// budget can address for the given block size and generation. Used both
/// by [`plan_tree_shape`] and, ahead of any device write, by
/// `create_filesystem`'s up-front journal-size check.
pub(super) fn max_two_level_capacity(block_size: u32, header_size: usize) -> u64 {
	let root_fanout = ((block_size as usize - Dinode::ENCODED_SIZE) / indirect::POINTER_SIZE) as u64;
	let indirect_fanout = indirect::fanout(block_size as usize, header_size) as u64;
	root_fanout.saturating_mul(indirect_fanout)
}

/// Height and indirect-block count needed to address `data_blocks` data
/// blocks, given a two-level indirect tree budget. Larger requests are
/// out of scope for this planner (see `DESIGN.md`).
fn plan_tree_shape(block_size: u32, header_size: usize, data_blocks: u64) -> Result<(u32, u64)> {
	let root_fanout = ((block_size as usize - Dinode::ENCODED_SIZE) / indirect::POINTER_SIZE) as u64;
	if data_blocks <= root_fanout {
		return Ok((1, 0));
	}
	let indirect_fanout = indirect::fanout(block_size as usize, header_size) as u64;
	let capacity = max_two_level_capacity(block_size, header_size);
	if data_blocks <= capacity {
		let indirect_blocks = data_blocks.div_ceil(indirect_fanout);
		return Ok((2, indirect_blocks));
	}
	Err(Gfs2Error::Exhausted(
		"file too large for this planner's two-level indirect tree budget".to_string(),
	))
}

/// Writes indirect blocks (if any) and returns the pointer array to embed
/// at the dinode's root level.
fn build_data_tree(
	dev: &mut BlockDevice,
	height: u32,
	indirect_addrs: &[u64],
	data_addrs: &[u64],
	header_size: usize,
) -> Result<Vec<u64>> {
	if height == 1 {
		return Ok(data_addrs.to_vec());
	}
	let block_size = dev.block_size() as usize;
	let indirect_fanout = indirect::fanout(block_size, header_size);
	for (i, &ind_addr) in indirect_addrs.iter().enumerate() {
		let chunk_start = i * indirect_fanout;
		let chunk_end = (chunk_start + indirect_fanout).min(data_addrs.len());
		let chunk = &data_addrs[chunk_start..chunk_end];
		let mut block = vec![0u8; block_size];
		indirect::encode_pointers(&mut block, header_size, chunk)?;
		let mut buf = dev.acquire(ind_addr)?;
		buf.data = block;
		buf.mark_dirty();
		dev.release(buf)?;
	}
	Ok(indirect_addrs.to_vec())
}

/// Writes a dinode plus its root-level pointer array into one block.
fn write_dinode_with_root_pointers(dev: &mut BlockDevice, dinode: &Dinode, pointers: &[u64]) -> Result<()> {
	let block_size = dev.block_size() as usize;
	let mut block = vec![0u8; block_size];
	dinode.encode(&mut block)?;
	indirect::write_pointers_at(&mut block, Dinode::ENCODED_SIZE, pointers)?;
	let mut buf = dev.acquire(dinode.inum.addr)?;
	buf.data = block;
	buf.mark_dirty();
	dev.release(buf)
}

fn write_stuffed_file_dinode(dev: &mut BlockDevice, addr: u64, mode: u32, system: bool, payload: &[u8]) -> Result<()> {
	let block_size = dev.block_size() as usize;
	let mut block = vec![0u8; block_size];
	let flags = if system { DinodeFlags::SYSTEM } else { DinodeFlags::empty() };
	let dinode = Dinode {
		inum: InodeNumber { formal_ino: addr, addr },
		mode,
		uid: 0,
		gid: 0,
		nlink: 1,
		size: payload.len() as u64,
		blocks: 1,
		atime: 0,
		mtime: 0,
		ctime: 0,
		major: 0,
		minor: 0,
		goal_meta: addr,
		goal_data: addr,
		flags,
		payload_format: 0,
		height: 0,
		depth: 0,
		entries: 0,
		eattr: 0,
	};
	dinode.encode(&mut block)?;
	let payload_region = &mut block[Dinode::ENCODED_SIZE..];
	if payload.len() > payload_region.len() {
		return Err(Gfs2Error::constraint("stuffed payload too large for one block"));
	}
	payload_region[..payload.len()].copy_from_slice(payload);
	let mut buf = dev.acquire(addr)?;
	buf.data = block;
	buf.mark_dirty();
	dev.release(buf)
}

/// Writes a non-`EXHASH` directory: dinode header followed inline by its
/// directory entries, one linear leaf list occupying the dinode's own
/// block.
fn write_linear_dir_dinode(dev: &mut BlockDevice, addr: u64, children: &[(InodeNumber, String)]) -> Result<()> {
	let block_size = dev.block_size() as usize;
	let mut block = vec![0u8; block_size];
	let dinode = Dinode {
		inum: InodeNumber { formal_ino: addr, addr },
		mode: S_IFDIR | 0o755,
		uid: 0,
		gid: 0,
		nlink: 2,
		size: block_size as u64,
		blocks: 1,
		atime: 0,
		mtime: 0,
		ctime: 0,
		major: 0,
		minor: 0,
		goal_meta: addr,
		goal_data: addr,
		flags: DinodeFlags::SYSTEM,
		payload_format: 0,
		height: 0,
		depth: 0,
		entries: children.len() as u32,
		eattr: 0,
	};
	dinode.encode(&mut block)?;

	let mut offset = Dinode::ENCODED_SIZE;
	for (inum, name) in children {
		let rec_len = DIRENT_HEADER_SIZE + name.len();
		if offset + rec_len > block.len() {
			return Err(Gfs2Error::constraint("too many directory entries for one linear block"));
		}
		write_dirent(&mut block[offset..offset + rec_len], *inum, name, DirEntryType::Directory);
		offset += rec_len;
	}
	let mut buf = dev.acquire(addr)?;
	buf.data = block;
	buf.mark_dirty();
	dev.release(buf)
}

fn write_dirent(out: &mut [u8], inum: InodeNumber, name: &str, entry_type: DirEntryType) {
	use byteorder::{BigEndian, WriteBytesExt};
	use std::io::Cursor;
	let mut c = Cursor::new(&mut out[..]);
	let _ = c.write_u64::<BigEndian>(inum.formal_ino);
	let _ = c.write_u64::<BigEndian>(inum.addr);
	let _ = c.write_u32::<BigEndian>(0); // hash: unused for linear directories
	let _ = c.write_u16::<BigEndian>(out.len() as u16);
	let _ = c.write_u16::<BigEndian>(name.len() as u16);
	let type_code = match entry_type {
		DirEntryType::Regular => 1,
		DirEntryType::Directory => 2,
		DirEntryType::Symlink => 7,
		DirEntryType::Other(code) => code,
	};
	let _ = c.write_u8(type_code);
	let _ = c.write_u8(0);
	let _ = c.write_u16::<BigEndian>(0);
	out[DIRENT_HEADER_SIZE..].copy_from_slice(name.as_bytes());
}

/// Writes `bytes` as a file's content, either stuffed (fits in one
/// block) or through a height-1 indirect tree allocated via `alloc`.
fn write_stuffed_or_tree_file(
	dev: &mut BlockDevice,
	alloc: &mut Allocator,
	rgindex: &RgIndex,
	addr: u64,
	bytes: &[u8],
	system: bool,
	header_size: usize,
) -> Result<()> {
	let block_size = dev.block_size() as usize;
	if bytes.len() <= block_size - Dinode::ENCODED_SIZE {
		return write_stuffed_file_dinode(dev, addr, S_IFREG | 0o600, system, bytes);
	}

	let data_blocks = (bytes.len() as u64).div_ceil(block_size as u64);
	let (height, indirect_blocks) = plan_tree_shape(block_size as u32, header_size, data_blocks)?;
	let mut indirect_addrs = Vec::with_capacity(indirect_blocks as usize);
	for _ in 0..indirect_blocks {
		indirect_addrs.push(alloc.alloc(dev, rgindex)?);
	}
	let mut data_addrs = Vec::with_capacity(data_blocks as usize);
	for _ in 0..data_blocks {
		data_addrs.push(alloc.alloc(dev, rgindex)?);
	}
	for (i, &data_addr) in data_addrs.iter().enumerate() {
		let start = i * block_size;
		let end = ((i + 1) * block_size).min(bytes.len());
		let mut block = vec![0u8; block_size];
		block[..end - start].copy_from_slice(&bytes[start..end]);
		let mut buf = dev.acquire(data_addr)?;
		buf.data = block;
		buf.mark_dirty();
		dev.release(buf)?;
	}
	let root_pointers = build_data_tree(dev, height, &indirect_addrs, &data_addrs, header_size)?;

	let dinode = Dinode {
		inum: InodeNumber { formal_ino: addr, addr },
		mode: S_IFREG | 0o600,
		uid: 0,
		gid: 0,
		nlink: 1,
		size: bytes.len() as u64,
		blocks: 1 + indirect_blocks + data_blocks,
		atime: 0,
		mtime: 0,
		ctime: 0,
		major: 0,
		minor: 0,
		goal_meta: addr,
		goal_data: data_addrs.first().copied().unwrap_or(addr),
		flags: if system { DinodeFlags::SYSTEM } else { DinodeFlags::empty() },
		payload_format: 0,
		height,
		depth: 0,
		entries: 0,
		eattr: 0,
	};
	write_dinode_with_root_pointers(dev, &dinode, &root_pointers)
}

/// Bump allocator over one RG's free data cells, used to place the
/// master directory's small system files. Marks each cell used as it
/// hands it out.
struct Allocator {
	rg: Rgrp,
	cursor: u64,
}

impl Allocator {
	fn new(rg: Rgrp) -> Self {
		Self { rg, cursor: 0 }
	}

	fn alloc(&mut self, dev: &mut BlockDevice, rgindex: &RgIndex) -> Result<u64> {
		if self.cursor >= self.rg.data as u64 {
			return Err(Gfs2Error::Exhausted("system RG ran out of free blocks".to_string()));
		}
		let addr = self.rg.data0 + self.cursor;
		self.cursor += 1;
		rgindex.set_state(dev, &self.rg, addr, BlockState::DinodeOrUsedMeta)?;
		Ok(addr)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::io::Write as _;

	fn backing_file(size_bytes: u64) -> File {
		let mut tmp = tempfile::tempfile().unwrap();
		tmp.write_all(&vec![0u8; size_bytes as usize]).unwrap();
		tmp
	}

	#[test]
	fn creates_filesystem_on_small_device() {
		let file = backing_file(64 * super::super::constants::MEBIBYTE);
		let options = LayoutOptions {
			block_size: Some(4096),
			journal_count: 1,
			journal_size_mb: Some(8),
			rg_size_mb: Some(32),
			..LayoutOptions::default()
		};
		let summary = create_filesystem(file, Topology::default(), &options).unwrap();
		assert_eq!(summary.block_size, 4096);
		assert_eq!(summary.journal_inodes.len(), 1);
		assert!(summary.rg_count >= 2); // at least the journal RG and one general RG
	}

	#[test]
	fn rejects_invalid_options_before_touching_device() {
		let file = backing_file(16 * super::super::constants::MEBIBYTE);
		let options = LayoutOptions {
			journal_count: 0,
			..LayoutOptions::default()
		};
		assert!(create_filesystem(file, Topology::default(), &options).is_err());
	}

	#[test]
	fn rejects_a_journal_size_validate_accepts_but_the_tree_budget_cannot_build() {
		// `LGFS2_MAX_JSIZE_MB` (1 TiB) passes `LayoutOptions::validate()`,
		// but at a 4096-byte block size the two-level indirect tree this
		// planner builds tops out well under 1 GiB of journal data. This
		// must surface as a `Constraint` error before any RG or journal
		// block is written, not as an `Exhausted` error deep inside
		// `place_journal` after padding has already been zeroed.
		let file = backing_file(16 * super::super::constants::MEBIBYTE);
		let mut before = vec![0u8; 16 * super::super::constants::MEBIBYTE as usize];
		{
			use std::io::{Read, Seek, SeekFrom};
			let mut f = file.try_clone().unwrap();
			f.seek(SeekFrom::Start(0)).unwrap();
			f.read_exact(&mut before).unwrap();
		}

		let options = LayoutOptions {
			block_size: Some(4096),
			journal_count: 1,
			journal_size_mb: Some(super::super::constants::LGFS2_MAX_JSIZE_MB),
			rg_size_mb: Some(32),
			..LayoutOptions::default()
		};
		let err = create_filesystem(file.try_clone().unwrap(), Topology::default(), &options).unwrap_err();
		assert!(matches!(err, Gfs2Error::Constraint(_)));

		let mut after = vec![0u8; before.len()];
		{
			use std::io::{Read, Seek, SeekFrom};
			let mut f = file;
			f.seek(SeekFrom::Start(0)).unwrap();
			f.read_exact(&mut after).unwrap();
		}
		assert_eq!(before, after, "rejected journal size must not touch the device");
	}

	#[test]
	fn max_two_level_capacity_matches_plan_tree_shape_ceiling() {
		let header_size = Generation::Current.indirect_header_size();
		let capacity = max_two_level_capacity(4096, header_size);
		assert!(plan_tree_shape(4096, header_size, capacity).is_ok());
		assert!(plan_tree_shape(4096, header_size, capacity + 1).is_err());
	}
}
