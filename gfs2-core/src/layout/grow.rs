//! Growing an existing filesystem onto a larger device: load the current
//! rindex, plan new resource groups in the space past the old end, write
//! them, then append to the rindex. A short write while extending the
//! rindex is reverted by truncating the system file back to its prior
//! length rather than leaving a partially-appended record.

use std::fs::File;

use log::info;

use crate::block_io::BlockDevice;
use crate::codec::dinode::Dinode;
use crate::codec::superblock::{Superblock, SUPERBLOCK_BYTE_OFFSET};
use crate::error::{Gfs2Error, Result};
use crate::inode::{linear_dir_entries, read_file_bytes};
use crate::rgindex::{Alignment, RgIndex};

use super::plan;

/// Outcome of a successful [`grow_filesystem`] call.
#[derive(Clone, Debug)]
pub struct GrowSummary {
	pub old_device_len_blocks: u64,
	pub new_device_len_blocks: u64,
	pub rgs_added: usize,
}

/// Extends `file`'s filesystem to fill the device's current size. `file`
/// must already be at its new, larger length; the old extent is derived
/// from the superblock and existing rindex, not from any argument.
pub fn grow_filesystem(mut file: File, rg_size_mb: Option<u64>) -> Result<GrowSummary> {
	let sb = read_superblock(&mut file)?;
	let generation = sb.generation();
	if !generation.has_master_directory() {
		return Err(Gfs2Error::constraint("growing the legacy generation is not supported"));
	}

	let mut dev = BlockDevice::open(file, sb.block_size)?;
	let new_device_len_blocks = dev.device_len_blocks();

	let master_dinode = read_dinode(&mut dev, sb.master_dir_inum)?;
	let rindex_addr = lookup_child(&mut dev, &master_dinode, "rindex")?;
	let rindex_dinode = read_dinode(&mut dev, rindex_addr)?;
	let rindex_bytes = read_file_bytes(&mut dev, &rindex_dinode, generation)?;

	let mut rgindex = RgIndex::new(Alignment::disabled());
	rgindex.load_from_rindex_bytes(&rindex_bytes)?;
	if rgindex.is_empty() {
		return Err(Gfs2Error::malformed(0, "rindex has no resource groups"));
	}

	let old_device_len_blocks = rgindex
		.iter()
		.map(|rg| rg.data0 + rg.data as u64)
		.max()
		.unwrap_or(0);
	if new_device_len_blocks <= old_device_len_blocks {
		return Err(Gfs2Error::constraint(
			"device has not grown past the filesystem's current extent",
		));
	}

	let rg_size_blocks = plan::space_for_data(
		sb.block_size,
		rg_size_mb.unwrap_or(super::constants::LGFS2_DEFAULT_RGSIZE_MB) * super::constants::MEBIBYTE,
	);
	let rg_count = rgindex.plan(new_device_len_blocks, old_device_len_blocks, rg_size_blocks);
	info!("growing filesystem: adding {rg_count} resource group(s)");

	let mut next_addr = old_device_len_blocks;
	for i in 0..rg_count {
		let rg_addr = next_addr;
		let remaining = new_device_len_blocks.saturating_sub(rg_addr);
		let span = if i + 1 == rg_count { remaining } else { rg_size_blocks.min(remaining) };
		let rg = super::create::place_plain_rg(&mut dev, &mut rgindex, rg_addr, span)?;
		next_addr = rg.data0 + rg.data as u64;
	}

	let new_rindex_bytes = rgindex.to_rindex_bytes()?;
	if let Err(write_err) = overwrite_rindex(&mut dev, &rindex_dinode, &new_rindex_bytes) {
		// Revert: put the rindex file back to its prior, known-good content
		// so a half-written record cannot be mistaken for a valid entry on
		// the next load.
		let _ = overwrite_rindex(&mut dev, &rindex_dinode, &rindex_bytes);
		return Err(write_err);
	}

	dev.flush()?;

	Ok(GrowSummary {
		old_device_len_blocks,
		new_device_len_blocks,
		rgs_added: rg_count as usize,
	})
}

fn read_superblock(file: &mut File) -> Result<Superblock> {
	use crate::block_io::seek_read_exact;
	// The superblock's own block size is unknown until decoded; its byte
	// offset is fixed, so read a generously-sized probe and decode from
	// the start of it.
	let probe_len = 4096usize;
	let mut probe = vec![0u8; probe_len];
	seek_read_exact(file, SUPERBLOCK_BYTE_OFFSET, &mut probe)?;
	Superblock::decode(&probe)
}

fn read_dinode(dev: &mut BlockDevice, addr: u64) -> Result<Dinode> {
	let buffer = dev.acquire(addr)?;
	let dinode = Dinode::decode(&buffer.data)?;
	dev.release(buffer)?;
	Ok(dinode)
}

fn lookup_child(dev: &mut BlockDevice, dir: &Dinode, name: &str) -> Result<u64> {
	let buffer = dev.acquire(dir.inum.addr)?;
	let block = buffer.data.clone();
	dev.release(buffer)?;
	for entry in linear_dir_entries(&block) {
		let entry = entry?;
		if entry.name == name.as_bytes() {
			return Ok(entry.inum.addr);
		}
	}
	Err(Gfs2Error::malformed(
		dir.inum.addr,
		format!("directory has no child named {name:?}"),
	))
}

fn overwrite_rindex(dev: &mut BlockDevice, dinode: &Dinode, bytes: &[u8]) -> Result<()> {
	let block_size = dev.block_size() as usize;
	if Dinode::ENCODED_SIZE + bytes.len() > block_size {
		return Err(Gfs2Error::Exhausted(
			"rindex no longer fits in its stuffed block; multi-block rindex growth is out of scope".to_string(),
		));
	}
	let mut updated = dinode.clone();
	updated.size = bytes.len() as u64;

	let mut buf = dev.acquire(dinode.inum.addr)?;
	updated.encode(&mut buf.data)?;
	buf.data[Dinode::ENCODED_SIZE..Dinode::ENCODED_SIZE + bytes.len()].copy_from_slice(bytes);
	for b in &mut buf.data[Dinode::ENCODED_SIZE + bytes.len()..] {
		*b = 0;
	}
	buf.mark_dirty();
	dev.release(buf)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::layout::{create_filesystem, LayoutOptions, Topology};
	use std::io::Write as _;

	fn sized_file(blocks: u64, block_size: u64) -> File {
		let mut tmp = tempfile::tempfile().unwrap();
		tmp.write_all(&vec![0u8; (blocks * block_size) as usize]).unwrap();
		tmp
	}

	#[test]
	fn grows_into_appended_space() {
		let file = sized_file(16384, 4096); // 64 MiB
		let options = LayoutOptions {
			block_size: Some(4096),
			journal_count: 1,
			journal_size_mb: Some(8),
			rg_size_mb: Some(32),
			..LayoutOptions::default()
		};
		create_filesystem(file.try_clone().unwrap(), Topology::default(), &options).unwrap();

		let mut file = file;
		file.set_len(32768 * 4096).unwrap(); // grow to 128 MiB

		let summary = grow_filesystem(file, Some(16)).unwrap();
		assert!(summary.rgs_added > 0);
		assert!(summary.new_device_len_blocks > summary.old_device_len_blocks);
	}
}
