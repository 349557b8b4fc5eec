//! Block-size selection, alignment parameter computation, and RG sizing
//! helpers used by [`super::create`] and [`super::grow`].

use crate::codec::rgrp::{bitmap_bit_offset, cells_per_bitmap_block};
use crate::error::{Gfs2Error, Result};
use crate::rgindex::Alignment;

use super::constants::MIN_BLOCK_SIZE;

/// What's known about the underlying device's preferred I/O granularity.
/// All fields are optional because not every block device exposes them.
#[derive(Clone, Copy, Debug, Default)]
pub struct Topology {
	pub logical_sector_size: u32,
	pub physical_sector_size: u32,
	pub optimal_io_size: Option<u32>,
	pub minimum_io_size: Option<u32>,
}

fn is_power_of_two(n: u32) -> bool {
	n != 0 && (n & (n - 1)) == 0
}

/// Picks the filesystem block size. Forced values are validated but not
/// second-guessed; otherwise prefers the device's optimal I/O size, then
/// physical sector size, then `default_bsize`, each accepted only if a
/// power of two within `[default_bsize, page_size]`.
pub fn choose_block_size(
	forced: Option<u32>,
	topology: &Topology,
	default_bsize: u32,
	page_size: u32,
) -> Result<u32> {
	let candidate = if let Some(b) = forced {
		b
	} else if topology
		.optimal_io_size
		.is_some_and(|b| is_power_of_two(b) && b >= default_bsize && b <= page_size)
	{
		topology.optimal_io_size.unwrap()
	} else if is_power_of_two(topology.physical_sector_size)
		&& topology.physical_sector_size >= default_bsize
		&& topology.physical_sector_size <= page_size
	{
		topology.physical_sector_size
	} else {
		default_bsize
	};

	if !is_power_of_two(candidate) {
		return Err(Gfs2Error::constraint("block size must be a power of two"));
	}
	if candidate < MIN_BLOCK_SIZE {
		return Err(Gfs2Error::constraint("block size below minimum"));
	}
	if topology.logical_sector_size != 0 && candidate < topology.logical_sector_size {
		return Err(Gfs2Error::constraint(
			"block size smaller than the device's logical sector size",
		));
	}
	Ok(candidate)
}

/// Derives stripe-aligned RG placement parameters. Explicit stripe
/// unit/width take priority over topology-reported I/O sizes; if neither
/// yields a usable pair, alignment is disabled.
pub fn choose_alignment(
	stripe_unit: Option<u64>,
	stripe_width: Option<u64>,
	block_size: u32,
	topology: &Topology,
) -> Alignment {
	let bs = block_size as u64;

	if let (Some(unit), Some(width)) = (stripe_unit, stripe_width) {
		if unit > 0 && width % unit == 0 && width % bs == 0 && unit % bs == 0 {
			return Alignment {
				stride_base: width / bs,
				stride_offset: 0,
				enabled: true,
			};
		}
	}

	if let (Some(opt), Some(min)) = (topology.optimal_io_size, topology.minimum_io_size) {
		let opt = opt as u64;
		let min = min as u64;
		if opt > 0 && min > 0 && opt % min == 0 && opt % bs == 0 {
			return Alignment {
				stride_base: opt / bs,
				stride_offset: 0,
				enabled: true,
			};
		}
	}

	Alignment::disabled()
}

/// Converts a byte count into the number of data blocks needed to hold
/// it, rounding up.
pub fn space_for_data(block_size: u32, bytes: u64) -> u64 {
	let bs = block_size as u64;
	(bytes + bs - 1) / bs
}

/// Number of bitmap blocks needed to describe `data_blocks` data blocks,
/// given the MSB-first, 2-bit-per-block packing and the extra header
/// bytes reserved in the RG's first bitmap block.
pub fn bitmap_blocks_for(block_size: u32, data_blocks: u64) -> u32 {
	let mut remaining = data_blocks;
	let mut bitmap_blocks = 0u32;
	loop {
		let is_first = bitmap_blocks == 0;
		let offset = bitmap_bit_offset(is_first);
		let cells = cells_per_bitmap_block(block_size as usize, offset) as u64;
		if cells == 0 {
			// Degenerate block size; avoid looping forever.
			break;
		}
		bitmap_blocks += 1;
		if remaining <= cells {
			break;
		}
		remaining -= cells;
	}
	bitmap_blocks
}

/// Header + bitmap block count (`rg_length`) of an RG sized to hold
/// exactly `data_blocks` data blocks.
pub fn rg_length_for_data(block_size: u32, data_blocks: u64) -> u32 {
	1 + bitmap_blocks_for(block_size, data_blocks)
}

/// Total size in blocks (header + bitmaps + data) of an RG sized to hold
/// exactly `data_blocks` data blocks.
pub fn rgsize_for_data(block_size: u32, data_blocks: u64) -> u64 {
	rg_length_for_data(block_size, data_blocks) as u64 + data_blocks
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn choose_block_size_prefers_optimal_io_size() {
		let topo = Topology {
			logical_sector_size: 512,
			physical_sector_size: 512,
			optimal_io_size: Some(4096),
			minimum_io_size: Some(512),
		};
		let bs = choose_block_size(None, &topo, 512, 65536).unwrap();
		assert_eq!(bs, 4096);
	}

	#[test]
	fn choose_block_size_forced_is_used_verbatim() {
		let topo = Topology::default();
		let bs = choose_block_size(Some(2048), &topo, 512, 65536).unwrap();
		assert_eq!(bs, 2048);
	}

	#[test]
	fn choose_block_size_rejects_sub_sector_size() {
		let topo = Topology {
			logical_sector_size: 4096,
			..Topology::default()
		};
		assert!(choose_block_size(Some(512), &topo, 512, 65536).is_err());
	}

	#[test]
	fn alignment_prefers_explicit_stripe_params() {
		let topo = Topology {
			optimal_io_size: Some(8192),
			minimum_io_size: Some(4096),
			..Topology::default()
		};
		let a = choose_alignment(Some(4096), Some(16384), 4096, &topo);
		assert!(a.enabled);
		assert_eq!(a.stride_base, 4); // 16384 / 4096
	}

	#[test]
	fn alignment_falls_back_to_topology() {
		let topo = Topology {
			optimal_io_size: Some(16384),
			minimum_io_size: Some(4096),
			..Topology::default()
		};
		let a = choose_alignment(None, None, 4096, &topo);
		assert!(a.enabled);
		assert_eq!(a.stride_base, 4);
	}

	#[test]
	fn alignment_disabled_when_nothing_usable() {
		let topo = Topology::default();
		let a = choose_alignment(None, None, 4096, &topo);
		assert!(!a.enabled);
	}

	#[test]
	fn rgsize_for_data_accounts_for_bitmap_overhead() {
		// With a 512-byte block size the first bitmap block reserves less
		// room for cells than later ones; just assert monotonic growth and
		// that the header block is counted.
		let small = rgsize_for_data(512, 10);
		let large = rgsize_for_data(512, 10_000);
		assert!(small < large);
		assert!(small > 10); // header + bitmap + data all present
	}
}
