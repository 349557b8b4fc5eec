//! Streams a self-describing, optionally compressed archive of every live
//! metadata block reachable from the filesystem: the file header,
//! then a flat sequence of `{addr, siglen, payload}` block records, driven
//! by walking the RG bitmaps and the inode tree walker.

use std::io::Write;
use std::time::Instant;

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info};

use crate::codec::dinode::Dinode;
use crate::codec::header::{classify, BlockType};
use crate::codec::rgrp::BlockState;
use crate::error::{Gfs2Error, Result};
use crate::inode::{walk, Role, WalkEvent};
use crate::progress::{Progress, ProgressSink, Throttle};
use crate::session::Session;

/// `sh_magic` of the 128-byte savemeta file header.
pub const SAVEMETA_MAGIC: u32 = 0x0117_1970;
/// `sh_format`: the only format version this crate understands.
pub const SAVEMETA_FORMAT: u32 = 1;
/// Encoded size of the file header, including its 104 reserved bytes.
pub const FILE_HEADER_SIZE: usize = 4 + 4 + 8 + 8 + 104;

/// `save_metadata`'s mode parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveMode {
	/// Save every reachable metadata block, per the selection policy.
	Full,
	/// Save only RG headers and bitmap blocks; no dinode tree walk.
	RgsOnly,
	/// Functionally identical to `Full`; reads one block at a time instead
	/// of coalescing adjacent blocks into a single positioned read. Kept
	/// as a distinct mode because the reference tool exposes it as a
	/// troubleshooting fallback for devices where large reads are
	/// unreliable — this crate's `BlockDevice` always reads one block at a
	/// time, so the two modes produce byte-identical archives here.
	Slow,
}

/// Options accepted by [`save_metadata`].
#[derive(Clone, Copy, Debug)]
pub struct SaveOptions {
	pub mode: SaveMode,
	/// gzip level 0-9; 0 means the stream is written uncompressed.
	pub compression_level: u32,
}

impl Default for SaveOptions {
	fn default() -> Self {
		Self {
			mode: SaveMode::Full,
			compression_level: 0,
		}
	}
}

/// Outcome of a successful [`save_metadata`] call.
#[derive(Clone, Copy, Debug, Default)]
pub struct SaveSummary {
	pub blocks_saved: u64,
}

/// The 128-byte file header every savemeta archive begins with, before the
/// archive's compression (if any) is applied by the caller's writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHeader {
	pub format_version: u32,
	pub save_time: u64,
	pub fs_bytes: u64,
}

impl FileHeader {
	pub fn encode(&self) -> [u8; FILE_HEADER_SIZE] {
		let mut out = [0u8; FILE_HEADER_SIZE];
		out[0..4].copy_from_slice(&SAVEMETA_MAGIC.to_be_bytes());
		out[4..8].copy_from_slice(&self.format_version.to_be_bytes());
		out[8..16].copy_from_slice(&self.save_time.to_be_bytes());
		out[16..24].copy_from_slice(&self.fs_bytes.to_be_bytes());
		out
	}

	pub fn decode(bytes: &[u8]) -> Result<Self> {
		if bytes.len() < FILE_HEADER_SIZE {
			return Err(Gfs2Error::malformed(0, "archive too short for file header"));
		}
		let magic = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
		if magic != SAVEMETA_MAGIC {
			return Err(Gfs2Error::malformed(0, "archive magic mismatch"));
		}
		let format_version = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
		if format_version > SAVEMETA_FORMAT {
			return Err(Gfs2Error::VersionMismatch {
				found: format_version,
				supported: SAVEMETA_FORMAT,
			});
		}
		let save_time = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
		let fs_bytes = u64::from_be_bytes(bytes[16..24].try_into().unwrap());
		Ok(Self {
			format_version,
			save_time,
			fs_bytes,
		})
	}
}

/// Encodes one block record: `{addr: u64 BE, siglen: u16 BE, payload}`.
/// `siglen` is the number of significant trailing-zero-stripped bytes of
/// `block`.
pub fn encode_block_record(addr: u64, block: &[u8]) -> Vec<u8> {
	let siglen = significant_len(block);
	let mut out = Vec::with_capacity(8 + 2 + siglen);
	out.extend_from_slice(&addr.to_be_bytes());
	out.extend_from_slice(&(siglen as u16).to_be_bytes());
	out.extend_from_slice(&block[..siglen]);
	out
}

/// Trailing zero bytes may be stripped when the archive is not
/// compressed; returns the length of `block` with trailing zeros removed
/// (at least 1, since a record for an all-zero block still needs a byte).
fn significant_len(block: &[u8]) -> usize {
	let trimmed = block.iter().rposition(|&b| b != 0).map(|i| i + 1).unwrap_or(0);
	trimmed.max(1).min(block.len())
}

/// Streams a savemeta archive for the filesystem `session` has open, to
/// `out`. If `options.compression_level` is nonzero, `out` is wrapped in a
/// gzip encoder and the file header itself is part of the compressed
/// stream, matching the reference tool's `gzdopen`-around-everything
/// behavior.
pub fn save_metadata<W: Write>(
	session: &mut Session,
	out: W,
	options: &SaveOptions,
	save_time: u64,
	mut progress: Option<&mut dyn ProgressSink>,
) -> Result<SaveSummary> {
	if options.compression_level > 0 {
		let encoder = GzEncoder::new(out, Compression::new(options.compression_level));
		save_metadata_inner(session, encoder, options, save_time, &mut progress)
	} else {
		save_metadata_inner(session, out, options, save_time, &mut progress)
	}
}

fn save_metadata_inner<W: Write>(
	session: &mut Session,
	mut out: W,
	options: &SaveOptions,
	save_time: u64,
	progress: &mut Option<&mut dyn ProgressSink>,
) -> Result<SaveSummary> {
	let block_size = session.device.block_size();
	let fs_size_blocks = session.device.device_len_blocks();

	let header = FileHeader {
		format_version: SAVEMETA_FORMAT,
		save_time,
		fs_bytes: fs_size_blocks * block_size as u64,
	};
	out.write_all(&header.encode()).map_err(Gfs2Error::Io)?;

	let mut seen = std::collections::HashSet::new();
	let mut blocks_saved = 0u64;
	let mut throttle = Throttle::default();

	// Superblock.
	let sb_addr = crate::codec::superblock::SUPERBLOCK_BYTE_OFFSET / block_size as u64;
	write_record(&mut out, &mut session.device, sb_addr, &mut seen, &mut blocks_saved)?;

	let rgs: Vec<_> = session.rgindex.iter().copied().collect();
	info!("saving metadata for {} resource group(s)", rgs.len());

	// Derived from master-directory traversal, not the on-disk `SYSTEM`
	// flag: the save policy must not depend on a bit that only happens to
	// have been set correctly by whatever wrote the filesystem.
	let system_addrs = session.system_inode_addrs()?;

	for rg in &rgs {
		write_record(&mut out, &mut session.device, rg.addr, &mut seen, &mut blocks_saved)?;
		for i in 0..rg.bitmap_block_count() {
			write_record(&mut out, &mut session.device, rg.addr + 1 + i as u64, &mut seen, &mut blocks_saved)?;
		}

		if options.mode == SaveMode::RgsOnly {
			continue;
		}

		let dinode_addrs = collect_dinode_addrs(session, rg)?;
		for addr in dinode_addrs {
			save_dinode_tree(session, &mut out, addr, false, &system_addrs, &mut seen, &mut blocks_saved)?;

			if let Some(sink) = progress.as_deref_mut() {
				if throttle.ready(Instant::now()) {
					sink.report(Progress {
						done: blocks_saved,
						total: fs_size_blocks,
					});
				}
			}
		}
	}

	// The legacy generation keeps journals outside the RG address space,
	// so the per-RG bitmap scan above never finds them; they're
	// enumerated via the journal index and emitted in full instead.
	if !session.generation.journals_in_rg_space() && options.mode != SaveMode::RgsOnly {
		let journals = session.journal_dinodes()?;
		info!("emitting {} legacy journal(s) outside RG space", journals.len());
		for journal in journals {
			save_dinode_tree(session, &mut out, journal.inum.addr, true, &system_addrs, &mut seen, &mut blocks_saved)?;
		}
	}

	if let Some(sink) = progress.as_deref_mut() {
		sink.report(Progress {
			done: fs_size_blocks,
			total: fs_size_blocks,
		});
	}

	Ok(SaveSummary { blocks_saved })
}

fn collect_dinode_addrs(session: &mut Session, rg: &crate::rgindex::Rgrp) -> Result<Vec<u64>> {
	let mut addrs = Vec::new();
	for i in 0..rg.bitmap_block_count() {
		let scan = session.rgindex.scan(&mut session.device, rg, i)?;
		addrs.extend(scan.matching(BlockState::DinodeOrUsedMeta)?);
	}
	Ok(addrs)
}

/// Saves one dinode and the blocks reachable from it, per the selection
/// policy: system files and directories keep everything the walker
/// yields; non-system regular files keep indirect blocks but drop `Data`
/// blocks (equivalent to the walk proceeding with `height - 1`). EA blocks
/// are always kept. "System" here means reachable from the master
/// directory (`system_addrs`), or named directly in the legacy
/// superblock, not the dinode's own `SYSTEM` flag. `force_keep_data` is
/// set for the legacy generation's journals, which are emitted verbatim
/// regardless of the selection policy.
fn save_dinode_tree<W: Write>(
	session: &mut Session,
	out: &mut W,
	addr: u64,
	force_keep_data: bool,
	system_addrs: &std::collections::HashSet<u64>,
	seen: &mut std::collections::HashSet<u64>,
	blocks_saved: &mut u64,
) -> Result<()> {
	write_record(out, &mut session.device, addr, seen, blocks_saved)?;

	let buffer = session.device.acquire(addr)?;
	let block = buffer.data.clone();
	session.device.release(buffer)?;
	let dinode = match Dinode::decode(&block) {
		Ok(d) => d,
		Err(e) => {
			debug!("block {addr} classified as dinode by its bitmap cell but failed to decode: {e}");
			return Ok(());
		}
	};

	let events = walk(&mut session.device, &dinode, session.generation)?;
	let keep_data = force_keep_data || dinode.is_dir() || system_addrs.contains(&addr);
	for event in events {
		match event {
			WalkEvent::Block { addr, role: Role::Data } if !keep_data => {
				let _ = addr;
			}
			WalkEvent::Block { addr, .. } => {
				write_record(out, &mut session.device, addr, seen, blocks_saved)?;
			}
			WalkEvent::Malformed { addr, reason } => {
				debug!("skipping malformed subtree at block {addr}: {reason}");
			}
		}
	}
	Ok(())
}

fn write_record<W: Write>(
	out: &mut W,
	dev: &mut crate::block_io::BlockDevice,
	addr: u64,
	seen: &mut std::collections::HashSet<u64>,
	blocks_saved: &mut u64,
) -> Result<()> {
	if !seen.insert(addr) {
		return Ok(());
	}
	let buffer = dev.acquire(addr)?;
	let block = buffer.data.clone();
	dev.release(buffer)?;
	out.write_all(&encode_block_record(addr, &block)).map_err(Gfs2Error::Io)?;
	*blocks_saved += 1;
	Ok(())
}

/// Returns whether `block` classifies as a type the savemeta selection
/// policy treats as "always saved" extended-attribute data, used by
/// callers that need to double-check a raw block before re-emitting it.
pub fn is_always_saved_type(block: &[u8]) -> bool {
	matches!(classify(block), Some(BlockType::EaHeader) | Some(BlockType::EaData))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn file_header_round_trip() {
		let h = FileHeader {
			format_version: 1,
			save_time: 123,
			fs_bytes: 456,
		};
		let bytes = h.encode();
		assert_eq!(bytes.len(), FILE_HEADER_SIZE);
		let h2 = FileHeader::decode(&bytes).unwrap();
		assert_eq!(h, h2);
	}

	#[test]
	fn rejects_bad_magic() {
		let bytes = [0u8; FILE_HEADER_SIZE];
		assert!(FileHeader::decode(&bytes).is_err());
	}

	#[test]
	fn rejects_future_format_version() {
		let h = FileHeader {
			format_version: SAVEMETA_FORMAT + 1,
			save_time: 0,
			fs_bytes: 0,
		};
		let bytes = h.encode();
		match FileHeader::decode(&bytes) {
			Err(Gfs2Error::VersionMismatch { .. }) => {}
			other => panic!("expected VersionMismatch, got {other:?}"),
		}
	}

	#[test]
	fn block_record_strips_trailing_zeros() {
		let mut block = vec![0u8; 512];
		block[10] = 0xFF;
		let record = encode_block_record(7, &block);
		// addr(8) + siglen(2) + 11 significant bytes
		assert_eq!(record.len(), 8 + 2 + 11);
		let siglen = u16::from_be_bytes([record[8], record[9]]);
		assert_eq!(siglen as usize, 11);
	}

	#[test]
	fn all_zero_block_keeps_one_byte() {
		let block = vec![0u8; 512];
		let record = encode_block_record(1, &block);
		assert_eq!(record.len(), 8 + 2 + 1);
	}
}
