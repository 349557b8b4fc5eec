//! Walks one journal's blocks in logical (wrap-corrected) order, classifying
//! log headers, log descriptors and their continuation buffers, and
//! optionally flagging which of those reference a traced target block or
//! its resource group's bitmap block.
//!
//! Kept separate from any printing: [`walk_journal`] returns a plain
//! [`JournalEvent`] sequence; a CLI front-end decides how (or whether) to
//! render it.

use crate::codec::header::{classify, BlockType};
use crate::codec::journal::{DescriptorType, LogDescriptor, LogHeader};
use crate::error::{Gfs2Error, Result};
use crate::inode::{walk, Role, WalkEvent};
use crate::rgindex::RgIndex;
use crate::session::Session;

/// One classified block from a journal walk, in logical order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalEvent {
	Header {
		addr: u64,
		header: LogHeader,
		is_wrap_point: bool,
	},
	Descriptor {
		addr: u64,
		descriptor: LogDescriptor,
		pertinent: bool,
	},
	/// A log-buffer block continuing a preceding descriptor's pointer list.
	Continuation {
		addr: u64,
		pointers: Vec<u64>,
		pertinent: bool,
	},
	JournaledData {
		addr: u64,
	},
	Unrecognized {
		addr: u64,
		block_type: Option<BlockType>,
	},
}

/// A block being traced, resolved to the resource group and bitmap block
/// that record its allocation state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceTarget {
	pub block: u64,
	pub rg_addr: u64,
	pub bitmap_block_addr: u64,
}

impl TraceTarget {
	pub fn resolve(rgindex: &RgIndex, block_size: u32, target: u64) -> Result<Self> {
		let rg = rgindex
			.block_to_rg(target)
			.ok_or_else(|| Gfs2Error::constraint("trace block is not in any resource group's data range"))?;
		let bitmap_block_addr = rgindex.bitmap_addr_for(block_size as usize, rg, target)?;
		Ok(Self {
			block: target,
			rg_addr: rg.addr,
			bitmap_block_addr,
		})
	}

	fn matches(&self, pointers: &[u64]) -> bool {
		pointers.iter().any(|&p| p == self.block || p == self.bitmap_block_addr)
	}
}

/// Outcome of a [`walk_journal`] call.
#[derive(Clone, Debug)]
pub struct JournalWalk {
	/// Index into the journal's logical block order where a sequence
	/// regression was found (0 if the journal has never wrapped).
	pub wrap_point_index: usize,
	pub events: Vec<JournalEvent>,
}

/// Walks journal `ordinal`'s blocks starting at its wrap point (so the
/// sequence runs oldest-to-newest even across a physical wraparound), and
/// classifies every block encountered. If `trace` is given, every
/// [`JournalEvent::Descriptor`] and [`JournalEvent::Continuation`] is
/// flagged with whether it references the traced block or its bitmap
/// block.
pub fn walk_journal(session: &mut Session, ordinal: u32, trace: Option<u64>) -> Result<JournalWalk> {
	let dinode = session.journal_dinode(ordinal)?;
	let block_size = session.device.block_size();

	let events = walk(&mut session.device, &dinode, session.generation)?;
	let addrs: Vec<u64> = events
		.into_iter()
		.filter_map(|e| match e {
			WalkEvent::Block { addr, role: Role::Data } => Some(addr),
			_ => None,
		})
		.collect();
	if addrs.is_empty() {
		return Err(Gfs2Error::constraint("journal has no data blocks to walk"));
	}

	let wrap_point_index = find_wrap_point(&mut session.device, &addrs)?;
	let ordered: Vec<u64> = addrs[wrap_point_index..]
		.iter()
		.chain(addrs[..wrap_point_index].iter())
		.copied()
		.collect();

	let trace_target = trace
		.map(|t| TraceTarget::resolve(&session.rgindex, block_size, t))
		.transpose()?;

	let mut out = Vec::with_capacity(ordered.len());
	let mut pending: Option<PendingDescriptor> = None;

	for (i, addr) in ordered.iter().copied().enumerate() {
		let buffer = session.device.acquire(addr)?;
		let block = buffer.data.clone();
		session.device.release(buffer)?;

		match classify(&block) {
			Some(BlockType::LogHeader) => {
				let header = LogHeader::decode(&block)?;
				out.push(JournalEvent::Header {
					addr,
					header,
					is_wrap_point: i == 0 && wrap_point_index != 0,
				});
				pending = None;
			}
			Some(BlockType::LogDescriptor) => {
				let descriptor = LogDescriptor::decode(&block)?;
				let pertinent = match &trace_target {
					None => true,
					Some(t) => t.matches(&descriptor.pointers),
				};
				pending = if descriptor.pointers.len() < descriptor.block_count as usize {
					Some(PendingDescriptor {
						kind: descriptor.descriptor_type,
						block_count: descriptor.block_count,
						already_read: descriptor.pointers.len(),
					})
				} else {
					None
				};
				out.push(JournalEvent::Descriptor {
					addr,
					descriptor,
					pertinent,
				});
			}
			Some(BlockType::LogBuffer) => {
				if let Some(p) = pending.as_mut() {
					let more = LogDescriptor::continue_pointers(&block, p.already_read, p.block_count);
					p.already_read += more.len();
					let pertinent = match &trace_target {
						None => true,
						Some(t) => t.matches(&more),
					};
					if p.already_read >= p.block_count as usize {
						pending = None;
					}
					out.push(JournalEvent::Continuation { addr, pointers: more, pertinent });
				} else {
					out.push(JournalEvent::Unrecognized {
						addr,
						block_type: Some(BlockType::LogBuffer),
					});
				}
			}
			Some(BlockType::JournaledData) => {
				pending = None;
				out.push(JournalEvent::JournaledData { addr });
			}
			other => {
				pending = None;
				out.push(JournalEvent::Unrecognized { addr, block_type: other });
			}
		}
	}

	Ok(JournalWalk {
		wrap_point_index,
		events: out,
	})
}

struct PendingDescriptor {
	#[allow(dead_code)]
	kind: DescriptorType,
	block_count: u32,
	already_read: usize,
}

/// Scans `addrs` in their given (physical/logical) order for the first log
/// header whose sequence number is lower than the highest seen so far; that
/// index is the point at which the journal wrapped. Returns 0 if the
/// sequence never regresses (the journal has not wrapped, or has not yet
/// been written past its first pass).
fn find_wrap_point(dev: &mut crate::block_io::BlockDevice, addrs: &[u64]) -> Result<usize> {
	let mut highest_seq = 0u64;
	for (i, &addr) in addrs.iter().enumerate() {
		let buffer = dev.acquire(addr)?;
		let block = buffer.data.clone();
		dev.release(buffer)?;
		if classify(&block) != Some(BlockType::LogHeader) {
			continue;
		}
		let header = LogHeader::decode(&block)?;
		if header.sequence < highest_seq {
			return Ok(i);
		}
		highest_seq = header.sequence;
	}
	Ok(0)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::block_io::BlockDevice;
	use crate::codec::dinode::{Dinode, DinodeFlags, InodeNumber, S_IFREG};
	use crate::codec::header::{BlockType, MetaHeader, META_HEADER_SIZE};
	use crate::generation::Generation;
	use byteorder::{BigEndian, WriteBytesExt};
	use std::io::{Cursor, Write as _};

	fn device(block_size: u32, blocks: u64) -> BlockDevice {
		let mut tmp = tempfile::tempfile().unwrap();
		tmp.write_all(&vec![0u8; (block_size as u64 * blocks) as usize]).unwrap();
		BlockDevice::open(tmp, block_size).unwrap()
	}

	fn write_block(dev: &mut BlockDevice, addr: u64, data: Vec<u8>) {
		let mut buf = dev.acquire(addr).unwrap();
		buf.data = data;
		buf.mark_dirty();
		dev.release(buf).unwrap();
	}

	fn log_header_block(seq: u64) -> Vec<u8> {
		let mut block = vec![0u8; 512];
		LogHeader {
			sequence: seq,
			tail: 0,
			blkno: 0,
			local_total: 0,
			local_free: 0,
			local_dinodes: 0,
			flags: 0,
		}
		.encode(&mut block)
		.unwrap();
		block
	}

	/// Builds a 5-data-block journal dinode (height 1, root at block 1,
	/// leaves at blocks 2..=6) whose log headers carry sequences
	/// 5, 6, 7, 3, 4 — a single wraparound after the third block.
	fn wrapped_journal_device() -> (BlockDevice, Dinode) {
		let mut dev = device(512, 16);
		let leaves = [2u64, 3, 4, 5, 6];
		let seqs = [5u64, 6, 7, 3, 4];

		let mut root = vec![0u8; 512];
		MetaHeader::new(BlockType::Dinode, 0)
			.encode(&mut root[..META_HEADER_SIZE])
			.unwrap();
		{
			let mut c = Cursor::new(&mut root[Dinode::ENCODED_SIZE..]);
			for &ptr in &leaves {
				c.write_u64::<BigEndian>(ptr).unwrap();
			}
		}
		write_block(&mut dev, 1, root);

		for (leaf, seq) in leaves.iter().zip(seqs.iter()) {
			write_block(&mut dev, *leaf, log_header_block(*seq));
		}

		let dinode = Dinode {
			inum: InodeNumber { formal_ino: 1, addr: 1 },
			mode: S_IFREG | 0o600,
			uid: 0,
			gid: 0,
			nlink: 1,
			size: 5 * 512,
			blocks: 6,
			atime: 0,
			mtime: 0,
			ctime: 0,
			major: 0,
			minor: 0,
			goal_meta: 0,
			goal_data: 0,
			flags: DinodeFlags::SYSTEM,
			payload_format: 0,
			height: 1,
			depth: 0,
			entries: 0,
			eattr: 0,
		};
		(dev, dinode)
	}

	#[test]
	fn finds_wrap_point_at_sequence_regression() {
		let (mut dev, dinode) = wrapped_journal_device();
		let events = walk(&mut dev, &dinode, Generation::Current).unwrap();
		let addrs: Vec<u64> = events
			.into_iter()
			.filter_map(|e| match e {
				WalkEvent::Block { addr, role: Role::Data } => Some(addr),
				_ => None,
			})
			.collect();
		assert_eq!(addrs, vec![2, 3, 4, 5, 6]);

		let wrap_index = find_wrap_point(&mut dev, &addrs).unwrap();
		assert_eq!(wrap_index, 3);

		let ordered: Vec<u64> = addrs[wrap_index..].iter().chain(addrs[..wrap_index].iter()).copied().collect();
		assert_eq!(ordered, vec![5, 6, 2, 3, 4]);
	}

	#[test]
	fn no_regression_starts_at_block_zero() {
		let mut dev = device(512, 8);
		let addrs = vec![2u64, 3, 4];
		for (i, addr) in addrs.iter().enumerate() {
			write_block(&mut dev, *addr, log_header_block(i as u64 + 1));
		}
		assert_eq!(find_wrap_point(&mut dev, &addrs).unwrap(), 0);
	}
}
