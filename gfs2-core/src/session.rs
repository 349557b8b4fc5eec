//! A session gathers everything the original multi-call binary kept as
//! process-wide mutable state — the superblock, the device handle, the RG
//! index, and the generation tag — into one value threaded explicitly
//! through every core call.
//!
//! `savemeta`, `restoremeta` and the journal walker all open a
//! [`Session`] first; the layout planner builds its own bookkeeping
//! directly since it is creating these structures rather than reading
//! them (see [`crate::layout::create`]).

use std::collections::HashSet;
use std::fs::File;

use crate::block_io::BlockDevice;
use crate::codec::dinode::Dinode;
use crate::codec::superblock::{peek_fs_format, LegacySuperblock, Superblock, FS_FORMAT_LEGACY, SUPERBLOCK_BYTE_OFFSET};
use crate::error::{Gfs2Error, Result};
use crate::generation::Generation;
use crate::inode::{linear_dir_entries, read_file_bytes};
use crate::rgindex::{Alignment, RgIndex};

/// An open filesystem: device handle, decoded superblock, generation tag
/// and the loaded RG index, ready for the metadata walkers.
///
/// Exactly one of `superblock`/`legacy_superblock` is populated, matching
/// `generation`: the two on-disk layouts diverge right after
/// `multihost_format` (see `codec::superblock::LegacySuperblock`), so
/// there is no single struct that represents both without guesswork.
pub struct Session {
	pub device: BlockDevice,
	pub generation: Generation,
	pub superblock: Option<Superblock>,
	pub legacy_superblock: Option<LegacySuperblock>,
	pub rgindex: RgIndex,
}

impl Session {
	/// Opens `file` as a filesystem: peeks `fs_format` to pick a superblock
	/// layout, decodes it, and loads the rindex — via the master directory
	/// for the current generation, via the superblock's own `rindex_di` for
	/// the legacy generation (spec's rewrite of the legacy tool's
	/// hard-coded-name lookup: named superblock inums instead of a
	/// directory walk, since the legacy generation has no master
	/// directory).
	pub fn open(mut file: File) -> Result<Self> {
		use crate::block_io::seek_read_exact;
		let mut probe = vec![0u8; 4096];
		seek_read_exact(&mut file, SUPERBLOCK_BYTE_OFFSET, &mut probe)?;

		if peek_fs_format(&probe)? == FS_FORMAT_LEGACY {
			let sb = LegacySuperblock::decode(&probe)?;
			let mut device = BlockDevice::open(file, sb.block_size)?;
			let generation = Generation::Legacy;

			let rindex_dinode = read_dinode(&mut device, sb.rindex_di.addr)?;
			// The legacy rindex may interleave a meta header every
			// `sd_jbsize` bytes; no fixture in this crate's test corpus
			// exercises that packing, so it is read here as the same dense
			// array the current generation uses (see `DESIGN.md`).
			let rindex_bytes = read_file_bytes(&mut device, &rindex_dinode, generation)?;
			let mut rgindex = RgIndex::new(Alignment::disabled());
			rgindex.load_from_rindex_bytes(&rindex_bytes)?;

			Ok(Self {
				device,
				generation,
				superblock: None,
				legacy_superblock: Some(sb),
				rgindex,
			})
		} else {
			let sb = Superblock::decode(&probe)?;
			let mut device = BlockDevice::open(file, sb.block_size)?;
			let generation = Generation::Current;

			let master = read_dinode(&mut device, sb.master_dir_inum)?;
			let rindex_addr = lookup_child(&mut device, &master, "rindex")?;
			let rindex_dinode = read_dinode(&mut device, rindex_addr)?;
			let rindex_bytes = read_file_bytes(&mut device, &rindex_dinode, generation)?;
			let mut rgindex = RgIndex::new(Alignment::disabled());
			rgindex.load_from_rindex_bytes(&rindex_bytes)?;

			Ok(Self {
				device,
				generation,
				superblock: Some(sb),
				legacy_superblock: None,
				rgindex,
			})
		}
	}

	/// Reads and decodes the dinode at `addr`.
	pub fn read_dinode(&mut self, addr: u64) -> Result<Dinode> {
		read_dinode(&mut self.device, addr)
	}

	/// Looks up a named child of a (non-`EXHASH`) directory dinode, as used
	/// to resolve `master/rindex`, `master/jindex`, `master/jindex/journalN`.
	pub fn lookup_child(&mut self, dir: &Dinode, name: &str) -> Result<u64> {
		lookup_child(&mut self.device, dir, name)
	}

	/// Resolves the master directory's dinode. Only the current generation
	/// has one.
	pub fn master_dir(&mut self) -> Result<Dinode> {
		let addr = self
			.superblock
			.as_ref()
			.ok_or_else(|| Gfs2Error::constraint("legacy generation has no master directory"))?
			.master_dir_inum;
		self.read_dinode(addr)
	}

	/// Resolves the `jindex` directory dinode: under the master directory
	/// for the current generation, named directly in the superblock for
	/// the legacy generation.
	pub fn jindex_dir(&mut self) -> Result<Dinode> {
		match self.generation {
			Generation::Current => {
				let master = self.master_dir()?;
				let addr = self.lookup_child(&master, "jindex")?;
				self.read_dinode(addr)
			}
			Generation::Legacy => {
				let addr = self
					.legacy_superblock
					.as_ref()
					.expect("legacy session always carries a legacy superblock")
					.jindex_di
					.addr;
				self.read_dinode(addr)
			}
		}
	}

	/// Resolves the Nth (0-based) journal's dinode via `jindex`.
	pub fn journal_dinode(&mut self, ordinal: u32) -> Result<Dinode> {
		let jindex = self.jindex_dir()?;
		let name = format!("journal{ordinal}");
		let addr = self.lookup_child(&jindex, &name)?;
		self.read_dinode(addr)
	}

	/// Resolves every journal's dinode via `jindex`, in directory order.
	pub fn journal_dinodes(&mut self) -> Result<Vec<Dinode>> {
		let jindex = self.jindex_dir()?;
		let children = self.dir_children(&jindex)?;
		children.into_iter().map(|(addr, _)| self.read_dinode(addr)).collect()
	}

	/// Enumerates a (non-`EXHASH`) directory's immediate children as
	/// `(address, name)` pairs.
	fn dir_children(&mut self, dir: &Dinode) -> Result<Vec<(u64, String)>> {
		let buffer = self.device.acquire(dir.inum.addr)?;
		let block = buffer.data.clone();
		self.device.release(buffer)?;
		let mut out = Vec::new();
		for entry in linear_dir_entries(&block) {
			let entry = entry?;
			out.push((entry.inum.addr, String::from_utf8_lossy(&entry.name).into_owned()));
		}
		Ok(out)
	}

	/// Derives the set of system-inode addresses that the savemeta
	/// selection policy keeps in full. For the current generation this
	/// walks the master directory and one level into `jindex`/`per_node`;
	/// for the legacy generation, which has no master directory, it reads
	/// the names directly off the superblock instead of trusting any
	/// dinode's on-disk `SYSTEM` flag.
	pub fn system_inode_addrs(&mut self) -> Result<HashSet<u64>> {
		let mut addrs = HashSet::new();
		match self.generation {
			Generation::Current => {
				let master = self.master_dir()?;
				addrs.insert(master.inum.addr);
				for (addr, name) in self.dir_children(&master)? {
					addrs.insert(addr);
					if name == "jindex" || name == "per_node" {
						let sub_dir = self.read_dinode(addr)?;
						if sub_dir.is_dir() {
							for (sub_addr, _) in self.dir_children(&sub_dir)? {
								addrs.insert(sub_addr);
							}
						}
					}
				}
			}
			Generation::Legacy => {
				let sb = self
					.legacy_superblock
					.clone()
					.expect("legacy session always carries a legacy superblock");
				addrs.insert(sb.jindex_di.addr);
				addrs.insert(sb.rindex_di.addr);
				addrs.insert(sb.root_di.addr);
				addrs.insert(sb.quota_di.addr);
				addrs.insert(sb.license_di.addr);
			}
		}
		Ok(addrs)
	}
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

#[cfg(test)]
mod test {
	use super::*;
	use crate::codec::dinode::{DinodeFlags, InodeNumber, S_IFDIR, S_IFREG};
	use crate::codec::dirent::DIRENT_HEADER_SIZE;
	use crate::layout::{create_filesystem, LayoutOptions, Topology};
	use std::io::{Seek, SeekFrom, Write as _};

	fn backing_file(size_bytes: u64) -> File {
		let mut tmp = tempfile::tempfile().unwrap();
		tmp.write_all(&vec![0u8; size_bytes as usize]).unwrap();
		tmp
	}

	#[test]
	fn opens_freshly_created_filesystem() {
		let file = backing_file(64 * 1024 * 1024);
		let options = LayoutOptions {
			block_size: Some(4096),
			journal_count: 1,
			journal_size_mb: Some(8),
			rg_size_mb: Some(32),
			..LayoutOptions::default()
		};
		create_filesystem(file.try_clone().unwrap(), Topology::default(), &options).unwrap();

		let mut session = Session::open(file).unwrap();
		assert_eq!(session.rgindex.len() as usize, session.rgindex.len());
		let journal0 = session.journal_dinode(0).unwrap();
		assert!(journal0.is_system());
	}

	fn write_block_at(file: &mut File, addr: u64, block_size: u64, bytes: &[u8]) {
		file.seek(SeekFrom::Start(addr * block_size)).unwrap();
		file.write_all(bytes).unwrap();
	}

	fn plain_dinode(addr: u64, mode: u32, flags: DinodeFlags, height: u32) -> Dinode {
		Dinode {
			inum: InodeNumber { formal_ino: addr, addr },
			mode,
			uid: 0,
			gid: 0,
			nlink: 1,
			size: 0,
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
			height,
			depth: 0,
			entries: 0,
			eattr: 0,
		}
	}

	fn write_linear_dir(block_size: usize, addr: u64, children: &[(InodeNumber, &str)]) -> Vec<u8> {
		let mut block = vec![0u8; block_size];
		let mut dinode = plain_dinode(addr, S_IFDIR | 0o755, DinodeFlags::SYSTEM, 0);
		dinode.entries = children.len() as u32;
		dinode.encode(&mut block).unwrap();

		let mut offset = Dinode::ENCODED_SIZE;
		for (inum, name) in children {
			let rec_len = DIRENT_HEADER_SIZE + name.len();
			{
				use byteorder::{BigEndian, WriteBytesExt};
				let mut c = std::io::Cursor::new(&mut block[offset..offset + rec_len]);
				c.write_u64::<BigEndian>(inum.formal_ino).unwrap();
				c.write_u64::<BigEndian>(inum.addr).unwrap();
				c.write_u32::<BigEndian>(0).unwrap();
				c.write_u16::<BigEndian>(rec_len as u16).unwrap();
				c.write_u16::<BigEndian>(name.len() as u16).unwrap();
				c.write_u8(2).unwrap();
				c.write_u8(0).unwrap();
				c.write_u16::<BigEndian>(0).unwrap();
			}
			block[offset + DIRENT_HEADER_SIZE..offset + rec_len].copy_from_slice(name.as_bytes());
			offset += rec_len;
		}
		block
	}

	/// Builds a minimal legacy-generation image by hand (the layout planner
	/// only ever produces the current generation) and checks that `Session`
	/// resolves its system inodes by name rather than through a master
	/// directory.
	#[test]
	fn opens_legacy_generation_filesystem() {
		use crate::codec::superblock::{LegacySuperblock, FS_FORMAT_LEGACY};

		const BS: u64 = 4096;
		let mut file = backing_file(64 * BS);

		let rindex_addr = 20u64;
		let jindex_addr = 21u64;
		let root_addr = 22u64;
		let quota_addr = 23u64;
		let license_addr = 24u64;
		let journal0_addr = 25u64;

		// rindex: stuffed, empty (no RGs) — exercises the open path without
		// needing a working bitmap-backed RG.
		let mut rindex_block = vec![0u8; BS as usize];
		plain_dinode(rindex_addr, S_IFREG | 0o600, DinodeFlags::SYSTEM, 0)
			.encode(&mut rindex_block)
			.unwrap();
		write_block_at(&mut file, rindex_addr, BS, &rindex_block);

		let jindex_block = write_linear_dir(
			BS as usize,
			jindex_addr,
			&[(InodeNumber { formal_ino: journal0_addr, addr: journal0_addr }, "journal0")],
		);
		write_block_at(&mut file, jindex_addr, BS, &jindex_block);

		let root_block = write_linear_dir(BS as usize, root_addr, &[]);
		write_block_at(&mut file, root_addr, BS, &root_block);

		let mut journal0_block = vec![0u8; BS as usize];
		plain_dinode(journal0_addr, S_IFREG | 0o600, DinodeFlags::SYSTEM, 0)
			.encode(&mut journal0_block)
			.unwrap();
		write_block_at(&mut file, journal0_addr, BS, &journal0_block);

		let mut lockproto = [0u8; 64];
		lockproto[..11].copy_from_slice(b"lock_nolock");
		let sb = LegacySuperblock {
			fs_format: FS_FORMAT_LEGACY,
			multihost_format: 1,
			flags: 0,
			block_size: BS as u32,
			block_size_shift: BS.trailing_zeros(),
			seg_size: 16,
			jindex_di: InodeNumber { formal_ino: jindex_addr, addr: jindex_addr },
			rindex_di: InodeNumber { formal_ino: rindex_addr, addr: rindex_addr },
			root_di: InodeNumber { formal_ino: root_addr, addr: root_addr },
			lockproto,
			locktable: [0u8; 64],
			quota_di: InodeNumber { formal_ino: quota_addr, addr: quota_addr },
			license_di: InodeNumber { formal_ino: license_addr, addr: license_addr },
		};
		let mut sb_block = vec![0u8; BS as usize];
		sb.encode(&mut sb_block).unwrap();
		write_block_at(&mut file, SUPERBLOCK_BYTE_OFFSET / BS, BS, &sb_block);

		let mut session = Session::open(file).unwrap();
		assert_eq!(session.generation, Generation::Legacy);
		assert_eq!(session.rgindex.len(), 0);

		let journal0 = session.journal_dinode(0).unwrap();
		assert_eq!(journal0.inum.addr, journal0_addr);

		let journals = session.journal_dinodes().unwrap();
		assert_eq!(journals.len(), 1);

		let system_addrs = session.system_inode_addrs().unwrap();
		assert!(system_addrs.contains(&rindex_addr));
		assert!(system_addrs.contains(&jindex_addr));
		assert!(system_addrs.contains(&root_addr));
		assert!(system_addrs.contains(&quota_addr));
		assert!(system_addrs.contains(&license_addr));
		assert!(!system_addrs.contains(&journal0_addr));
	}
}
