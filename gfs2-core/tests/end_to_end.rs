//! Exercises the three cores together against synthetic file-backed
//! devices: create a filesystem, grow it, round-trip a savemeta archive,
//! and walk a freshly created journal.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

use gfs2_core::journal::walk_journal;
use gfs2_core::layout::{create_filesystem, grow_filesystem, LayoutOptions, Topology};
use gfs2_core::restoremeta::{restore_metadata, RestoreTarget};
use gfs2_core::savemeta::{save_metadata, SaveOptions};
use gfs2_core::session::Session;

fn backing_file(size_bytes: u64) -> File {
	let mut tmp = tempfile::tempfile().unwrap();
	tmp.write_all(&vec![0u8; size_bytes as usize]).unwrap();
	tmp
}

fn default_layout() -> LayoutOptions {
	LayoutOptions {
		block_size: Some(4096),
		journal_count: 1,
		journal_size_mb: Some(8),
		rg_size_mb: Some(32),
		..LayoutOptions::default()
	}
}

#[test]
fn creates_a_filesystem_with_the_requested_journal_count() {
	let options = LayoutOptions {
		journal_count: 2,
		..default_layout()
	};
	let file = backing_file(160 * 1024 * 1024);
	let summary = create_filesystem(file.try_clone().unwrap(), Topology::default(), &options).unwrap();

	assert_eq!(summary.block_size, 4096);
	assert_eq!(summary.journal_inodes.len(), 2);
	assert!(summary.rg_count >= 2);

	let mut session = Session::open(file).unwrap();
	assert_eq!(session.rgindex.len(), summary.rg_count);
	for ordinal in 0..summary.journal_inodes.len() as u32 {
		let dinode = session.journal_dinode(ordinal).unwrap();
		assert!(dinode.is_system());
		assert!(dinode.is_regular());
	}
}

#[test]
fn grows_a_filesystem_onto_a_larger_device() {
	let mut file = backing_file(64 * 1024 * 1024);
	let before = create_filesystem(file.try_clone().unwrap(), Topology::default(), &default_layout()).unwrap();

	file.seek(SeekFrom::Start(160 * 1024 * 1024 - 1)).unwrap();
	file.write_all(&[0u8]).unwrap();

	let grow_summary = grow_filesystem(file.try_clone().unwrap(), Some(32)).unwrap();
	assert!(grow_summary.new_device_len_blocks > grow_summary.old_device_len_blocks);
	assert!(grow_summary.rgs_added > 0);

	let mut session = Session::open(file).unwrap();
	assert_eq!(session.rgindex.len(), before.rg_count + grow_summary.rgs_added);
}

#[test]
fn round_trips_a_compressed_savemeta_archive_onto_a_fresh_device() {
	let source = backing_file(64 * 1024 * 1024);
	create_filesystem(source.try_clone().unwrap(), Topology::default(), &default_layout()).unwrap();
	let mut session = Session::open(source.try_clone().unwrap()).unwrap();

	let mut archive = Vec::new();
	let options = SaveOptions {
		compression_level: 4,
		..SaveOptions::default()
	};
	let save_summary = save_metadata(&mut session, &mut archive, &options, 1_800_000_000, None).unwrap();
	assert!(save_summary.blocks_saved > 0);

	let mut dest = backing_file(64 * 1024 * 1024);
	let restore_summary =
		restore_metadata(std::io::Cursor::new(archive), RestoreTarget::Device(&mut dest), None).unwrap();
	assert_eq!(restore_summary.blocks_restored, save_summary.blocks_saved);

	let mut dest_session = Session::open(dest).unwrap();
	assert_eq!(dest_session.rgindex.len(), session.rgindex.len());
	let journal0 = dest_session.journal_dinode(0).unwrap();
	assert!(journal0.is_system());
}

#[test]
fn walks_a_freshly_created_journal_without_finding_a_wrap() {
	let file = backing_file(64 * 1024 * 1024);
	create_filesystem(file.try_clone().unwrap(), Topology::default(), &default_layout()).unwrap();
	let mut session = Session::open(file).unwrap();

	let walk = walk_journal(&mut session, 0, None).unwrap();
	assert!(!walk.events.is_empty());
	// A freshly created journal carries no log headers at all, so there's
	// nothing for the wrap scan to find a regression against.
	assert_eq!(walk.wrap_point_index, 0);
}

#[test]
fn rgs_only_savemeta_skips_dinode_trees() {
	let source = backing_file(64 * 1024 * 1024);
	create_filesystem(source.try_clone().unwrap(), Topology::default(), &default_layout()).unwrap();
	let mut full_session = Session::open(source.try_clone().unwrap()).unwrap();
	let mut rgs_only_session = Session::open(source).unwrap();

	let mut full_archive = Vec::new();
	let full_summary = save_metadata(&mut full_session, &mut full_archive, &SaveOptions::default(), 1, None).unwrap();

	let mut rgs_only_archive = Vec::new();
	let rgs_only_options = SaveOptions {
		mode: gfs2_core::savemeta::SaveMode::RgsOnly,
		..SaveOptions::default()
	};
	let rgs_only_summary =
		save_metadata(&mut rgs_only_session, &mut rgs_only_archive, &rgs_only_options, 1, None).unwrap();

	assert!(rgs_only_summary.blocks_saved < full_summary.blocks_saved);
}

#[test]
fn rejects_opening_a_device_whose_superblock_is_all_zero() {
	let file = backing_file(4 * 1024 * 1024);
	let result = Session::open(file);
	assert!(result.is_err());
}
