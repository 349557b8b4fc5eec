//! Thin CLI front-end over the savemeta writer, restoremeta reader and
//! journal walker. No interactive hex/structure viewer is built here —
//! that UI is out of scope (see `DESIGN.md`).

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand, ValueEnum};

use gfs2_core::journal::{walk_journal, JournalEvent};
use gfs2_core::progress::Progress;
use gfs2_core::restoremeta::{restore_metadata, RestoreTarget};
use gfs2_core::savemeta::{save_metadata, SaveMode, SaveOptions};
use gfs2_core::session::Session;

#[derive(Parser)]
#[command(name = "gfs2_edit", version, about = "Metadata snapshot and journal inspection")]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum SaveModeArg {
	Full,
	RgsOnly,
	Slow,
}

impl From<SaveModeArg> for SaveMode {
	fn from(value: SaveModeArg) -> Self {
		match value {
			SaveModeArg::Full => SaveMode::Full,
			SaveModeArg::RgsOnly => SaveMode::RgsOnly,
			SaveModeArg::Slow => SaveMode::Slow,
		}
	}
}

#[derive(Subcommand)]
enum Command {
	/// Save a metadata snapshot archive from a live device.
	Savemeta {
		device: PathBuf,
		archive: PathBuf,

		/// gzip compression level, 0-9; 0 writes the archive uncompressed.
		#[arg(short = 'c', long, default_value_t = 0)]
		compression: u32,

		#[arg(long, value_enum, default_value = "full")]
		mode: SaveModeArg,
	},
	/// Restore (or inspect) a metadata snapshot archive.
	Restoremeta {
		archive: PathBuf,

		/// Destination device; if omitted, the archive is only inspected.
		device: Option<PathBuf>,
	},
	/// Walk one journal's blocks in wrap-adjusted order.
	Journal {
		device: PathBuf,

		/// Journal ordinal (0-based).
		#[arg(short = 'j', long, default_value_t = 0)]
		ordinal: u32,

		/// Trace a specific block address through the journal's
		/// log descriptors.
		#[arg(short = 't', long)]
		trace: Option<u64>,
	},
}

fn main() -> ExitCode {
	env_logger::init();
	let cli = Cli::parse();

	let result = match cli.command {
		Command::Savemeta {
			device,
			archive,
			compression,
			mode,
		} => run_savemeta(device, archive, compression, mode.into()),
		Command::Restoremeta { archive, device } => run_restoremeta(archive, device),
		Command::Journal { device, ordinal, trace } => run_journal(device, ordinal, trace),
	};

	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(message) => {
			eprintln!("gfs2_edit: {message}");
			ExitCode::FAILURE
		}
	}
}

fn run_savemeta(device: PathBuf, archive: PathBuf, compression: u32, mode: SaveMode) -> Result<(), String> {
	let file = OpenOptions::new()
		.read(true)
		.open(&device)
		.map_err(|e| format!("{}: {e}", device.display()))?;
	let mut session = Session::open(file).map_err(|e| e.to_string())?;

	let out = File::create(&archive).map_err(|e| format!("{}: {e}", archive.display()))?;
	let save_time = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0);

	let options = SaveOptions {
		mode,
		compression_level: compression,
	};

	let mut report_progress = |p: Progress| {
		eprint!("\rsaving... {}% ({}/?)", p.percent(), p.done);
	};
	let summary = save_metadata(&mut session, out, &options, save_time, Some(&mut report_progress)).map_err(|e| e.to_string())?;
	eprintln!();
	println!("saved {} block(s) to {}", summary.blocks_saved, archive.display());
	Ok(())
}

fn run_restoremeta(archive: PathBuf, device: Option<PathBuf>) -> Result<(), String> {
	let archive_file = File::open(&archive).map_err(|e| format!("{}: {e}", archive.display()))?;

	let mut report_progress = |p: Progress| {
		eprint!("\rrestoring... {}%", p.percent());
	};

	match device {
		Some(device_path) => {
			let mut dest = OpenOptions::new()
				.read(true)
				.write(true)
				.open(&device_path)
				.map_err(|e| format!("{}: {e}", device_path.display()))?;
			let summary = restore_metadata(archive_file, RestoreTarget::Device(&mut dest), Some(&mut report_progress))
				.map_err(|e| e.to_string())?;
			eprintln!();
			println!("restored {} block(s) to {}", summary.blocks_restored, device_path.display());
		}
		None => {
			let summary =
				restore_metadata(archive_file, RestoreTarget::Inspect, Some(&mut report_progress)).map_err(|e| e.to_string())?;
			eprintln!();
			println!(
				"archive saved at {}, {} bytes of filesystem, {} block(s)",
				summary.save_time,
				summary.fs_bytes,
				summary.inspected.len()
			);
			for block in &summary.inspected {
				println!("  block {}: siglen {}, type {:?}", block.addr, block.siglen, block.block_type);
			}
		}
	}
	Ok(())
}

fn run_journal(device: PathBuf, ordinal: u32, trace: Option<u64>) -> Result<(), String> {
	let file = OpenOptions::new()
		.read(true)
		.open(&device)
		.map_err(|e| format!("{}: {e}", device.display()))?;
	let mut session = Session::open(file).map_err(|e| e.to_string())?;

	let walk = walk_journal(&mut session, ordinal, trace).map_err(|e| e.to_string())?;
	println!("journal {ordinal}: wrap point at walk index {}", walk.wrap_point_index);
	for event in &walk.events {
		print_event(event);
	}
	Ok(())
}

fn print_event(event: &JournalEvent) {
	match event {
		JournalEvent::Header { addr, header, is_wrap_point } => {
			let wrap = if *is_wrap_point { " (wrap point)" } else { "" };
			println!(
				"block {addr}: log header seq={} tail={} blkno={} total={} free={} dinodes={} flags={:#x}{wrap}",
				header.sequence, header.tail, header.blkno, header.local_total, header.local_free, header.local_dinodes, header.flags
			);
		}
		JournalEvent::Descriptor { addr, descriptor, pertinent } => {
			let mark = if *pertinent { "*" } else { " " };
			println!(
				"{mark}block {addr}: log descriptor type={:?} blocks={} pointers={:?}",
				descriptor.descriptor_type, descriptor.block_count, descriptor.pointers
			);
		}
		JournalEvent::Continuation { addr, pointers, pertinent } => {
			let mark = if *pertinent { "*" } else { " " };
			println!("{mark}block {addr}: log buffer continuation pointers={pointers:?}");
		}
		JournalEvent::JournaledData { addr } => {
			println!("block {addr}: journaled data");
		}
		JournalEvent::Unrecognized { addr, block_type } => {
			println!("block {addr}: unrecognized ({block_type:?})");
		}
	}
}
