//! Thin CLI front-end over `gfs2_core::layout`. Argument parsing, help
//! text and exit codes live here; every actual decision (block size
//! selection, RG sizing, constraint validation) happens in the core.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use gfs2_core::layout::{create_filesystem, grow_filesystem, LayoutOptions, Topology};

#[derive(Parser)]
#[command(name = "mkfs.gfs2", version, about = "Create or grow a gfs2-like filesystem")]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Create a new filesystem on a device.
	Create {
		device: PathBuf,

		/// Force a block size instead of deriving one from device topology.
		#[arg(short = 'b', long)]
		block_size: Option<u32>,

		/// Number of journals to create.
		#[arg(short = 'j', long, default_value_t = 1)]
		journals: u32,

		/// Size of each journal in MiB.
		#[arg(short = 'J', long)]
		journal_size_mb: Option<u64>,

		/// Size of each resource group in MiB.
		#[arg(short = 'r', long)]
		rg_size_mb: Option<u64>,

		/// Lock protocol: lock_nolock or lock_dlm.
		#[arg(short = 'p', long, default_value = "lock_nolock")]
		lock_proto: String,

		/// Lock table, required as cluster:fs when lock_dlm is used.
		#[arg(short = 't', long, default_value = "")]
		lock_table: String,

		/// Filesystem UUID; a random one is generated if omitted.
		#[arg(short = 'U', long)]
		uuid: Option<String>,

		#[arg(long)]
		stripe_unit: Option<u64>,
		#[arg(long)]
		stripe_width: Option<u64>,
	},
	/// Grow an existing filesystem to fill its device's current size.
	Grow {
		device: PathBuf,

		/// Size of newly added resource groups in MiB; defaults to the
		/// existing filesystem's own default.
		#[arg(short = 'r', long)]
		rg_size_mb: Option<u64>,
	},
}

fn main() -> ExitCode {
	env_logger::init();
	let cli = Cli::parse();

	let result = match cli.command {
		Command::Create {
			device,
			block_size,
			journals,
			journal_size_mb,
			rg_size_mb,
			lock_proto,
			lock_table,
			uuid,
			stripe_unit,
			stripe_width,
		} => run_create(
			device,
			block_size,
			journals,
			journal_size_mb,
			rg_size_mb,
			lock_proto,
			lock_table,
			uuid,
			stripe_unit,
			stripe_width,
		),
		Command::Grow { device, rg_size_mb } => run_grow(device, rg_size_mb),
	};

	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(message) => {
			eprintln!("mkfs.gfs2: {message}");
			ExitCode::FAILURE
		}
	}
}

#[allow(clippy::too_many_arguments)]
fn run_create(
	device: PathBuf,
	block_size: Option<u32>,
	journals: u32,
	journal_size_mb: Option<u64>,
	rg_size_mb: Option<u64>,
	lock_proto: String,
	lock_table: String,
	uuid: Option<String>,
	stripe_unit: Option<u64>,
	stripe_width: Option<u64>,
) -> Result<(), String> {
	let uuid = match uuid {
		Some(s) => Some(parse_uuid(&s)?),
		None => None,
	};

	let options = LayoutOptions {
		block_size,
		journal_count: journals,
		journal_size_mb,
		rg_size_mb,
		lock_proto,
		lock_table,
		uuid,
		stripe_unit,
		stripe_width,
	};

	let file = OpenOptions::new()
		.read(true)
		.write(true)
		.open(&device)
		.map_err(|e| format!("{}: {e}", device.display()))?;

	let summary = create_filesystem(file, Topology::default(), &options).map_err(|e| e.to_string())?;

	println!(
		"created filesystem: block size {}, {} resource group(s), {} journal(s)",
		summary.block_size,
		summary.rg_count,
		summary.journal_inodes.len()
	);
	Ok(())
}

fn run_grow(device: PathBuf, rg_size_mb: Option<u64>) -> Result<(), String> {
	let file = OpenOptions::new()
		.read(true)
		.write(true)
		.open(&device)
		.map_err(|e| format!("{}: {e}", device.display()))?;

	let summary = grow_filesystem(file, rg_size_mb).map_err(|e| e.to_string())?;
	println!(
		"grew filesystem: {} -> {} blocks, {} resource group(s) added",
		summary.old_device_len_blocks, summary.new_device_len_blocks, summary.rgs_added
	);
	Ok(())
}

fn parse_uuid(s: &str) -> Result<[u8; 16], String> {
	let parsed = uuid::Uuid::parse_str(s).map_err(|e| format!("invalid UUID {s:?}: {e}"))?;
	Ok(*parsed.as_bytes())
}
