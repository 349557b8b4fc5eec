//! Error taxonomy shared by every core (block I/O, layout, savemeta,
//! restoremeta, journal walk).
//!
//! The original multi-call binary this crate is descended from reports
//! failures by printing to stderr and calling `exit()` directly (see
//! `utils::error`). A reusable core cannot do that: every fallible entry
//! point here returns a `Result<_, Gfs2Error>` instead, and it is up to the
//! CLI front-ends to decide whether to print and exit.

use std::fmt;
use std::io;

/// A block address, used to annotate errors with the offending location.
pub type BlockAddr = u64;

/// The single error type returned by every `gfs2-core` operation.
///
/// Variants line up with the taxonomy in the specification: I/O failure,
/// malformed metadata, constraint violation, version mismatch and resource
/// exhaustion.
#[derive(thiserror::Error, Debug)]
pub enum Gfs2Error {
	/// A read, write or fsync syscall returned short or failed outright.
	/// Always fatal to the current operation.
	#[error("I/O error: {0}")]
	Io(#[from] io::Error),

	/// A decoded structure failed validation: bad magic, unrecognized type,
	/// a length or address outside bounds. Walkers log and skip the
	/// subtree; the planner and restorer treat this as fatal.
	#[error("malformed metadata at block {addr}: {reason}")]
	Malformed {
		addr: BlockAddr,
		reason: String,
	},

	/// An option or precondition was invalid before any write took place:
	/// bad lock table, non-positive journal count, out-of-range RG size,
	/// device too small.
	#[error("invalid configuration: {0}")]
	Constraint(String),

	/// An archive's `format_version` is higher than this reader understands.
	#[error("unsupported archive format version {found} (supported: {supported})")]
	VersionMismatch { found: u32, supported: u32 },

	/// Memory allocation failure or an allocation request that is
	/// obviously unsatisfiable (e.g. a record claiming a length larger
	/// than the device).
	#[error("resource exhausted: {0}")]
	Exhausted(String),
}

impl Gfs2Error {
	pub fn malformed(addr: BlockAddr, reason: impl fmt::Display) -> Self {
		Gfs2Error::Malformed {
			addr,
			reason: reason.to_string(),
		}
	}

	pub fn constraint(reason: impl fmt::Display) -> Self {
		Gfs2Error::Constraint(reason.to_string())
	}
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Gfs2Error>;
