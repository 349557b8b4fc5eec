//! Eagerly validated configuration for the layout planner. Every
//! constraint is checked before any block is written, per the error
//! taxonomy's "constraint violation... caught before any write" rule.

use crate::error::{Gfs2Error, Result};

use super::constants::{
	LGFS2_DEFAULT_JSIZE_MB, LGFS2_DEFAULT_RGSIZE_MB, LGFS2_MAX_JSIZE_MB, LGFS2_MAX_RGSIZE_MB,
	LGFS2_MIN_JSIZE_MB, LGFS2_MIN_RGSIZE_MB,
};

/// Options accepted by [`super::create::create_filesystem`].
#[derive(Clone, Debug)]
pub struct LayoutOptions {
	pub block_size: Option<u32>,
	pub journal_count: u32,
	pub journal_size_mb: Option<u64>,
	pub rg_size_mb: Option<u64>,
	pub lock_proto: String,
	pub lock_table: String,
	pub uuid: Option<[u8; 16]>,
	pub stripe_unit: Option<u64>,
	pub stripe_width: Option<u64>,
}

impl Default for LayoutOptions {
	fn default() -> Self {
		Self {
			block_size: None,
			journal_count: 1,
			journal_size_mb: None,
			rg_size_mb: None,
			lock_proto: "lock_nolock".to_string(),
			lock_table: String::new(),
			uuid: None,
			stripe_unit: None,
			stripe_width: None,
		}
	}
}

impl LayoutOptions {
	/// Checks every sizing and lock-configuration constraint that must be
	/// caught before any write touches the device.
	pub fn validate(&self) -> Result<()> {
		if self.journal_count == 0 {
			return Err(Gfs2Error::constraint("journal count must be at least 1"));
		}

		let jsize = self.journal_size_mb.unwrap_or(LGFS2_DEFAULT_JSIZE_MB);
		if !(LGFS2_MIN_JSIZE_MB..=LGFS2_MAX_JSIZE_MB).contains(&jsize) {
			return Err(Gfs2Error::constraint(format!(
				"journal size {jsize} MiB out of range [{LGFS2_MIN_JSIZE_MB}, {LGFS2_MAX_JSIZE_MB}]"
			)));
		}

		let rgsize = self.rg_size_mb.unwrap_or(LGFS2_DEFAULT_RGSIZE_MB);
		if !(LGFS2_MIN_RGSIZE_MB..=LGFS2_MAX_RGSIZE_MB).contains(&rgsize) {
			return Err(Gfs2Error::constraint(format!(
				"RG size {rgsize} MiB out of range [{LGFS2_MIN_RGSIZE_MB}, {LGFS2_MAX_RGSIZE_MB}]"
			)));
		}

		match self.lock_proto.as_str() {
			"lock_nolock" => {}
			"lock_dlm" => validate_lock_table(&self.lock_table)?,
			other => {
				return Err(Gfs2Error::constraint(format!(
					"unsupported lock protocol {other:?}, expected lock_nolock or lock_dlm"
				)))
			}
		}

		if self.lock_proto.len() >= 64 {
			return Err(Gfs2Error::constraint("lock protocol name too long"));
		}
		if self.lock_table.len() >= 64 {
			return Err(Gfs2Error::constraint("lock table name too long"));
		}

		Ok(())
	}

	pub fn journal_size_mb_or_default(&self) -> u64 {
		self.journal_size_mb.unwrap_or(LGFS2_DEFAULT_JSIZE_MB)
	}

	pub fn rg_size_mb_or_default(&self) -> u64 {
		self.rg_size_mb.unwrap_or(LGFS2_DEFAULT_RGSIZE_MB)
	}
}

/// `lock_dlm` requires `cluster:fs` with cluster ≤32 chars, fs ≤30 chars,
/// exactly one colon, and only alphanumerics/`-`/`_`/`:`.
fn validate_lock_table(table: &str) -> Result<()> {
	if !table
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
	{
		return Err(Gfs2Error::constraint(
			"lock table must contain only alphanumerics, '-', '_' and ':'",
		));
	}
	let mut parts = table.split(':');
	let cluster = parts.next().unwrap_or("");
	let fs = match parts.next() {
		Some(fs) => fs,
		None => return Err(Gfs2Error::constraint("lock table must be cluster:fs")),
	};
	if parts.next().is_some() {
		return Err(Gfs2Error::constraint("lock table must contain exactly one ':'"));
	}
	if cluster.is_empty() || cluster.len() > 32 {
		return Err(Gfs2Error::constraint("cluster name must be 1-32 characters"));
	}
	if fs.is_empty() || fs.len() > 30 {
		return Err(Gfs2Error::constraint("fs name must be 1-30 characters"));
	}
	Ok(())
}
