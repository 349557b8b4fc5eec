//! Sizing constants for the layout planner, named after the reference
//! tool's `LGFS2_*` macros.

/// Default resource group size, in mebibytes.
pub const LGFS2_DEFAULT_RGSIZE_MB: u64 = 1024;
/// Minimum resource group size, in mebibytes.
pub const LGFS2_MIN_RGSIZE_MB: u64 = 32;
/// Maximum resource group size, in mebibytes.
pub const LGFS2_MAX_RGSIZE_MB: u64 = 2 * 1024 * 1024;

/// Default journal size, in mebibytes.
pub const LGFS2_DEFAULT_JSIZE_MB: u64 = 128;
/// Minimum journal size, in mebibytes.
pub const LGFS2_MIN_JSIZE_MB: u64 = 8;
/// Maximum journal size, in mebibytes.
pub const LGFS2_MAX_JSIZE_MB: u64 = 1024 * 1024;

pub const MEBIBYTE: u64 = 1024 * 1024;

/// Smallest block size this planner will accept.
pub const MIN_BLOCK_SIZE: u32 = 512;
