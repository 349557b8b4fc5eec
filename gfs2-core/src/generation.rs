//! The filesystem comes in two on-disk generations. Rather than compiling
//! two parallel code paths, the generation is carried as a runtime tag on
//! the session and every codec/walker dispatch branches on it explicitly.

/// Which generation of the on-disk format a session is operating on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Generation {
	/// The current generation: has a master directory, the indirect
	/// header matches [`crate::codec::header::META_HEADER_SIZE`], and
	/// journals live inside the RG address space.
	Current,
	/// The legacy generation: no master directory (system inodes are
	/// named directly in the superblock), a larger per-block meta-header
	/// reservation in some structures, and journals stored outside the RG
	/// space.
	Legacy,
}

impl Generation {
	/// Fan-out per indirect tree level differs between generations because
	/// the legacy indirect header carries extra fields.
	pub fn indirect_header_size(self) -> usize {
		match self {
			Generation::Current => crate::codec::header::META_HEADER_SIZE,
			Generation::Legacy => crate::codec::header::META_HEADER_SIZE + 4,
		}
	}

	pub fn has_master_directory(self) -> bool {
		matches!(self, Generation::Current)
	}

	/// Whether journals are addressed inside RG data space (current) or
	/// kept in a separate region entirely (legacy).
	pub fn journals_in_rg_space(self) -> bool {
		matches!(self, Generation::Current)
	}
}
