//! On-disk data model, layout planner, metadata snapshot archiver and
//! journal walker for a clustered resource-group filesystem.
//!
//! This crate gathers the three tightly coupled cores described by the
//! project that drives it (layout creation/growth, savemeta/restoremeta,
//! and the journal walker) behind a shared [`codec`], [`block_io`] and
//! [`rgindex`] foundation. Every entry point is synchronous, single
//! threaded and returns a [`error::Result`] rather than exiting the
//! process — callers (CLI front-ends) decide how to report failure.

pub mod block_io;
pub mod codec;
pub mod error;
pub mod generation;
pub mod inode;
pub mod journal;
pub mod layout;
pub mod progress;
pub mod restoremeta;
pub mod rgindex;
pub mod savemeta;
pub mod session;

pub use error::{Gfs2Error, Result};
pub use generation::Generation;
