//! Storage backend abstraction for the block-level byte-range index.
//!
//! The downsampler only needs ordered scans of one `(file, seq)` group at a
//! time, a handful of aggregates, and bulk insertion into the destination.
//! Those operations are captured by [`BlockIndex`] and [`BlockIndexMut`] so the
//! algorithm can run against different backends interchangeably.
//!
//! # Implementations
//!
//! - [`SqliteStorage`] - the SQLite index database written by the indexers
//! - [`MemoryStorage`] - an in-memory table, used for tests and small indices
//!
//! # Example
//!
//! ```no_run
//! use htsnexus::storage::{BlockIndex, SqliteStorage};
//!
//! let index = SqliteStorage::open_source("index.db").unwrap();
//! for extent in index.group_extents().unwrap() {
//!     println!("{} {:?}: {}..{}", extent.file_id, extent.seq, extent.byte_lo, extent.byte_hi);
//! }
//! ```

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::{SCHEMA, SqliteStorage};

use crate::{
    Result,
    types::{BlockEntry, GroupExtent},
};

/// Byte extent and entry count of a file's unmapped blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmappedSpan {
    pub byte_lo: i64,
    pub byte_hi: i64,
    pub entries: u64,
}

/// Read access to a block index.
pub trait BlockIndex {
    /// Distinct file ids with at least one block, in ascending order.
    fn file_ids(&self) -> Result<Vec<String>>;

    /// Distinct non-null reference sequence names, in ascending order.
    fn sequences(&self) -> Result<Vec<String>>;

    /// Stream the blocks of one mapped group ordered by `(byte_lo, byte_hi)`.
    ///
    /// Stops at the first error returned by `visit`.
    fn scan_group(
        &self,
        file_id: &str,
        seq: &str,
        visit: &mut dyn FnMut(BlockEntry) -> Result<()>,
    ) -> Result<()>;

    /// Overall byte extent of the unmapped blocks of a file, if it has any.
    fn unmapped_span(&self, file_id: &str) -> Result<Option<UnmappedSpan>>;

    /// Aggregate extents grouped by `(file_id, seq)`, ordered by
    /// `(file_id, seq)` with the unmapped group first.
    fn group_extents(&self) -> Result<Vec<GroupExtent>>;
}

/// Write access to a block index.
pub trait BlockIndexMut: BlockIndex {
    /// Delete every block entry, leaving other tables untouched.
    fn clear_blocks(&mut self) -> Result<()>;

    fn insert_block(&mut self, entry: &BlockEntry) -> Result<()>;
}
