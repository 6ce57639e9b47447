//! Paged trie index mapping `/`-style string paths to row ids.
//!
//! The [`treestore`] module holds the trie itself; [`primitives`] provides
//! the page stores it persists into and [`types`] the shared identifiers
//! and error type.

#![warn(missing_docs)]

pub mod primitives;
pub mod treestore;
pub mod types;

pub use primitives::pager::{FilePageStore, MemPageStore, PageStore, PagerOptions};
pub use treestore::{
    ChildRef, CoordListener, PageRec, PageRecPos, TreeLeaf, TreeStore, TreeStoreOptions,
    TreeStoreStats,
};
pub use types::{PageId, Result, RowId, StoreError};
