#![forbid(unsafe_code)]
//! Identifiers, the crate error type, and checksum helpers.

use std::fmt;

/// Checksum helpers shared by the file-backed page store.
pub mod checksum;

pub use checksum::page_crc32;

/// Identifier of a page in the backing page store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u32);

/// Caller-assigned payload stored on every trie item.
pub type RowId = i32;

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PageId {
    fn from(value: u32) -> Self {
        PageId(value)
    }
}

/// Errors raised by the tree store and its backing page stores.
///
/// `Corruption` and `Invalid` report structural problems: callers must
/// not retry or patch around them. `Io` and `PageFull` are the only
/// variants that [`crate::treestore::TreeStore::lookup`] downgrades to a
/// miss.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The backing storage failed to read or write.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk or in-memory structure disagrees with itself.
    #[error("corruption: {0}")]
    Corruption(String),
    /// An argument or operation violates a structural rule.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A record cannot grow because its page has no split candidate left.
    #[error("page {0} is full")]
    PageFull(PageId),
    /// The traversal went deeper than the configured iterator stack.
    #[error("path deeper than iterator limit of {0}")]
    DepthLimit(usize),
    /// A requested entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
}

impl StoreError {
    /// Builds a [`StoreError::Corruption`] from anything printable.
    pub fn corruption(msg: impl Into<String>) -> Self {
        StoreError::Corruption(msg.into())
    }

    /// Returns true for failures that a lookup may treat as "give up".
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::PageFull(_))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
