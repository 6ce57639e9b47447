//! Low-level primitives underneath the tree store.
//!
//! Includes big-endian byte helpers, positioned file I/O, and the page
//! stores that hold serialized trie pages.

/// Byte-level utilities and encoding/decoding.
pub mod bytes;

/// Positioned file I/O.
pub mod io;

/// Page stores: in-memory and file-backed.
///
/// Hands out fixed-size pages addressed by [`crate::types::PageId`].
pub mod pager;
