#![forbid(unsafe_code)]
//! Fixed-size page storage underneath the tree store.

mod file;
mod memory;
mod meta;
mod store;

pub use file::{FilePageStore, PAGE_TRAILER_LEN};
pub use memory::MemPageStore;
pub use meta::{load_meta, Meta, META_FORMAT_VERSION, META_LEN, META_MAGIC};
pub use store::{
    PageStore, PagerOptions, PagerStats, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE,
};
