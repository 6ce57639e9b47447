//! Options accepted by [`TreeStore::open`](super::TreeStore::open).

use std::fmt;
use std::sync::Arc;

use super::layout::ItemPayload;
use super::listener::CoordListener;
use crate::types::PageId;

/// Depth of the preallocated leaf iterator stack.
pub const DEFAULT_MAX_DEPTH: usize = 20;

/// Clean pages kept in the page cache when none is configured.
pub const DEFAULT_CACHE_PAGES: usize = 256;

/// Options controlling how a [`TreeStore`](super::TreeStore) is opened.
#[derive(Clone)]
pub struct TreeStoreOptions {
    /// Root page to open. `None` uses the root recorded by the page store,
    /// or allocates a new one.
    pub root_page: Option<PageId>,
    /// Whether every item carries an `i64` timestamp after its row id.
    pub timestamps: bool,
    /// Deepest path the leaf iterator follows.
    pub max_depth: usize,
    /// Run the page consistency check after every mutation.
    pub consistency_checks: bool,
    /// Pages the cache holds before clean ones are evicted. Dirty pages
    /// stay cached until the next flush.
    pub cache_pages: usize,
    /// Listener notified when items change location.
    pub coord_listener: Option<Arc<dyn CoordListener>>,
}

impl Default for TreeStoreOptions {
    fn default() -> Self {
        Self {
            root_page: None,
            timestamps: false,
            max_depth: DEFAULT_MAX_DEPTH,
            consistency_checks: cfg!(debug_assertions),
            cache_pages: DEFAULT_CACHE_PAGES,
            coord_listener: None,
        }
    }
}

impl TreeStoreOptions {
    /// Opens the tree rooted at `page`.
    pub fn root_page(mut self, page: PageId) -> Self {
        self.root_page = Some(page);
        self
    }

    /// Enables or disables per-item timestamps.
    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Sets the deepest path the leaf iterator follows.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Enables or disables the post-mutation consistency check.
    pub fn consistency_checks(mut self, enabled: bool) -> Self {
        self.consistency_checks = enabled;
        self
    }

    /// Sets how many pages the cache holds.
    pub fn cache_pages(mut self, pages: usize) -> Self {
        self.cache_pages = pages;
        self
    }

    /// Installs a coordinate listener.
    pub fn coord_listener(mut self, listener: Arc<dyn CoordListener>) -> Self {
        self.coord_listener = Some(listener);
        self
    }

    pub(crate) fn payload(&self) -> ItemPayload {
        if self.timestamps {
            ItemPayload::RowIdAndTimestamp
        } else {
            ItemPayload::RowId
        }
    }
}

impl fmt::Debug for TreeStoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeStoreOptions")
            .field("root_page", &self.root_page)
            .field("timestamps", &self.timestamps)
            .field("max_depth", &self.max_depth)
            .field("consistency_checks", &self.consistency_checks)
            .field("cache_pages", &self.cache_pages)
            .field("coord_listener", &self.coord_listener.is_some())
            .finish()
    }
}
