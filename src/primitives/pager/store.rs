use crate::types::{PageId, Result, StoreError};

/// Smallest page size accepted by the stores.
pub const MIN_PAGE_SIZE: u32 = 64;
/// Largest page size: page-relative offsets are stored as `u16`.
pub const MAX_PAGE_SIZE: u32 = u16::MAX as u32;
/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Configuration options for the page stores.
#[derive(Clone, Debug)]
pub struct PagerOptions {
    /// Size of each page in bytes (e.g., 4096).
    pub page_size: u32,
    /// Whether `FilePageStore::sync` issues an fsync.
    pub fsync: bool,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            fsync: true,
        }
    }
}

impl PagerOptions {
    /// Sets the page size.
    pub fn page_size(mut self, bytes: u32) -> Self {
        self.page_size = bytes;
        self
    }

    /// Enables or disables fsync on sync.
    pub fn fsync(mut self, enabled: bool) -> Self {
        self.fsync = enabled;
        self
    }

    /// Rejects page sizes the page layout cannot address.
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(StoreError::Invalid("page size below minimum"));
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err(StoreError::Invalid("page size exceeds u16 offsets"));
        }
        Ok(())
    }
}

/// Counters describing page store activity.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct PagerStats {
    /// Pages handed out by `allocate_page`.
    pub allocated: u64,
    /// Page images returned by `read_page`.
    pub reads: u64,
    /// Page images accepted by `write_page`.
    pub writes: u64,
}

/// Backing storage of fixed-size pages addressed by [`PageId`].
///
/// Stores use interior mutability so they can be shared as
/// `Arc<dyn PageStore>`; the tree store above them is the single writer.
pub trait PageStore: Send + Sync + 'static {
    /// Returns the page size in bytes.
    fn page_size(&self) -> usize;
    /// Allocates a zero-filled page and returns its id.
    fn allocate_page(&self) -> Result<PageId>;
    /// Returns a copy of the page image (exactly `page_size` bytes).
    fn read_page(&self, id: PageId) -> Result<Vec<u8>>;
    /// Replaces the page image. `data` must not exceed `page_size`; shorter
    /// images are zero-padded.
    fn write_page(&self, id: PageId, data: &[u8]) -> Result<()>;
    /// Makes written pages durable.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
    /// Returns a snapshot of store counters.
    fn stats(&self) -> PagerStats;
    /// Root page recorded for the tree living in this store, if any.
    fn root_hint(&self) -> Option<PageId> {
        None
    }
    /// Records the tree's root page so that it can be reopened.
    fn set_root_hint(&self, _root: PageId) -> Result<()> {
        Ok(())
    }
    /// Layout flags recorded for the tree; meaningful once a root hint is
    /// recorded.
    fn tree_flags(&self) -> u16 {
        0
    }
    /// Records the tree's layout flags.
    fn set_tree_flags(&self, _flags: u16) -> Result<()> {
        Ok(())
    }
}

/// Copies `data` into a zero-padded page image of `page_size` bytes.
pub(crate) fn padded_image(data: &[u8], page_size: usize) -> Result<Vec<u8>> {
    if data.len() > page_size {
        return Err(StoreError::Invalid("page image larger than page size"));
    }
    let mut image = vec![0u8; page_size];
    image[..data.len()].copy_from_slice(data);
    Ok(image)
}
