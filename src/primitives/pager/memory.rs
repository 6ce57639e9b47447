use std::io;

use parking_lot::Mutex;

use super::store::{padded_image, PageStore, PagerOptions, PagerStats};
use crate::types::{PageId, Result, StoreError};

#[derive(Default)]
struct MemState {
    pages: Vec<Box<[u8]>>,
    root: Option<PageId>,
    tree_flags: u16,
    stats: PagerStats,
    fail_allocations: bool,
    fail_writes: bool,
}

/// Page store kept entirely in memory.
///
/// Used for ephemeral indexes and tests; supports failure injection so that
/// callers can observe how I/O errors surface.
pub struct MemPageStore {
    page_size: usize,
    state: Mutex<MemState>,
}

impl MemPageStore {
    /// Creates an empty store with the given page size.
    pub fn new(page_size: u32) -> Result<Self> {
        Self::with_options(PagerOptions::default().page_size(page_size))
    }

    /// Creates an empty store from pager options.
    pub fn with_options(options: PagerOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            page_size: options.page_size as usize,
            state: Mutex::new(MemState::default()),
        })
    }

    /// Number of pages allocated so far.
    pub fn page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// Makes every following `allocate_page` fail with an I/O error.
    pub fn fail_allocations(&self, enabled: bool) {
        self.state.lock().fail_allocations = enabled;
    }

    /// Makes every following `write_page` fail with an I/O error.
    pub fn fail_writes(&self, enabled: bool) {
        self.state.lock().fail_writes = enabled;
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("injected {what} failure"),
    ))
}

impl PageStore for MemPageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut state = self.state.lock();
        if state.fail_allocations {
            return Err(injected("allocation"));
        }
        let id = u32::try_from(state.pages.len())
            .map_err(|_| StoreError::Invalid("page id space exhausted"))?;
        state.pages.push(vec![0u8; self.page_size].into_boxed_slice());
        state.stats.allocated += 1;
        Ok(PageId(id))
    }

    fn read_page(&self, id: PageId) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let image = state
            .pages
            .get(id.0 as usize)
            .map(|page| page.to_vec())
            .ok_or_else(|| StoreError::corruption(format!("page {id} was never allocated")))?;
        state.stats.reads += 1;
        Ok(image)
    }

    fn write_page(&self, id: PageId, data: &[u8]) -> Result<()> {
        let image = padded_image(data, self.page_size)?;
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(injected("write"));
        }
        let slot = state
            .pages
            .get_mut(id.0 as usize)
            .ok_or_else(|| StoreError::corruption(format!("page {id} was never allocated")))?;
        *slot = image.into_boxed_slice();
        state.stats.writes += 1;
        Ok(())
    }

    fn stats(&self) -> PagerStats {
        self.state.lock().stats.clone()
    }

    fn root_hint(&self) -> Option<PageId> {
        self.state.lock().root
    }

    fn set_root_hint(&self, root: PageId) -> Result<()> {
        self.state.lock().root = Some(root);
        Ok(())
    }

    fn tree_flags(&self) -> u16 {
        self.state.lock().tree_flags
    }

    fn set_tree_flags(&self, flags: u16) -> Result<()> {
        self.state.lock().tree_flags = flags;
        Ok(())
    }
}
