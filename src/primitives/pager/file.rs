use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use super::meta::{create_meta, load_meta, store_meta, Meta};
use super::store::{padded_image, PageStore, PagerOptions, PagerStats};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{page_crc32, PageId, Result, StoreError};

/// Bytes appended to each page payload for its checksum.
pub const PAGE_TRAILER_LEN: usize = 4;

struct FileState {
    meta: Meta,
    stats: PagerStats,
}

/// Page store backed by a single file.
///
/// Slot 0 holds the [`Meta`] header; data page `n` lives in slot `n`. Each
/// slot is the page payload followed by a CRC32 of the page number, the file
/// salt and the payload.
pub struct FilePageStore {
    io: Arc<dyn FileIo>,
    page_size: usize,
    fsync: bool,
    state: Mutex<FileState>,
}

impl FilePageStore {
    /// Opens the file at `path`, initializing it when empty.
    ///
    /// An existing file keeps the page size recorded in its header.
    pub fn open(path: impl AsRef<Path>, options: PagerOptions) -> Result<Self> {
        let path = path.as_ref();
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(path)?);
        Self::with_io(io, options)
    }

    /// Opens a store over an arbitrary [`FileIo`].
    pub fn with_io(io: Arc<dyn FileIo>, options: PagerOptions) -> Result<Self> {
        options.validate()?;
        let meta = if io.is_empty()? {
            let meta = create_meta(io.as_ref(), options.page_size)?;
            tracing::debug!(
                target: "treestore::pager",
                page_size = meta.page_size,
                "initialized tree store file"
            );
            meta
        } else {
            let meta = load_meta(io.as_ref())?;
            PagerOptions {
                page_size: meta.page_size,
                ..options.clone()
            }
            .validate()
            .map_err(|_| StoreError::corruption("meta page size out of range"))?;
            if meta.page_size != options.page_size {
                tracing::debug!(
                    target: "treestore::pager",
                    requested = options.page_size,
                    stored = meta.page_size,
                    "using page size recorded in file header"
                );
            }
            meta
        };
        Ok(Self {
            io,
            page_size: meta.page_size as usize,
            fsync: options.fsync,
            state: Mutex::new(FileState {
                meta,
                stats: PagerStats::default(),
            }),
        })
    }

    /// Returns a copy of the file header.
    pub fn meta(&self) -> Meta {
        self.state.lock().meta.clone()
    }

    fn slot_len(&self) -> u64 {
        (self.page_size + PAGE_TRAILER_LEN) as u64
    }

    fn slot_offset(&self, id: PageId) -> u64 {
        u64::from(id.0) * self.slot_len()
    }

    fn check_allocated(meta: &Meta, id: PageId) -> Result<()> {
        if id.0 == 0 || id.0 >= meta.next_page.0 {
            return Err(StoreError::corruption(format!(
                "page {id} outside allocated range 1..{}",
                meta.next_page
            )));
        }
        Ok(())
    }

    fn write_slot(&self, meta: &Meta, id: PageId, payload: &[u8]) -> Result<()> {
        let crc = page_crc32(id.0, meta.salt, payload);
        let mut slot = Vec::with_capacity(payload.len() + PAGE_TRAILER_LEN);
        slot.extend_from_slice(payload);
        slot.extend_from_slice(&crc.to_be_bytes());
        self.io.write_at(self.slot_offset(id), &slot)
    }
}

impl PageStore for FilePageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut state = self.state.lock();
        let id = state.meta.next_page;
        let next = id
            .0
            .checked_add(1)
            .ok_or(StoreError::Invalid("page id space exhausted"))?;
        self.write_slot(&state.meta, id, &vec![0u8; self.page_size])?;
        state.meta.next_page = PageId(next);
        store_meta(self.io.as_ref(), &state.meta)?;
        state.stats.allocated += 1;
        tracing::trace!(target: "treestore::pager", page = id.0, "allocated page");
        Ok(id)
    }

    fn read_page(&self, id: PageId) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        Self::check_allocated(&state.meta, id)?;
        let mut slot = vec![0u8; self.page_size + PAGE_TRAILER_LEN];
        self.io.read_at(self.slot_offset(id), &mut slot)?;
        let mut stored = [0u8; PAGE_TRAILER_LEN];
        stored.copy_from_slice(&slot[self.page_size..]);
        slot.truncate(self.page_size);
        let expected = page_crc32(id.0, state.meta.salt, &slot);
        if u32::from_be_bytes(stored) != expected {
            return Err(StoreError::corruption(format!(
                "checksum mismatch on page {id}"
            )));
        }
        state.stats.reads += 1;
        Ok(slot)
    }

    fn write_page(&self, id: PageId, data: &[u8]) -> Result<()> {
        let image = padded_image(data, self.page_size)?;
        let mut state = self.state.lock();
        Self::check_allocated(&state.meta, id)?;
        self.write_slot(&state.meta, id, &image)?;
        state.stats.writes += 1;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let state = self.state.lock();
        store_meta(self.io.as_ref(), &state.meta)?;
        if self.fsync {
            self.io.sync_all()?;
        }
        Ok(())
    }

    fn stats(&self) -> PagerStats {
        self.state.lock().stats.clone()
    }

    fn root_hint(&self) -> Option<PageId> {
        self.state.lock().meta.root()
    }

    fn set_root_hint(&self, root: PageId) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_allocated(&state.meta, root)?;
        state.meta.tree_root = root;
        store_meta(self.io.as_ref(), &state.meta)
    }

    fn tree_flags(&self) -> u16 {
        self.state.lock().meta.tree_flags
    }

    fn set_tree_flags(&self, flags: u16) -> Result<()> {
        let mut state = self.state.lock();
        state.meta.tree_flags = flags;
        store_meta(self.io.as_ref(), &state.meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::MemFileIo;
    use tempfile::tempdir;

    fn options() -> PagerOptions {
        PagerOptions::default().page_size(256).fsync(false)
    }

    #[test]
    fn pages_survive_reopen() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.trst");
        let (a, b) = {
            let store = FilePageStore::open(&path, options())?;
            let a = store.allocate_page()?;
            let b = store.allocate_page()?;
            store.write_page(b, b"second page")?;
            store.set_root_hint(a)?;
            store.set_tree_flags(0x0001)?;
            store.sync()?;
            (a, b)
        };
        assert_eq!((a, b), (PageId(1), PageId(2)));

        let store = FilePageStore::open(&path, PagerOptions::default())?;
        assert_eq!(store.page_size(), 256);
        assert_eq!(store.root_hint(), Some(a));
        assert_eq!(store.tree_flags(), 0x0001);
        assert_eq!(store.meta().data_pages(), 2);
        assert_eq!(store.read_page(a)?, vec![0u8; 256]);
        assert_eq!(&store.read_page(b)?[..11], b"second page");
        Ok(())
    }

    #[test]
    fn torn_page_is_reported_as_corruption() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.trst");
        let store = FilePageStore::open(&path, options())?;
        let id = store.allocate_page()?;
        store.write_page(id, b"payload")?;
        let raw = StdFileIo::open(&path)?;
        raw.write_at(store.slot_offset(id) + 3, b"X")?;
        assert!(matches!(store.read_page(id), Err(StoreError::Corruption(_))));
        Ok(())
    }

    #[test]
    fn unallocated_and_header_pages_are_rejected() {
        let dir = tempdir().unwrap();
        let store = FilePageStore::open(dir.path().join("x.trst"), options()).unwrap();
        assert!(store.read_page(PageId(0)).is_err());
        assert!(store.read_page(PageId(1)).is_err());
        assert!(store.write_page(PageId(1), b"x").is_err());
        assert!(store.set_root_hint(PageId(1)).is_err());
    }

    #[test]
    fn header_tracks_allocations_in_memory() -> Result<()> {
        let io = Arc::new(MemFileIo::default());
        let store = FilePageStore::with_io(io.clone(), options())?;
        let id = store.allocate_page()?;
        store.write_page(id, b"mem")?;
        assert_eq!(io.len()?, 2 * (256 + PAGE_TRAILER_LEN) as u64);

        let reopened = FilePageStore::with_io(io.clone(), PagerOptions::default())?;
        assert_eq!(reopened.meta().next_page, PageId(2));
        assert_eq!(reopened.meta().salt, store.meta().salt);
        assert_eq!(&reopened.read_page(id)?[..3], b"mem");
        assert_eq!(&io.snapshot()[..4], b"TRST");
        Ok(())
    }

    #[test]
    fn oversized_write_is_invalid() {
        let dir = tempdir().unwrap();
        let store = FilePageStore::open(dir.path().join("y.trst"), options()).unwrap();
        let id = store.allocate_page().unwrap();
        assert!(matches!(
            store.write_page(id, &[0u8; 300]),
            Err(StoreError::Invalid(_))
        ));
    }
}
