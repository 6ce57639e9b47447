//! Paged trie mapping string paths to row ids.
//!
//! A [`TreeStore`] owns a cache of [`Page`]s loaded from a [`PageStore`].
//! Each page holds records of name-sorted items; an item's children are a
//! record on the same page or record 0 of another page. Path lookups walk
//! one component per level, inserting missing components on request and
//! splitting pages that run out of room.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use lru::LruCache;

use crate::primitives::pager::{PageStore, MAX_PAGE_SIZE};
use crate::types::{PageId, Result, StoreError};

pub mod cursor;
pub mod iter;
pub mod layout;
pub mod listener;
pub mod options;
pub mod page;
pub mod renumber;
pub mod stats;


pub use cursor::{PageRec, PageRecPos, ENCODED_POS_LEN};
pub use iter::{LeafIterator, TreeLeaf};
pub use layout::{ChildRef, ItemPayload, PAGE_MARKER};
pub use listener::CoordListener;
pub use options::{TreeStoreOptions, DEFAULT_CACHE_PAGES, DEFAULT_MAX_DEPTH};
pub use page::Page;
pub use renumber::RecordFate;
pub use stats::{LengthStats, TreeStoreStats};

use layout::{max_name_len, MAX_CROSS_PAGE_ID};

/// Entry point of the paged trie.
pub struct TreeStore {
    store: Arc<dyn PageStore>,
    root: PageId,
    pages: LruCache<PageId, Page>,
    options: TreeStoreOptions,
    listener: Option<Arc<dyn CoordListener>>,
    splits: u64,
}

fn joined<S: AsRef<str>>(path: &[S]) -> String {
    path.iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join("/")
}

impl TreeStore {
    /// Opens the tree stored in `store`, creating an empty one when the
    /// options and the store name no root page.
    pub fn open(store: Arc<dyn PageStore>, options: TreeStoreOptions) -> Result<Self> {
        let page_size = store.page_size();
        if page_size > MAX_PAGE_SIZE as usize {
            return Err(StoreError::Invalid("page size exceeds u16 offsets"));
        }
        if max_name_len(page_size, options.payload()) == 0 {
            return Err(StoreError::Invalid("page size too small for any item"));
        }
        if options.max_depth == 0 {
            return Err(StoreError::Invalid("iterator depth must be positive"));
        }
        if options.cache_pages == 0 {
            return Err(StoreError::Invalid("page cache must hold at least one page"));
        }
        let listener = options.coord_listener.clone();
        let mut tree = Self {
            store,
            root: PageId(0),
            pages: LruCache::unbounded(),
            options,
            listener,
            splits: 0,
        };

        if tree.store.root_hint().is_some() {
            let stored = ItemPayload::from_flags(tree.store.tree_flags())?;
            if stored != tree.options.payload() {
                return Err(StoreError::Invalid(if stored.has_timestamp() {
                    "store was created with timestamps"
                } else {
                    "store was created without timestamps"
                }));
            }
        }
        let root = match tree.options.root_page.or_else(|| tree.store.root_hint()) {
            Some(root) => root,
            None => {
                let page = tree.new_page()?;
                let id = page.id();
                tree.cache_page(page);
                tree.store.set_tree_flags(tree.options.payload().flags())?;
                tree.store.set_root_hint(id)?;
                tracing::debug!(target: "treestore::open", root = id.0, "created root page");
                id
            }
        };
        tree.root = root;
        if tree.page(root)?.record_count() == 0 {
            tree.page_mut(root)?
                .add_empty_record()?
                .ok_or_else(|| StoreError::corruption("no room for the root record"))?;
            tree.after_mutation(root)?;
        }
        tracing::debug!(
            target: "treestore::open",
            root = root.0,
            page_size,
            timestamps = tree.options.timestamps,
            "opened tree store"
        );
        Ok(tree)
    }

    /// The root record.
    pub fn root(&self) -> PageRec {
        PageRec::new(self.root, 0)
    }

    /// The root page id.
    pub fn root_page(&self) -> PageId {
        self.root
    }

    /// Options the store was opened with.
    pub fn options(&self) -> &TreeStoreOptions {
        &self.options
    }

    /// Whether items carry timestamps.
    pub fn has_timestamps(&self) -> bool {
        self.options.timestamps
    }

    /// Number of page splits performed since the store was opened.
    pub fn split_count(&self) -> u64 {
        self.splits
    }

    /// Replaces the coordinate listener.
    pub fn set_coord_listener(&mut self, listener: Option<Arc<dyn CoordListener>>) {
        self.listener = listener;
    }

    pub(crate) fn listener(&self) -> Option<Arc<dyn CoordListener>> {
        self.listener.clone()
    }

    /// Resolves `path` one component at a time.
    ///
    /// With `add`, missing components are inserted. Nodes created before a
    /// failing step stay in place. I/O failures and pages that cannot be
    /// split are logged and reported as `Ok(None)`; structural errors
    /// propagate.
    pub fn lookup<S: AsRef<str>>(&mut self, path: &[S], add: bool) -> Result<Option<PageRecPos>> {
        if path.is_empty() {
            return Err(StoreError::Invalid("empty path"));
        }
        tracing::trace!(
            target: "treestore::lookup",
            root = self.root.0,
            add,
            components = path.len(),
            "lookup"
        );
        match self.resolve(path, add) {
            Ok(found) => Ok(found),
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    target: "treestore::lookup",
                    root = self.root.0,
                    add,
                    path = %joined(path),
                    error = %err,
                    "lookup gave up"
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn resolve<S: AsRef<str>>(&mut self, path: &[S], add: bool) -> Result<Option<PageRecPos>> {
        let last = path.len() - 1;
        let mut at = self.root();
        for (depth, component) in path.iter().enumerate() {
            let component = component.as_ref();
            let Some(pos) = at.lookup(self, component, add)? else {
                tracing::trace!(target: "treestore::lookup", depth, component, "not found");
                return Ok(None);
            };
            if depth == last {
                tracing::trace!(
                    target: "treestore::lookup",
                    page = pos.page.0,
                    record = pos.record,
                    index = pos.index,
                    "found"
                );
                return Ok(Some(pos));
            }
            match pos.children(self, add)? {
                Some(next) => at = next,
                None => {
                    tracing::trace!(target: "treestore::lookup", depth, component, "no children");
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    /// Depth-first iterator over every leaf.
    pub fn path_iter(&mut self) -> LeafIterator<'_> {
        LeafIterator::new(self)
    }

    /// Decodes a handle written by [`PageRecPos::write_to`] and checks that
    /// it still names an item.
    pub fn read_pos(&mut self, bytes: &[u8]) -> Result<PageRecPos> {
        let pos = PageRecPos::decode(bytes)?;
        let page = self.page(pos.page)?;
        if pos.record >= page.record_count() || pos.index >= page.item_count(pos.record)? {
            return Err(StoreError::NotFound("tree position"));
        }
        Ok(pos)
    }

    /// Writes every modified page back to the page store and syncs it.
    ///
    /// Returns the number of pages written.
    pub fn flush(&mut self) -> Result<usize> {
        let mut dirty: Vec<PageId> = self
            .pages
            .iter()
            .filter(|(_, page)| page.is_dirty())
            .map(|(id, _)| *id)
            .collect();
        dirty.sort();
        for id in &dirty {
            let page = self
                .pages
                .peek_mut(id)
                .ok_or(StoreError::NotFound("cached page"))?;
            let image = page.serialize()?;
            self.store.write_page(*id, &image)?;
            page.mark_clean(image)?;
        }
        self.store.sync()?;
        self.evict_clean(0);
        tracing::debug!(
            target: "treestore::flush",
            pages = dirty.len(),
            cached = self.pages.len(),
            "flushed dirty pages"
        );
        Ok(dirty.len())
    }

    /// Number of cached pages modified since the last flush.
    pub fn dirty_pages(&self) -> usize {
        self.pages.iter().filter(|(_, page)| page.is_dirty()).count()
    }

    /// Number of pages currently held in the page cache.
    pub fn cached_pages(&self) -> usize {
        self.pages.len()
    }

    /// Page ids reachable from the root, breadth-first.
    pub fn reachable_pages(&mut self) -> Result<Vec<PageId>> {
        let mut order = Vec::new();
        let mut seen = HashSet::from([self.root]);
        let mut queue = VecDeque::from([self.root]);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            let page = self.page(id)?;
            for record in 0..page.record_count() {
                for item in &page.record(record)?.items {
                    if let ChildRef::Page(child) = item.child {
                        if seen.insert(child) {
                            queue.push_back(child);
                        } else {
                            return Err(StoreError::corruption(format!(
                                "page {child} is referenced more than once"
                            )));
                        }
                    }
                }
            }
        }
        Ok(order)
    }

    /// Runs the page consistency check over every reachable page.
    ///
    /// Returns the number of pages checked.
    pub fn check(&mut self) -> Result<usize> {
        let pages = self.reachable_pages()?;
        for id in &pages {
            self.page(*id)?.consistency_check()?;
        }
        Ok(pages.len())
    }

    /// Counts pages, records, items and component lengths.
    pub fn stats(&mut self) -> Result<TreeStoreStats> {
        let mut stats = TreeStoreStats::default();
        for id in self.reachable_pages()? {
            let page = self.page(id)?;
            stats.pages += 1;
            stats.bytes_used += page.total_size() as u64;
            stats.bytes_capacity += page.page_size() as u64;
            for record in 0..page.record_count() {
                stats.records += 1;
                for item in &page.record(record)?.items {
                    stats.items += 1;
                    if item.child.is_leaf() {
                        stats.leaves += 1;
                    }
                    stats
                        .component_length
                        .add(item.name.chars().count() as u64);
                }
            }
        }
        Ok(stats)
    }

    /// Text dump of every reachable page. `detailed` adds page fill and
    /// item timestamps.
    pub fn dump(&mut self, detailed: bool) -> Result<String> {
        let timestamps = self.has_timestamps();
        let mut out = format!("TreeStore root={}\n", self.root);
        for id in self.reachable_pages()? {
            let page = self.page(id)?;
            out.push_str(&format!("  PAGE {}: {} records", id, page.record_count()));
            if detailed {
                out.push_str(&format!(" ({}/{} bytes)", page.total_size(), page.page_size()));
            }
            out.push('\n');
            for record in 0..page.record_count() {
                let items = &page.record(record)?.items;
                out.push_str(&format!("    Rec{}: {} items\n", record, items.len()));
                for (index, item) in items.iter().enumerate() {
                    let child = match item.child {
                        ChildRef::Leaf => "NONE".to_string(),
                        ChildRef::Local(r) => format!("Rec{r}"),
                        ChildRef::Page(p) => format!("Page{p}"),
                    };
                    out.push_str(&format!(
                        "      Item{}: child {} {:?} {}",
                        index, child, item.name, item.row_id
                    ));
                    if detailed && timestamps {
                        out.push_str(&format!(" ts={}", item.timestamp));
                    }
                    out.push('\n');
                }
            }
        }
        Ok(out)
    }

    /// Dump without page fill details, stable across flush and reopen.
    pub fn to_testable_string(&mut self) -> Result<String> {
        self.dump(false)
    }

    pub(crate) fn page(&mut self, id: PageId) -> Result<&Page> {
        self.load(id).map(|page| &*page)
    }

    pub(crate) fn page_mut(&mut self, id: PageId) -> Result<&mut Page> {
        self.load(id)
    }

    fn load(&mut self, id: PageId) -> Result<&mut Page> {
        if !self.pages.contains(&id) {
            let image = self.store.read_page(id)?;
            let page = Page::parse(id, image, self.store.page_size(), self.options.payload())?;
            tracing::trace!(
                target: "treestore::pages",
                page = id.0,
                records = page.record_count(),
                "loaded page"
            );
            self.cache_page(page);
        }
        self.pages
            .get_mut(&id)
            .ok_or(StoreError::NotFound("cached page"))
    }

    fn cache_page(&mut self, page: Page) {
        self.evict_clean(1);
        self.pages.put(page.id(), page);
    }

    /// Drops least recently used clean pages until `reserve` more pages fit
    /// within the configured capacity.
    fn evict_clean(&mut self, reserve: usize) {
        let excess = (self.pages.len() + reserve).saturating_sub(self.options.cache_pages);
        if excess == 0 {
            return;
        }
        let victims: Vec<PageId> = self
            .pages
            .iter()
            .rev()
            .filter(|(_, page)| !page.is_dirty())
            .map(|(id, _)| *id)
            .take(excess)
            .collect();
        for id in &victims {
            self.pages.pop(id);
        }
        tracing::trace!(target: "treestore::pages", evicted = victims.len(), "evicted clean pages");
    }

    pub(crate) fn after_mutation(&self, id: PageId) -> Result<()> {
        if self.options.consistency_checks {
            if let Some(page) = self.pages.peek(&id) {
                page.consistency_check()?;
            }
        }
        Ok(())
    }

    pub(crate) fn check_component(&self, component: &str) -> Result<()> {
        if component.len() > max_name_len(self.store.page_size(), self.options.payload()) {
            return Err(StoreError::Invalid("path component too long for page size"));
        }
        Ok(())
    }

    fn new_page(&mut self) -> Result<Page> {
        let id = self.store.allocate_page()?;
        if id.0 > MAX_CROSS_PAGE_ID {
            return Err(StoreError::Invalid(
                "page id exceeds cross-page reference range",
            ));
        }
        tracing::debug!(target: "treestore::pages", page = id.0, "allocated page");
        Ok(Page::empty(id, self.store.page_size(), self.options.payload()))
    }

    /// Allocates a page holding one empty record 0.
    pub(crate) fn add_empty_page_with_an_empty_child_record(&mut self) -> Result<PageId> {
        let mut page = self.new_page()?;
        if page.add_empty_record()? != Some(0) {
            return Err(StoreError::corruption(
                "first record of an empty page is expected to be 0",
            ));
        }
        let id = page.id();
        self.cache_page(page);
        self.after_mutation(id)?;
        Ok(id)
    }

    /// Moves the largest record other than record 0 of `at.page` to a new
    /// page and returns where `at` ended up.
    pub(crate) fn split(&mut self, at: PageRec) -> Result<PageRec> {
        let candidate = self
            .page(at.page)?
            .find_largest_record()?
            .ok_or(StoreError::PageFull(at.page))?;
        let mut target = self.new_page()?;
        let target_id = target.id();
        let listener = self.listener();
        let fates = self
            .page_mut(at.page)?
            .move_record(candidate, &mut target, listener.as_deref())?;
        self.cache_page(target);
        self.splits += 1;
        tracing::debug!(
            target: "treestore::split",
            page = at.page.0,
            record = candidate,
            target = target_id.0,
            "moved record to a new page"
        );
        self.after_mutation(at.page)?;
        self.after_mutation(target_id)?;
        let fate = fates.get(at.record as usize).copied().ok_or_else(|| {
            StoreError::corruption(format!(
                "record {} missing from split mapping of page {}",
                at.record, at.page
            ))
        })?;
        Ok(match fate {
            RecordFate::Moved(record) => PageRec::new(target_id, record),
            RecordFate::Kept(record) => PageRec::new(at.page, record),
        })
    }

    /// Removes `top` and every record below it. Record 0 of a page is
    /// emptied instead of removed.
    pub(crate) fn delete_subtree(&mut self, top: PageRec) -> Result<()> {
        let mut plans: Vec<(PageRec, Vec<u16>)> = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([top]);
        while let Some(at) = queue.pop_front() {
            if !seen.insert(at.page) {
                return Err(StoreError::corruption(format!(
                    "page {} reached twice while deleting a subtree",
                    at.page
                )));
            }
            let page = self.page(at.page)?;
            let order = renumber::preorder(at.record, page.record_count() as usize, |r| {
                Ok(page.record(r)?.local_children())
            })?;
            for &record in &order {
                for item in &page.record(record)?.items {
                    if let ChildRef::Page(child) = item.child {
                        queue.push_back(PageRec::new(child, 0));
                    }
                }
            }
            plans.push((at, order));
        }

        let listener = self.listener();
        for (at, order) in plans {
            let page = self.page_mut(at.page)?;
            let mut doomed = vec![false; page.record_count() as usize];
            for &record in &order {
                doomed[record as usize] = true;
            }
            if doomed[0] {
                page.clear_record(0)?;
                doomed[0] = false;
            }
            page.remove_records(&doomed, listener.as_deref())?;
            self.after_mutation(at.page)?;
            tracing::debug!(
                target: "treestore::delete",
                page = at.page.0,
                records = order.len(),
                "deleted subtree records"
            );
        }
        Ok(())
    }
}
