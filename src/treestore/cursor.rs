//! Value handles into the tree: a record (`PageRec`) and an item within a
//! record (`PageRecPos`).
//!
//! Handles are plain coordinates. Any mutation of the tree may move items,
//! so a handle is only valid until the next mutation; the coordinate
//! listener reports where items went.

use super::layout::ChildRef;
use super::page::{AddOutcome, Probe};
use super::TreeStore;
use crate::primitives::bytes::{be, buf::Cursor};
use crate::types::{PageId, Result, RowId, StoreError};

/// Length of an encoded [`PageRecPos`].
pub const ENCODED_POS_LEN: usize = 8;

/// A record of a page.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageRec {
    /// Page holding the record.
    pub page: PageId,
    /// Record index within the page.
    pub record: u16,
}

impl PageRec {
    /// Builds a handle.
    pub fn new(page: PageId, record: u16) -> Self {
        Self { page, record }
    }

    /// Number of items in the record.
    pub fn item_count(self, tree: &mut TreeStore) -> Result<u16> {
        tree.page(self.page)?.item_count(self.record)
    }

    /// Finds `component` in this record, inserting it when `add` is set.
    ///
    /// Returns `Ok(None)` for a miss without `add`. When the page has no
    /// room the largest other record is split off to a new page and the
    /// insertion is retried wherever this record ended up.
    pub fn lookup(
        self,
        tree: &mut TreeStore,
        component: &str,
        add: bool,
    ) -> Result<Option<PageRecPos>> {
        if let Probe::Found(index) = tree.page(self.page)?.find(self.record, component)? {
            return Ok(Some(PageRecPos::new(self.page, self.record, index)));
        }
        if !add {
            return Ok(None);
        }
        tree.check_component(component)?;

        let mut at = self;
        loop {
            let listener = tree.listener();
            let outcome = tree
                .page_mut(at.page)?
                .try_add(at.record, component, listener.as_deref())?;
            match outcome {
                AddOutcome::Added(index) => {
                    tree.after_mutation(at.page)?;
                    return Ok(Some(PageRecPos::new(at.page, at.record, index)));
                }
                AddOutcome::Exists => {
                    return Err(StoreError::corruption(format!(
                        "{component:?} appeared in record {} of page {} after a miss",
                        at.record, at.page
                    )))
                }
                AddOutcome::NoRoom => at = tree.split(at)?,
            }
        }
    }
}

/// An item of a record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageRecPos {
    /// Page holding the item.
    pub page: PageId,
    /// Record index within the page.
    pub record: u16,
    /// Item index within the record.
    pub index: u16,
}

impl PageRecPos {
    /// Builds a handle.
    pub fn new(page: PageId, record: u16, index: u16) -> Self {
        Self {
            page,
            record,
            index,
        }
    }

    /// The record holding this item.
    pub fn page_rec(self) -> PageRec {
        PageRec::new(self.page, self.record)
    }

    /// The item's path component.
    pub fn name(self, tree: &mut TreeStore) -> Result<String> {
        Ok(tree
            .page(self.page)?
            .item(self.record, self.index)?
            .name
            .clone())
    }

    /// The item's row id.
    pub fn row_id(self, tree: &mut TreeStore) -> Result<RowId> {
        Ok(tree.page(self.page)?.item(self.record, self.index)?.row_id)
    }

    /// Replaces the item's row id.
    pub fn set_row_id(self, tree: &mut TreeStore, row_id: RowId) -> Result<()> {
        tree.page_mut(self.page)?
            .set_row_id(self.record, self.index, row_id)?;
        tree.after_mutation(self.page)
    }

    /// The item's timestamp; fails when the store keeps none.
    pub fn timestamp(self, tree: &mut TreeStore) -> Result<i64> {
        if !tree.has_timestamps() {
            return Err(StoreError::Invalid("tree store has no timestamps"));
        }
        Ok(tree.page(self.page)?.item(self.record, self.index)?.timestamp)
    }

    /// Replaces the item's timestamp; fails when the store keeps none.
    pub fn set_timestamp(self, tree: &mut TreeStore, timestamp: i64) -> Result<()> {
        tree.page_mut(self.page)?
            .set_timestamp(self.record, self.index, timestamp)?;
        tree.after_mutation(self.page)
    }

    /// Where the item's children live.
    pub fn child(self, tree: &mut TreeStore) -> Result<ChildRef> {
        Ok(tree.page(self.page)?.item(self.record, self.index)?.child)
    }

    /// The record holding the item's children.
    ///
    /// A leaf has none unless `add` is set, in which case an empty child
    /// record is created on this page or, without room, on a new page.
    pub fn children(self, tree: &mut TreeStore, add: bool) -> Result<Option<PageRec>> {
        match self.child(tree)? {
            ChildRef::Local(record) => Ok(Some(PageRec::new(self.page, record))),
            ChildRef::Page(page) => Ok(Some(PageRec::new(page, 0))),
            ChildRef::Leaf if !add => Ok(None),
            ChildRef::Leaf => {
                let local = tree
                    .page_mut(self.page)?
                    .add_empty_child_record(self.record, self.index)?;
                if let Some(record) = local {
                    tree.after_mutation(self.page)?;
                    return Ok(Some(PageRec::new(self.page, record)));
                }
                let page = tree.add_empty_page_with_an_empty_child_record()?;
                tree.page_mut(self.page)?
                    .set_child(self.record, self.index, ChildRef::page(page)?)?;
                tree.after_mutation(self.page)?;
                Ok(Some(PageRec::new(page, 0)))
            }
        }
    }

    /// Removes the item and everything below it.
    pub fn delete(self, tree: &mut TreeStore) -> Result<()> {
        let children = self.children(tree, false)?;
        let listener = tree.listener();
        tree.page_mut(self.page)?
            .delete_item(self.record, self.index, listener.as_deref())?;
        tree.after_mutation(self.page)?;
        if let Some(children) = children {
            tree.delete_subtree(children)?;
        }
        Ok(())
    }

    /// Encodes the handle as `page:u32, record:u16, index:u16`.
    pub fn encode(self) -> [u8; ENCODED_POS_LEN] {
        let mut out = Vec::with_capacity(ENCODED_POS_LEN);
        self.write_to(&mut out);
        let mut encoded = [0u8; ENCODED_POS_LEN];
        encoded.copy_from_slice(&out);
        encoded
    }

    /// Appends the encoded handle to `out`.
    pub fn write_to(self, out: &mut Vec<u8>) {
        be::put_u32(out, self.page.0);
        be::put_u16(out, self.record);
        be::put_u16(out, self.index);
    }

    /// Decodes a handle written by [`PageRecPos::write_to`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let page = PageId(cursor.read_u32()?);
        let record = cursor.read_u16()?;
        let index = cursor.read_u16()?;
        Ok(Self::new(page, record, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_layout_is_big_endian() {
        let pos = PageRecPos::new(PageId(0x0102_0304), 5, 0x0607);
        assert_eq!(pos.encode(), [1, 2, 3, 4, 0, 5, 6, 7]);
        assert_eq!(PageRecPos::decode(&pos.encode()).unwrap(), pos);
    }

    #[test]
    fn short_buffer_is_corruption() {
        assert!(matches!(
            PageRecPos::decode(&[0, 0, 0, 1, 0]),
            Err(StoreError::Corruption(_))
        ));
    }
}
