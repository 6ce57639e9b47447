//! Size constants and tagged values of the serialized page layout.
//!
//! ```text
//! Page:    recordCount:u16, recordOffset[0..=recordCount]:u16, Record*
//! Record:  itemCount:u16, (itemOffset:u16, childRef:u16) * itemCount,
//!          itemOffsetEnd:u16, Item*
//! Item:    rowId:i32, [timestamp:i64], name bytes
//! ```
//!
//! Record offsets are page-relative, item offsets are relative to the start
//! of their record. All integers are big-endian.

use crate::types::{PageId, Result, StoreError};

/// Raw child values at or above this marker encode `PAGE_MARKER + page id`.
pub const PAGE_MARKER: u16 = 10_000;
/// Largest page id a cross-page child reference can address.
pub const MAX_CROSS_PAGE_ID: u32 = (u16::MAX - PAGE_MARKER) as u32;

const COUNT_LEN: usize = 2;
const OFFSET_LEN: usize = 2;
const CHILD_LEN: usize = 2;

/// Serialized size of a page holding no records.
pub const EMPTY_PAGE_LEN: usize = COUNT_LEN + OFFSET_LEN;
/// Header bytes each record adds to its page.
pub const PAGE_BYTES_PER_RECORD: usize = OFFSET_LEN;
/// Serialized size of a record holding no items.
pub const EMPTY_RECORD_LEN: usize = COUNT_LEN + OFFSET_LEN;
/// Record metadata bytes each item adds.
pub const RECORD_BYTES_PER_ITEM: usize = OFFSET_LEN + CHILD_LEN;

/// Where an item's children live.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChildRef {
    /// No children.
    Leaf,
    /// Another record of the same page (never record 0).
    Local(u16),
    /// Record 0 of another page.
    Page(PageId),
}

impl ChildRef {
    /// Builds a cross-page reference, rejecting ids the encoding cannot hold.
    pub fn page(id: PageId) -> Result<Self> {
        if id.0 > MAX_CROSS_PAGE_ID {
            return Err(StoreError::Invalid(
                "page id exceeds cross-page reference range",
            ));
        }
        Ok(ChildRef::Page(id))
    }

    /// Decodes the raw `u16` stored in a record.
    pub fn decode(raw: u16) -> Self {
        match raw {
            0 => ChildRef::Leaf,
            r if r < PAGE_MARKER => ChildRef::Local(r),
            p => ChildRef::Page(PageId(u32::from(p - PAGE_MARKER))),
        }
    }

    /// Encodes the reference as the raw `u16` stored in a record.
    pub fn encode(self) -> Result<u16> {
        match self {
            ChildRef::Leaf => Ok(0),
            ChildRef::Local(0) => Err(StoreError::Invalid("record 0 cannot be a local child")),
            ChildRef::Local(r) if r >= PAGE_MARKER => {
                Err(StoreError::Invalid("local record index reaches page marker"))
            }
            ChildRef::Local(r) => Ok(r),
            ChildRef::Page(id) if id.0 > MAX_CROSS_PAGE_ID => Err(StoreError::Invalid(
                "page id exceeds cross-page reference range",
            )),
            ChildRef::Page(id) => Ok(PAGE_MARKER + id.0 as u16),
        }
    }

    /// Returns true when the item has no children.
    pub fn is_leaf(self) -> bool {
        matches!(self, ChildRef::Leaf)
    }
}

/// Tree flag set when items carry a timestamp.
pub const TREE_FLAG_TIMESTAMPS: u16 = 0x0001;

/// Fixed-width data stored in front of every item name.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ItemPayload {
    /// `rowId:i32` only.
    #[default]
    RowId,
    /// `rowId:i32` followed by `timestamp:i64`.
    RowIdAndTimestamp,
}

impl ItemPayload {
    /// Serialized length of the payload.
    pub fn len(self) -> usize {
        match self {
            ItemPayload::RowId => 4,
            ItemPayload::RowIdAndTimestamp => 12,
        }
    }

    /// Whether items carry a timestamp.
    pub fn has_timestamp(self) -> bool {
        matches!(self, ItemPayload::RowIdAndTimestamp)
    }

    /// Tree flags recording this payload in the backing store header.
    pub fn flags(self) -> u16 {
        match self {
            ItemPayload::RowId => 0,
            ItemPayload::RowIdAndTimestamp => TREE_FLAG_TIMESTAMPS,
        }
    }

    /// Inverse of [`ItemPayload::flags`]; unknown bits are corruption.
    pub fn from_flags(flags: u16) -> Result<Self> {
        match flags {
            0 => Ok(ItemPayload::RowId),
            TREE_FLAG_TIMESTAMPS => Ok(ItemPayload::RowIdAndTimestamp),
            other => Err(StoreError::corruption(format!(
                "unknown tree flags 0x{other:04x}"
            ))),
        }
    }
}

/// Bytes an item with a name of `name_len` bytes adds to its record.
pub fn item_len(payload: ItemPayload, name_len: usize) -> usize {
    RECORD_BYTES_PER_ITEM + payload.len() + name_len
}

/// Longest name that fits on a page holding a single one-item record.
pub fn max_name_len(page_size: usize, payload: ItemPayload) -> usize {
    page_size.saturating_sub(
        EMPTY_PAGE_LEN + PAGE_BYTES_PER_RECORD + EMPTY_RECORD_LEN + item_len(payload, 0),
    )
}
