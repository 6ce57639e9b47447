//! Notification hook for items whose coordinates change.

use crate::types::{PageId, RowId};

/// Receives the new physical location of items that moved.
///
/// Invoked synchronously from inside the mutation that moved the item:
/// insertions and deletions that shift siblings, record renumbering, and
/// page splits. Never invoked for lookups that miss.
pub trait CoordListener: Send + Sync {
    /// `row_id` now lives at item `index` of `record` on `page`.
    fn coord_changed(&self, row_id: RowId, page: PageId, record: u16, index: u16);
}

impl<F> CoordListener for F
where
    F: Fn(RowId, PageId, u16, u16) + Send + Sync,
{
    fn coord_changed(&self, row_id: RowId, page: PageId, record: u16, index: u16) {
        self(row_id, page, record, index)
    }
}
