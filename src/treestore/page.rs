//! One serialized trie page: records of name-sorted items.
//!
//! A page starts out [`PageState::Serialized`]: only the record offset table
//! is parsed and records are decoded on first access. The first mutation
//! decodes everything and switches the page to [`PageState::Materialized`],
//! where it stays until [`Page::serialize`] output is written back and
//! [`Page::mark_clean`] is called.

use std::cell::OnceCell;
use std::fmt;

use super::layout::{
    item_len, ChildRef, ItemPayload, EMPTY_PAGE_LEN, EMPTY_RECORD_LEN, MAX_CROSS_PAGE_ID,
    PAGE_BYTES_PER_RECORD, PAGE_MARKER, RECORD_BYTES_PER_ITEM,
};
use super::listener::CoordListener;
use super::renumber::{self, RecordFate};
use crate::primitives::bytes::{be, buf::Cursor};
use crate::types::{PageId, Result, RowId, StoreError};

/// One trie edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    /// Path component.
    pub name: String,
    /// Where the item's children live.
    pub child: ChildRef,
    /// Caller-assigned payload.
    pub row_id: RowId,
    /// Caller-assigned timestamp; always 0 when the store has none.
    pub timestamp: i64,
}

impl Item {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            child: ChildRef::Leaf,
            row_id: 0,
            timestamp: 0,
        }
    }
}

/// Name-sorted items of one record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    /// Items in strictly increasing name order.
    pub items: Vec<Item>,
}

impl Record {
    /// Serialized size of the record.
    pub fn size(&self, payload: ItemPayload) -> usize {
        EMPTY_RECORD_LEN
            + self
                .items
                .iter()
                .map(|item| item_len(payload, item.name.len()))
                .sum::<usize>()
    }

    /// Local child records in item order.
    pub fn local_children(&self) -> Vec<u16> {
        self.items
            .iter()
            .filter_map(|item| match item.child {
                ChildRef::Local(record) => Some(record),
                _ => None,
            })
            .collect()
    }
}

/// Result of a binary search within a record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Probe {
    /// The name is stored at this index.
    Found(u16),
    /// The name is absent and would be inserted at this index.
    Absent(u16),
}

/// Result of [`Page::try_add`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// The item was inserted at this index.
    Added(u16),
    /// An item with this name already exists.
    Exists,
    /// The page has no room for the item.
    NoRoom,
}

enum PageState {
    Serialized {
        data: Vec<u8>,
        record_offsets: Vec<u16>,
        decoded: Vec<OnceCell<Record>>,
    },
    Materialized {
        records: Vec<Record>,
    },
}

/// A trie page held in the tree store's page cache.
pub struct Page {
    id: PageId,
    page_size: usize,
    payload: ItemPayload,
    total_size: usize,
    state: PageState,
}

fn bad_record() -> StoreError {
    StoreError::Invalid("record index out of range")
}

fn bad_item() -> StoreError {
    StoreError::Invalid("item index out of range")
}

fn notify_from(
    listener: Option<&dyn CoordListener>,
    page: PageId,
    record: u16,
    items: &[Item],
    from: usize,
) {
    if let Some(listener) = listener {
        for (index, item) in items.iter().enumerate().skip(from) {
            listener.coord_changed(item.row_id, page, record, index as u16);
        }
    }
}

fn decode_record(
    data: &[u8],
    start: usize,
    end: usize,
    payload: ItemPayload,
    page: PageId,
    record: usize,
) -> Result<Record> {
    let mut cursor = Cursor::at(data, start);
    let count = cursor.read_u16()? as usize;
    let mut offsets = Vec::with_capacity(count + 1);
    let mut children = Vec::with_capacity(count);
    for _ in 0..count {
        offsets.push(cursor.read_u16()? as usize);
        children.push(ChildRef::decode(cursor.read_u16()?));
    }
    offsets.push(cursor.read_u16()? as usize);

    if offsets[0] != EMPTY_RECORD_LEN + RECORD_BYTES_PER_ITEM * count {
        return Err(StoreError::corruption(format!(
            "record {record} on page {page}: first item offset {} does not follow {count} item slots",
            offsets[0]
        )));
    }
    if start + offsets[count] != end {
        return Err(StoreError::corruption(format!(
            "record {record} on page {page}: items end at {} but record ends at {end}",
            start + offsets[count]
        )));
    }

    let mut items = Vec::with_capacity(count);
    for (index, child) in children.into_iter().enumerate() {
        let name_len = offsets[index + 1]
            .checked_sub(offsets[index])
            .and_then(|len| len.checked_sub(payload.len()))
            .ok_or_else(|| {
                StoreError::corruption(format!(
                    "record {record} on page {page}: item {index} shorter than its payload"
                ))
            })?;
        let mut item = Cursor::at(data, start + offsets[index]);
        let row_id = item.read_i32()?;
        let timestamp = if payload.has_timestamp() {
            item.read_i64()?
        } else {
            0
        };
        let name = std::str::from_utf8(item.take(name_len)?)
            .map_err(|_| {
                StoreError::corruption(format!(
                    "record {record} on page {page}: item {index} name is not UTF-8"
                ))
            })?
            .to_owned();
        items.push(Item {
            name,
            child,
            row_id,
            timestamp,
        });
    }
    Ok(Record { items })
}

fn expect_pos(out: &[u8], expected: usize, what: &str) -> Result<()> {
    if out.len() != expected {
        return Err(StoreError::corruption(format!(
            "page layout calculation failed at {what}: wrote {} bytes, expected {expected}",
            out.len()
        )));
    }
    Ok(())
}

fn to_u16(value: usize) -> Result<u16> {
    u16::try_from(value).map_err(|_| StoreError::corruption("page offset exceeds u16"))
}

impl Page {
    /// A page with no records, not yet written anywhere.
    pub fn empty(id: PageId, page_size: usize, payload: ItemPayload) -> Self {
        Self {
            id,
            page_size,
            payload,
            total_size: EMPTY_PAGE_LEN,
            state: PageState::Materialized {
                records: Vec::new(),
            },
        }
    }

    /// Parses the page header of a stored image. Records are decoded lazily.
    pub fn parse(id: PageId, data: Vec<u8>, page_size: usize, payload: ItemPayload) -> Result<Self> {
        let mut cursor = Cursor::new(&data);
        let count = cursor.read_u16()?;
        if count == 0 {
            return Ok(Self {
                id,
                page_size,
                payload,
                total_size: EMPTY_PAGE_LEN,
                state: PageState::Serialized {
                    data,
                    record_offsets: vec![EMPTY_PAGE_LEN as u16],
                    decoded: Vec::new(),
                },
            });
        }
        if count >= PAGE_MARKER {
            return Err(StoreError::corruption(format!(
                "page {id}: record count {count} reaches page marker"
            )));
        }
        let mut record_offsets = Vec::with_capacity(count as usize + 1);
        for _ in 0..=count {
            record_offsets.push(cursor.read_u16()?);
        }
        let header = EMPTY_PAGE_LEN + PAGE_BYTES_PER_RECORD * count as usize;
        if record_offsets[0] as usize != header {
            return Err(StoreError::corruption(format!(
                "page {id}: first record offset {} does not follow a {header} byte header",
                record_offsets[0]
            )));
        }
        for (record, pair) in record_offsets.windows(2).enumerate() {
            if (pair[1] as usize) < pair[0] as usize + EMPTY_RECORD_LEN {
                return Err(StoreError::corruption(format!(
                    "page {id}: record {record} spans {}..{}",
                    pair[0], pair[1]
                )));
            }
        }
        let total_size = record_offsets[count as usize] as usize;
        if total_size > page_size || total_size > data.len() {
            return Err(StoreError::corruption(format!(
                "page {id}: records end at {total_size}, past the {page_size} byte page"
            )));
        }
        let decoded = (0..count).map(|_| OnceCell::new()).collect();
        Ok(Self {
            id,
            page_size,
            payload,
            total_size,
            state: PageState::Serialized {
                data,
                record_offsets,
                decoded,
            },
        })
    }

    /// The page id.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Item payload layout of this page.
    pub fn payload(&self) -> ItemPayload {
        self.payload
    }

    /// Number of records.
    pub fn record_count(&self) -> u16 {
        match &self.state {
            PageState::Serialized { record_offsets, .. } => (record_offsets.len() - 1) as u16,
            PageState::Materialized { records } => records.len() as u16,
        }
    }

    /// Serialized size of the page.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Capacity of the page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Whether the page was mutated since it was last written.
    pub fn is_dirty(&self) -> bool {
        matches!(self.state, PageState::Materialized { .. })
    }

    /// Returns a record, decoding it on first access.
    pub fn record(&self, record: u16) -> Result<&Record> {
        match &self.state {
            PageState::Materialized { records } => {
                records.get(record as usize).ok_or_else(bad_record)
            }
            PageState::Serialized {
                data,
                record_offsets,
                decoded,
            } => {
                let index = record as usize;
                let cell = decoded.get(index).ok_or_else(bad_record)?;
                if let Some(cached) = cell.get() {
                    return Ok(cached);
                }
                let parsed = decode_record(
                    data,
                    record_offsets[index] as usize,
                    record_offsets[index + 1] as usize,
                    self.payload,
                    self.id,
                    index,
                )?;
                Ok(cell.get_or_init(|| parsed))
            }
        }
    }

    /// Serialized size of one record.
    pub fn record_size(&self, record: u16) -> Result<usize> {
        match &self.state {
            PageState::Serialized { record_offsets, .. } => {
                let index = record as usize;
                if index + 1 >= record_offsets.len() {
                    return Err(bad_record());
                }
                Ok((record_offsets[index + 1] - record_offsets[index]) as usize)
            }
            PageState::Materialized { records } => records
                .get(record as usize)
                .map(|r| r.size(self.payload))
                .ok_or_else(bad_record),
        }
    }

    /// Number of items in a record.
    pub fn item_count(&self, record: u16) -> Result<u16> {
        Ok(self.record(record)?.items.len() as u16)
    }

    /// Returns one item.
    pub fn item(&self, record: u16, index: u16) -> Result<&Item> {
        self.record(record)?
            .items
            .get(index as usize)
            .ok_or_else(bad_item)
    }

    /// Binary search for `name` within a record.
    pub fn find(&self, record: u16, name: &str) -> Result<Probe> {
        let items = &self.record(record)?.items;
        Ok(
            match items.binary_search_by(|item| item.name.as_str().cmp(name)) {
                Ok(index) => Probe::Found(index as u16),
                Err(index) => Probe::Absent(index as u16),
            },
        )
    }

    fn records_mut(&mut self) -> Result<&mut Vec<Record>> {
        if let PageState::Serialized {
            data,
            record_offsets,
            decoded,
        } = &mut self.state
        {
            let mut records = Vec::with_capacity(decoded.len());
            for (index, cell) in decoded.iter_mut().enumerate() {
                let record = match cell.take() {
                    Some(record) => record,
                    None => decode_record(
                        data,
                        record_offsets[index] as usize,
                        record_offsets[index + 1] as usize,
                        self.payload,
                        self.id,
                        index,
                    )?,
                };
                records.push(record);
            }
            self.state = PageState::Materialized { records };
        }
        match &mut self.state {
            PageState::Materialized { records } => Ok(records),
            PageState::Serialized { .. } => Err(StoreError::corruption(format!(
                "page {} stayed serialized while materializing",
                self.id
            ))),
        }
    }

    fn item_mut(&mut self, record: u16, index: u16) -> Result<&mut Item> {
        self.item(record, index)?;
        let records = self.records_mut()?;
        Ok(&mut records[record as usize].items[index as usize])
    }

    fn computed_size(&self) -> Result<usize> {
        let mut size = EMPTY_PAGE_LEN;
        for record in 0..self.record_count() {
            size += PAGE_BYTES_PER_RECORD + self.record(record)?.size(self.payload);
        }
        Ok(size)
    }

    /// Inserts a leaf item named `name` at its sorted position.
    ///
    /// Items after the insertion point shift by one and are reported to
    /// `listener`.
    pub fn try_add(
        &mut self,
        record: u16,
        name: &str,
        listener: Option<&dyn CoordListener>,
    ) -> Result<AddOutcome> {
        let index = match self.find(record, name)? {
            Probe::Found(_) => return Ok(AddOutcome::Exists),
            Probe::Absent(index) => index,
        };
        let size = item_len(self.payload, name.len());
        if self.total_size + size > self.page_size {
            return Ok(AddOutcome::NoRoom);
        }
        let page = self.id;
        let records = self.records_mut()?;
        let items = &mut records[record as usize].items;
        items.insert(index as usize, Item::new(name));
        notify_from(listener, page, record, items, index as usize + 1);
        self.total_size += size;
        Ok(AddOutcome::Added(index))
    }

    /// Appends an empty record, or returns `None` when the page has no room.
    pub fn add_empty_record(&mut self) -> Result<Option<u16>> {
        let record = self.record_count();
        if record >= PAGE_MARKER {
            return Ok(None);
        }
        let size = PAGE_BYTES_PER_RECORD + EMPTY_RECORD_LEN;
        if self.total_size + size > self.page_size {
            return Ok(None);
        }
        self.records_mut()?.push(Record::default());
        self.total_size += size;
        Ok(Some(record))
    }

    /// Appends an empty record and makes it the child of an item.
    pub fn add_empty_child_record(&mut self, record: u16, index: u16) -> Result<Option<u16>> {
        self.item(record, index)?;
        let Some(child) = self.add_empty_record()? else {
            return Ok(None);
        };
        self.item_mut(record, index)?.child = ChildRef::Local(child);
        Ok(Some(child))
    }

    /// The largest record other than record 0; the first one wins ties.
    pub fn find_largest_record(&self) -> Result<Option<u16>> {
        let mut best: Option<(u16, usize)> = None;
        for record in 1..self.record_count() {
            let size = self.record_size(record)?;
            if best.map_or(true, |(_, largest)| size > largest) {
                best = Some((record, size));
            }
        }
        Ok(best.map(|(record, _)| record))
    }

    /// Moves `record` and every record reachable from it into the empty
    /// `target` page. The moved record becomes record 0 of `target` and its
    /// parent item is re-pointed at `target`.
    ///
    /// Returns where every record of this page ended up.
    pub fn move_record(
        &mut self,
        record: u16,
        target: &mut Page,
        listener: Option<&dyn CoordListener>,
    ) -> Result<Vec<RecordFate>> {
        if record == 0 {
            return Err(StoreError::Invalid("cannot move record 0"));
        }
        if record >= self.record_count() {
            return Err(bad_record());
        }
        if target.record_count() != 0 {
            return Err(StoreError::Invalid("split target page is not empty"));
        }
        if target.payload != self.payload || target.page_size != self.page_size {
            return Err(StoreError::Invalid("split target page has a different layout"));
        }
        let target_ref = ChildRef::page(target.id)?;
        let count = self.record_count() as usize;

        let records = self.records_mut()?;
        let order = renumber::preorder(record, count, |r| {
            Ok(records[r as usize].local_children())
        })?;
        let mut moved_to = vec![None; count];
        for (new, &old) in order.iter().enumerate() {
            moved_to[old as usize] = Some(new as u16);
        }

        let mut copied = Vec::with_capacity(order.len());
        for &old in &order {
            let mut copy = records[old as usize].clone();
            for item in &mut copy.items {
                if let ChildRef::Local(child) = item.child {
                    let new = moved_to[child as usize].ok_or_else(|| {
                        StoreError::corruption(format!(
                            "record {child} reachable from {old} was not moved"
                        ))
                    })?;
                    item.child = ChildRef::Local(new);
                }
            }
            copied.push(copy);
        }

        let mut parents = 0;
        for (index, source) in records.iter_mut().enumerate() {
            if moved_to[index].is_some() {
                continue;
            }
            for item in &mut source.items {
                if item.child == ChildRef::Local(record) {
                    item.child = target_ref;
                    parents += 1;
                }
            }
        }
        if parents != 1 {
            return Err(StoreError::corruption(format!(
                "record {record} on page {} has {parents} parent items",
                self.id
            )));
        }

        target.install_records(copied)?;
        let doomed: Vec<bool> = moved_to.iter().map(Option::is_some).collect();
        let kept_as = self.remove_records(&doomed, None)?;
        let fates = renumber::split_fates(&moved_to, &kept_as)?;

        if let Some(listener) = listener {
            self.notify_records(listener, 1)?;
            target.notify_records(listener, 0)?;
        }
        Ok(fates)
    }

    fn install_records(&mut self, records: Vec<Record>) -> Result<()> {
        self.state = PageState::Materialized { records };
        self.total_size = self.computed_size()?;
        if self.total_size > self.page_size {
            return Err(StoreError::corruption(format!(
                "page {} overflows after receiving moved records",
                self.id
            )));
        }
        Ok(())
    }

    fn notify_records(&self, listener: &dyn CoordListener, from: u16) -> Result<()> {
        for record in from..self.record_count() {
            let items = &self.record(record)?.items;
            notify_from(Some(listener), self.id, record, items, 0);
        }
        Ok(())
    }

    /// Removes every record flagged in `doomed` in one pass and renumbers
    /// the local child references of the survivors.
    ///
    /// Returns the new index of every old record. Items of survivors whose
    /// index changed are reported to `listener`.
    pub fn remove_records(
        &mut self,
        doomed: &[bool],
        listener: Option<&dyn CoordListener>,
    ) -> Result<Vec<Option<u16>>> {
        let count = self.record_count() as usize;
        if doomed.len() != count {
            return Err(StoreError::Invalid("removal mask does not match record count"));
        }
        if doomed.first() == Some(&true) {
            return Err(StoreError::Invalid("cannot delete record 0"));
        }
        let page = self.id;
        let mapping = renumber::compact(doomed);
        let records = self.records_mut()?;
        for (index, record) in records.iter().enumerate() {
            if doomed[index] {
                continue;
            }
            for item in &record.items {
                if let ChildRef::Local(child) = item.child {
                    match doomed.get(child as usize) {
                        Some(false) => {}
                        Some(true) => {
                            return Err(StoreError::corruption(format!(
                                "page {page}: record {child} is still referenced by record {index}"
                            )))
                        }
                        None => {
                            return Err(StoreError::corruption(format!(
                                "page {page}: record {index} references missing record {child}"
                            )))
                        }
                    }
                }
            }
        }

        let old = std::mem::take(records);
        for (index, mut record) in old.into_iter().enumerate() {
            if doomed[index] {
                continue;
            }
            for item in &mut record.items {
                if let ChildRef::Local(child) = item.child {
                    if let Some(new) = mapping[child as usize] {
                        item.child = ChildRef::Local(new);
                    }
                }
            }
            records.push(record);
        }
        self.total_size = self.computed_size()?;

        if let Some(listener) = listener {
            for (old, new) in mapping.iter().enumerate() {
                if let Some(new) = *new {
                    if new as usize != old {
                        self.notify_records(listener, new)?;
                        break;
                    }
                }
            }
        }
        Ok(mapping)
    }

    /// Removes one record. Record 0 and referenced records are refused.
    pub fn delete_record(&mut self, record: u16, listener: Option<&dyn CoordListener>) -> Result<()> {
        if record == 0 {
            return Err(StoreError::Invalid("cannot delete record 0"));
        }
        let count = self.record_count() as usize;
        if record as usize >= count {
            return Err(bad_record());
        }
        let mut doomed = vec![false; count];
        doomed[record as usize] = true;
        self.remove_records(&doomed, listener).map(|_| ())
    }

    /// Removes one item; the items after it shift down and are reported.
    pub fn delete_item(
        &mut self,
        record: u16,
        index: u16,
        listener: Option<&dyn CoordListener>,
    ) -> Result<Item> {
        self.item(record, index)?;
        let page = self.id;
        let records = self.records_mut()?;
        let items = &mut records[record as usize].items;
        let removed = items.remove(index as usize);
        notify_from(listener, page, record, items, index as usize);
        self.total_size -= item_len(self.payload, removed.name.len());
        Ok(removed)
    }

    /// Removes every item of a record, keeping the record itself.
    pub fn clear_record(&mut self, record: u16) -> Result<Vec<Item>> {
        self.record(record)?;
        let payload = self.payload;
        let records = self.records_mut()?;
        let removed = std::mem::take(&mut records[record as usize].items);
        self.total_size -= removed
            .iter()
            .map(|item| item_len(payload, item.name.len()))
            .sum::<usize>();
        Ok(removed)
    }

    /// Sets an item's row id.
    pub fn set_row_id(&mut self, record: u16, index: u16, row_id: RowId) -> Result<()> {
        self.item_mut(record, index)?.row_id = row_id;
        Ok(())
    }

    /// Sets an item's timestamp; fails when items carry no timestamp.
    pub fn set_timestamp(&mut self, record: u16, index: u16, timestamp: i64) -> Result<()> {
        if !self.payload.has_timestamp() {
            return Err(StoreError::Invalid("tree store has no timestamps"));
        }
        self.item_mut(record, index)?.timestamp = timestamp;
        Ok(())
    }

    /// Re-points an item's children.
    pub fn set_child(&mut self, record: u16, index: u16, child: ChildRef) -> Result<()> {
        child.encode()?;
        if let ChildRef::Local(target) = child {
            if target >= self.record_count() {
                return Err(bad_record());
            }
        }
        self.item_mut(record, index)?.child = child;
        Ok(())
    }

    /// Validates child references, item order and size bookkeeping.
    pub fn consistency_check(&self) -> Result<()> {
        let id = self.id;
        let count = self.record_count();
        if count == 0 {
            return Err(StoreError::corruption(format!("page {id} has no records")));
        }
        if count >= PAGE_MARKER {
            return Err(StoreError::corruption(format!(
                "page {id}: record count {count} reaches page marker"
            )));
        }
        let mut referenced = vec![false; count as usize];
        let mut size = EMPTY_PAGE_LEN;
        for record in 0..count {
            let rec = self.record(record)?;
            size += PAGE_BYTES_PER_RECORD + rec.size(self.payload);
            for (index, pair) in rec.items.windows(2).enumerate() {
                if pair[0].name >= pair[1].name {
                    return Err(StoreError::corruption(format!(
                        "page {id}, rec {record}: items {index} and {} are out of order",
                        index + 1
                    )));
                }
            }
            for (index, item) in rec.items.iter().enumerate() {
                match item.child {
                    ChildRef::Leaf => {}
                    ChildRef::Local(child) => {
                        if child == 0 || child >= count || child == record {
                            return Err(StoreError::corruption(format!(
                                "page {id}, rec {record}, item {index}: invalid child record {child}"
                            )));
                        }
                        if std::mem::replace(&mut referenced[child as usize], true) {
                            return Err(StoreError::corruption(format!(
                                "page {id}: record {child} has more than one parent"
                            )));
                        }
                    }
                    ChildRef::Page(page) => {
                        if page == id || page.0 > MAX_CROSS_PAGE_ID {
                            return Err(StoreError::corruption(format!(
                                "page {id}, rec {record}, item {index}: invalid child page {page}"
                            )));
                        }
                    }
                }
            }
        }
        if size != self.total_size {
            return Err(StoreError::corruption(format!(
                "page {id}: tracked size {} differs from computed size {size}",
                self.total_size
            )));
        }
        if size > self.page_size {
            return Err(StoreError::corruption(format!(
                "page {id}: {size} bytes exceed the {} byte page",
                self.page_size
            )));
        }
        Ok(())
    }

    /// Encodes the page, recomputing every offset and verifying the written
    /// stream against them.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let count = self.record_count() as usize;
        let mut record_offsets = Vec::with_capacity(count + 1);
        let mut offset = EMPTY_PAGE_LEN + PAGE_BYTES_PER_RECORD * count;
        for record in 0..count {
            record_offsets.push(offset);
            offset += self.record(record as u16)?.size(self.payload);
        }
        record_offsets.push(offset);
        if offset != self.total_size {
            return Err(StoreError::corruption(format!(
                "page {}: tracked size {} differs from final record offset {offset}",
                self.id, self.total_size
            )));
        }
        if offset > self.page_size {
            return Err(StoreError::corruption(format!(
                "page {}: {offset} bytes exceed the {} byte page",
                self.id, self.page_size
            )));
        }

        let mut out = Vec::with_capacity(offset);
        be::put_u16(&mut out, count as u16);
        for &record_offset in &record_offsets {
            be::put_u16(&mut out, to_u16(record_offset)?);
        }
        for (record, &start) in record_offsets.iter().take(count).enumerate() {
            expect_pos(&out, start, "record start")?;
            let items = &self.record(record as u16)?.items;
            let mut item_offsets = Vec::with_capacity(items.len() + 1);
            let mut item_offset = EMPTY_RECORD_LEN + RECORD_BYTES_PER_ITEM * items.len();
            for item in items {
                item_offsets.push(item_offset);
                item_offset += self.payload.len() + item.name.len();
            }
            item_offsets.push(item_offset);

            be::put_u16(&mut out, items.len() as u16);
            for (item, &item_offset) in items.iter().zip(&item_offsets) {
                be::put_u16(&mut out, to_u16(item_offset)?);
                be::put_u16(&mut out, item.child.encode()?);
            }
            be::put_u16(&mut out, to_u16(item_offsets[items.len()])?);
            for (item, &item_offset) in items.iter().zip(&item_offsets) {
                expect_pos(&out, start + item_offset, "item start")?;
                be::put_i32(&mut out, item.row_id);
                if self.payload.has_timestamp() {
                    be::put_i64(&mut out, item.timestamp);
                }
                out.extend_from_slice(item.name.as_bytes());
            }
            expect_pos(&out, start + item_offsets[items.len()], "record end")?;
        }
        expect_pos(&out, record_offsets[count], "page end")?;
        Ok(out)
    }

    /// Replaces the in-memory state with the image that was just written,
    /// keeping the decoded records.
    pub fn mark_clean(&mut self, image: Vec<u8>) -> Result<()> {
        let mut clean = Page::parse(self.id, image, self.page_size, self.payload)?;
        if let (
            PageState::Materialized { records },
            PageState::Serialized { decoded, .. },
        ) = (&mut self.state, &mut clean.state)
        {
            if decoded.len() != records.len() {
                return Err(StoreError::corruption(format!(
                    "page {}: written image holds {} records, expected {}",
                    self.id,
                    decoded.len(),
                    records.len()
                )));
            }
            *decoded = records.drain(..).map(OnceCell::from).collect();
        }
        *self = clean;
        Ok(())
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("records", &self.record_count())
            .field("total_size", &self.total_size)
            .field("page_size", &self.page_size)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
