//! Pure record-index bookkeeping shared by splits and subtree deletion.

use crate::types::{Result, StoreError};

/// What happened to a record of the source page during a split.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecordFate {
    /// The record now lives in the split target under this index.
    Moved(u16),
    /// The record stayed on the source page under this index.
    Kept(u16),
}

/// Maps every record index to its index after removing the `doomed` ones.
///
/// Survivors keep their relative order.
pub fn compact(doomed: &[bool]) -> Vec<Option<u16>> {
    let mut next = 0u16;
    doomed
        .iter()
        .map(|&gone| {
            if gone {
                None
            } else {
                let index = next;
                next += 1;
                Some(index)
            }
        })
        .collect()
}

/// Lists `start` and every record reachable from it in preorder.
///
/// `children` returns the local child records of a record in item order. A
/// record reachable twice means two items share it, which the page layout
/// never produces.
pub fn preorder<F>(start: u16, record_count: usize, mut children: F) -> Result<Vec<u16>>
where
    F: FnMut(u16) -> Result<Vec<u16>>,
{
    let mut seen = vec![false; record_count];
    let mut order = Vec::new();
    let mut stack = vec![start];
    while let Some(record) = stack.pop() {
        let slot = seen
            .get_mut(record as usize)
            .ok_or_else(|| StoreError::corruption(format!("record {record} does not exist")))?;
        if *slot {
            return Err(StoreError::corruption(format!(
                "record {record} is reachable from more than one item"
            )));
        }
        *slot = true;
        order.push(record);
        let mut kids = children(record)?;
        kids.reverse();
        stack.extend(kids);
    }
    Ok(order)
}

/// Combines the moved set and the survivor mapping into per-record fates.
pub fn split_fates(moved_to: &[Option<u16>], kept_as: &[Option<u16>]) -> Result<Vec<RecordFate>> {
    moved_to
        .iter()
        .zip(kept_as)
        .enumerate()
        .map(|(old, pair)| match pair {
            (Some(new), None) => Ok(RecordFate::Moved(*new)),
            (None, Some(new)) => Ok(RecordFate::Kept(*new)),
            _ => Err(StoreError::corruption(format!(
                "record {old} is neither moved nor kept"
            ))),
        })
        .collect()
}
