//! Summary statistics gathered over every reachable page.

use std::fmt;

use serde::Serialize;

/// Running summary of a series of lengths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LengthStats {
    /// Number of samples.
    pub count: u64,
    /// Sum of all samples.
    pub total: u64,
    /// Smallest sample, 0 when empty.
    pub min: u64,
    /// Largest sample.
    pub max: u64,
}

impl LengthStats {
    /// Records one sample.
    pub fn add(&mut self, len: u64) {
        self.min = if self.count == 0 { len } else { self.min.min(len) };
        self.max = self.max.max(len);
        self.count += 1;
        self.total += len;
    }

    /// Arithmetic mean, 0 when empty.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total as f64 / self.count as f64
        }
    }
}

/// Shape of a tree store, gathered over every page reachable from the root.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TreeStoreStats {
    /// Reachable pages.
    pub pages: u64,
    /// Records across those pages.
    pub records: u64,
    /// Items across those records.
    pub items: u64,
    /// Items without children.
    pub leaves: u64,
    /// Serialized bytes in use.
    pub bytes_used: u64,
    /// Total capacity of the reachable pages.
    pub bytes_capacity: u64,
    /// Path component lengths in characters.
    pub component_length: LengthStats,
}

impl TreeStoreStats {
    /// Fraction of page capacity in use.
    pub fn fill_ratio(&self) -> f64 {
        if self.bytes_capacity == 0 {
            0.0
        } else {
            self.bytes_used as f64 / self.bytes_capacity as f64
        }
    }

    /// Emits the statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        tracing::info!(
            target: "treestore::stats",
            pages = self.pages,
            records = self.records,
            items = self.items,
            leaves = self.leaves,
            bytes_used = self.bytes_used,
            bytes_capacity = self.bytes_capacity,
            component_len_min = self.component_length.min,
            component_len_max = self.component_length.max,
            component_len_mean = self.component_length.mean(),
            "tree store stats snapshot"
        );
    }
}

impl fmt::Display for TreeStoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "pages={} records={} items={} leaves={}",
            self.pages, self.records, self.items, self.leaves
        )?;
        writeln!(
            f,
            "bytes used={} capacity={} fill={:.1}%",
            self.bytes_used,
            self.bytes_capacity,
            self.fill_ratio() * 100.0
        )?;
        write!(
            f,
            "component length min={} max={} mean={:.2}",
            self.component_length.min,
            self.component_length.max,
            self.component_length.mean()
        )
    }
}
