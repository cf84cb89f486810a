//! Accumulation and grouping of streamed analysis results.
//!
//! Batches arrive in arbitrary order and may repeat entries; the
//! accumulator only appends. Grouping is recomputed from the full entry
//! list on demand, so a view can be rebuilt at any time and always comes
//! out the same.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::warn;

use crate::models::{KeyGroup, ResultEntry, ResultValue};

/// Append-only store for one analysis's key/value entries.
#[derive(Debug, Clone, Default)]
pub struct ResultAccumulator {
    entries: Vec<ResultEntry>,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch of already-decoded entries.
    pub fn ingest<I>(&mut self, batch: I)
    where
        I: IntoIterator<Item = ResultEntry>,
    {
        self.entries.extend(batch);
    }

    /// Decode and append a pushed batch. Entries that do not match the
    /// key/value shape are dropped individually; the rest of the batch is
    /// still ingested. Returns how many entries were accepted.
    pub fn ingest_raw(&mut self, batch: Vec<Value>) -> usize {
        let mut accepted = 0;
        for raw in batch {
            match serde_json::from_value::<ResultEntry>(raw) {
                Ok(entry) => {
                    self.entries.push(entry);
                    accepted += 1;
                }
                Err(err) => warn!("dropping malformed result entry: {err}"),
            }
        }
        accepted
    }

    pub fn entries(&self) -> &[ResultEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Group the current contents by source line.
    ///
    /// Within a line, groups appear in first-seen key order and each
    /// group's values are deduplicated, first occurrence first. The result
    /// depends only on the set and relative order of accumulated entries,
    /// not on how they were split into batches.
    pub fn group_by_line(&self) -> BTreeMap<u32, Vec<KeyGroup>> {
        let mut lines: BTreeMap<u32, Vec<KeyGroup>> = BTreeMap::new();
        for entry in &self.entries {
            let groups = lines.entry(entry.key.location.line).or_default();
            match groups.iter_mut().find(|group| group.key == entry.key) {
                Some(group) => group.values.push(entry.value.clone()),
                None => groups.push(KeyGroup {
                    key: entry.key.clone(),
                    values: vec![entry.value.clone()],
                }),
            }
        }
        for groups in lines.values_mut() {
            for group in groups {
                group.values = dedupe_values(std::mem::take(&mut group.values));
            }
        }
        lines
    }
}

/// Drop repeated values, keeping the first occurrence of each. Mirrors the
/// remote reduction step: structural equality, order-preserving,
/// idempotent.
pub fn dedupe_values(values: Vec<ResultValue>) -> Vec<ResultValue> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}
