//! Per-aggregate version bookkeeping for read models.

use std::collections::{BTreeMap, HashMap};

use common::AggregateId;
use event_store::Version;

/// Orders each aggregate's events by version before a view applies them.
///
/// The bus delivers at least once and, when two writers race on one
/// aggregate, may hand over a later version before an earlier one. The
/// tracker drops anything at or below the applied mark and parks anything
/// beyond the next expected version until the gap is filled.
#[derive(Debug)]
pub struct VersionTracker<T> {
    applied: HashMap<AggregateId, Version>,
    pending: HashMap<AggregateId, BTreeMap<Version, T>>,
}

impl<T> Default for VersionTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> VersionTracker<T> {
    pub fn new() -> Self {
        Self {
            applied: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Offers `item` at `version` and returns whatever is now ready to apply,
    /// in version order. The returned items count as applied.
    pub fn admit(&mut self, aggregate_id: AggregateId, version: Version, item: T) -> Vec<T> {
        let applied = self.applied_version(aggregate_id);
        if version <= applied {
            metrics::counter!("projection_duplicates_skipped_total").increment(1);
            return Vec::new();
        }

        if version != applied.next() {
            tracing::debug!(
                aggregate_id = %aggregate_id,
                %version,
                expected = %applied.next(),
                "event ahead of its stream; holding back"
            );
            self.pending
                .entry(aggregate_id)
                .or_default()
                .entry(version)
                .or_insert(item);
            return Vec::new();
        }

        let mut ready = vec![item];
        let mut mark = version;
        if let Some(parked) = self.pending.get_mut(&aggregate_id) {
            while let Some(next) = parked.remove(&mark.next()) {
                ready.push(next);
                mark = mark.next();
            }
            if parked.is_empty() {
                self.pending.remove(&aggregate_id);
            }
        }
        self.applied.insert(aggregate_id, mark);
        ready
    }

    /// Highest version applied for `aggregate_id`; zero if none.
    pub fn applied_version(&self, aggregate_id: AggregateId) -> Version {
        self.applied
            .get(&aggregate_id)
            .copied()
            .unwrap_or_else(Version::initial)
    }

    /// Events held back waiting for an earlier version.
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    pub fn clear(&mut self) {
        self.applied.clear();
        self.pending.clear();
    }
}
