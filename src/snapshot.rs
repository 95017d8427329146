//! Immutable analysis snapshots and the store that publishes them.
//!
//! A [`Snapshot`] is the complete output of one Analyzer run, tagged with the
//! edit sequence its text was captured at. The [`SnapshotStore`] holds the
//! latest one per document and swaps it wholesale on publish; readers clone
//! the `Arc` and never observe a partially built value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

use crate::analyzer::Analysis;
use crate::document::TextRange;

/// A resolved symbol at some offset, in the coordinates of the snapshot (or
/// document revision) it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub name: String,
    pub type_name: String,
    pub file_name: String,
    /// Span of the token the query landed on.
    pub token: TextRange,
    /// Span of the declaration's name, when the symbol has one in this document.
    pub declaration: Option<TextRange>,
}

/// Analysis result tied to an exact captured text.
#[derive(Debug)]
pub struct Snapshot {
    document: String,
    epoch: u64,
    base_sequence: u64,
    arguments: Vec<String>,
    text: String,
    analysis: Analysis,
}

impl Snapshot {
    pub fn new(
        document: impl Into<String>,
        epoch: u64,
        base_sequence: u64,
        arguments: Vec<String>,
        text: String,
        mut analysis: Analysis,
    ) -> Self {
        analysis.occurrences.sort_by_key(|occ| occ.token.offset);
        Self {
            document: document.into(),
            epoch,
            base_sequence,
            arguments,
            text,
            analysis,
        }
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Edit sequence number the source text was captured at.
    pub fn base_sequence(&self) -> u64 {
        self.base_sequence
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// The exact text that was analyzed.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn analysis(&self) -> &Analysis {
        &self.analysis
    }

    /// The occurrence whose token covers `offset`, in snapshot coordinates.
    pub fn occurrence_at(&self, offset: usize) -> Option<&Occurrence> {
        let occurrences = &self.analysis.occurrences;
        let idx = occurrences.partition_point(|occ| occ.token.offset <= offset);
        let candidate = occurrences.get(idx.checked_sub(1)?)?;
        candidate.token.contains(offset).then_some(candidate)
    }
}

/// Holds the most recent snapshot per document.
#[derive(Debug)]
pub struct SnapshotStore {
    snapshots: DashMap<String, Arc<Snapshot>>,
    generation: AtomicU64,
    published: watch::Sender<u64>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (published, _) = watch::channel(0);
        Self {
            snapshots: DashMap::new(),
            generation: AtomicU64::new(0),
            published,
        }
    }

    /// Current snapshot for a document, without blocking.
    pub fn get(&self, document: &str) -> Option<Arc<Snapshot>> {
        self.snapshots.get(document).map(|snap| Arc::clone(&snap))
    }

    /// Replace the stored snapshot and bump the generation.
    ///
    /// A snapshot older than the stored one is refused, so publishes never
    /// go backwards: an earlier epoch always loses, and within one epoch a
    /// lower base sequence does. Returns the new generation on success.
    pub fn publish(&self, snapshot: Arc<Snapshot>) -> Option<u64> {
        match self.snapshots.entry(snapshot.document().to_string()) {
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                if (current.epoch(), current.base_sequence())
                    > (snapshot.epoch(), snapshot.base_sequence())
                {
                    tracing::debug!(
                        document = snapshot.document(),
                        stored_epoch = current.epoch(),
                        stored = current.base_sequence(),
                        offered_epoch = snapshot.epoch(),
                        offered = snapshot.base_sequence(),
                        "refusing out-of-order snapshot"
                    );
                    return None;
                }
                slot.insert(snapshot);
            }
            Entry::Vacant(slot) => {
                slot.insert(snapshot);
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.published.send_replace(generation);
        Some(generation)
    }

    /// Drop a document's snapshot.
    pub fn remove(&self, document: &str) -> Option<Arc<Snapshot>> {
        self.snapshots.remove(document).map(|(_, snap)| snap)
    }

    /// Drop the stored snapshot only if it belongs to `epoch`.
    pub fn retract(&self, document: &str, epoch: u64) -> bool {
        self.snapshots
            .remove_if(document, |_, snap| snap.epoch() == epoch)
            .is_some()
    }

    /// Number of successful publishes so far, across all documents.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Receiver that observes every generation bump.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.published.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occurrence(name: &str, offset: usize) -> Occurrence {
        Occurrence {
            name: name.to_string(),
            type_name: "Int".to_string(),
            file_name: "/test.let".to_string(),
            token: TextRange::new(offset, name.len()),
            declaration: Some(TextRange::new(4, 3)),
        }
    }

    fn snapshot(epoch: u64, base: u64, occurrences: Vec<Occurrence>) -> Arc<Snapshot> {
        Arc::new(Snapshot::new(
            "/test.let",
            epoch,
            base,
            vec![],
            String::new(),
            Analysis {
                occurrences,
                diagnostics: vec![],
            },
        ))
    }

    #[test]
    fn occurrence_lookup_by_offset() {
        let snap = snapshot(1, 0, vec![occurrence("foo", 24), occurrence("foo", 4)]);
        assert_eq!(snap.occurrence_at(4).map(|o| o.token.offset), Some(4));
        assert_eq!(snap.occurrence_at(6).map(|o| o.token.offset), Some(4));
        assert_eq!(snap.occurrence_at(7), None);
        assert_eq!(snap.occurrence_at(3), None);
        assert_eq!(snap.occurrence_at(26).map(|o| o.token.offset), Some(24));
        assert_eq!(snap.occurrence_at(27), None);
    }

    #[test]
    fn publish_replaces_and_bumps_generation() {
        let store = SnapshotStore::new();
        assert!(store.get("/test.let").is_none());
        assert_eq!(store.publish(snapshot(1, 0, vec![])), Some(1));
        assert_eq!(store.publish(snapshot(1, 3, vec![])), Some(2));
        assert_eq!(store.get("/test.let").unwrap().base_sequence(), 3);
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn publish_refuses_older_snapshot() {
        let store = SnapshotStore::new();
        store.publish(snapshot(1, 5, vec![]));
        assert_eq!(store.publish(snapshot(1, 2, vec![])), None);
        assert_eq!(store.get("/test.let").unwrap().base_sequence(), 5);
        // a reopened document starts over
        assert!(store.publish(snapshot(2, 0, vec![])).is_some());
    }

    #[test]
    fn publish_refuses_snapshot_of_replaced_instance() {
        let store = SnapshotStore::new();
        store.publish(snapshot(2, 0, vec![]));
        assert_eq!(store.publish(snapshot(1, 9, vec![])), None);
        assert_eq!(store.get("/test.let").unwrap().epoch(), 2);
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn retract_ignores_other_epochs() {
        let store = SnapshotStore::new();
        store.publish(snapshot(2, 0, vec![]));
        assert!(!store.retract("/test.let", 1));
        assert!(store.get("/test.let").is_some());
        assert!(store.retract("/test.let", 2));
        assert!(store.get("/test.let").is_none());
    }

    #[tokio::test]
    async fn watch_observes_publish() {
        let store = SnapshotStore::new();
        let mut rx = store.watch();
        store.publish(snapshot(1, 0, vec![]));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
