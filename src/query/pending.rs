//! Registry of queries waiting for a fresher snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::document::DocumentBuffer;
use crate::error::QueryError;
use crate::gate::WaitGate;
use crate::snapshot::{Occurrence, SnapshotStore};

use super::{evaluate, Decision, Freshness, QueryContext};

pub type QueryOutcome = Result<Occurrence, QueryError>;

/// A query that could not be answered immediately.
#[derive(Debug)]
pub struct PendingQuery {
    id: u64,
    context: QueryContext,
    gate: WaitGate<QueryOutcome>,
}

impl PendingQuery {
    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    pub fn gate(&self) -> &WaitGate<QueryOutcome> {
        &self.gate
    }
}

/// Pending queries grouped by document.
#[derive(Debug, Default)]
pub struct PendingQueries {
    queries: DashMap<String, Vec<Arc<PendingQuery>>>,
    next_id: AtomicU64,
}

impl PendingQueries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, context: QueryContext) -> Arc<PendingQuery> {
        let query = Arc::new(PendingQuery {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            context,
            gate: WaitGate::new(),
        });
        self.queries
            .entry(query.context.document.clone())
            .or_default()
            .push(Arc::clone(&query));
        query
    }

    pub fn remove(&self, query: &PendingQuery) {
        let document = &query.context.document;
        let now_empty = match self.queries.get_mut(document) {
            Some(mut list) => {
                list.retain(|q| q.id != query.id);
                list.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.queries.remove_if(document, |_, list| list.is_empty());
        }
    }

    /// Number of unresolved queries on a document.
    pub fn count(&self, document: &str) -> usize {
        self.queries
            .get(document)
            .map(|list| list.iter().filter(|q| !q.gate.is_signalled()).count())
            .unwrap_or(0)
    }

    /// Re-run the decision for every query pending on `document` against its
    /// current snapshot, signalling those that can now be answered.
    pub fn reevaluate(&self, document: &str, store: &SnapshotStore, buffer: &DocumentBuffer) {
        let Some(waiting) = self.queries.get(document).map(|list| list.value().clone()) else {
            return;
        };
        let snapshot = store.get(document);

        for query in &waiting {
            if query.gate.is_signalled() {
                continue;
            }
            let decision = evaluate(&query.context, snapshot.as_deref(), buffer, Freshness::Required);
            let outcome = match decision {
                Decision::Answer(occurrence) => Ok(occurrence),
                Decision::NotFound => Err(QueryError::NotFound),
                Decision::Closed => Err(QueryError::Closed(document.to_string())),
                Decision::MustWait(reason) => {
                    tracing::trace!(document, ?reason, "pending query still waiting");
                    continue;
                }
            };
            query.gate.signal(outcome);
        }

        self.prune(document);
    }

    /// Signal every query on `document` with `error` and forget them.
    pub fn fail_all(&self, document: &str, error: QueryError) {
        if let Some((_, list)) = self.queries.remove(document) {
            for query in list {
                query.gate.signal(Err(error.clone()));
            }
        }
    }

    fn prune(&self, document: &str) {
        if let Some(mut list) = self.queries.get_mut(document) {
            list.retain(|q| !q.gate.is_signalled());
        }
        self.queries.remove_if(document, |_, list| list.is_empty());
    }
}
