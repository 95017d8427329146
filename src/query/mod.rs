//! Cursor-info queries against possibly stale snapshots.
//!
//! A query names an offset in the document as it is *now*. If the latest
//! snapshot predates some edits, the answer can still be served from it as
//! long as none of those edits touched the queried offset, the token found
//! there, or the token's declaration. Otherwise the query waits for a
//! rebuild that covers every edit made before it was issued.

mod pending;

pub use pending::{PendingQueries, PendingQuery, QueryOutcome};

use std::sync::Arc;
use std::time::Instant;

use crate::document::{DocumentBuffer, Mapped};
use crate::error::QueryError;
use crate::gate::Expired;
use crate::scheduler::AnalysisScheduler;
use crate::snapshot::{Occurrence, Snapshot, SnapshotStore};

/// A query, frozen at the moment it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    pub document: String,
    pub epoch: u64,
    /// Document sequence when the query was issued; `offset` is in the
    /// coordinates of this revision.
    pub sequence: u64,
    pub offset: usize,
    pub arguments: Vec<String>,
}

/// Why a query cannot be answered from the snapshot at hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    NoSnapshot,
    ArgumentsChanged,
    /// Snapshot predates edits made before the query was issued.
    Stale,
    OffsetEdited,
    NoOccurrence,
    TokenEdited,
    DeclarationEdited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Answer, with ranges in the query's coordinates.
    Answer(Occurrence),
    NotFound,
    MustWait(WaitReason),
    /// The document the query was issued against is gone.
    Closed,
}

/// Whether the snapshot must already include every edit the query saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// A stale snapshot may answer when the edits provably did not touch the answer.
    AllowStale,
    /// Only a snapshot with `base_sequence >= query sequence` may answer.
    Required,
}

/// Decide whether `snapshot` can answer `query`.
pub fn evaluate(
    query: &QueryContext,
    snapshot: Option<&Snapshot>,
    buffer: &DocumentBuffer,
    freshness: Freshness,
) -> Decision {
    let Some(snapshot) = snapshot.filter(|snap| snap.epoch() == query.epoch) else {
        let open = buffer.state(&query.document).map(|state| state.epoch);
        return if open == Some(query.epoch) {
            Decision::MustWait(WaitReason::NoSnapshot)
        } else {
            Decision::Closed
        };
    };
    if snapshot.arguments() != query.arguments.as_slice() {
        return Decision::MustWait(WaitReason::ArgumentsChanged);
    }
    let base = snapshot.base_sequence();
    if freshness == Freshness::Required && base < query.sequence {
        return Decision::MustWait(WaitReason::Stale);
    }

    let Some(to_snapshot) = buffer.epoch_mapper(&query.document, query.epoch, query.sequence, base)
    else {
        return Decision::Closed;
    };

    let Mapped::Valid(snapshot_offset) = to_snapshot.map_offset(query.offset) else {
        return Decision::MustWait(WaitReason::OffsetEdited);
    };

    let Some(found) = snapshot.occurrence_at(snapshot_offset) else {
        // the token may have been typed after this snapshot was taken
        return if base >= query.sequence {
            Decision::NotFound
        } else {
            Decision::MustWait(WaitReason::NoOccurrence)
        };
    };

    let to_query = to_snapshot.inverse();
    let Mapped::Valid(token) = to_query.map_range(found.token) else {
        return Decision::MustWait(WaitReason::TokenEdited);
    };
    let declaration = match found.declaration {
        Some(decl) => match to_query.map_range(decl) {
            Mapped::Valid(range) => Some(range),
            Mapped::Invalidated => return Decision::MustWait(WaitReason::DeclarationEdited),
        },
        None => None,
    };

    Decision::Answer(Occurrence {
        token,
        declaration,
        ..found.clone()
    })
}

enum Started<'a> {
    Done(QueryOutcome),
    Waiting(Registration<'a>),
}

/// A registered query for as long as someone waits on it.
///
/// Dropping it unresolved (a cancelled future, an unwinding thread)
/// signals the gate with `Cancelled` and unregisters the query.
struct Registration<'a> {
    pending: &'a PendingQueries,
    query: Arc<PendingQuery>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.query.gate().signal(Err(QueryError::Cancelled)) {
            tracing::debug!(
                document = %self.query.context().document,
                offset = self.query.context().offset,
                "waiting query cancelled"
            );
        }
        self.pending.remove(&self.query);
    }
}

/// Entry point for cursor-info queries.
#[derive(Debug)]
pub struct QueryResolver {
    buffer: Arc<DocumentBuffer>,
    store: Arc<SnapshotStore>,
    scheduler: Arc<AnalysisScheduler>,
    pending: Arc<PendingQueries>,
}

impl QueryResolver {
    pub fn new(
        buffer: Arc<DocumentBuffer>,
        store: Arc<SnapshotStore>,
        scheduler: Arc<AnalysisScheduler>,
        pending: Arc<PendingQueries>,
    ) -> Self {
        Self {
            buffer,
            store,
            scheduler,
            pending,
        }
    }

    /// Resolve the symbol at `offset`, suspending if a rebuild is needed.
    ///
    /// Empty `arguments` keep the document's current arguments.
    pub async fn query_at(
        &self,
        document: &str,
        offset: usize,
        arguments: &[String],
        deadline: Instant,
    ) -> QueryOutcome {
        match self.start(document, offset, arguments)? {
            Started::Done(outcome) => outcome,
            Started::Waiting(registration) => {
                let outcome = registration.query.gate().wait(deadline).await;
                self.finish(&registration.query, outcome)
            }
        }
    }

    /// Blocking twin of [`query_at`](Self::query_at). Do not call from an
    /// async task.
    pub fn query_at_blocking(
        &self,
        document: &str,
        offset: usize,
        arguments: &[String],
        deadline: Instant,
    ) -> QueryOutcome {
        match self.start(document, offset, arguments)? {
            Started::Done(outcome) => outcome,
            Started::Waiting(registration) => {
                let outcome = registration.query.gate().wait_blocking(deadline);
                self.finish(&registration.query, outcome)
            }
        }
    }

    fn start(
        &self,
        document: &str,
        offset: usize,
        arguments: &[String],
    ) -> Result<Started<'_>, QueryError> {
        if !arguments.is_empty() && self.buffer.set_arguments(document, arguments) {
            tracing::debug!(document, ?arguments, "query changed analyzer arguments");
        }
        let state = self
            .buffer
            .state(document)
            .ok_or_else(|| QueryError::UnknownDocument(document.to_string()))?;
        let context = QueryContext {
            document: document.to_string(),
            epoch: state.epoch,
            sequence: state.sequence,
            offset,
            arguments: state.arguments,
        };

        let snapshot = self.store.get(document);
        let reason = match evaluate(&context, snapshot.as_deref(), &self.buffer, Freshness::AllowStale) {
            Decision::Answer(occurrence) => {
                tracing::debug!(
                    document,
                    offset,
                    base = snapshot.as_ref().map(|s| s.base_sequence()),
                    sequence = context.sequence,
                    "answered from cached snapshot"
                );
                return Ok(Started::Done(Ok(occurrence)));
            }
            Decision::NotFound => return Ok(Started::Done(Err(QueryError::NotFound))),
            Decision::Closed => return Ok(Started::Done(Err(QueryError::Closed(document.to_string())))),
            Decision::MustWait(reason) => reason,
        };

        tracing::debug!(document, offset, sequence = context.sequence, ?reason, "query must wait");
        let registration = Registration {
            pending: &self.pending,
            query: self.pending.register(context),
        };
        self.scheduler.ensure_build(registration.query.context());
        // a snapshot may have landed between the first look and registration
        self.pending.reevaluate(document, &self.store, &self.buffer);
        Ok(Started::Waiting(registration))
    }

    fn finish(&self, query: &PendingQuery, outcome: Result<QueryOutcome, Expired>) -> QueryOutcome {
        match outcome {
            Ok(outcome) => outcome,
            Err(Expired) => {
                self.pending.remove(query);
                // a resolution racing the deadline wins over the timeout
                query.gate().signal(Err(QueryError::Timeout));
                query.gate().try_take().unwrap_or(Err(QueryError::Timeout))
            }
        }
    }
}
