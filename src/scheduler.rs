//! Per-document rebuild scheduling.
//!
//! Each document is `Idle`, `Building`, or `BuildingWithPendingEdits`. Edits
//! arriving during a build are coalesced into exactly one follow-up build,
//! so no edit is lost and at most one Analyzer call per document is ever in
//! flight. That holds across reopens too: a new instance of a document waits
//! for the old instance's build to return. Builds run on tokio's blocking
//! pool.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::runtime::Handle;

use crate::analyzer::{Analysis, AnalysisRequest, Analyzer};
use crate::consumer::{EditorConsumer, EditorEvent};
use crate::document::{BuildInput, DocumentBuffer};
use crate::error::{AnalyzerError, BuildFailure, QueryError};
use crate::notify::{DocumentUpdate, NotificationHub};
use crate::query::{PendingQueries, QueryContext};
use crate::snapshot::{Snapshot, SnapshotStore};

/// What the running build captured, once it has captured it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Captured {
    epoch: u64,
    sequence: u64,
    arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BuildState {
    Idle,
    Building { captured: Option<Captured> },
    BuildingWithPendingEdits,
}

/// Public view of a document's build state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Idle,
    Building,
    BuildingWithPendingEdits,
}

/// Build state for one document name, shared by every epoch opened under it.
#[derive(Debug)]
struct Slot {
    /// Newest epoch a build was requested for. The running build may still
    /// belong to an older one.
    epoch: u64,
    state: BuildState,
}

/// Serializes and coalesces Analyzer invocations.
pub struct AnalysisScheduler {
    buffer: Arc<DocumentBuffer>,
    store: Arc<SnapshotStore>,
    pending: Arc<PendingQueries>,
    hub: Arc<NotificationHub>,
    analyzer: Arc<dyn Analyzer>,
    consumer: Arc<dyn EditorConsumer>,
    slots: DashMap<String, Slot>,
    failures: DashMap<String, BuildFailure>,
    /// `(epoch, sequence)` of the last failed build that was retried.
    retried: DashMap<String, (u64, u64)>,
    workers: Handle,
}

impl fmt::Debug for AnalysisScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisScheduler")
            .field("slots", &self.slots)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

impl AnalysisScheduler {
    /// Create a scheduler whose builds are spawned on `workers`.
    pub fn new(
        buffer: Arc<DocumentBuffer>,
        store: Arc<SnapshotStore>,
        pending: Arc<PendingQueries>,
        hub: Arc<NotificationHub>,
        analyzer: Arc<dyn Analyzer>,
        consumer: Arc<dyn EditorConsumer>,
        workers: Handle,
    ) -> Self {
        Self {
            buffer,
            store,
            pending,
            hub,
            analyzer,
            consumer,
            slots: DashMap::new(),
            failures: DashMap::new(),
            retried: DashMap::new(),
            workers,
        }
    }

    /// Build phase of the open instance of `document`.
    pub fn phase(&self, document: &str) -> BuildPhase {
        let live = self.live_epoch(document);
        let state = self
            .slots
            .get(document)
            .filter(|slot| Some(slot.epoch) == live)
            .map(|slot| slot.state.clone());
        match state {
            None | Some(BuildState::Idle) => BuildPhase::Idle,
            Some(BuildState::Building { .. }) => BuildPhase::Building,
            Some(BuildState::BuildingWithPendingEdits) => BuildPhase::BuildingWithPendingEdits,
        }
    }

    /// Most recent failure for a document, cleared by the next successful build.
    pub fn last_failure(&self, document: &str) -> Option<BuildFailure> {
        self.failures.get(document).map(|f| f.clone())
    }

    /// The document changed (opened or edited).
    pub fn text_changed(self: &Arc<Self>, document: &str) {
        let Some(state) = self.buffer.state(document) else {
            return;
        };
        if self.consumer.needs_semantic_info() {
            self.request(document, state.epoch, None);
            return;
        }

        // lightweight: fold into a running build, never start one
        let coalesced = match self.slots.get_mut(document) {
            Some(mut slot)
                if slot.epoch == state.epoch && !matches!(slot.state, BuildState::Idle) =>
            {
                slot.state = BuildState::BuildingWithPendingEdits;
                true
            }
            _ => false,
        };
        if !coalesced {
            self.consumer.handle(EditorEvent::TextChanged {
                document: document.to_string(),
                sequence: state.sequence,
            });
        }
    }

    /// Make sure some build will cover the query's sequence and arguments.
    ///
    /// A build already in flight counts only if it captured a text at least
    /// as new as the query's, with the same arguments.
    pub fn ensure_build(self: &Arc<Self>, query: &QueryContext) {
        let need = Captured {
            epoch: query.epoch,
            sequence: query.sequence,
            arguments: query.arguments.clone(),
        };
        self.request(&query.document, query.epoch, Some(need));
    }

    /// Forget a document instance. A build still running for it finishes
    /// but does not publish, and nothing queued for it runs.
    pub fn forget(&self, document: &str) {
        self.failures.remove(document);
        self.retried.remove(document);
        let running = match self.slots.get_mut(document) {
            Some(mut slot) if !matches!(slot.state, BuildState::Idle) => {
                slot.state = BuildState::Building { captured: None };
                true
            }
            _ => false,
        };
        if !running {
            self.slots
                .remove_if(document, |_, slot| matches!(slot.state, BuildState::Idle));
        }
    }

    fn request(self: &Arc<Self>, document: &str, epoch: u64, need: Option<Captured>) {
        let start = {
            let mut slot = self.slots.entry(document.to_string()).or_insert(Slot {
                epoch,
                state: BuildState::Idle,
            });
            if epoch < slot.epoch {
                // from an instance that has since been replaced
                return;
            }
            // a build for an older epoch keeps running; the new epoch
            // follows it rather than running alongside it
            slot.epoch = epoch;
            let covered = match (&slot.state, &need) {
                (BuildState::Building { captured: Some(c) }, Some(need)) => {
                    c.epoch == need.epoch
                        && c.sequence >= need.sequence
                        && c.arguments == need.arguments
                }
                _ => false,
            };
            if matches!(slot.state, BuildState::Idle) {
                slot.state = BuildState::Building { captured: None };
                true
            } else {
                if !covered {
                    slot.state = BuildState::BuildingWithPendingEdits;
                }
                false
            }
        };

        if start {
            tracing::debug!(document, epoch, "build scheduled");
            let this = Arc::clone(self);
            let document = document.to_string();
            self.workers
                .spawn(async move { this.run_builds(document).await });
        }
    }

    async fn run_builds(self: Arc<Self>, document: String) {
        loop {
            let Some(input) = self.buffer.capture(&document) else {
                if self.settle(&document) {
                    continue;
                }
                tracing::debug!(%document, "document gone; build loop exits");
                return;
            };

            match self.slots.get_mut(&document) {
                Some(mut slot) => {
                    if let BuildState::Building { captured } = &mut slot.state {
                        *captured = Some(Captured {
                            epoch: input.epoch,
                            sequence: input.sequence,
                            arguments: input.arguments.clone(),
                        });
                    }
                }
                None => return,
            }

            tracing::debug!(%document, epoch = input.epoch, sequence = input.sequence, "analysis started");
            let request = AnalysisRequest {
                document: document.clone(),
                text: input.text.clone(),
                arguments: input.arguments.clone(),
            };
            let analyzer = Arc::clone(&self.analyzer);
            let result = self
                .workers
                .spawn_blocking(move || analyzer.analyze(&request))
                .await
                .unwrap_or_else(|err| Err(AnalyzerError::new(format!("analyzer panicked: {err}"))));

            // from here on a new query is no longer covered by this build
            if let Some(mut slot) = self.slots.get_mut(&document) {
                if matches!(slot.state, BuildState::Building { .. }) {
                    slot.state = BuildState::Building { captured: None };
                }
            }

            match result {
                Ok(analysis) => self.publish(&document, input, analysis),
                Err(err) => self.fail(&document, &input, err),
            }

            if !self.settle(&document) {
                tracing::debug!(%document, "scheduler idle");
                return;
            }
        }
    }

    /// Close out a build round. Returns true if another round must run.
    fn settle(&self, document: &str) -> bool {
        let live = self.live_epoch(document);
        match self.slots.entry(document.to_string()) {
            Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                if matches!(slot.state, BuildState::BuildingWithPendingEdits) {
                    slot.state = BuildState::Building { captured: None };
                    true
                } else if live == Some(slot.epoch) {
                    slot.state = BuildState::Idle;
                    false
                } else {
                    entry.remove();
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    fn publish(&self, document: &str, input: BuildInput, analysis: Analysis) {
        let epoch = input.epoch;
        let sequence = input.sequence;
        if self.live_epoch(document) != Some(epoch) {
            tracing::debug!(document, epoch, "document replaced while building; result dropped");
            return;
        }
        let snapshot = Arc::new(Snapshot::new(
            document,
            epoch,
            sequence,
            input.arguments,
            input.text,
            analysis,
        ));

        if self.store.publish(Arc::clone(&snapshot)).is_none() {
            return;
        }
        if self.live_epoch(document) != Some(epoch) {
            // replaced between the check and the publish
            self.store.retract(document, epoch);
            return;
        }
        tracing::debug!(document, sequence, "snapshot published");
        self.failures.remove(document);
        self.retried.remove(document);

        self.pending.reevaluate(document, &self.store, &self.buffer);
        self.hub.broadcast(DocumentUpdate {
            document: document.to_string(),
            base_sequence: sequence,
        });

        self.consumer.handle(EditorEvent::SemanticInfoReady {
            document: document.to_string(),
            sequence,
        });
        for diagnostic in &snapshot.analysis().diagnostics {
            self.consumer.handle(EditorEvent::Diagnostic {
                document: document.to_string(),
                diagnostic: diagnostic.clone(),
            });
        }
    }

    fn fail(&self, document: &str, input: &BuildInput, err: AnalyzerError) {
        if self.live_epoch(document) != Some(input.epoch) {
            return;
        }
        let failure = BuildFailure {
            document: document.to_string(),
            sequence: input.sequence,
            message: err.message,
        };
        tracing::warn!(%failure, "analysis failed; keeping previous snapshot");
        self.failures.insert(document.to_string(), failure.clone());

        let fallback = self
            .store
            .get(document)
            .is_some_and(|snapshot| snapshot.epoch() == input.epoch);
        if !fallback {
            self.pending
                .fail_all(document, QueryError::BuildFailure(failure.clone()));
        } else if self.pending.count(document) > 0 {
            self.retry_for_pending(document, input, &failure);
        }
        self.consumer.handle(EditorEvent::RequestError(failure));
    }

    /// Queries are waiting on a build that failed while an older snapshot
    /// exists. A queued follow-up build serves them; otherwise the failed
    /// build is retried once before they fail.
    fn retry_for_pending(&self, document: &str, input: &BuildInput, failure: &BuildFailure) {
        let attempt = (input.epoch, input.sequence);
        let retried = self.retried.get(document).map(|r| *r) == Some(attempt);
        let queued = match self.slots.get_mut(document) {
            Some(slot) if matches!(slot.state, BuildState::BuildingWithPendingEdits) => true,
            Some(_) if retried => false,
            Some(mut slot) => {
                slot.state = BuildState::BuildingWithPendingEdits;
                self.retried.insert(document.to_string(), attempt);
                tracing::debug!(document, sequence = input.sequence, "retrying failed build");
                true
            }
            None => false,
        };
        if !queued {
            self.retried.remove(document);
            self.pending
                .fail_all(document, QueryError::BuildFailure(failure.clone()));
        }
    }

    fn live_epoch(&self, document: &str) -> Option<u64> {
        self.buffer.state(document).map(|state| state.epoch)
    }
}
