//! The service object that owns every component.
//!
//! An [`Engine`] is constructed explicitly and handed to whoever needs it.
//! Dropping it stops scheduling new work; builds already running finish on
//! their worker but can no longer publish into a document that is gone.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::{Handle, Runtime};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::analyzer::Analyzer;
use crate::consumer::EditorConsumer;
use crate::document::{DocumentBuffer, DocumentState};
use crate::error::{BuildFailure, EditError, QueryError};
use crate::notify::{DocumentUpdate, NotificationHub};
use crate::query::{PendingQueries, QueryOutcome, QueryResolver};
use crate::scheduler::{AnalysisScheduler, BuildPhase};
use crate::snapshot::{Snapshot, SnapshotStore};

/// Resolved engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a query may wait for a rebuild before it times out.
    pub query_timeout: Duration,
    /// Updates buffered per notification subscriber.
    pub notification_capacity: usize,
    /// Arguments used when a document is opened without any.
    pub default_arguments: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(60),
            notification_capacity: 64,
            default_arguments: Vec::new(),
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    buffer: Arc<DocumentBuffer>,
    store: Arc<SnapshotStore>,
    pending: Arc<PendingQueries>,
    hub: Arc<NotificationHub>,
    scheduler: Arc<AnalysisScheduler>,
    resolver: QueryResolver,
    handle: Handle,
    // dropped last
    _runtime: Option<Runtime>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine. Inside a tokio runtime, builds and subscribers run
    /// on it; otherwise the engine starts a small runtime of its own.
    pub fn new(
        config: EngineConfig,
        analyzer: Arc<dyn Analyzer>,
        consumer: Arc<dyn EditorConsumer>,
    ) -> io::Result<Self> {
        let (handle, runtime) = match Handle::try_current() {
            Ok(handle) => (handle, None),
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .thread_name("letsp-analysis")
                    .enable_all()
                    .build()?;
                (runtime.handle().clone(), Some(runtime))
            }
        };

        let buffer = Arc::new(DocumentBuffer::new());
        let store = Arc::new(SnapshotStore::new());
        let pending = Arc::new(PendingQueries::new());
        let hub = Arc::new(NotificationHub::new(config.notification_capacity));
        let scheduler = Arc::new(AnalysisScheduler::new(
            Arc::clone(&buffer),
            Arc::clone(&store),
            Arc::clone(&pending),
            Arc::clone(&hub),
            analyzer,
            consumer,
            handle.clone(),
        ));
        let resolver = QueryResolver::new(
            Arc::clone(&buffer),
            Arc::clone(&store),
            Arc::clone(&scheduler),
            Arc::clone(&pending),
        );

        Ok(Self {
            config,
            buffer,
            store,
            pending,
            hub,
            scheduler,
            resolver,
            handle,
            _runtime: runtime,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open `document`, replacing any open instance of the same name.
    ///
    /// Empty `arguments` fall back to the configured defaults.
    pub fn open(&self, document: &str, text: impl Into<String>, arguments: Vec<String>) -> DocumentState {
        let arguments = if arguments.is_empty() {
            self.config.default_arguments.clone()
        } else {
            arguments
        };
        let previous = self.buffer.state(document);
        let state = self.buffer.open(document, text.into(), arguments);

        if let Some(previous) = previous {
            tracing::info!(document, epoch = state.epoch, "document reopened");
            self.store.retract(document, previous.epoch);
            self.scheduler.forget(document);
            // queries against the old instance now resolve as closed
            self.pending.reevaluate(document, &self.store, &self.buffer);
        } else {
            tracing::info!(document, epoch = state.epoch, "document opened");
        }

        self.scheduler.text_changed(document);
        state
    }

    /// Replace `length` bytes at `offset` with `new_text`, returning the
    /// edit's sequence number.
    pub fn apply_edit(
        &self,
        document: &str,
        offset: usize,
        length: usize,
        new_text: &str,
    ) -> Result<u64, EditError> {
        let sequence = self.buffer.apply_edit(document, offset, length, new_text)?;
        tracing::debug!(document, sequence, offset, length, inserted = new_text.len(), "edit applied");
        self.scheduler.text_changed(document);
        Ok(sequence)
    }

    /// Close `document`. Returns false if it was not open.
    pub fn close(&self, document: &str) -> bool {
        if !self.buffer.close(document) {
            return false;
        }
        tracing::info!(document, "document closed");
        self.store.remove(document);
        self.scheduler.forget(document);
        self.pending
            .fail_all(document, QueryError::Closed(document.to_string()));
        true
    }

    /// Describe the symbol at `offset`, waiting at most until `deadline`.
    pub async fn query_at(
        &self,
        document: &str,
        offset: usize,
        arguments: &[String],
        deadline: Instant,
    ) -> QueryOutcome {
        self.resolver.query_at(document, offset, arguments, deadline).await
    }

    /// Blocking form of [`query_at`](Self::query_at). Must not be called
    /// from inside an async task.
    pub fn query_at_blocking(
        &self,
        document: &str,
        offset: usize,
        arguments: &[String],
        deadline: Instant,
    ) -> QueryOutcome {
        self.resolver
            .query_at_blocking(document, offset, arguments, deadline)
    }

    /// Deadline for a query issued now, per the configured timeout.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.config.query_timeout
    }

    /// Call `receiver` with every document update on a background task.
    pub fn subscribe<F>(&self, receiver: F) -> JoinHandle<()>
    where
        F: FnMut(DocumentUpdate) + Send + 'static,
    {
        let _entered = self.handle.enter();
        self.hub.subscribe_with(receiver)
    }

    /// Raw receiver for document updates.
    pub fn updates(&self) -> broadcast::Receiver<DocumentUpdate> {
        self.hub.subscribe()
    }

    /// Watch the snapshot generation counter.
    pub fn generations(&self) -> watch::Receiver<u64> {
        self.store.watch()
    }

    pub fn snapshot(&self, document: &str) -> Option<Arc<Snapshot>> {
        self.store.get(document)
    }

    pub fn text(&self, document: &str) -> Option<String> {
        self.buffer.text(document)
    }

    pub fn state(&self, document: &str) -> Option<DocumentState> {
        self.buffer.state(document)
    }

    pub fn phase(&self, document: &str) -> BuildPhase {
        self.scheduler.phase(document)
    }

    pub fn last_failure(&self, document: &str) -> Option<BuildFailure> {
        self.scheduler.last_failure(document)
    }

    /// Number of queries still waiting on `document`.
    pub fn pending_queries(&self, document: &str) -> usize {
        self.pending.count(document)
    }
}
