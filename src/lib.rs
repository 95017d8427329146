//! Cursor-info engine for continuously edited documents, with a small
//! language server for the `let` language on top.
//!
//! The [`Engine`] answers "what is the symbol at this offset" against the
//! latest analysis, even when that analysis predates recent edits, as long
//! as those edits provably did not touch the answer. Otherwise the query
//! waits for a rebuild.

use std::sync::{Arc, OnceLock, Weak};

use tower_lsp::jsonrpc::{Error, Result};
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService};

pub mod analyzer;
pub mod consumer;
pub mod document;
pub mod engine;
pub mod error;
pub mod gate;
mod lsp;
pub mod notify;
pub mod query;
pub mod scheduler;
pub mod settings;
pub mod snapshot;

pub use analyzer::{Analysis, AnalysisDiagnostic, AnalysisRequest, Analyzer, LetAnalyzer};
pub use consumer::{EditorConsumer, EditorEvent, NullConsumer, TracingConsumer};
pub use document::{LineIndex, Mapped, TextRange};
pub use engine::{Engine, EngineConfig};
pub use error::{AnalyzerError, BuildFailure, EditError, QueryError};
pub use lsp::{hover_for_occurrence, to_diagnostics, to_text_change, TextChange};
pub use notify::DocumentUpdate;
pub use scheduler::BuildPhase;
pub use settings::{discover_settings, load_settings, Settings};
pub use snapshot::{Occurrence, Snapshot};

pub struct Backend {
    client: Client,
    engine: OnceLock<Arc<Engine>>,
}

impl Backend {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            engine: OnceLock::new(),
        }
    }

    fn engine(&self) -> Option<&Arc<Engine>> {
        self.engine.get()
    }

    /// Log every update and push the snapshot's diagnostics to the client
    /// once it covers the current text.
    fn watch_updates(&self, engine: &Arc<Engine>) {
        let client = self.client.clone();
        let weak: Weak<Engine> = Arc::downgrade(engine);
        engine.subscribe(move |update: DocumentUpdate| {
            tracing::debug!(
                document = %update.document,
                base_sequence = update.base_sequence,
                "document updated"
            );
            let Some(engine) = weak.upgrade() else {
                return;
            };
            let Some(snapshot) = engine.snapshot(&update.document) else {
                return;
            };
            let current = engine.state(&update.document);
            if current.map(|s| (s.epoch, s.sequence))
                != Some((snapshot.epoch(), snapshot.base_sequence()))
            {
                // a newer build will publish again
                return;
            }
            let Ok(uri) = Url::parse(&update.document) else {
                return;
            };
            let line_index = LineIndex::new(snapshot.text());
            let diagnostics = lsp::to_diagnostics(&snapshot.analysis().diagnostics, &line_index);
            let client = client.clone();
            tokio::spawn(async move {
                client.publish_diagnostics(uri, diagnostics, None).await;
            });
        });
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        if self.engine.get().is_some() {
            tracing::warn!("initialize received twice");
            return Err(Error::invalid_request());
        }

        let workspace_root = params
            .workspace_folders
            .as_ref()
            .and_then(|folders| folders.first())
            .and_then(|f| f.uri.to_file_path().ok())
            .or_else(|| {
                #[allow(deprecated)]
                params.root_uri.as_ref()?.to_file_path().ok()
            });

        let settings = match &workspace_root {
            Some(root) => {
                let (settings, settings_dir) = settings::discover_settings(root);
                tracing::info!(dir = %settings_dir.display(), "settings resolved");
                settings
            }
            None => Settings::default(),
        };

        let consumer = TracingConsumer {
            needs_semantic_info: settings.needs_semantic_info(),
        };
        let engine = Engine::new(
            settings.engine_config(),
            Arc::new(LetAnalyzer),
            Arc::new(consumer),
        )
        .map_err(|e| {
            tracing::error!(error = %e, "failed to start engine");
            Error::internal_error()
        })?;
        let engine = Arc::new(engine);
        if self.engine.set(Arc::clone(&engine)).is_err() {
            // a concurrent initialize won
            tracing::warn!("initialize received twice");
            return Err(Error::invalid_request());
        }
        self.watch_updates(&engine);

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::INCREMENTAL,
                )),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "letsp initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let Some(engine) = self.engine() else {
            return;
        };
        engine.open(
            params.text_document.uri.as_str(),
            params.text_document.text,
            Vec::new(),
        );
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let Some(engine) = self.engine() else {
            return;
        };
        let document = params.text_document.uri.as_str();

        // each change applies to the text left by the previous one
        for change in &params.content_changes {
            let Some(text) = engine.text(document) else {
                tracing::warn!(document, "change for a document that is not open");
                return;
            };
            let line_index = LineIndex::new(text);
            let Some(edit) = lsp::to_text_change(&line_index, change) else {
                tracing::warn!(document, range = ?change.range, "change range outside document");
                continue;
            };
            if let Err(e) = engine.apply_edit(document, edit.offset, edit.length, edit.text) {
                tracing::warn!(document, error = %e, "edit rejected");
            }
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        if let Some(engine) = self.engine() {
            engine.close(params.text_document.uri.as_str());
        }
        self.client
            .publish_diagnostics(params.text_document.uri, vec![], None)
            .await;
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let Some(engine) = self.engine() else {
            return Ok(None);
        };
        let document = params
            .text_document_position_params
            .text_document
            .uri
            .as_str();
        let position = params.text_document_position_params.position;

        let Some(text) = engine.text(document) else {
            return Ok(None);
        };
        let line_index = LineIndex::new(text);
        let Some(offset) = line_index.offset(position) else {
            return Ok(None);
        };

        match engine.query_at(document, offset, &[], engine.deadline()).await {
            Ok(occurrence) => Ok(Some(lsp::hover_for_occurrence(&line_index, &occurrence))),
            Err(QueryError::NotFound) => Ok(None),
            Err(e) => {
                tracing::warn!(document, offset, error = %e, "hover query failed");
                Ok(None)
            }
        }
    }
}

pub fn create_service() -> (LspService<Backend>, tower_lsp::ClientSocket) {
    LspService::new(Backend::new)
}
