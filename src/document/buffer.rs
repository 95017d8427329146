//! Live document text and edit logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::EditError;

use super::edit::{EditLog, OffsetMapper};

/// A single open document.
#[derive(Debug)]
pub struct Document {
    /// Distinguishes successive opens of the same name.
    epoch: u64,
    text: String,
    log: EditLog,
    /// Opaque analyzer arguments used for the next build.
    arguments: Vec<String>,
}

impl Document {
    fn new(epoch: u64, text: String, arguments: Vec<String>) -> Self {
        let log = EditLog::with_initial_text(&text);
        Self {
            epoch,
            text,
            log,
            arguments,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn log(&self) -> &EditLog {
        &self.log
    }

    pub fn current_sequence(&self) -> u64 {
        self.log.current_sequence()
    }

    fn replace(&mut self, offset: usize, length: usize, new_text: &str) -> Result<u64, EditError> {
        let len = self.text.len();
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= len)
            .ok_or(EditError::OutOfRange {
                offset,
                length,
                len,
            })?;
        for boundary in [offset, end] {
            if !self.text.is_char_boundary(boundary) {
                return Err(EditError::NotCharBoundary(boundary));
            }
        }

        self.text.replace_range(offset..end, new_text);
        Ok(self.log.record(offset, length, new_text))
    }
}

/// What a query or build needs to know about a document at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentState {
    pub epoch: u64,
    pub sequence: u64,
    pub arguments: Vec<String>,
}

/// The text a build runs on, captured atomically with its sequence number.
#[derive(Debug, Clone)]
pub struct BuildInput {
    pub epoch: u64,
    pub sequence: u64,
    pub text: String,
    pub arguments: Vec<String>,
}

/// Thread-safe storage for open documents.
///
/// Each document has a single writer (`apply_edit` takes its write lock);
/// readers copy what they need under a short read lock.
#[derive(Debug, Default)]
pub struct DocumentBuffer {
    documents: DashMap<String, Arc<RwLock<Document>>>,
    next_epoch: AtomicU64,
}

impl DocumentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, name: &str) -> Option<Arc<RwLock<Document>>> {
        self.documents.get(name).map(|doc| Arc::clone(&doc))
    }

    /// Open (or replace) a document. Its log restarts with edit 0 holding
    /// the whole text.
    pub fn open(&self, name: &str, text: String, arguments: Vec<String>) -> DocumentState {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        let document = Document::new(epoch, text, arguments.clone());
        self.documents
            .insert(name.to_string(), Arc::new(RwLock::new(document)));
        DocumentState {
            epoch,
            sequence: 0,
            arguments,
        }
    }

    /// Replace `length` bytes at `offset` with `new_text`.
    ///
    /// Returns the sequence number of the recorded edit.
    pub fn apply_edit(
        &self,
        name: &str,
        offset: usize,
        length: usize,
        new_text: &str,
    ) -> Result<u64, EditError> {
        let doc = self
            .entry(name)
            .ok_or_else(|| EditError::UnknownDocument(name.to_string()))?;
        let mut doc = doc.write();
        doc.replace(offset, length, new_text)
    }

    pub fn close(&self, name: &str) -> bool {
        self.documents.remove(name).is_some()
    }

    pub fn state(&self, name: &str) -> Option<DocumentState> {
        let doc = self.entry(name)?;
        let doc = doc.read();
        Some(DocumentState {
            epoch: doc.epoch,
            sequence: doc.current_sequence(),
            arguments: doc.arguments.clone(),
        })
    }

    pub fn text(&self, name: &str) -> Option<String> {
        let doc = self.entry(name)?;
        let text = doc.read().text.clone();
        Some(text)
    }

    /// Capture text, sequence and arguments for a build in one step.
    pub fn capture(&self, name: &str) -> Option<BuildInput> {
        let doc = self.entry(name)?;
        let doc = doc.read();
        Some(BuildInput {
            epoch: doc.epoch,
            sequence: doc.current_sequence(),
            text: doc.text.clone(),
            arguments: doc.arguments.clone(),
        })
    }

    /// Replace the analyzer arguments. Returns true if they changed.
    pub fn set_arguments(&self, name: &str, arguments: &[String]) -> bool {
        let Some(doc) = self.entry(name) else {
            return false;
        };
        let mut doc = doc.write();
        if doc.arguments == arguments {
            return false;
        }
        doc.arguments = arguments.to_vec();
        true
    }

    /// Mapper from the text at `from` to the text at `to`, as long as the
    /// document is still the open instance `epoch`.
    pub fn epoch_mapper(&self, name: &str, epoch: u64, from: u64, to: u64) -> Option<OffsetMapper> {
        let doc = self.entry(name)?;
        let doc = doc.read();
        (doc.epoch == epoch).then(|| doc.log.mapper(from, to))
    }
}
