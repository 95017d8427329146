//! Settings infrastructure for letsp.
//!
//! This module loads settings.toml files that tune query deadlines,
//! notification buffering and the default analyzer arguments.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::engine::EngineConfig;

/// Root settings structure loaded from settings.toml.
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    /// Engine tuning.
    pub engine: Option<EngineSettings>,

    /// Analyzer configuration.
    pub analyzer: Option<AnalyzerSettings>,
}

/// Engine settings.
#[derive(Debug, Default, Deserialize)]
pub struct EngineSettings {
    /// How long a hover query may wait for a rebuild, in milliseconds.
    pub query_timeout_ms: Option<u64>,

    /// Updates buffered per notification subscriber.
    pub notification_capacity: Option<usize>,

    /// Whether edits eagerly trigger a full analysis (default: true).
    pub needs_semantic_info: Option<bool>,
}

/// Analyzer settings.
#[derive(Debug, Default, Deserialize)]
pub struct AnalyzerSettings {
    /// Opaque arguments used for documents opened without any.
    pub arguments: Option<Vec<String>>,
}

impl Settings {
    /// Resolve into the engine's typed configuration, filling in defaults.
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        let engine = self.engine.as_ref();
        EngineConfig {
            query_timeout: engine
                .and_then(|e| e.query_timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.query_timeout),
            notification_capacity: engine
                .and_then(|e| e.notification_capacity)
                .unwrap_or(defaults.notification_capacity),
            default_arguments: self
                .analyzer
                .as_ref()
                .and_then(|a| a.arguments.clone())
                .unwrap_or(defaults.default_arguments),
        }
    }

    pub fn needs_semantic_info(&self) -> bool {
        self.engine
            .as_ref()
            .and_then(|e| e.needs_semantic_info)
            .unwrap_or(true)
    }
}

/// Load settings from a settings.toml file.
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(path: &Path) -> Settings {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse settings.toml");
                Settings::default()
            }
        },
        Err(_) => Settings::default(),
    }
}

/// Discover settings.toml by searching up the directory tree, then direct children.
///
/// Search order:
/// 1. Walk up from `start_dir` to filesystem root
/// 2. If not found, check immediate child directories of `start_dir`
///
/// Returns `(settings, settings_dir)` where `settings_dir` is the directory
/// containing the found settings.toml.
/// If not found, returns `(Settings::default(), start_dir)`.
pub fn discover_settings(start_dir: &Path) -> (Settings, PathBuf) {
    let mut current = Some(start_dir);
    while let Some(dir) = current {
        let candidate = dir.join("settings.toml");
        if candidate.is_file() {
            return (load_settings(&candidate), dir.to_path_buf());
        }
        current = dir.parent();
    }

    if let Ok(entries) = std::fs::read_dir(start_dir) {
        for entry in entries.flatten() {
            if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
                let candidate = entry.path().join("settings.toml");
                if candidate.is_file() {
                    return (load_settings(&candidate), entry.path());
                }
            }
        }
    }

    (Settings::default(), start_dir.to_path_buf())
}
