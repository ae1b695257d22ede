//! The record types that flow through the pipeline: raw usage records
//! read off disk, file-tracking state owned by the watcher, and the
//! enriched records handed to the aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// A single usage event as logged by the assistant, one per JSONL line.
///
/// `cache_read_tokens`/`cache_write_tokens` accept both of the field
/// names observed in the wild (short form and the `*_input_tokens` form
/// some client versions emit) via serde aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default, alias = "cache_creation_input_tokens")]
    pub cache_creation_tokens: u64,
    #[serde(default, alias = "cache_read_input_tokens")]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl UsageRecord {
    /// Sum of all four token buckets.
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }

    /// Key used for deduplication; absent unless both ids are present.
    pub fn dedup_key(&self) -> Option<String> {
        match (&self.message_id, &self.request_id) {
            (Some(m), Some(r)) => Some(format!("{m}:{r}")),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.timestamp.timestamp() != 0 && !self.model.is_empty() && self.total_tokens() > 0
    }
}

/// Per-file state owned exclusively by the file watcher (C2). The
/// stream reader (C3) only ever sees a snapshot via `FileWatcher::state`
/// and updates the read offset through `update_read_offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: Option<std::time::SystemTime>,
    pub content_hash: Option<String>,
    pub read_offset: u64,
}

impl FileState {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            size: 0,
            mtime: None,
            content_hash: None,
            read_offset: 0,
        }
    }
}

/// What changed about a tracked file since the last stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileChange {
    Size,
    ModTime,
    Content,
}

/// Kind of filesystem event the watcher emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Create,
    Modify,
    Delete,
}

/// A debounced, diffed filesystem event.
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
    pub old_state: Option<FileState>,
    pub new_state: Option<FileState>,
    pub change_list: Vec<FileChange>,
}

impl FileEvent {
    pub fn create(path: PathBuf, new_state: FileState) -> Self {
        Self {
            kind: FileEventKind::Create,
            path,
            old_state: None,
            new_state: Some(new_state),
            change_list: vec![FileChange::Size, FileChange::Content],
        }
    }

    pub fn delete(path: PathBuf, old_state: FileState) -> Self {
        Self {
            kind: FileEventKind::Delete,
            path,
            old_state: Some(old_state),
            new_state: None,
            change_list: Vec::new(),
        }
    }

    /// Diff two states into a Modify event; `None` if nothing changed.
    pub fn modify(path: PathBuf, old_state: FileState, new_state: FileState) -> Option<Self> {
        let mut change_list = Vec::new();
        if old_state.size != new_state.size {
            change_list.push(FileChange::Size);
        }
        if old_state.mtime != new_state.mtime {
            change_list.push(FileChange::ModTime);
        }
        if old_state.content_hash != new_state.content_hash {
            change_list.push(FileChange::Content);
        }
        if change_list.is_empty() {
            return None;
        }
        Some(Self {
            kind: FileEventKind::Modify,
            path,
            old_state: Some(old_state),
            new_state: Some(new_state),
            change_list,
        })
    }

    /// True when the file shrank, implying truncation/rotation.
    pub fn is_truncation(&self) -> bool {
        matches!((&self.old_state, &self.new_state), (Some(old), Some(new)) if new.size < old.size)
    }
}

/// Relative urgency of a record as it moves through the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Cost-based classification used by the aggregator when no
    /// explicit override is present in a record's metadata.
    pub fn from_cost(cost_usd: f64, high_threshold: f64, low_threshold: f64) -> Self {
        if cost_usd > high_threshold {
            Priority::High
        } else if cost_usd < low_threshold {
            Priority::Low
        } else {
            Priority::Normal
        }
    }
}

/// A [`UsageRecord`] after the processor pool's validate/transform/enrich
/// chain has run over it.
#[derive(Debug, Clone)]
pub struct ProcessedRecord {
    pub record: UsageRecord,
    pub metadata: HashMap<String, String>,
    pub priority: Priority,
    pub processing_time: Duration,
}

impl ProcessedRecord {
    pub fn new(record: UsageRecord) -> Self {
        Self {
            record,
            metadata: HashMap::new(),
            priority: Priority::Normal,
            processing_time: Duration::ZERO,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.metadata.get("duplicate").map(String::as_str) == Some("true")
    }
}

/// Wall-clock instant bookkeeping used by the watcher's debouncer; kept
/// here rather than in `watcher.rs` since both the reader and the
/// watcher need a notion of "when did we last see this path".
#[derive(Debug, Clone, Copy)]
pub struct SeenAt(pub Instant);
