//! File watcher (C2): discovers files under a watched root and emits
//! debounced, diffed [`FileEvent`]s.
//!
//! Grounded on the teacher's `watcher.rs` (`notify::RecommendedWatcher`
//! plumbed through an mpsc channel into a `tokio::select!` loop, a
//! per-path debounce map with burst-aware adaptive delay) generalized
//! from a fixed set of Claude-home paths to an arbitrary include/ignore
//! glob set over a watched root.

use crate::error::CoreError;
use crate::models::{FileEvent, FileState};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub debounce_delay: Duration,
    pub max_debounce_delay: Duration,
    pub burst_threshold: usize,
    pub max_hash_size_bytes: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_delay: Duration::from_millis(500),
            max_debounce_delay: Duration::from_secs(3),
            burst_threshold: 10,
            max_hash_size_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Adaptive per-path debounce tracker: widens the delay under burst
/// traffic for one path instead of coalescing unconditionally.
struct DebounceState {
    config: WatcherConfig,
    last_fired: HashMap<PathBuf, Instant>,
    recent_event_times: VecDeque<Instant>,
}

impl DebounceState {
    fn new(config: WatcherConfig) -> Self {
        Self {
            config,
            last_fired: HashMap::new(),
            recent_event_times: VecDeque::new(),
        }
    }

    /// Record a raw event for `path` and decide whether to fire now.
    fn should_emit(&mut self, path: &Path) -> bool {
        let now = Instant::now();
        self.recent_event_times.push_back(now);
        while let Some(&front) = self.recent_event_times.front() {
            if now.duration_since(front) > Duration::from_secs(1) {
                self.recent_event_times.pop_front();
            } else {
                break;
            }
        }

        let delay = if self.recent_event_times.len() > self.config.burst_threshold {
            self.config.max_debounce_delay
        } else {
            self.config.debounce_delay
        };

        match self.last_fired.get(path) {
            Some(last) if now.duration_since(*last) < delay => false,
            _ => {
                self.last_fired.insert(path.to_path_buf(), now);
                true
            }
        }
    }
}

/// Compile-able glob: this repo only needs `*` wildcards on the basename,
/// so a tiny translation to regex is enough (no external glob dependency
/// the teacher didn't already carry).
fn glob_to_regex(pattern: &str) -> Regex {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{escaped}$")).unwrap_or_else(|_| Regex::new("^$").unwrap())
}

#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Vec<Regex>,
    ignore: Vec<Regex>,
}

impl PathFilter {
    pub fn new(include: &[String], ignore: &[String]) -> Self {
        Self {
            include: include.iter().map(|p| glob_to_regex(p)).collect(),
            ignore: ignore.iter().map(|p| glob_to_regex(p)).collect(),
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if self.ignore.iter().any(|re| re.is_match(name)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(name))
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::new(&["*.jsonl".to_string()], &[])
    }
}

/// Watches a root directory and streams [`FileEvent`]s to a single
/// downstream consumer (the pipeline orchestrator).
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    shutdown_tx: mpsc::Sender<()>,
}

impl FileWatcher {
    /// Begin watching `root` recursively. Returns the watcher handle plus
    /// the event receiver; dropping the handle (or calling `shutdown`)
    /// stops the background task.
    pub fn start(
        root: PathBuf,
        filter: PathFilter,
        config: WatcherConfig,
    ) -> Result<(Self, mpsc::Receiver<FileEvent>), CoreError> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<notify::Result<Event>>(256);
        let (event_tx, event_rx) = mpsc::channel::<FileEvent>(256);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.blocking_send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| CoreError::WatchError {
            message: "failed to construct watcher".to_string(),
            source: Some(e),
        })?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| CoreError::WatchError {
                message: format!("failed to watch {}", root.display()),
                source: Some(e),
            })?;

        tokio::spawn(async move {
            let mut states: HashMap<PathBuf, FileState> = HashMap::new();
            let mut debounce = DebounceState::new(config.clone());

            loop {
                tokio::select! {
                    Some(res) = raw_rx.recv() => {
                        match res {
                            Ok(event) => {
                                for path in &event.paths {
                                    if !filter.matches(path) {
                                        continue;
                                    }
                                    if !debounce.should_emit(path) {
                                        continue;
                                    }
                                    if let Some(file_event) = Self::process_event(
                                        &event.kind,
                                        path,
                                        &mut states,
                                        config.max_hash_size_bytes,
                                    ) {
                                        if event_tx.send(file_event).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "watch error"),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("file watcher shutting down");
                        return;
                    }
                }
            }
        });

        Ok((
            Self {
                _watcher: watcher,
                shutdown_tx,
            },
            event_rx,
        ))
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    fn process_event(
        kind: &EventKind,
        path: &Path,
        states: &mut HashMap<PathBuf, FileState>,
        max_hash_size: u64,
    ) -> Option<FileEvent> {
        match kind {
            EventKind::Create(_) => {
                if !path.is_file() {
                    return None;
                }
                let new_state = Self::stat(path, max_hash_size);
                states.insert(path.to_path_buf(), new_state.clone());
                Some(FileEvent::create(path.to_path_buf(), new_state))
            }
            EventKind::Modify(_) => {
                if !path.exists() {
                    let old_state = states.remove(path)?;
                    return Some(FileEvent::delete(path.to_path_buf(), old_state));
                }
                let new_state = Self::stat(path, max_hash_size);
                let old_state = states.insert(path.to_path_buf(), new_state.clone());
                match old_state {
                    Some(old) => FileEvent::modify(path.to_path_buf(), old, new_state),
                    None => Some(FileEvent::create(path.to_path_buf(), new_state)),
                }
            }
            EventKind::Remove(_) => {
                let old_state = states.remove(path)?;
                Some(FileEvent::delete(path.to_path_buf(), old_state))
            }
            _ => None,
        }
    }

    fn stat(path: &Path, max_hash_size: u64) -> FileState {
        let metadata = std::fs::metadata(path).ok();
        let size = metadata.as_ref().map(|m| m.len()).unwrap_or(0);
        let mtime = metadata.and_then(|m| m.modified().ok());
        let content_hash = if size <= max_hash_size {
            std::fs::read(path).ok().map(|bytes| format!("{:x}", md5::compute(&bytes)))
        } else {
            None
        };
        FileState {
            path: path.to_path_buf(),
            size,
            mtime,
            content_hash,
            read_offset: 0,
        }
    }
}
