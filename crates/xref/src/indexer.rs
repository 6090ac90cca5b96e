//! Incremental indexing: keeps the store in step with the filesystem.
//!
//! Each file is handled on its own:
//!
//! 1. read and hash its contents
//! 2. if the hash matches the stored record, skip it without touching the store
//! 3. otherwise parse it and replace its record, symbols and content in one
//!    transaction
//!
//! Parsing happens before the transaction starts, so a file that fails to
//! parse keeps whatever was previously committed for it. Files are spread
//! over a rayon pool; the store serializes the actual writes.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};

use parking_lot::Mutex;
use rayon::iter::{ParallelBridge, ParallelIterator};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::ContentMode;
use crate::db::SqliteStore;
use crate::parse::{read_file, ParserRegistry};
use crate::queue::FileQueue;
use crate::{IndexError, Result};

/// Cooperative cancellation flag shared between a run and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop scheduling files. Files already being indexed
    /// are finished first.
    ///
    /// Returns `true` if the token had already been cancelled.
    pub fn cancel(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Contents unchanged since the last index
    Skipped,
    /// Re-parsed and committed
    Reparsed { symbols: usize },
    /// Could not be read or parsed; the previous state was kept
    Failed,
}

/// Statistics from an indexing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Files handed out by the discovery queue
    pub discovered: usize,
    pub skipped: usize,
    pub reparsed: usize,
    pub failed: usize,
    /// Symbols written by re-parsed files
    pub symbols: usize,
    /// The run stopped early because it was cancelled
    pub cancelled: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl IndexStats {
    fn record(&mut self, outcome: &FileOutcome) {
        self.discovered += 1;
        match outcome {
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Reparsed { symbols } => {
                self.reparsed += 1;
                self.symbols += symbols;
            }
            FileOutcome::Failed => self.failed += 1,
        }
    }
}

type ProgressFn<'a> = Box<dyn Fn(&Path, &FileOutcome) + Send + Sync + 'a>;

/// Drives discovery, hashing, parsing and storage.
pub struct Indexer<'a> {
    store: &'a SqliteStore,
    registry: ParserRegistry,
    content: ContentMode,
    threads: usize,
    cancel: CancelToken,
    progress: Option<ProgressFn<'a>>,
}

impl<'a> Indexer<'a> {
    pub fn new(store: &'a SqliteStore, registry: ParserRegistry) -> Self {
        Self {
            store,
            registry,
            content: ContentMode::default(),
            threads: 0,
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    /// Whether source lines are stored alongside symbols.
    pub fn with_content(mut self, content: ContentMode) -> Self {
        self.content = content;
        self
    }

    /// Worker count; 0 uses one per available CPU.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Called from worker threads after each file is handled.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&Path, &FileOutcome) + Send + Sync + 'a,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    /// Bring the store up to date for a single file.
    ///
    /// File-level problems (unreadable, unparseable, parser timeout) come
    /// back as errors for which [`IndexError::is_per_file`] holds; nothing is
    /// written in that case.
    pub fn index_file(&self, path: &Path) -> Result<FileOutcome> {
        let contents = read_file(path)?;
        let hash = content_hash(&contents);

        if let Some(record) = self.store.find_record(path)? {
            if record.hash == hash {
                debug!("Unchanged, skipping {:?}", path);
                return Ok(FileOutcome::Skipped);
            }
        }

        let parser = self
            .registry
            .parser_for(path)
            .ok_or_else(|| IndexError::ParseError {
                path: path.to_path_buf(),
                line: 0,
                message: "no parser registered for this file type".to_string(),
            })?;
        let symbols = parser.parse_contents(path, &contents)?;

        let timestamp = modified_secs(path);
        let text = match self.content {
            ContentMode::Eager => Some(String::from_utf8_lossy(&contents)),
            ContentMode::Lazy => None,
        };

        self.store
            .update_file(path, &hash, timestamp, &symbols, text.as_deref())?;
        debug!("Indexed {:?} with {}: {} symbols", path, parser.name(), symbols.len());

        Ok(FileOutcome::Reparsed {
            symbols: symbols.len(),
        })
    }

    /// Index everything `queue` yields.
    ///
    /// Per-file failures are logged and counted; store errors abort the run.
    /// Cancellation is checked before each file is scheduled.
    pub fn run(&self, queue: FileQueue) -> Result<IndexStats> {
        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| IndexError::ConfigError(format!("failed to start worker pool: {e}")))?;

        let stats = Mutex::new(IndexStats::default());
        let cancel = &self.cancel;

        pool.install(|| {
            queue
                .take_while(|_| !cancel.is_cancelled())
                .par_bridge()
                .try_for_each(|path| {
                    let outcome = match self.index_file(&path) {
                        Ok(outcome) => outcome,
                        Err(e) if e.is_per_file() => {
                            warn!("Skipping {:?}: {}", path, e);
                            FileOutcome::Failed
                        }
                        Err(e) => return Err(e),
                    };

                    stats.lock().record(&outcome);
                    if let Some(progress) = &self.progress {
                        progress(&path, &outcome);
                    }
                    Ok(())
                })
        })?;

        let mut stats = stats.into_inner();
        stats.cancelled = cancel.is_cancelled();
        stats.elapsed = start.elapsed();

        info!(
            "Indexed {} files ({} re-parsed, {} unchanged, {} failed, {} symbols) in {:?}{}",
            stats.discovered,
            stats.reparsed,
            stats.skipped,
            stats.failed,
            stats.symbols,
            stats.elapsed,
            if stats.cancelled { ", cancelled" } else { "" }
        );
        Ok(stats)
    }

    /// Forget every record whose file no longer exists. Returns how many
    /// were removed.
    pub fn prune_missing(&self) -> Result<usize> {
        let mut removed = 0;
        for record in self.store.list_records()? {
            if !record.path.exists() {
                debug!("Forgetting deleted file {:?}", record.path);
                self.store.remove(&record.path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Removed {} deleted files from the index", removed);
        }
        Ok(removed)
    }
}

/// SHA-256 of `contents` as lowercase hex.
pub fn content_hash(contents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    format!("{:x}", hasher.finalize())
}

fn modified_secs(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
