//! Archived round history (write-behind persistence collaborator)
//!
//! The scheduler never waits on storage. Finished rounds are handed to a
//! [`HistoryWriter`] queue and stored by a background task.

use crate::{
    errors::{AviatorResult, StorageError},
    games::types::{RoundId, RoundRecord, RoundSummary},
    metrics::GameMetrics,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    fs::OpenOptions,
    io::AsyncWriteExt,
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait RoundHistory: Send + Sync {
    async fn store_round(&self, record: &RoundRecord) -> Result<(), StorageError>;

    /// Newest first
    async fn recent_rounds(&self, limit: usize) -> Result<Vec<RoundSummary>, StorageError>;

    async fn load_round(&self, round_id: RoundId) -> Result<Option<RoundRecord>, StorageError>;
}

/// Keeps the last `retain` rounds in memory
pub struct InMemoryHistory {
    retain: usize,
    rounds: RwLock<VecDeque<RoundRecord>>,
}

impl InMemoryHistory {
    pub fn new(retain: usize) -> Self {
        let retain = retain.max(1);
        Self {
            retain,
            rounds: RwLock::new(VecDeque::with_capacity(retain)),
        }
    }

    async fn push(&self, record: RoundRecord) {
        let mut rounds = self.rounds.write().await;
        rounds.push_back(record);
        while rounds.len() > self.retain {
            rounds.pop_front();
        }
    }
}

#[async_trait]
impl RoundHistory for InMemoryHistory {
    async fn store_round(&self, record: &RoundRecord) -> Result<(), StorageError> {
        self.push(record.clone()).await;
        Ok(())
    }

    async fn recent_rounds(&self, limit: usize) -> Result<Vec<RoundSummary>, StorageError> {
        let rounds = self.rounds.read().await;
        Ok(rounds.iter().rev().take(limit).map(RoundRecord::summary).collect())
    }

    async fn load_round(&self, round_id: RoundId) -> Result<Option<RoundRecord>, StorageError> {
        let rounds = self.rounds.read().await;
        Ok(rounds.iter().rev().find(|r| r.round_id == round_id).cloned())
    }
}

/// Append-only JSON Lines file with an in-memory window for reads
pub struct JsonlHistory {
    path: PathBuf,
    window: InMemoryHistory,
    write_lock: Mutex<()>,
}

impl JsonlHistory {
    /// Open (or create) the file and load its tail into the window
    pub async fn open(path: impl AsRef<Path>, retain: usize) -> AviatorResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let window = InMemoryHistory::new(retain);
        let mut loaded = 0usize;
        if tokio::fs::try_exists(&path).await? {
            let contents = tokio::fs::read_to_string(&path).await?;
            for (line_no, line) in contents.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
                match serde_json::from_str::<RoundRecord>(line) {
                    Ok(record) => {
                        window.push(record).await;
                        loaded += 1;
                    }
                    Err(e) => warn!(path = %path.display(), line = line_no + 1, "Skipping corrupted history line: {}", e),
                }
            }
        }

        info!(path = %path.display(), loaded, "Round history opened");
        Ok(Self {
            path,
            window,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RoundHistory for JsonlHistory {
    async fn store_round(&self, record: &RoundRecord) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(record).map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        line.push('\n');

        {
            let _guard = self.write_lock.lock().await;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            file.flush().await.map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        }

        self.window.push(record.clone()).await;
        debug!(round_id = record.round_id, path = %self.path.display(), "Round appended to history");
        Ok(())
    }

    async fn recent_rounds(&self, limit: usize) -> Result<Vec<RoundSummary>, StorageError> {
        self.window.recent_rounds(limit).await
    }

    async fn load_round(&self, round_id: RoundId) -> Result<Option<RoundRecord>, StorageError> {
        if let Some(record) = self.window.load_round(round_id).await? {
            return Ok(Some(record));
        }

        // Older than the window: scan the file
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::ReadFailed(e.to_string())),
        };
        Ok(contents
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str::<RoundRecord>(line).ok())
            .find(|record| record.round_id == round_id))
    }
}

/// Write-behind queue in front of a [`RoundHistory`]
#[derive(Clone)]
pub struct HistoryWriter {
    tx: mpsc::Sender<RoundRecord>,
    metrics: Arc<GameMetrics>,
}

impl HistoryWriter {
    pub fn spawn(
        store: Arc<dyn RoundHistory>,
        queue_capacity: usize,
        max_attempts: u32,
        retry_backoff: Duration,
        metrics: Arc<GameMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<RoundRecord>(queue_capacity.max(1));
        let max_attempts = max_attempts.max(1);
        let writer = Self {
            tx,
            metrics: Arc::clone(&metrics),
        };

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                for attempt in 1..=max_attempts {
                    match store.store_round(&record).await {
                        Ok(()) => break,
                        Err(e) if attempt == max_attempts => {
                            error!(round_id = record.round_id, attempts = attempt, "Giving up storing round: {}", e);
                            metrics.record_history_write_failure();
                        }
                        Err(e) => {
                            warn!(round_id = record.round_id, attempt, "Storing round failed, retrying: {}", e);
                            tokio::time::sleep(retry_backoff * attempt).await;
                        }
                    }
                }
            }
            debug!("History writer stopped");
        });

        (writer, handle)
    }

    /// Queue a finished round. Never waits; a full queue drops the record.
    pub fn submit(&self, record: RoundRecord) {
        let round_id = record.round_id;
        if let Err(e) = self.tx.try_send(record) {
            warn!(round_id, "History queue rejected round: {}", e);
            self.metrics.record_history_write_failure();
        }
    }
}
