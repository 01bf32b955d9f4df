//! Status publishers.
//!
//! The JSONL publisher keeps an append-only journal of every status the
//! runtime published, one JSON object per line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::domain::ActivityStatus;

use super::StatusPublisher;

/// One journal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedStatus {
    /// When the status was published
    pub timestamp: DateTime<Utc>,

    /// The activity the status belongs to
    pub uuid: Uuid,

    /// The published status
    pub status: ActivityStatus,
}

/// Appends published statuses to a JSONL journal
pub struct JsonlStatusPublisher {
    path: PathBuf,
    /// Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonlStatusPublisher {
    /// Create a publisher writing to `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create journal directory: {}", parent.display()))?;
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Path to the journal
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay every journal entry in order
    pub async fn replay(&self) -> Result<Vec<PublishedStatus>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open status journal: {}", self.path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut entries = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let entry: PublishedStatus = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse journal entry: {}", line))?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// The most recent status published for `uuid`
    pub async fn last_status(&self, uuid: Uuid) -> Result<Option<ActivityStatus>> {
        let entries = self.replay().await?;
        Ok(entries
            .into_iter()
            .rev()
            .find(|e| e.uuid == uuid)
            .map(|e| e.status))
    }
}

#[async_trait]
impl StatusPublisher for JsonlStatusPublisher {
    async fn publish(&self, uuid: Uuid, status: &ActivityStatus) -> Result<()> {
        let entry = PublishedStatus {
            timestamp: Utc::now(),
            uuid,
            status: status.clone(),
        };
        let json = serde_json::to_string(&entry).context("Failed to serialize status")?;

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open status journal: {}", self.path.display()))?;

        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write status")?;
        file.flush().await.context("Failed to flush status")?;

        Ok(())
    }
}

/// Publishes statuses to the log only
#[derive(Debug, Clone, Default)]
pub struct LoggingStatusPublisher;

#[async_trait]
impl StatusPublisher for LoggingStatusPublisher {
    async fn publish(&self, uuid: Uuid, status: &ActivityStatus) -> Result<()> {
        info!(%uuid, %status, "Live activity status");
        Ok(())
    }
}

/// Publishes every status to each of a set of publishers in order
#[derive(Default)]
pub struct CompositeStatusPublisher {
    publishers: Vec<Arc<dyn StatusPublisher>>,
}

impl CompositeStatusPublisher {
    pub fn new(publishers: Vec<Arc<dyn StatusPublisher>>) -> Self {
        Self { publishers }
    }
}

#[async_trait]
impl StatusPublisher for CompositeStatusPublisher {
    async fn publish(&self, uuid: Uuid, status: &ActivityStatus) -> Result<()> {
        for publisher in &self.publishers {
            publisher.publish(uuid, status).await?;
        }
        Ok(())
    }
}
