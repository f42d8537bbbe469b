//! Append-only, per-build accumulation of log lines streamed during
//! execution, shared cluster-wide so any core node can retrieve them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::substrate::{DistributedMap, Substrate};

/// One line of build output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

/// Map from build id to its ordered log lines.
///
/// All mutation goes through the map's atomic compute so concurrent appends
/// from the same build's log stream never lose lines. Entries must be
/// removed once the build result has been consumed; leaving them behind is
/// a memory leak.
#[derive(Clone)]
pub struct BuildLogAggregator<S: Substrate> {
    logs: S::Map<Uuid, Vec<LogEntry>>,
}

impl<S: Substrate> BuildLogAggregator<S> {
    pub fn new(substrate: &S, name: &str) -> Self {
        Self {
            logs: substrate.map(name),
        }
    }

    /// Append one line. Compute-if-absent then push, never a replace.
    pub async fn append(&self, build_id: Uuid, message: impl Into<String>) -> Result<()> {
        let entry = LogEntry::new(message);
        self.logs
            .compute(build_id, move |current| {
                let mut entries = current.unwrap_or_default();
                entries.push(entry);
                Some(entries)
            })
            .await?;
        Ok(())
    }

    /// Snapshot of the lines accumulated so far. `None` means the build id
    /// is unknown, which is distinct from "no logs yet" only in that an
    /// empty vector is never stored.
    pub async fn get(&self, build_id: Uuid) -> Result<Option<Vec<LogEntry>>> {
        self.logs.get(&build_id).await
    }

    /// Release the entry after the build result has been consumed.
    pub async fn remove(&self, build_id: Uuid) -> Result<Option<Vec<LogEntry>>> {
        self.logs.remove(&build_id).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.logs.len().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        self.logs.is_empty().await
    }
}
