//! Upstream log source
//!
//! The pump pulls batches of [`EntryMessage`]s through [`LogSource`] without
//! acknowledging them, and acknowledges a batch only after it has been
//! applied. Acknowledging a batch id also acknowledges every earlier batch.
//! [`LogSource::rollback_position`] rewinds delivery to the first batch not
//! yet acknowledged.
//!
//! [`MemorySource`] is an in-process implementation for tests and replay
//! tooling.

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ApplyError, Result};
use crate::event::EntryMessage;

/// One batch delivered by [`LogSource::fetch`]
#[derive(Debug, Clone, Default)]
pub struct FetchedBatch {
    /// Batch id used for acknowledgement, `None` when nothing was available
    pub id: Option<i64>,
    /// Entries in log order
    pub entries: Vec<EntryMessage>,
}

impl FetchedBatch {
    /// A batch carrying nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether there is nothing to apply
    pub fn is_empty(&self) -> bool {
        self.id.is_none() || self.entries.is_empty()
    }
}

/// Subscription to an upstream change log
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Open the subscription
    async fn connect(&mut self) -> Result<()>;

    /// Restrict delivery to tables matching `filter`; `None` keeps the
    /// server-side default
    async fn subscribe(&mut self, filter: Option<&str>) -> Result<()>;

    /// Fetch up to `max` entries without acknowledging them
    async fn fetch(&mut self, max: usize) -> Result<FetchedBatch>;

    /// Acknowledge `id` and every batch delivered before it
    async fn ack(&mut self, id: i64) -> Result<()>;

    /// Redeliver from the first unacknowledged batch on the next fetch
    async fn rollback_position(&mut self) -> Result<()>;

    /// Close the subscription
    async fn disconnect(&mut self) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryLog {
    connected: bool,
    filter: Option<String>,
    next_id: i64,
    // Acknowledged batches are popped from the front.
    pending: VecDeque<(i64, Vec<EntryMessage>)>,
    delivered: usize,
    acked: Vec<i64>,
}

/// In-memory [`LogSource`]
#[derive(Debug, Default)]
pub struct MemorySource {
    log: Mutex<MemoryLog>,
}

impl MemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch, returning its id
    pub async fn push(&self, entries: Vec<EntryMessage>) -> i64 {
        let mut log = self.log.lock().await;
        log.next_id += 1;
        let id = log.next_id;
        log.pending.push_back((id, entries));
        id
    }

    /// Ids acknowledged so far, in acknowledgement order
    pub async fn acked(&self) -> Vec<i64> {
        self.log.lock().await.acked.clone()
    }

    /// Batches not yet acknowledged
    pub async fn pending(&self) -> usize {
        self.log.lock().await.pending.len()
    }

    /// Current subscription filter
    pub async fn filter(&self) -> Option<String> {
        self.log.lock().await.filter.clone()
    }
}

#[async_trait]
impl LogSource for MemorySource {
    async fn connect(&mut self) -> Result<()> {
        self.log.get_mut().connected = true;
        debug!("Memory source connected");
        Ok(())
    }

    async fn subscribe(&mut self, filter: Option<&str>) -> Result<()> {
        let log = self.log.get_mut();
        if !log.connected {
            return Err(ApplyError::upstream("subscribe before connect"));
        }
        log.filter = filter.map(str::to_string);
        Ok(())
    }

    async fn fetch(&mut self, max: usize) -> Result<FetchedBatch> {
        let log = self.log.get_mut();
        if !log.connected {
            return Err(ApplyError::upstream("fetch before connect"));
        }

        let Some((id, entries)) = log.pending.get(log.delivered) else {
            return Ok(FetchedBatch::empty());
        };
        let batch = FetchedBatch {
            id: Some(*id),
            entries: entries.iter().take(max).cloned().collect(),
        };
        log.delivered += 1;
        Ok(batch)
    }

    async fn ack(&mut self, id: i64) -> Result<()> {
        let log = self.log.get_mut();
        let position = log
            .pending
            .iter()
            .take(log.delivered)
            .position(|(pending, _)| *pending == id)
            .ok_or_else(|| ApplyError::upstream(format!("ack of unknown batch {}", id)))?;

        for (acked, _) in log.pending.drain(..=position) {
            log.acked.push(acked);
        }
        log.delivered -= position + 1;
        Ok(())
    }

    async fn rollback_position(&mut self) -> Result<()> {
        let log = self.log.get_mut();
        if log.delivered > 0 {
            info!(batches = log.delivered, "Rewinding unacknowledged batches");
        }
        log.delivered = 0;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.log.get_mut().connected = false;
        debug!("Memory source disconnected");
        Ok(())
    }
}
