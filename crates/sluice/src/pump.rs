//! Upstream pump
//!
//! Pulls batches from a [`LogSource`], applies them through an [`Applier`]
//! and acknowledges each batch once its cycle has committed. A failed cycle
//! is not acknowledged; the source is rewound so the batch is delivered
//! again on a later fetch. Fetch, apply and ack run strictly in sequence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::applier::{ApplyOutcome, Applier};
use crate::config::PumpConfig;
use crate::error::{ApplyError, Result};
use crate::event::{decode, EntryMessage};
use crate::hooks::{ApplyHook, PassThrough};
use crate::source::LogSource;

/// Pump counters
#[derive(Debug, Default)]
pub struct AtomicPumpStats {
    batches_applied: AtomicU64,
    batches_failed: AtomicU64,
    terminal_failures: AtomicU64,
    entries_fetched: AtomicU64,
    records_applied: AtomicU64,
    idle_polls: AtomicU64,
}

impl AtomicPumpStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    fn record_fetched(&self, entries: usize) {
        self.entries_fetched
            .fetch_add(entries as u64, Ordering::Relaxed);
    }

    fn record_applied(&self, outcome: &ApplyOutcome) {
        self.batches_applied.fetch_add(1, Ordering::Relaxed);
        self.records_applied
            .fetch_add(outcome.records as u64, Ordering::Relaxed);
    }

    fn record_failed(&self, retriable: bool) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        if !retriable {
            self.terminal_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_idle(&self) {
        self.idle_polls.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> PumpStats {
        PumpStats {
            batches_applied: self.batches_applied.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            terminal_failures: self.terminal_failures.load(Ordering::Relaxed),
            entries_fetched: self.entries_fetched.load(Ordering::Relaxed),
            records_applied: self.records_applied.load(Ordering::Relaxed),
            idle_polls: self.idle_polls.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`AtomicPumpStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Batches applied and acknowledged
    pub batches_applied: u64,
    /// Cycles that failed and were rewound
    pub batches_failed: u64,
    /// Failed cycles whose error will not clear by replaying the batch
    pub terminal_failures: u64,
    /// Entries received from the source
    pub entries_fetched: u64,
    /// Single-row records applied
    pub records_applied: u64,
    /// Fetches that returned nothing
    pub idle_polls: u64,
}

/// Result of one fetch/apply/ack cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was fetched
    Idle,
    /// A batch was applied and acknowledged
    Applied {
        /// Acknowledged batch id
        batch_id: i64,
        /// Apply summary
        outcome: ApplyOutcome,
    },
}

/// Fetch/apply/ack loop over one source and one target
pub struct Pump<S: LogSource> {
    source: S,
    applier: Applier,
    hooks: Arc<dyn ApplyHook>,
    config: PumpConfig,
    stats: Arc<AtomicPumpStats>,
}

impl<S: LogSource> Pump<S> {
    /// Create a pump with pass-through hooks
    pub fn new(source: S, applier: Applier, config: PumpConfig) -> Self {
        Self {
            source,
            applier,
            hooks: Arc::new(PassThrough),
            config,
            stats: Arc::new(AtomicPumpStats::new()),
        }
    }

    /// Replace the hooks
    pub fn with_hooks(mut self, hooks: Arc<dyn ApplyHook>) -> Self {
        self.hooks = hooks;
        self
    }

    /// The upstream source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Current counters
    pub fn stats(&self) -> PumpStats {
        self.stats.snapshot()
    }

    /// Shared counters, readable while the pump runs
    pub fn stats_handle(&self) -> Arc<AtomicPumpStats> {
        Arc::clone(&self.stats)
    }

    /// Connect, subscribe and rewind to the last acknowledged batch
    pub async fn start(&mut self) -> Result<()> {
        self.source.connect().await?;
        self.source
            .subscribe(self.config.subscribe.as_deref())
            .await?;
        self.source.rollback_position().await?;
        info!(
            subscribe = self.config.subscribe.as_deref().unwrap_or("*"),
            fetch_size = self.config.fetch_size,
            "Pump connected"
        );
        Ok(())
    }

    async fn process(&self, entries: Vec<EntryMessage>) -> Result<ApplyOutcome> {
        let entries = self.hooks.extract(entries);
        let events = self.hooks.transform(decode(entries)?);

        if let (Some(first), Some(last)) = (events.first(), events.last()) {
            debug!(
                from = %first.position,
                to = %last.position,
                events = events.len(),
                "Applying events"
            );
        }
        self.applier.apply(events).await
    }

    /// Run one fetch/apply/ack cycle. On failure the source is rewound
    /// before the error is returned.
    pub async fn run_once(&mut self) -> Result<CycleOutcome> {
        let batch = self
            .source
            .fetch(self.config.fetch_size)
            .await
            .inspect_err(|e| error!(error = %e, "Fetch failed"))?;

        let Some(batch_id) = batch.id else {
            self.stats.record_idle();
            return Ok(CycleOutcome::Idle);
        };
        if batch.entries.is_empty() {
            self.stats.record_idle();
            self.source.ack(batch_id).await?;
            return Ok(CycleOutcome::Idle);
        }

        let entries = batch.entries.len();
        self.stats.record_fetched(entries);
        info!(batch_id, entries, "Batch fetched");

        match self.process(batch.entries).await {
            Ok(outcome) => {
                self.source
                    .ack(batch_id)
                    .await
                    .inspect_err(|e| error!(batch_id, error = %e, "Ack failed"))?;
                self.stats.record_applied(&outcome);
                info!(batch_id, records = outcome.records, "Batch acknowledged");
                Ok(CycleOutcome::Applied { batch_id, outcome })
            }
            Err(e) => {
                let retriable = e.is_retriable();
                self.stats.record_failed(retriable);
                match &e {
                    ApplyError::Execution {
                        table, kind, rows, ..
                    } => error!(
                        batch_id,
                        entries,
                        %table,
                        %kind,
                        rows,
                        retriable,
                        error = %e,
                        "Batch apply failed"
                    ),
                    _ => error!(batch_id, entries, retriable, error = %e, "Batch apply failed"),
                }
                if !retriable {
                    warn!(batch_id, "Batch will keep failing until the target or input is fixed");
                }
                if let Err(rewind_err) = self.source.rollback_position().await {
                    error!(error = %rewind_err, "Rewind failed after batch error");
                }
                Err(e)
            }
        }
    }

    /// Poll until `shutdown_rx` fires. Failed cycles are retried after the
    /// idle interval.
    pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<PumpStats> {
        self.start().await?;

        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let back_off = match self.run_once().await {
                Ok(CycleOutcome::Applied { .. }) => false,
                Ok(CycleOutcome::Idle) => true,
                Err(e) if e.is_shutdown() => break,
                Err(_) => true,
            };

            if back_off {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(self.config.idle_interval()) => {}
                }
            }
        }

        if let Err(e) = self.source.disconnect().await {
            warn!(error = %e, "Disconnect failed");
        }

        let stats = self.stats();
        info!(
            batches_applied = stats.batches_applied,
            batches_failed = stats.batches_failed,
            terminal_failures = stats.terminal_failures,
            records_applied = stats.records_applied,
            "Pump stopped"
        );
        Ok(stats)
    }
}
