//! Bounded batch coordinator: drives a large number of independent
//! long-running operations (bulk repository migrations and the like)
//! through a capped worker pool with progress estimation, per-item error
//! collection, and a hard overall timeout with escalating shutdown.
//!
//! The shutdown path is an explicit state machine:
//! `Running -> Draining -> ForceCancelling -> Terminated`. Per-item failures
//! never abort the batch; only the global timeout escalation is fatal.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{HiveError, Result};

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// How many completions between progress log lines.
    pub batch_size: usize,
    /// Maximum number of operations in flight at once.
    pub max_concurrency: usize,
    /// Hard deadline for the whole batch.
    pub overall_timeout: Duration,
    /// Forced-cancellation window after the deadline expires.
    pub grace_period: Duration,
    /// Estimated wall-clock seconds one unit of work takes.
    pub estimated_seconds_per_unit: u64,
    /// Units of work per batch entry (a migration may touch several
    /// repositories per entry).
    pub units_per_entry: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrency: 10,
            overall_timeout: Duration::from_secs(48 * 3600),
            grace_period: Duration::from_secs(30),
            estimated_seconds_per_unit: 2,
            units_per_entry: 1,
        }
    }
}

impl BatchConfig {
    pub fn with_timeout_hours(mut self, hours: u64) -> Self {
        self.overall_timeout = Duration::from_secs(hours * 3600);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Running,
    Draining,
    ForceCancelling,
    Terminated,
}

impl std::fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchPhase::Running => write!(f, "running"),
            BatchPhase::Draining => write!(f, "draining"),
            BatchPhase::ForceCancelling => write!(f, "force-cancelling"),
            BatchPhase::Terminated => write!(f, "terminated"),
        }
    }
}

/// Which kind of resource a failed entry belongs to, for per-category
/// reporting at the end of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceCategory {
    Template,
    Solution,
    Student,
}

impl std::fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceCategory::Template => write!(f, "template"),
            ResourceCategory::Solution => write!(f, "solution"),
            ResourceCategory::Student => write!(f, "student"),
        }
    }
}

/// One failed entry, collected without aborting the batch.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub category: ResourceCategory,
    pub item: String,
    pub message: String,
}

/// Final accounting for a completed batch.
#[derive(Debug)]
pub struct BatchReport {
    pub total: usize,
    pub completed: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn failures_by_category(&self) -> HashMap<ResourceCategory, Vec<&BatchFailure>> {
        let mut partitioned: HashMap<ResourceCategory, Vec<&BatchFailure>> = HashMap::new();
        for failure in &self.failures {
            partitioned.entry(failure.category).or_default().push(failure);
        }
        partitioned
    }
}

pub struct BatchCoordinator {
    config: BatchConfig,
}

impl BatchCoordinator {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    /// Run `worker` over every item with at most `max_concurrency` in
    /// flight. Per-item failures land in the report; the only error is the
    /// global timeout escalation, which the operator must resolve out of
    /// band.
    pub async fn run<I, F, Fut>(&self, items: Vec<I>, worker: F) -> Result<BatchReport>
    where
        I: Send + 'static,
        F: Fn(I) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = std::result::Result<(), BatchFailure>> + Send + 'static,
    {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let failures: Arc<Mutex<Vec<BatchFailure>>> = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(AtomicUsize::new(0));

        let mut phase = BatchPhase::Running;
        tracing::info!(
            phase = %phase,
            total,
            concurrency = self.config.max_concurrency,
            "Batch started"
        );

        let mut tasks: JoinSet<()> = JoinSet::new();
        for item in items {
            let semaphore = semaphore.clone();
            let failures = failures.clone();
            let done = done.clone();
            let worker = worker.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    // Pool is shutting down; the entry stays unprocessed.
                    return;
                };
                if let Err(failure) = worker(item).await {
                    tracing::warn!(
                        category = %failure.category,
                        item = %failure.item,
                        message = %failure.message,
                        "Batch entry failed"
                    );
                    failures.lock().expect("failure list lock poisoned").push(failure);
                }
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        phase = BatchPhase::Draining;
        tracing::debug!(phase = %phase, "All entries submitted, draining");

        let drain = Self::drain(&mut tasks, done.as_ref(), total, &self.config);
        if tokio::time::timeout(self.config.overall_timeout, drain)
            .await
            .is_err()
        {
            phase = BatchPhase::ForceCancelling;
            tracing::error!(
                phase = %phase,
                done = done.load(Ordering::SeqCst),
                total,
                "Batch deadline exceeded, force-cancelling remaining work"
            );
            tasks.abort_all();
            let grace = self.config.grace_period;
            if tokio::time::timeout(grace, async {
                while tasks.join_next().await.is_some() {}
            })
            .await
            .is_err()
            {
                tracing::error!("Forced cancellation window expired with work still running");
            }
            return Err(HiveError::BatchTimeout(grace.as_secs()));
        }

        phase = BatchPhase::Terminated;
        let completed = done.load(Ordering::SeqCst);
        let failures = Arc::try_unwrap(failures)
            .map(|m| m.into_inner().expect("failure list lock poisoned"))
            .unwrap_or_else(|shared| shared.lock().expect("failure list lock poisoned").clone());
        let report = BatchReport {
            total,
            completed,
            failures,
        };

        for (category, entries) in report.failures_by_category() {
            tracing::warn!(
                category = %category,
                count = entries.len(),
                "Batch finished with failures in category"
            );
        }
        tracing::info!(
            phase = %phase,
            completed,
            total,
            failures = report.failures.len(),
            "Batch terminated"
        );
        Ok(report)
    }

    async fn drain(
        tasks: &mut JoinSet<()>,
        done: &AtomicUsize,
        total: usize,
        config: &BatchConfig,
    ) {
        let mut joined = 0usize;
        while tasks.join_next().await.is_some() {
            joined += 1;
            if joined % config.batch_size == 0 || joined == total {
                let completed = done.load(Ordering::SeqCst);
                let remaining = total.saturating_sub(completed);
                let percentage = if total == 0 {
                    100.0
                } else {
                    completed as f64 * 100.0 / total as f64
                };
                let estimated_remaining_secs = remaining as u64
                    * config.estimated_seconds_per_unit
                    * config.units_per_entry
                    / config.max_concurrency.max(1) as u64;
                tracing::info!(
                    completed,
                    total,
                    percentage = format_args!("{percentage:.1}%"),
                    estimated_remaining_secs,
                    "Batch progress"
                );
            }
        }
    }
}
