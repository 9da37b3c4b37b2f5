//! Background consumer: applies queued charge batches to storage.
//!
//! One cooperative task drives the dequeue/apply loop. Each batch is applied
//! in a single transaction (all charges, then the job's completion mark).
//! A failed batch is rolled back, logged, and stops the whole process group;
//! there is no retry and no requeue.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{Instrument, error, info, warn};

use chargeflow_core::{JobId, QueueMessage};

use crate::db::{Database, StoreError};
use crate::queue::{QueueError, WorkQueueConsumer};
use crate::shutdown::ShutdownSignal;

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Fallback bound on a single dequeue wait.
    pub dequeue_timeout: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_secs(5),
            name: "consumer".to_string(),
        }
    }
}

impl ConsumerConfig {
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }
}

/// What the consumer got done before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub batches_applied: u64,
    pub charges_written: u64,
    pub discarded_on_shutdown: u64,
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("applying batch for job {job_id} failed: {source}")]
    Apply {
        job_id: JobId,
        #[source]
        source: StoreError,
    },

    #[error("work queue unusable: {0}")]
    Transport(#[from] QueueError),

    #[error("consumer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Apply one dequeued batch. Returns the number of charges written.
pub async fn process_message(db: &Database, message: &QueueMessage) -> Result<usize, ConsumerError> {
    let job_id = message.job.job_id;

    let written = db
        .apply_batch(message)
        .await
        .map_err(|source| ConsumerError::Apply { job_id, source })?;

    info!(job_id = %job_id, charges = written, "batch committed");
    Ok(written)
}

pub struct ChargeConsumer {
    db: Database,
    queue: WorkQueueConsumer,
    config: ConsumerConfig,
}

impl ChargeConsumer {
    pub fn new(db: Database, queue: WorkQueueConsumer, config: ConsumerConfig) -> Self {
        Self { db, queue, config }
    }

    /// Run until the shutdown signal is set or a fatal error occurs.
    ///
    /// Fatal errors (failed batch, broken queue) trigger `signal` before this
    /// returns, so the rest of the process group stops too.
    pub async fn run(self, signal: ShutdownSignal) -> Result<ConsumerStats, ConsumerError> {
        let span = chargeflow_observability::worker_span(&self.config.name);
        info!(parent: &span, "starting up");

        let mut consume = tokio::spawn(self.consume(signal.clone()).instrument(span.clone()));
        info!(parent: &span, "ready for batches");

        // Nothing else suspends this task, so the blocking wait gets its own thread.
        let waiter = {
            let signal = signal.clone();
            tokio::task::spawn_blocking(move || signal.wait())
        };

        tokio::select! {
            joined = &mut consume => return joined?,
            _ = waiter => info!(parent: &span, "shutdown observed, letting in-flight batch finish"),
        }

        consume.await?
    }

    async fn consume(mut self, signal: ShutdownSignal) -> Result<ConsumerStats, ConsumerError> {
        let mut stats = ConsumerStats::default();
        let timeout = self.config.dequeue_timeout;

        let outcome = loop {
            // Cancellation is only observed here, between batches.
            let next = tokio::select! {
                biased;
                _ = signal.cancelled() => break Ok(()),
                next = self.queue.dequeue(timeout) => next,
            };

            let message = match next {
                Ok(message) => message,
                Err(QueueError::Empty) => continue,
                Err(err) => {
                    error!(error = %err, "work queue failed");
                    signal.trigger(format!("{}: work queue failed: {err}", self.config.name));
                    break Err(ConsumerError::Transport(err));
                }
            };

            info!(job_id = %message.job.job_id, charges = message.charges.len(), "received job");

            match process_message(&self.db, &message).await {
                Ok(written) => {
                    stats.batches_applied += 1;
                    stats.charges_written += written as u64;
                }
                Err(err) => {
                    error!(job_id = %message.job.job_id, error = %err, "batch apply failed");
                    signal.trigger(format!("{}: {err}", self.config.name));
                    break Err(err);
                }
            }
        };

        let discarded = self.queue.drain_discard();
        stats.discarded_on_shutdown = discarded as u64;

        match &outcome {
            Ok(()) => info!(
                batches = stats.batches_applied,
                charges = stats.charges_written,
                discarded,
                "exiting"
            ),
            Err(_) => warn!(batches = stats.batches_applied, discarded, "exiting after failure"),
        }

        outcome.map(|()| stats)
    }
}
