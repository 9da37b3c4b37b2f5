//! API operations, independent of HTTP.

use thiserror::Error;
use tracing::{info, warn};

use chargeflow_core::{Charge, ChargeInput, Job, JobId, QueueMessage};
use chargeflow_infra::{Database, QueueError, StoreError, WorkQueueProducer};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Job {0} is not found")]
    JobNotFound(JobId),

    #[error("Charge with claim_id={0} is not found")]
    ChargeNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("work queue unavailable: {0}")]
    Queue(#[from] QueueError),
}

/// Everything a request handler needs: a storage handle and the producer side
/// of the work queue.
#[derive(Debug, Clone)]
pub struct AppServices {
    db: Database,
    queue: WorkQueueProducer,
}

impl AppServices {
    pub fn new(db: Database, queue: WorkQueueProducer) -> Self {
        Self { db, queue }
    }

    /// Open a job for `charges` and hand the batch to the consumer.
    ///
    /// The job is committed before the batch is enqueued, and this returns
    /// without waiting for the batch to be applied.
    pub async fn submit_batch(&self, charges: Vec<ChargeInput>) -> Result<Job, ServiceError> {
        let job = self.db.create_job().await?;
        let count = charges.len();

        if let Err(err) = self.queue.enqueue(&QueueMessage::new(job, charges)) {
            warn!(job_id = %job.job_id, error = %err, "job opened but batch could not be enqueued");
            return Err(err.into());
        }

        info!(job_id = %job.job_id, charges = count, "batch accepted");
        Ok(job)
    }

    pub async fn job_status(&self, job_id: JobId) -> Result<Job, ServiceError> {
        match self.db.get_job(job_id).await {
            Ok(job) => Ok(job),
            Err(StoreError::NotFound) => Err(ServiceError::JobNotFound(job_id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn charge(&self, claim_id: &str) -> Result<Charge, ServiceError> {
        match self.db.get_charge(claim_id).await {
            Ok(charge) => Ok(charge),
            Err(StoreError::NotFound) => Err(ServiceError::ChargeNotFound(claim_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
