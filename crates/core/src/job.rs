//! Job: the tracking record for one batch's processing lifecycle.

use serde::{Deserialize, Serialize};

use crate::id::JobId;

/// Tracking record of one submitted batch.
///
/// Created pending by the API; flipped to done only by the consumer, in the
/// same transaction that writes the batch's charges. Never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub is_done: bool,
}

impl Job {
    /// A freshly opened job whose batch has not been applied yet.
    pub fn pending(job_id: JobId) -> Self {
        Self {
            job_id,
            is_done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.is_done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_job_is_not_done() {
        let job = Job::pending(JobId::new(3));
        assert!(!job.is_done());
    }

    #[test]
    fn json_shape_matches_api_contract() {
        let job = Job::pending(JobId::new(3));
        let v = serde_json::to_value(job).unwrap();
        assert_eq!(v, serde_json::json!({ "job_id": 3, "is_done": false }));
    }
}
