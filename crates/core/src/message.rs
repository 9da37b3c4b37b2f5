//! The value carried by the work queue.

use serde::{Deserialize, Serialize};

use crate::charge::ChargeInput;
use crate::error::{DomainError, DomainResult};
use crate::job::Job;

/// One submitted batch in flight between the API and the consumer.
///
/// Self-contained: no connections, no handles. It is encoded to bytes on
/// enqueue and decoded on dequeue, so the consumer always works on an
/// independent copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job: Job,
    pub charges: Vec<ChargeInput>,
}

impl QueueMessage {
    pub fn new(job: Job, charges: Vec<ChargeInput>) -> Self {
        Self { job, charges }
    }

    pub fn encode(&self) -> DomainResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DomainError::codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> DomainResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| DomainError::codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::JobId;

    #[test]
    fn decode_rejects_garbage() {
        let err = QueueMessage::decode(b"not json").unwrap_err();
        assert!(matches!(err, DomainError::Codec(_)));
    }

    #[test]
    fn decoded_copy_preserves_charge_order() {
        let msg = QueueMessage::new(
            Job::pending(JobId::new(1)),
            vec![
                ChargeInput {
                    claim_id: "B".into(),
                    patient_id: "P1".into(),
                    charge_amount: 10.0,
                    cpt_code: "99211".into(),
                },
                ChargeInput {
                    claim_id: "A".into(),
                    patient_id: "P2".into(),
                    charge_amount: 20.0,
                    cpt_code: "99212".into(),
                },
            ],
        );

        let copy = QueueMessage::decode(&msg.encode().unwrap()).unwrap();
        let ids: Vec<_> = copy.charges.iter().map(|c| c.claim_id.as_str()).collect();
        assert_eq!(ids, ["B", "A"]);
        assert_eq!(copy.job, msg.job);
    }
}
