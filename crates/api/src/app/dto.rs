use serde::Deserialize;

use chargeflow_core::{Charge, ChargeInput, Job};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ChargeRequest {
    pub claim_id: String,
    pub patient_id: String,
    pub charge_amount: f64,
    pub cpt_code: String,
}

impl From<ChargeRequest> for ChargeInput {
    fn from(req: ChargeRequest) -> Self {
        ChargeInput {
            claim_id: req.claim_id,
            patient_id: req.patient_id,
            charge_amount: req.charge_amount,
            cpt_code: req.cpt_code,
        }
    }
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn job_to_json(job: Job) -> serde_json::Value {
    serde_json::json!({
        "job_id": job.job_id.get(),
        "is_done": job.is_done,
    })
}

pub fn charge_to_json(charge: Charge) -> serde_json::Value {
    serde_json::json!({
        "claim_id": charge.claim_id,
        "patient_id": charge.patient_id,
        "charge_amount": charge.charge_amount,
        "cpt_code": charge.cpt_code,
        "risk_score": charge.risk_score,
    })
}
