//! Charges and the derived risk score.

use serde::{Deserialize, Serialize};

/// Derive the risk score of a charge from its amount.
///
/// `round(amount / 1000, 2)`: the exact value of `amount / 1000` is rounded to
/// two decimals with ties to even, so `1125.0` scores `1.12`. Scaling by 100
/// first would round the already inexact product instead.
pub fn risk_score(amount: f64) -> f64 {
    let ratio = amount / 1000.0;
    // Precision formatting rounds the exact binary value, ties to even.
    format!("{ratio:.2}").parse().unwrap_or(ratio)
}

/// A charge as submitted by a client, before scoring.
///
/// `claim_id` is an external identifier and is not guaranteed unique across
/// batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeInput {
    pub claim_id: String,
    pub patient_id: String,
    pub charge_amount: f64,
    pub cpt_code: String,
}

/// A persisted, scored charge. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub claim_id: String,
    pub patient_id: String,
    pub charge_amount: f64,
    pub cpt_code: String,
    pub risk_score: f64,
}

impl Charge {
    /// Score an incoming charge.
    pub fn score(input: ChargeInput) -> Self {
        let risk_score = risk_score(input.charge_amount);
        Self {
            claim_id: input.claim_id,
            patient_id: input.patient_id,
            charge_amount: input.charge_amount,
            cpt_code: input.cpt_code,
            risk_score,
        }
    }
}
