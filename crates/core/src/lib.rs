//! `chargeflow-core`: billing charge domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! jobs, charges, the risk score, and the message that crosses the work queue.

pub mod charge;
pub mod error;
pub mod id;
pub mod job;
pub mod message;

pub use charge::{Charge, ChargeInput, risk_score};
pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::Job;
pub use message::QueueMessage;
