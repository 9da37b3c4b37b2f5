//! HTTP API service and process orchestration.

pub mod app;
pub mod context;
pub mod middleware;
pub mod orchestrator;
pub mod web;

pub use orchestrator::{Orchestrator, OrchestratorState};
pub use web::WebWorker;
