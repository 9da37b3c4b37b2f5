//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: the API operations (open job, enqueue batch, lookups)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by the web worker and tests).
pub fn build_app(services: AppServices) -> Router {
    let services = Arc::new(services);

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/charges", routes::charges::router())
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    middleware::RequestIds::default(),
                    middleware::request_context,
                ))
                .layer(Extension(services)),
        )
}
