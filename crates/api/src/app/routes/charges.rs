use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use chargeflow_core::{ChargeInput, JobId};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        // `/batch` is also a valid claim id for lookups.
        .route("/batch", post(submit_batch).get(get_charge_named_batch))
        .route("/job/:job_id", get(get_job_status))
        .route("/:claim_id", get(get_charge))
}

pub async fn submit_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<Vec<dto::ChargeRequest>>,
) -> axum::response::Response {
    let charges: Vec<ChargeInput> = body.into_iter().map(Into::into).collect();
    if charges.is_empty() {
        tracing::warn!(request_id = ctx.request_id(), "accepting empty batch");
    }

    match services.submit_batch(charges).await {
        Ok(job) => (StatusCode::OK, Json(dto::job_to_json(job))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_job_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match job_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    match services.job_status(job_id).await {
        Ok(job) => (StatusCode::OK, Json(dto::job_to_json(job))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_charge(
    Extension(services): Extension<Arc<AppServices>>,
    Path(claim_id): Path<String>,
) -> axum::response::Response {
    charge_response(&services, &claim_id).await
}

async fn get_charge_named_batch(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    charge_response(&services, "batch").await
}

async fn charge_response(services: &AppServices, claim_id: &str) -> axum::response::Response {
    match services.charge(claim_id).await {
        Ok(charge) => (StatusCode::OK, Json(dto::charge_to_json(charge))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
