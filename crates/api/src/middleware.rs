use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{extract::State, middleware::Next, response::Response};
use tracing::{Instrument, info, info_span};

use crate::context::RequestContext;

#[derive(Clone, Default)]
pub struct RequestIds {
    next: Arc<AtomicU64>,
}

impl RequestIds {
    fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Attach a `RequestContext` and run the request inside its own span.
pub async fn request_context(
    State(ids): State<RequestIds>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let ctx = RequestContext::new(ids.allocate());
    req.extensions_mut().insert(ctx);

    let span = info_span!(
        "request",
        request_id = ctx.request_id(),
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        let response = next.run(req).await;
        info!(status = response.status().as_u16(), elapsed_ms = ctx.elapsed_ms() as u64, "request finished");
        response
    }
    .instrument(span)
    .await
}
