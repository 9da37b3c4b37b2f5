use std::time::Instant;

/// Per-request context, created by the request middleware.
///
/// Handlers receive it explicitly through an `Extension` instead of pulling a
/// logger or connection from ambient state.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    request_id: u64,
    started: Instant,
}

impl RequestContext {
    pub fn new(request_id: u64) -> Self {
        Self {
            request_id,
            started: Instant::now(),
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }
}
