//! HTTP worker: serves the API until the shutdown signal is set.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{Instrument, info};

use chargeflow_infra::{Config, ShutdownSignal};

use crate::app::{self, AppServices};

pub struct WebWorker {
    config: Config,
    services: AppServices,
    bound: Option<watch::Sender<Option<SocketAddr>>>,
}

impl WebWorker {
    pub fn new(config: Config, services: AppServices) -> Self {
        Self {
            config,
            services,
            bound: None,
        }
    }

    /// Publish the bound address once the listener is up (useful with port 0).
    pub fn report_bound_addr(mut self, tx: watch::Sender<Option<SocketAddr>>) -> Self {
        self.bound = Some(tx);
        self
    }

    pub async fn run(self, signal: ShutdownSignal) -> anyhow::Result<()> {
        let span = chargeflow_observability::worker_span("web");
        self.serve(signal).instrument(span).await
    }

    async fn serve(self, signal: ShutdownSignal) -> anyhow::Result<()> {
        info!("starting");

        let bind = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .with_context(|| format!("failed to bind {bind}"))?;
        let addr = listener
            .local_addr()
            .context("failed to read listener address")?;

        if let Some(tx) = &self.bound {
            tx.send_replace(Some(addr));
        }
        info!(%addr, "ready for requests");

        let app = app::build_app(self.services);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
            .context("http server failed")?;

        info!("stopped");
        Ok(())
    }
}
