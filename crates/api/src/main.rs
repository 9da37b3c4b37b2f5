use anyhow::Context;

use chargeflow_infra::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chargeflow_observability::init();

    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(
        bind = %config.bind_addr(),
        database = %config.database_path.display(),
        queue_timeout_secs = config.queue_timeout.as_secs_f64(),
        "configuration loaded"
    );

    chargeflow_api::Orchestrator::new(config).run().await
}
