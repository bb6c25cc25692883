use anyhow::Context;
use emigate::{init_logging, BrokerFactory, Settings};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;
    let logging = init_logging(settings.logging())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_commit = env!("GIT_COMMIT"),
        build_time = env!("BUILD_TIME"),
        "Starting emigate"
    );

    let broker = BrokerFactory::build(&settings)
        .await
        .context("failed to build broker")?;
    info!(sender_id = broker.sender_id(), "Broker is running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    let result = broker.disconnect().await;
    if let Err(e) = &result {
        error!(error = %e, "Broker did not shut down cleanly");
    }
    info!(stats = ?broker.stats(), "Broker stopped");

    logging.shutdown();
    result.context("broker disconnect failed")
}
