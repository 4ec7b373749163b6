use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use accountd::config::AppConfig;
use accountd::runtime::App;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = AppConfig::load()?;
    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "accountd starting: RUST_LOG='{}', data_dir='{}', txn_timeout_ms={}, persistence={}, outbox_interval_ms={}",
        rust_log,
        config.data_dir.display(),
        config.store.transactions.timeout_ms,
        config.store.persistence.enabled,
        config.outbox.interval_ms
    );

    let app = App::open(config)?;
    app.run_until(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(target: "startup", error = %e, "failed to listen for ctrl-c");
        }
    })
    .await
}
