use anyhow::Context;
use session_auth::{Config, ServiceContext};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    rust_common::init_tracing(&config.tracing()).context("initializing tracing")?;

    info!(
        session_backend = %config.session_backend,
        access_ttl_secs = config.access_token_ttl.as_secs(),
        refresh_ttl_secs = config.refresh_token_ttl.as_secs(),
        "Starting session auth service"
    );

    let ctx = ServiceContext::build(&config)
        .await
        .context("building service context")?;

    if let Some(key) = config.api_key.as_deref() {
        let outcome = ctx.api_keys.sync_key(key).await.context("syncing API key")?;
        info!(?outcome, "API key ready");
    }

    let auth = ctx.auth.clone();
    let mut ticker = interval(config.purge_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let janitor = tokio::spawn(async move {
        loop {
            ticker.tick().await;
            if let Err(e) = auth.purge_expired_sessions().await {
                error!(error = %e, "expired session purge failed");
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down session auth service");
    janitor.abort();

    Ok(())
}
