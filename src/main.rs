//! Entry point for the Billing Engine binary.
//!
//! Running this binary will start an HTTP server that exposes the
//! billing API.  Configuration comes from `BILLING_*` environment
//! variables (see [`billing_engine::config::EngineConfig`]); log
//! verbosity follows `RUST_LOG` and defaults to `info`.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = billing_engine::config::EngineConfig::from_env()?;
    if let Err(err) = billing_engine::api::serve(config).await {
        tracing::error!(error = %err, "error running server");
        return Err(err);
    }
    Ok(())
}
