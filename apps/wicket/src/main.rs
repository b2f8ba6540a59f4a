use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use wicket_common::Config;
use wicket_core::Core;

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Config::from_env().context("read configuration from environment")?;

    let default_filter = if config.debug_mode { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if config.auth_token.is_none() {
        // Without a token the generic pass-through would be unreachable.
        let token = uuid::Uuid::new_v4().to_string();
        eprintln!("AUTH_TOKEN not set; generated token: {token}");
        config.auth_token = Some(token);
    }

    let bind = format!("{}:{}", config.host, config.port);
    let core = Core::new(config).context("build gateway core")?;
    let app = core.router();

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(event = "listening", bind = %bind);
    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}
