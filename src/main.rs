use post_ig::config::Config;
use post_ig::server::{AppState, router};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    tracing::debug!(?config, "Configuration resolved");

    let state = AppState::from_config(&config)?;
    if state.env.ready {
        tracing::info!("Credentials complete; publishing enabled");
    }

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Dashboard listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(Arc::new(state))).await?;
    Ok(())
}
