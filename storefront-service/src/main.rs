use anyhow::Context;
use storefront_service::{build_router, build_stores, build_token_codec_from_env, load_service_config, AppState};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_service_config()?;
    let token_codec = build_token_codec_from_env()?;
    let stores = build_stores(&config).await?;
    let addr = config.bind_addr();
    let state = AppState::new(stores, token_codec, config)?;

    let app = build_router(state);
    info!(%addr, "starting storefront-service");
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
