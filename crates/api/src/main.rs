use anyhow::Context;
use tracing::info;

use microfin_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    microfin_observability::init();

    let config = AppConfig::from_env()?;
    let app = microfin_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
