use anyhow::Context;

use creditscribe_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    creditscribe_observability::init();

    let config = AppConfig::from_env();
    let app = creditscribe_api::app::build_app(&config)
        .await
        .context("failed to wire services")?;

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
