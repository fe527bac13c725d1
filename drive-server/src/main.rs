use anyhow::Result;
use drive_server::{build, spawn_session_sweeper, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let app = build(&config).await?;
    let _sweeper = spawn_session_sweeper(app.state.adapter.clone(), config.session_retention);

    let shutdown = app.state.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("[drive] shutting down");
            shutdown.cancel();
        }
    });

    let addr = config.addr();
    tracing::info!("[drive] listening on http://{addr}");

    app.listen(addr).await?;

    Ok(())
}
