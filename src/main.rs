use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use greenfi_api::chain::{Chain, EthersChain};
use greenfi_api::config::Config;
use greenfi_api::http::{self, AppState};
use greenfi_api::reconciler::Reconciler;
use greenfi_api::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("greenfi_api=info")),
        )
        .init();

    let config = Config::from_env();
    let store = Store::connect(&config.database_url).await?;
    store.migrate().await?;

    let chain: Arc<dyn Chain> = Arc::new(EthersChain::new(&config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = Reconciler::new(chain.clone(), store.clone(), config.sync_interval);
    let sync_task = tokio::spawn(reconciler.run(shutdown_rx));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = http::router(AppState::new(store, chain, config));

    info!("greenfi api listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = sync_task.await;
    Ok(())
}
