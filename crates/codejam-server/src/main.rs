use anyhow::Result;
use codejam_server::{create_app, state};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SOCKET_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "codejam_server=debug,tower_http=debug".into());
    let subscriber = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Codejam server...");

    // Load configuration
    let config = state::Config::load()?;
    let bind_address = config.bind_address.clone();

    let (app, app_state) = create_app(config).await?;
    let registry = app_state.registry.clone();

    // Start the server
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Listening on {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received, draining sessions");
            registry.drain().await;
        })
        .await?;

    // Upgraded sockets outlive `serve`; close their queues and let the
    // writers flush the shutdown notice
    app_state.registry.shutdown().await;
    if tokio::time::timeout(SOCKET_GRACE, app_state.registry.sockets_closed())
        .await
        .is_err()
    {
        tracing::warn!("Sockets still open after {:?}, closing anyway", SOCKET_GRACE);
    }

    app_state.persister.close().await;

    tracing::info!("Codejam server stopped");

    Ok(())
}
