use std::sync::Arc;

use repochat::providers::factory;
use repochat::registry::ToolRegistry;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod configuration;
mod error;
mod routes;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = configuration::Settings::new()?;

    let registry = Arc::new(ToolRegistry::init(&settings.systems).await?);
    for (system, alive) in registry.status().await {
        info!(system = %system, alive, "tool provider");
    }

    let provider = match factory::get_provider(settings.provider.clone()) {
        Ok(provider) => provider,
        Err(e) => {
            registry.shutdown().await;
            return Err(e);
        }
    };

    let state = AppState::new(provider, registry.clone(), settings.agent.clone());
    let app = routes::configure(state).layer(routes::cors(&settings.server.allowed_origins)?);

    let listener = tokio::net::TcpListener::bind(settings.server.address()).await?;
    info!("listening on {}", listener.local_addr()?);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("shutting down tool providers");
    registry.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
