use folderhost_core::Hub;
use folderhost_server::{
    app,
    audit::TracingAuditLog,
    auth::YamlAccountStore,
    config::Config,
    storage::{FolderQuota, FsDirectoryLister},
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "folderhost_server=debug,folderhost_core=debug,tower_http=debug,audit=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting folderhost server v{}", env!("CARGO_PKG_VERSION"));
    info!("Served folder: {:?}", config.folder);
    info!("Storage limit: {:?}", config.storage_limit);
    info!("CORS origins: {:?}", config.cors_origins);

    if let Err(e) = std::fs::create_dir_all(&config.folder) {
        error!("Failed to create served folder: {}", e);
        std::process::exit(1);
    }

    let accounts = match YamlAccountStore::load(&config.accounts_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to load accounts: {}", e);
            std::process::exit(1);
        }
    };
    info!("Loaded {} accounts from {:?}", accounts.len(), config.accounts_path);

    // Create shared state
    let hub = Hub::new(
        config.hub_config(),
        Arc::new(FsDirectoryLister),
        Arc::new(FolderQuota::new(&config.folder, config.storage_limit)),
        Arc::new(TracingAuditLog),
    );

    let router = app(hub, accounts, &config.cors_origins);

    // Create listener
    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Server listening on http://{}", addr);

    // Run server with graceful shutdown
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    info!("Server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
