use rangemark::api;
use rangemark::datasource::ChainEventSource;
use rangemark::engine::SettlementEngine;
use rangemark::orchestration::{Ingestor, RetryWorker};
use rangemark::registry::RegistryClient;
use rangemark::{config::Config, db::init_db, EventSource, Repository};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));
    let source: Arc<dyn EventSource> =
        Arc::new(ChainEventSource::new(config.chain_api_url.clone()));
    let registry = config
        .registry_api_url
        .clone()
        .map(RegistryClient::new);
    let settlement = SettlementEngine::new(repo.clone(), registry);

    // One polling loop per event kind, each resuming from its own cursor.
    let ingestor = Arc::new(Ingestor::new(
        source,
        repo.clone(),
        settlement.clone(),
        config.clone(),
    ));
    ingestor.spawn_all();

    // Serial retry worker for queued settlement failures.
    let retry_worker = Arc::new(RetryWorker::new(
        repo.clone(),
        settlement,
        config.settlement_max_retries,
    ));
    {
        let retry_worker = retry_worker.clone();
        let interval = Duration::from_millis(config.retry_interval_ms);
        tokio::spawn(async move { retry_worker.run_loop(interval).await });
    }

    // Create router
    let app = api::create_router(api::AppState { repo, retry_worker });

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
