use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use image_catalog::db::{self, PgCatalogStore};
use image_catalog::server::app::{build_app_state, connect_cache, CatalogComponents};
use image_catalog::server::config::CatalogConfig;
use image_catalog::services::{LocalStorage, LoggingPublisher};
use image_catalog::web::create_axum_router;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) -> tracing_appender::non_blocking::WorkerGuard {
    // Log to a file: JSON format, daily rotation
    let (file_writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, "catalog.log"));
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info,sea_orm=warn` level if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
    guard
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = match CatalogConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load catalog configuration: {e}");
            return Err(e.into());
        }
    };

    let _log_guard = init_logging(&config.log_dir);
    info!(listen_addr = %config.listen_addr, "Starting image catalog");

    // --- Database ---
    let db_pool = db::connect(&config).await?;
    if config.run_migrations {
        db::run_migrations(&db_pool).await?;
    }
    let store = Arc::new(PgCatalogStore::new(db_pool));

    // --- Cache ---
    let cache = connect_cache(&config).await;

    // --- Services ---
    let app_state = build_app_state(CatalogComponents {
        images: store.clone(),
        tags: store,
        cache,
        storage: Arc::new(LocalStorage::new(&config.storage_dir, &config.public_base_url)),
        publisher: Arc::new(LoggingPublisher),
    });
    if !config.predefined_tags.is_empty() {
        app_state.tags.seed_predefined(&config.predefined_tags).await?;
    }

    // --- HTTP ---
    let app = create_axum_router(app_state);
    let addr: SocketAddr = config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Image catalog listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Image catalog stopped.");
    Ok(())
}
