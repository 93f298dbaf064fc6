mod config;
mod db;
mod error;
mod handlers;
mod models;
mod repository;
mod services;
mod storage;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, MB};
use crate::db::Database;
use crate::repository::FileRepository;
use crate::services::FileService;
use crate::storage::LocalStorage;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub files: Arc<FileService>,
}

#[derive(Parser)]
#[command(name = "fileshare")]
#[command(about = "Token-based file sharing server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Remove every stored blob, writing a deletion log first
    Clear {
        /// Also delete every file record from the database
        #[arg(long)]
        clear_db: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fileshare=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Arc::new(Config::load()?);
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    let files = Arc::new(FileService::new(
        FileRepository::new(db),
        Arc::new(LocalStorage::new()),
        config.clone(),
    ));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(AppState { config, files }).await,
        Commands::Clear { clear_db } => {
            let log = files.bulk_clear(clear_db).await?;
            println!("Delete log created: {}", log.display());
            println!("Successfully cleared all files");
            if clear_db {
                println!("Successfully cleared files in database");
            }
            Ok(())
        }
    }
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Multipart framing on top of the largest accepted file
    let body_limit = (state.config.storage.max_upload() + 10 * MB) as usize;

    let routes = Router::new()
        .route(
            "/files",
            get(handlers::file::list_files).post(handlers::file::upload_file),
        )
        .route(
            "/files/:token",
            get(handlers::file::get_file).delete(handlers::file::delete_file),
        )
        .route("/files/:token/download", get(handlers::file::download_file));

    Router::new()
        .nest("/api/v1", routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
