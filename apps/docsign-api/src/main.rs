//! DocSign API Server - remote PDF signature requests
//!
//! Provides REST endpoints for:
//! - Creating signature requests, adding signers and sending them to a provider
//! - Provider webhooks and the simulated provider's confirmation links
//! - Downloading the signed document
//!
//! Background tasks poll providers for pending requests and expire overdue ones.

use axum::{
    routing::{delete, get, post},
    Router,
};
use clap::Parser;
use docsign_core::SigningConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod error;
mod handlers;
mod models;
mod state;
mod store;
mod sweeper;

use state::AppState;

/// Command-line arguments; every flag can also come from the environment
#[derive(Parser, Debug)]
#[command(name = "docsign-api")]
#[command(about = "Remote PDF signature request service")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3001")]
    port: u16,

    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// SQLite URL; defaults to a database in the platform data directory
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// JSON file with the list of signing providers
    #[arg(long, env = "PROVIDERS_FILE")]
    providers_file: Option<PathBuf>,

    /// Address signers and providers use to reach this service
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:3001")]
    public_base_url: String,

    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    provider_timeout_secs: u64,

    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "300", value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval_secs: u64,

    #[arg(long, env = "EXPIRY_INTERVAL_SECS", default_value = "3600", value_parser = clap::value_parser!(u64).range(1..))]
    expiry_interval_secs: u64,

    /// Consecutive poll failures before a request is escalated
    #[arg(long, env = "FAILURE_ESCALATION_THRESHOLD", default_value = "5")]
    failure_escalation_threshold: u32,

    #[arg(long, env = "SIGNATURE_FIELD_NAME", default_value = "Signature1")]
    field_name: String,

    /// Bytes reserved for the signature container
    #[arg(long, env = "RESERVED_SIGNATURE_SIZE", default_value = "16384")]
    reserved_signature_size: usize,

    /// Do not start the background poll and expiry loops
    #[arg(long)]
    no_sweeps: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn signing_config(&self) -> SigningConfig {
        SigningConfig {
            provider_timeout: Duration::from_secs(self.provider_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            expiry_interval: Duration::from_secs(self.expiry_interval_secs),
            failure_escalation_threshold: self.failure_escalation_threshold,
            field_name: self.field_name.clone(),
            reserved_signature_size: self.reserved_signature_size,
            public_base_url: self.public_base_url.clone(),
            ..SigningConfig::default()
        }
    }
}

/// Full router; shared by `main` and the tests
fn build_router(state: Arc<AppState>) -> Router {
    // CORS configuration for web clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Signature requests
        .route(
            "/api/requests",
            get(handlers::list_requests).post(handlers::create_request),
        )
        .route("/api/requests/:id", get(handlers::get_request))
        .route("/api/requests/:id/signers", post(handlers::add_signer))
        .route(
            "/api/requests/:id/signers/:signer_id",
            delete(handlers::remove_signer),
        )
        .route("/api/requests/:id/send", post(handlers::send_request))
        .route("/api/requests/:id/cancel", post(handlers::cancel_request))
        .route("/api/requests/:id/check", post(handlers::check_request))
        .route(
            "/api/requests/:id/retry-download",
            post(handlers::retry_download),
        )
        .route("/api/requests/:id/document", get(handlers::get_signed_document))
        .route("/api/requests/:id/audit", get(handlers::get_audit))
        // Providers
        .route("/api/providers", get(handlers::list_providers))
        .route("/api/providers/:id/test", post(handlers::test_provider))
        // On-demand sweeps
        .route("/api/sweeps/poll", post(handlers::run_poll_sweep))
        .route("/api/sweeps/expiry", post(handlers::run_expiry_sweep))
        // Provider-facing
        .route("/signature/callback/:token", post(handlers::signature_callback))
        .route(
            "/signature/demo/:request_id/:signer_id/:secret",
            get(handlers::demo_sign),
        )
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_filter = if args.verbose {
        "docsign_api=debug,docsign_core=debug,docsign_pades=debug,tower_http=debug"
    } else {
        "docsign_api=info,docsign_core=info,tower_http=debug"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Initializing DocSign API...");
    let config = args.signing_config();
    let providers = state::load_providers(args.providers_file.as_deref())?;
    let pool = state::connect(args.database_url.as_deref()).await?;
    let state = Arc::new(AppState::sqlite(pool, &providers, config.clone())?);

    if !args.no_sweeps {
        sweeper::spawn_poll_loop(state.service.clone(), config.poll_interval);
        sweeper::spawn_expiry_loop(state.service.clone(), config.expiry_interval);
    }

    let app = build_router(state);
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    info!("Starting DocSign API on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("DocSign API stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => {
            error!(error = %err, "Cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
