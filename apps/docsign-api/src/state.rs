//! Application state for DocSign API

use anyhow::{Context, Result};
use docsign_core::{
    DocumentStore, Notifier, ProviderConfig, ProviderRegistry, RequestStore, SignatureService,
    SigningConfig, TracingNotifier,
};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::store::{SqliteDocumentStore, SqliteRequestStore};

pub struct AppState {
    pub service: Arc<SignatureService>,
}

impl AppState {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        documents: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        providers: &[ProviderConfig],
        config: SigningConfig,
    ) -> Result<Self> {
        let registry = ProviderRegistry::from_configs(providers, &config)?;
        tracing::info!(providers = ?registry.ids(), "Signing providers configured");
        let service = SignatureService::new(requests, documents, notifier, registry, config);
        Ok(Self {
            service: Arc::new(service),
        })
    }

    /// State backed by SQLite, with notifications written to the log
    pub fn sqlite(pool: SqlitePool, providers: &[ProviderConfig], config: SigningConfig) -> Result<Self> {
        Self::new(
            Arc::new(SqliteRequestStore::new(pool.clone())),
            Arc::new(SqliteDocumentStore::new(pool)),
            Arc::new(TracingNotifier),
            providers,
            config,
        )
    }
}

/// Provider definitions from a JSON array; a single simulated provider
/// named `demo` when no file is given
pub fn load_providers(path: Option<&Path>) -> Result<Vec<ProviderConfig>> {
    let Some(path) = path else {
        tracing::info!("No providers file, using the simulated 'demo' provider");
        return Ok(vec![ProviderConfig::simulated("demo")]);
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading providers file {}", path.display()))?;
    let providers: Vec<ProviderConfig> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing providers file {}", path.display()))?;
    Ok(providers)
}

pub async fn connect(database_url: Option<&str>) -> Result<SqlitePool> {
    // Get database path from env or use default
    let db_url = match database_url {
        Some(url) => url.to_string(),
        None => {
            let data_dir = dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("docsign-api");
            std::fs::create_dir_all(&data_dir).ok();
            format!("sqlite:{}/docsign.db?mode=rwc", data_dir.display())
        }
    };

    tracing::info!("Connecting to database: {}", db_url);

    // every connection to :memory: is its own database
    let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&db_url)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    tracing::info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS signature_requests (
            id TEXT PRIMARY KEY,
            token_digest TEXT NOT NULL UNIQUE,
            state TEXT NOT NULL,
            deadline TEXT,
            record_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_signature_requests_state ON signature_requests(state)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            content BLOB NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Migrations complete");
    Ok(())
}

/// Get platform-specific data directory
mod dirs {
    use std::path::PathBuf;

    pub fn data_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }
}
