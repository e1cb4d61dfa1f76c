//! ln-ledger: the off-chain accounting core of a Lightning wallet
//!
//! This crate keeps the local ledger a wallet front end needs:
//!
//! - **Channels**: open/close with `local + remote == capacity` enforced on every write
//! - **Invoices**: pending → paid | expired | canceled, with compare-and-set transitions
//! - **Payments**: reserve channel balance, settle, and release on failure (all-or-nothing)
//! - **Expiry sweeper**: background task expiring stale pending invoices
//! - **Reporting**: read-only dashboard and explorer aggregates
//!
//! # Architecture
//!
//! 1. Every operation takes an explicit owner id supplied by an upstream identity provider
//! 2. State lives in SQLite through [`db::Database`]
//! 3. [`ledger::LedgerService`] wires the components together
//! 4. An HTTP API in [`api`] exposes the operations to form, checkout and dashboard callers
//!
#![warn(missing_docs)]

pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod fee;
pub mod ids;
pub mod ledger;
pub mod state;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub use config::Config;
use db::Database;
use ledger::LedgerService;

/// The main ledger application state
#[derive(Clone)]
pub struct LedgerApp {
    /// Application configuration
    pub config: Arc<Config>,
    /// Database connection
    pub db: Arc<Database>,
    /// Ledger components
    pub ledger: Arc<LedgerService>,
}

impl LedgerApp {
    /// Create a new application instance, connecting to the configured database
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing ln-ledger application...");

        let db_url = config.resolve_database_url();
        info!("Connecting to database at: {}", db_url);
        let db = Database::connect(&db_url).await?;
        info!("Database connected successfully");

        let app = Self::with_database(config, db);
        info!("ln-ledger application initialized successfully");
        Ok(app)
    }

    /// Build an application around an already opened database
    pub fn with_database(config: Config, db: Database) -> Self {
        let config = Arc::new(config);
        let db = Arc::new(db);
        let ledger = Arc::new(LedgerService::new(config.clone(), db.clone()));
        Self { config, db, ledger }
    }

    /// Start the application and run until the API server stops
    pub async fn run(&self) -> Result<()> {
        // Held until the API stops on its own
        let (_shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        self.run_with_shutdown(shutdown_rx).await
    }

    /// Start the application with shutdown signal
    ///
    /// Runs the expiry sweeper and the HTTP API. When `shutdown_rx` fires the
    /// API stops accepting connections and the sweeper finishes its current
    /// cycle before exiting.
    pub async fn run_with_shutdown(
        &self,
        shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<()> {
        info!("Starting ln-ledger application...");

        let (sweeper_tx, sweeper_rx) = watch::channel(false);
        let sweeper_handle = if self.config.sweeper.enabled {
            let sweeper = Arc::new(self.ledger.sweeper(self.config.sweeper.clone()));
            Some(sweeper.spawn(sweeper_rx))
        } else {
            info!("Expiry sweeper disabled by configuration");
            None
        };

        let api_handle = tokio::spawn({
            let app = self.clone();
            async move {
                if let Err(e) = api::serve_with_shutdown(app, shutdown_rx).await {
                    warn!("API server error: {}", e);
                }
            }
        });

        info!(
            "ln-ledger application running. API available at http://{}",
            self.config.api_bind_address()
        );

        api_handle.await?;

        // API is down; let the sweeper wind down too
        let _ = sweeper_tx.send(true);
        if let Some(handle) = sweeper_handle {
            if let Err(e) = handle.await {
                error!("Expiry sweeper task failed: {}", e);
            }
        }

        Ok(())
    }

    /// Shutdown the application gracefully
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down ln-ledger application...");
        self.db.close().await;
        info!("ln-ledger application shutdown complete");
        Ok(())
    }
}

/// Error types for ledger operations
#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    /// Caller supplied a non-positive amount, empty field or similar
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity is not in the source state the transition requires
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Invoice deadline has passed
    #[error("Invoice expired: {0}")]
    Expired(String),

    /// No active channel can cover the requested amount
    #[error("Insufficient balance: requested {requested_sats} sats, largest spendable channel has {available_sats} sats")]
    InsufficientBalance {
        /// Amount the caller asked to move
        requested_sats: u64,
        /// Largest local balance among the owner's active channels
        available_sats: u64,
    },

    /// Entropy source unavailable
    #[error("Identifier generation failed: {0}")]
    Generation(String),

    /// Entity does not exist or belongs to someone else
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record looked up
        entity: &'static str,
        /// Identifier used for the lookup
        id: String,
    },

    /// Store failure
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Whether retrying the same call may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, LedgerError::Generation(_) | LedgerError::Database(_))
    }

    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Result type alias for ledger operations
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
