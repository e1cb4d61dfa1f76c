//! Database module for ln-ledger
//!
//! This module handles persistent storage for:
//! - Channels and their balance split
//! - Invoices
//! - Outgoing payments
//!
//! Every record carries its owner; every query is scoped by owner except the
//! sweeper's due-invoice scan and the explorer aggregates.

use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

mod models;
mod queries;

pub use models::*;
pub use queries::*;

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    /// SQLite connection (wrapped in Arc<Mutex> for thread safety)
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Connect to the database
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        info!("Connecting to database at {}", database_url);

        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        // Ensure the directory exists for file-based databases
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        let conn = Connection::open(path)?;

        Self::run_migrations(&conn)?;

        info!("Database connected successfully");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database
    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
        debug!("Running database migrations...");

        // Balance conservation is also enforced by the table itself
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                remote_pubkey TEXT NOT NULL,
                capacity_sats INTEGER NOT NULL CHECK (capacity_sats > 0),
                local_balance_sats INTEGER NOT NULL CHECK (local_balance_sats >= 0),
                remote_balance_sats INTEGER NOT NULL CHECK (remote_balance_sats >= 0),
                status TEXT NOT NULL,
                is_public BOOLEAN NOT NULL DEFAULT 1,
                opened_at INTEGER NOT NULL,
                closed_at INTEGER,
                updated_at INTEGER NOT NULL,
                CHECK (local_balance_sats + remote_balance_sats = capacity_sats)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS invoices (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                payment_request TEXT NOT NULL,
                payment_hash TEXT NOT NULL,
                amount_msats INTEGER NOT NULL CHECK (amount_msats > 0),
                description TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                paid_at INTEGER,
                CHECK (expires_at > created_at)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS payments (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                payment_hash TEXT NOT NULL,
                payment_request TEXT NOT NULL,
                amount_msats INTEGER NOT NULL CHECK (amount_msats > 0),
                fee_msats INTEGER NOT NULL DEFAULT 0 CHECK (fee_msats >= 0),
                destination TEXT NOT NULL,
                status TEXT NOT NULL,
                failure TEXT,
                error_message TEXT,
                channel_id TEXT,
                created_at INTEGER NOT NULL,
                paid_at INTEGER
            )
            "#,
            [],
        )?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_channels_owner_status ON channels(owner, status)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_invoices_payment_hash ON invoices(payment_hash)",
            "CREATE INDEX IF NOT EXISTS idx_invoices_owner_status ON invoices(owner, status)",
            "CREATE INDEX IF NOT EXISTS idx_invoices_status_expires ON invoices(status, expires_at)",
            "CREATE INDEX IF NOT EXISTS idx_payments_owner_status ON payments(owner, status)",
            "CREATE INDEX IF NOT EXISTS idx_payments_payment_hash ON payments(payment_hash)",
        ];
        for index in indexes {
            conn.execute(index, [])?;
        }

        debug!("Database migrations completed");
        Ok(())
    }

    /// Get the database connection
    pub fn conn(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// Check the store answers queries
    pub async fn ping(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Close the database connection
    pub async fn close(&self) {
        info!("Closing database connection...");
        // The connection will be closed when the last Arc is dropped
        info!("Database connection closed");
    }
}
