//! Database queries
//!
//! Every state change is a single conditional `UPDATE` guarded by the
//! transition's source status, so it either lands whole or not at all. The
//! caller learns which from the returned flag.

use super::models::{
    channel_from_row, invoice_from_row, payment_from_row, to_millis, CHANNEL_COLUMNS,
    INVOICE_COLUMNS, PAYMENT_COLUMNS,
};
use super::{Channel, Database, Invoice, Payment};
use crate::state::{
    ChannelStatus, ChannelTransition, InvoiceStatus, InvoiceTransition, PaymentStatus,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

/// Result of a reservation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Balance moved; the channel as it is after the debit
    Reserved(Channel),
    /// No active channel could cover the amount
    Insufficient {
        /// Largest local balance among the owner's active channels
        available_sats: u64,
    },
}

/// Channel queries
pub struct ChannelQueries<'a> {
    db: &'a Database,
}

impl<'a> ChannelQueries<'a> {
    /// Create a new query instance
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new channel
    pub async fn insert(&self, channel: &Channel) -> Result<()> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO channels ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                CHANNEL_COLUMNS
            ),
            params![
                &channel.id,
                &channel.owner,
                &channel.remote_pubkey,
                channel.capacity_sats as i64,
                channel.local_balance_sats as i64,
                channel.remote_balance_sats as i64,
                channel.status,
                channel.is_public,
                to_millis(channel.opened_at),
                channel.closed_at.map(to_millis),
                to_millis(channel.updated_at),
            ],
        )?;
        info!(
            "DB: Inserted channel: id={}, owner={}, capacity={}, status={}",
            channel.id, channel.owner, channel.capacity_sats, channel.status
        );
        Ok(())
    }

    /// Get a channel by ID
    pub async fn get(&self, owner: &str, id: &str) -> Result<Option<Channel>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let channel = conn
            .query_row(
                &format!(
                    "SELECT {} FROM channels WHERE owner = ?1 AND id = ?2",
                    CHANNEL_COLUMNS
                ),
                params![owner, id],
                channel_from_row,
            )
            .optional()?;
        Ok(channel)
    }

    /// List an owner's channels, newest first, optionally filtered by status
    pub async fn list(&self, owner: &str, status: Option<ChannelStatus>) -> Result<Vec<Channel>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM channels WHERE owner = ?1 AND (?2 IS NULL OR status = ?2) ORDER BY opened_at DESC, id ASC",
            CHANNEL_COLUMNS
        ))?;
        let channels = stmt
            .query_map(params![owner, status], channel_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(channels)
    }

    /// Apply a status transition if the channel is still in its source status
    pub async fn transition(
        &self,
        owner: &str,
        id: &str,
        transition: ChannelTransition,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let changed = match transition {
            ChannelTransition::Close => conn.execute(
                r#"
                UPDATE channels
                SET status = ?1, closed_at = ?2, updated_at = ?2
                WHERE owner = ?3 AND id = ?4 AND status = ?5
                "#,
                params![
                    transition.target(),
                    to_millis(now),
                    owner,
                    id,
                    transition.source()
                ],
            )?,
        };
        debug!(
            "DB: Channel transition {:?}: id={}, applied={}",
            transition,
            id,
            changed == 1
        );
        Ok(changed == 1)
    }

    /// Move `amount_sats` from local to remote on the best active channel
    ///
    /// The best channel has the largest local balance; ties go to the
    /// smallest channel id. Selection and debit run in one transaction.
    pub async fn reserve(
        &self,
        owner: &str,
        amount_sats: u64,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome> {
        let conn = self.db.conn();
        let mut conn = conn.lock().await;
        let tx = conn.transaction()?;

        let candidate: Option<String> = tx
            .query_row(
                r#"
                SELECT id FROM channels
                WHERE owner = ?1 AND status = ?2 AND local_balance_sats >= ?3
                ORDER BY local_balance_sats DESC, id ASC
                LIMIT 1
                "#,
                params![owner, ChannelStatus::Active, amount_sats as i64],
                |row| row.get(0),
            )
            .optional()?;

        let Some(channel_id) = candidate else {
            let available: i64 = tx.query_row(
                "SELECT COALESCE(MAX(local_balance_sats), 0) FROM channels WHERE owner = ?1 AND status = ?2",
                params![owner, ChannelStatus::Active],
                |row| row.get(0),
            )?;
            return Ok(ReserveOutcome::Insufficient {
                available_sats: available as u64,
            });
        };

        tx.execute(
            r#"
            UPDATE channels
            SET local_balance_sats = local_balance_sats - ?1,
                remote_balance_sats = remote_balance_sats + ?1,
                updated_at = ?2
            WHERE owner = ?3 AND id = ?4 AND status = ?5 AND local_balance_sats >= ?1
            "#,
            params![
                amount_sats as i64,
                to_millis(now),
                owner,
                &channel_id,
                ChannelStatus::Active
            ],
        )?;

        let channel = tx.query_row(
            &format!(
                "SELECT {} FROM channels WHERE owner = ?1 AND id = ?2",
                CHANNEL_COLUMNS
            ),
            params![owner, &channel_id],
            channel_from_row,
        )?;
        tx.commit()?;

        info!(
            "DB: Reserved {} sats on channel {}: local={}, remote={}",
            amount_sats, channel.id, channel.local_balance_sats, channel.remote_balance_sats
        );
        Ok(ReserveOutcome::Reserved(channel))
    }

    /// Move `amount_sats` back from remote to local on an active channel
    pub async fn release(
        &self,
        owner: &str,
        id: &str,
        amount_sats: u64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let changed = conn.execute(
            r#"
            UPDATE channels
            SET local_balance_sats = local_balance_sats + ?1,
                remote_balance_sats = remote_balance_sats - ?1,
                updated_at = ?2
            WHERE owner = ?3 AND id = ?4 AND status = ?5 AND remote_balance_sats >= ?1
            "#,
            params![
                amount_sats as i64,
                to_millis(now),
                owner,
                id,
                ChannelStatus::Active
            ],
        )?;
        if changed == 1 {
            info!("DB: Released {} sats on channel {}", amount_sats, id);
        }
        Ok(changed == 1)
    }
}

/// Invoice queries
pub struct InvoiceQueries<'a> {
    db: &'a Database,
}

impl<'a> InvoiceQueries<'a> {
    /// Create a new query instance
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new invoice
    pub async fn insert(&self, invoice: &Invoice) -> Result<()> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO invoices ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                INVOICE_COLUMNS
            ),
            params![
                &invoice.id,
                &invoice.owner,
                &invoice.payment_request,
                &invoice.payment_hash,
                invoice.amount_msats as i64,
                &invoice.description,
                invoice.status,
                to_millis(invoice.created_at),
                to_millis(invoice.expires_at),
                invoice.paid_at.map(to_millis),
            ],
        )?;
        info!(
            "DB: Inserted invoice: id={}, owner={}, payment_hash={}, amount_msats={}",
            invoice.id, invoice.owner, invoice.payment_hash, invoice.amount_msats
        );
        Ok(())
    }

    /// Get an invoice by payment hash
    pub async fn get_by_hash(&self, owner: &str, payment_hash: &str) -> Result<Option<Invoice>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let invoice = conn
            .query_row(
                &format!(
                    "SELECT {} FROM invoices WHERE owner = ?1 AND payment_hash = ?2",
                    INVOICE_COLUMNS
                ),
                params![owner, payment_hash],
                invoice_from_row,
            )
            .optional()?;
        Ok(invoice)
    }

    /// List an owner's invoices, newest first
    pub async fn list(
        &self,
        owner: &str,
        status: Option<InvoiceStatus>,
        limit: u32,
    ) -> Result<Vec<Invoice>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM invoices WHERE owner = ?1 AND (?2 IS NULL OR status = ?2) ORDER BY created_at DESC, id ASC LIMIT ?3",
            INVOICE_COLUMNS
        ))?;
        let invoices = stmt
            .query_map(params![owner, status, limit], invoice_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(invoices)
    }

    /// Pending invoices whose deadline is at or before `now`, across all owners
    pub async fn list_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Invoice>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM invoices WHERE status = ?1 AND expires_at <= ?2 ORDER BY expires_at ASC LIMIT ?3",
            INVOICE_COLUMNS
        ))?;
        let invoices = stmt
            .query_map(
                params![InvoiceStatus::Pending, to_millis(now), limit],
                invoice_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(invoices)
    }

    /// Compare-and-set an invoice out of pending
    ///
    /// `Pay` only lands before the deadline and `Expire` only at or after
    /// it, so the two can never both succeed.
    pub async fn transition(
        &self,
        owner: &str,
        payment_hash: &str,
        transition: InvoiceTransition,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let now = to_millis(now);
        let changed = match transition {
            InvoiceTransition::Pay => conn.execute(
                r#"
                UPDATE invoices SET status = ?1, paid_at = ?2
                WHERE owner = ?3 AND payment_hash = ?4 AND status = ?5 AND expires_at > ?2
                "#,
                params![
                    transition.target(),
                    now,
                    owner,
                    payment_hash,
                    transition.source()
                ],
            )?,
            InvoiceTransition::Cancel => conn.execute(
                r#"
                UPDATE invoices SET status = ?1
                WHERE owner = ?2 AND payment_hash = ?3 AND status = ?4
                "#,
                params![
                    transition.target(),
                    owner,
                    payment_hash,
                    transition.source()
                ],
            )?,
            InvoiceTransition::Expire => conn.execute(
                r#"
                UPDATE invoices SET status = ?1
                WHERE owner = ?2 AND payment_hash = ?3 AND status = ?4 AND expires_at <= ?5
                "#,
                params![
                    transition.target(),
                    owner,
                    payment_hash,
                    transition.source(),
                    now
                ],
            )?,
        };
        if changed == 1 {
            info!(
                "DB: Invoice {} -> {}: payment_hash={}",
                transition.source(),
                transition.target(),
                payment_hash
            );
        }
        Ok(changed == 1)
    }
}

/// Payment queries
pub struct PaymentQueries<'a> {
    db: &'a Database,
}

impl<'a> PaymentQueries<'a> {
    /// Create a new query instance
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a resolved payment
    pub async fn insert(&self, payment: &Payment) -> Result<()> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO payments ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                PAYMENT_COLUMNS
            ),
            params![
                &payment.id,
                &payment.owner,
                &payment.payment_hash,
                &payment.payment_request,
                payment.amount_msats as i64,
                payment.fee_msats as i64,
                &payment.destination,
                payment.status,
                payment.failure,
                payment.error_message.as_deref(),
                payment.channel_id.as_deref(),
                to_millis(payment.created_at),
                payment.paid_at.map(to_millis),
            ],
        )?;
        info!(
            "DB: Inserted payment: id={}, owner={}, amount_msats={}, status={}",
            payment.id, payment.owner, payment.amount_msats, payment.status
        );
        Ok(())
    }

    /// Get a payment by ID
    pub async fn get(&self, owner: &str, id: &str) -> Result<Option<Payment>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let payment = conn
            .query_row(
                &format!(
                    "SELECT {} FROM payments WHERE owner = ?1 AND id = ?2",
                    PAYMENT_COLUMNS
                ),
                params![owner, id],
                payment_from_row,
            )
            .optional()?;
        Ok(payment)
    }

    /// List an owner's payments, newest first
    pub async fn list(
        &self,
        owner: &str,
        status: Option<PaymentStatus>,
        limit: u32,
    ) -> Result<Vec<Payment>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM payments WHERE owner = ?1 AND (?2 IS NULL OR status = ?2) ORDER BY created_at DESC, id ASC LIMIT ?3",
            PAYMENT_COLUMNS
        ))?;
        let payments = stmt
            .query_map(params![owner, status, limit], payment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(payments)
    }
}

/// Count and sums for one status value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTotal {
    /// Status value as stored
    pub status: String,
    /// Number of records
    pub count: u64,
    /// Summed amount (channels: capacity sats, others: msats)
    pub amount: u64,
    /// Summed secondary amount (channels: local sats, payments: fee msats)
    pub secondary: u64,
}

/// Aggregates across all owners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRow {
    /// Active channels
    pub channels: u64,
    /// Capacity of active channels (sats)
    pub capacity_sats: u64,
    /// Distinct owners with an active channel
    pub owners: u64,
}

/// Read-only aggregate queries
pub struct ReportQueries<'a> {
    db: &'a Database,
}

impl<'a> ReportQueries<'a> {
    /// Create a new query instance
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Channel totals per status: count, capacity, local balance
    pub async fn channel_totals(&self, owner: &str) -> Result<Vec<StatusTotal>> {
        self.grouped(
            "SELECT status, COUNT(*), COALESCE(SUM(capacity_sats), 0), COALESCE(SUM(local_balance_sats), 0) FROM channels WHERE owner = ?1 GROUP BY status",
            owner,
        )
        .await
    }

    /// Invoice totals per status: count, amount
    pub async fn invoice_totals(&self, owner: &str) -> Result<Vec<StatusTotal>> {
        self.grouped(
            "SELECT status, COUNT(*), COALESCE(SUM(amount_msats), 0), 0 FROM invoices WHERE owner = ?1 GROUP BY status",
            owner,
        )
        .await
    }

    /// Payment totals per status: count, amount, fees
    pub async fn payment_totals(&self, owner: &str) -> Result<Vec<StatusTotal>> {
        self.grouped(
            "SELECT status, COUNT(*), COALESCE(SUM(amount_msats), 0), COALESCE(SUM(fee_msats), 0) FROM payments WHERE owner = ?1 GROUP BY status",
            owner,
        )
        .await
    }

    /// Active channel totals across every owner
    pub async fn network(&self) -> Result<NetworkRow> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let row = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(capacity_sats), 0), COUNT(DISTINCT owner) FROM channels WHERE status = ?1",
            params![ChannelStatus::Active],
            |row| {
                Ok(NetworkRow {
                    channels: row.get::<_, i64>(0)? as u64,
                    capacity_sats: row.get::<_, i64>(1)? as u64,
                    owners: row.get::<_, i64>(2)? as u64,
                })
            },
        )?;
        Ok(row)
    }

    async fn grouped(&self, sql: &str, owner: &str) -> Result<Vec<StatusTotal>> {
        let conn = self.db.conn();
        let conn = conn.lock().await;
        let mut stmt = conn.prepare(sql)?;
        let totals = stmt
            .query_map(params![owner], |row| {
                Ok(StatusTotal {
                    status: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                    amount: row.get::<_, i64>(2)? as u64,
                    secondary: row.get::<_, i64>(3)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(totals)
    }
}
