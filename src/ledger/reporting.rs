//! Read-only aggregates for the dashboard and the network explorer

use crate::{
    db::{
        Database, Invoice, InvoiceQueries, Payment, PaymentQueries, ReportQueries, StatusTotal,
    },
    state::{ChannelStatus, InvoiceStatus, PaymentStatus},
    LedgerError, LedgerResult,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::require_owner;

/// Number of recent invoices and payments on the dashboard
pub const RECENT_LIMIT: u32 = 10;

/// One owner's wallet at a glance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardSummary {
    /// Owner the summary belongs to
    pub owner: String,
    /// Local balance across active channels (sats)
    pub spendable_sats: u64,
    /// Remote balance across active channels (sats)
    pub receivable_sats: u64,
    /// Capacity of active channels (sats)
    pub capacity_sats: u64,
    /// Sum of paid invoices (msats)
    pub total_received_msats: u64,
    /// Sum of succeeded payments (msats)
    pub total_sent_msats: u64,
    /// Fees on succeeded payments (msats)
    pub total_fees_msats: u64,
    /// Channel count per status
    pub channels_by_status: BTreeMap<String, u64>,
    /// Invoice count per status
    pub invoices_by_status: BTreeMap<String, u64>,
    /// Payment count per status
    pub payments_by_status: BTreeMap<String, u64>,
    /// Newest invoices
    pub recent_invoices: Vec<Invoice>,
    /// Newest payments
    pub recent_payments: Vec<Payment>,
}

/// Active channels across every owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetworkTotals {
    /// Active channels
    pub total_channels: u64,
    /// Their combined capacity (sats)
    pub total_capacity_sats: u64,
    /// Mean capacity, rounded down (sats)
    pub avg_channel_size_sats: u64,
    /// Owners with at least one active channel
    pub owners: u64,
}

/// Read-only reporting over the ledger store
pub struct ReportingProjection {
    db: Arc<Database>,
}

impl ReportingProjection {
    /// Create a new projection
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Summarize one owner's channels, invoices and payments
    pub async fn dashboard(&self, owner: &str) -> LedgerResult<DashboardSummary> {
        require_owner(owner)?;
        let reports = ReportQueries::new(&self.db);
        let db_err =
            |e: anyhow::Error| LedgerError::Database(format!("Failed to build dashboard: {}", e));

        let channels = reports.channel_totals(owner).await.map_err(db_err)?;
        let invoices = reports.invoice_totals(owner).await.map_err(db_err)?;
        let payments = reports.payment_totals(owner).await.map_err(db_err)?;

        let active = find(&channels, ChannelStatus::Active.as_str());
        let paid = find(&invoices, InvoiceStatus::Paid.as_str());
        let succeeded = find(&payments, PaymentStatus::Succeeded.as_str());

        let recent_invoices = InvoiceQueries::new(&self.db)
            .list(owner, None, RECENT_LIMIT)
            .await
            .map_err(db_err)?;
        let recent_payments = PaymentQueries::new(&self.db)
            .list(owner, None, RECENT_LIMIT)
            .await
            .map_err(db_err)?;

        Ok(DashboardSummary {
            owner: owner.to_string(),
            spendable_sats: active.map_or(0, |t| t.secondary),
            receivable_sats: active.map_or(0, |t| t.amount - t.secondary),
            capacity_sats: active.map_or(0, |t| t.amount),
            total_received_msats: paid.map_or(0, |t| t.amount),
            total_sent_msats: succeeded.map_or(0, |t| t.amount),
            total_fees_msats: succeeded.map_or(0, |t| t.secondary),
            channels_by_status: counts(&channels),
            invoices_by_status: counts(&invoices),
            payments_by_status: counts(&payments),
            recent_invoices,
            recent_payments,
        })
    }

    /// Totals over every owner's active channels
    pub async fn network(&self) -> LedgerResult<NetworkTotals> {
        let row = ReportQueries::new(&self.db)
            .network()
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to load network totals: {}", e)))?;

        Ok(NetworkTotals {
            total_channels: row.channels,
            total_capacity_sats: row.capacity_sats,
            avg_channel_size_sats: row.capacity_sats.checked_div(row.channels).unwrap_or(0),
            owners: row.owners,
        })
    }
}

fn find<'a>(totals: &'a [StatusTotal], status: &str) -> Option<&'a StatusTotal> {
    totals.iter().find(|t| t.status == status)
}

fn counts(totals: &[StatusTotal]) -> BTreeMap<String, u64> {
    totals
        .iter()
        .map(|t| (t.status.clone(), t.count))
        .collect()
}
