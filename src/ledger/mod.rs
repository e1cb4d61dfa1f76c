//! Ledger core
//!
//! This module implements the wallet's accounting rules:
//! - Channel accounting (open, close, reserve, release)
//! - Invoice lifecycle (create, mark paid, cancel, expire)
//! - Payment lifecycle (initiate with reserve-then-settle)
//! - Expiry sweeper and read-only reporting
//!
//! Every operation takes the acting owner explicitly; nothing here consults
//! ambient session state.

use crate::{
    clock::{Clock, SystemClock},
    config::{Config, SweeperConfig},
    db::Database,
    fee::{FeeEstimator, ProportionalFee},
    ids::{IdGenerator, OsRngIdGenerator},
    LedgerError, LedgerResult,
};
use std::sync::Arc;

mod channels;
mod invoices;
mod payments;
mod reporting;
mod sweeper;

pub use channels::{ChannelAccounting, Reservation};
pub use invoices::{CheckoutItem, InvoiceLifecycle, TIP_PRESETS_SATS};
pub use payments::{InstantSettlement, PaymentLifecycle, PaymentOrder, Settlement};
pub use reporting::{DashboardSummary, NetworkTotals, ReportingProjection};
pub use sweeper::{ExpirySweeper, SweepReport};

/// Total bitcoin supply in satoshis; no single amount may exceed it
pub const MAX_SATS: u64 = 21_000_000 * 100_000_000;

/// [`MAX_SATS`] in millisatoshis
pub const MAX_MSATS: u64 = MAX_SATS * 1_000;

/// Default page size for listings
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// Pluggable collaborators the ledger calls out to
#[derive(Clone)]
pub struct Capabilities {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Identifier source
    pub ids: Arc<dyn IdGenerator>,
    /// Fee policy for outgoing payments
    pub fees: Arc<dyn FeeEstimator>,
    /// Default settlement confirmation for outgoing payments
    pub settlement: Arc<dyn Settlement>,
}

impl Capabilities {
    /// Production defaults: wall clock, OS randomness, configured fee policy
    pub fn from_config(config: &Config) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            ids: Arc::new(OsRngIdGenerator),
            fees: Arc::new(ProportionalFee::from_config(&config.ledger)),
            settlement: Arc::new(InstantSettlement),
        }
    }
}

/// All ledger components over one store
pub struct LedgerService {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    /// Channel accounting
    pub channels: Arc<ChannelAccounting>,
    /// Invoice lifecycle
    pub invoices: Arc<InvoiceLifecycle>,
    /// Payment lifecycle
    pub payments: PaymentLifecycle,
    /// Read-only aggregates
    pub reporting: ReportingProjection,
}

impl LedgerService {
    /// Create the ledger with production capabilities
    pub fn new(config: Arc<Config>, db: Arc<Database>) -> Self {
        let capabilities = Capabilities::from_config(&config);
        Self::with_capabilities(config, db, capabilities)
    }

    /// Create the ledger with explicit capabilities
    pub fn with_capabilities(
        config: Arc<Config>,
        db: Arc<Database>,
        capabilities: Capabilities,
    ) -> Self {
        let Capabilities {
            clock,
            ids,
            fees,
            settlement,
        } = capabilities;

        let channels = Arc::new(ChannelAccounting::new(
            db.clone(),
            ids.clone(),
            clock.clone(),
        ));
        let invoices = Arc::new(InvoiceLifecycle::new(
            config.clone(),
            db.clone(),
            ids.clone(),
            clock.clone(),
        ));
        let payments = PaymentLifecycle::new(
            db.clone(),
            channels.clone(),
            ids,
            clock.clone(),
            fees,
            settlement,
        );
        let reporting = ReportingProjection::new(db.clone());

        Self {
            db,
            clock,
            channels,
            invoices,
            payments,
            reporting,
        }
    }

    /// Build an expiry sweeper over this ledger's invoices
    pub fn sweeper(&self, config: SweeperConfig) -> ExpirySweeper {
        ExpirySweeper::new(
            config,
            self.db.clone(),
            self.invoices.clone(),
            self.clock.clone(),
        )
    }
}

pub(crate) fn require_owner(owner: &str) -> LedgerResult<()> {
    if owner.trim().is_empty() {
        return Err(LedgerError::Validation("Owner id is required".to_string()));
    }
    Ok(())
}

pub(crate) fn require_amount(what: &str, value: u64, max: u64) -> LedgerResult<()> {
    if value == 0 {
        return Err(LedgerError::Validation(format!(
            "{} must be greater than 0",
            what
        )));
    }
    if value > max {
        return Err(LedgerError::Validation(format!(
            "{} must not exceed {}",
            what, max
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ids::testing::SequenceIdGenerator;

    /// Ledger over an in-memory store with a frozen clock and sequential ids
    pub(crate) async fn ledger() -> (LedgerService, Arc<ManualClock>) {
        ledger_with(Config::default()).await
    }

    pub(crate) async fn ledger_with(config: Config) -> (LedgerService, Arc<ManualClock>) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::starting_now());
        let capabilities = Capabilities {
            clock: clock.clone(),
            ids: Arc::new(SequenceIdGenerator::default()),
            fees: Arc::new(ProportionalFee::from_config(&config.ledger)),
            settlement: Arc::new(InstantSettlement),
        };
        let service = LedgerService::with_capabilities(Arc::new(config), db, capabilities);
        (service, clock)
    }
}
