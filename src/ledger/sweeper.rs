//! Expiry sweeper
//!
//! Periodically moves overdue pending invoices to `expired`. Each invoice
//! goes through the same compare-and-set as a direct `expire` call, so an
//! invoice paid or canceled between the scan and the update is skipped.

use crate::{
    clock::Clock,
    config::SweeperConfig,
    db::{Database, Invoice, InvoiceQueries},
    ledger::InvoiceLifecycle,
    state::InvoiceStatus,
    LedgerError, LedgerResult,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Due invoices found by the scan
    pub scanned: usize,
    /// Invoices this sweep moved to expired
    pub expired: usize,
    /// Invoices that left pending some other way first
    pub skipped: usize,
    /// Invoices that hit a store error
    pub failed: usize,
}

/// Background invoice expiry
pub struct ExpirySweeper {
    config: SweeperConfig,
    db: Arc<Database>,
    invoices: Arc<InvoiceLifecycle>,
    clock: Arc<dyn Clock>,
}

impl ExpirySweeper {
    /// Create a new sweeper
    pub fn new(
        config: SweeperConfig,
        db: Arc<Database>,
        invoices: Arc<InvoiceLifecycle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            db,
            invoices,
            clock,
        }
    }

    /// Expire every invoice that is due now, up to the batch size
    pub async fn sweep_once(&self) -> LedgerResult<SweepReport> {
        let due = InvoiceQueries::new(&self.db)
            .list_due(self.clock.now(), self.config.batch_size)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to scan due invoices: {}", e)))?;
        Ok(self.expire_all(&due).await)
    }

    async fn expire_all(&self, due: &[Invoice]) -> SweepReport {
        let mut report = SweepReport {
            scanned: due.len(),
            ..SweepReport::default()
        };

        for invoice in due {
            match self.invoices.expire(&invoice.owner, &invoice.payment_hash).await {
                Ok(updated) if updated.status == InvoiceStatus::Expired => report.expired += 1,
                Ok(_) | Err(LedgerError::InvalidTransition(_)) => {
                    debug!(
                        "Invoice {} left pending before the sweeper reached it",
                        invoice.payment_hash
                    );
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("Failed to expire invoice {}: {}", invoice.payment_hash, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Run until `shutdown` turns true or its sender goes away
    ///
    /// A sweep in progress always finishes before the task exits.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Expiry sweeper started (interval={:?}, batch={})",
                self.config.interval(),
                self.config.batch_size
            );

            let mut ticker = tokio::time::interval(self.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
                if !self.sweep_with_backoff(&mut shutdown).await {
                    break;
                }
            }

            info!("Expiry sweeper stopped");
        })
    }

    /// One sweep, retried with backoff while the store is down
    ///
    /// Returns false if shutdown was requested while waiting to retry.
    async fn sweep_with_backoff(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut failures = 0u32;
        loop {
            match self.sweep_once().await {
                Ok(report) => {
                    if report.scanned > 0 {
                        info!(
                            "Sweep finished: scanned={}, expired={}, skipped={}, failed={}",
                            report.scanned, report.expired, report.skipped, report.failed
                        );
                    }
                    return true;
                }
                Err(e) => {
                    failures += 1;
                    let delay = self.config.backoff(failures);
                    error!(
                        "Sweep failed (attempt {}): {}. Retrying in {:?}",
                        failures, e, delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => return false,
                    }
                }
            }
        }
    }
}
