//! Payment lifecycle
//!
//! A payment reserves channel balance first, then asks for a fee and a
//! settlement confirmation. Any refusal along the way releases the
//! reservation, so a failed payment leaves every balance where it was.
//! Only resolved payments are written to the store.

use crate::{
    clock::Clock,
    db::{Database, Payment, PaymentQueries},
    fee::FeeEstimator,
    ids::IdGenerator,
    state::{PaymentFailure, PaymentStatus, PaymentTransition},
    LedgerError, LedgerResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{require_amount, require_owner, ChannelAccounting, MAX_MSATS};

/// Outgoing payment request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOrder {
    /// Amount to send (millisatoshis)
    pub amount_msats: u64,
    /// Destination node
    pub destination: String,
    /// Payment request being paid, if the payer scanned one
    #[serde(default)]
    pub payment_request: Option<String>,
}

/// Confirmation that a payment went through
pub trait Settlement: Send + Sync {
    /// Confirm `payment`, or give a reason it failed
    fn confirm(&self, payment: &Payment) -> Result<(), String>;
}

/// Settlement that always confirms
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSettlement;

impl Settlement for InstantSettlement {
    fn confirm(&self, _payment: &Payment) -> Result<(), String> {
        Ok(())
    }
}

/// Payment lifecycle service
pub struct PaymentLifecycle {
    db: Arc<Database>,
    channels: Arc<ChannelAccounting>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    fees: Arc<dyn FeeEstimator>,
    settlement: Arc<dyn Settlement>,
}

impl PaymentLifecycle {
    /// Create a new payment lifecycle service
    pub fn new(
        db: Arc<Database>,
        channels: Arc<ChannelAccounting>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        fees: Arc<dyn FeeEstimator>,
        settlement: Arc<dyn Settlement>,
    ) -> Self {
        Self {
            db,
            channels,
            ids,
            clock,
            fees,
            settlement,
        }
    }

    /// Send a payment using the default settlement
    pub async fn initiate(&self, owner: &str, order: PaymentOrder) -> LedgerResult<Payment> {
        let settlement = self.settlement.clone();
        self.initiate_with(owner, order, settlement.as_ref()).await
    }

    /// Send a payment, confirming it through `settlement`
    ///
    /// Business failures (no channel can cover the amount, fee refused,
    /// settlement refused) come back as `Ok` with a failed payment record.
    /// `Err` means nothing was recorded. No balance moved either, unless the
    /// store also refused to give the reservation back; that stranded debit
    /// is logged for reconciliation.
    pub async fn initiate_with(
        &self,
        owner: &str,
        order: PaymentOrder,
        settlement: &dyn Settlement,
    ) -> LedgerResult<Payment> {
        require_owner(owner)?;
        require_amount("Payment amount", order.amount_msats, MAX_MSATS)?;
        let destination = order.destination.trim();
        if destination.is_empty() {
            return Err(LedgerError::Validation(
                "Payment destination is required".to_string(),
            ));
        }

        let payment_hash = self.ids.payment_hash()?;
        let mut payment = Payment {
            id: Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            payment_hash,
            payment_request: order.payment_request.unwrap_or_default(),
            amount_msats: order.amount_msats,
            fee_msats: 0,
            destination: destination.to_string(),
            status: PaymentStatus::Pending,
            failure: None,
            error_message: None,
            channel_id: None,
            created_at: self.clock.now(),
            paid_at: None,
        };

        // Channels hold whole satoshis; a partial satoshi reserves a full one
        let amount_sats = order.amount_msats.div_ceil(1_000);
        let reservation = match self.channels.reserve_for_payment(owner, amount_sats).await {
            Ok(reservation) => reservation,
            Err(e @ LedgerError::InsufficientBalance { .. }) => {
                warn!("Payment {} rejected: {}", payment.id, e);
                return self
                    .record_failure(payment, PaymentFailure::InsufficientBalance, e.to_string())
                    .await;
            }
            Err(e) => return Err(e),
        };
        payment.channel_id = Some(reservation.channel_id().to_string());

        let fee_msats = match self.fees.estimate_fee(order.amount_msats) {
            Ok(fee) => fee,
            Err(reason) => {
                warn!("Fee estimation refused payment {}: {}", payment.id, reason);
                self.channels.release(reservation).await?;
                return self
                    .record_failure(payment, PaymentFailure::FeeEstimation, reason)
                    .await;
            }
        };
        payment.fee_msats = fee_msats;

        if let Err(reason) = settlement.confirm(&payment) {
            warn!("Settlement failed for payment {}: {}", payment.id, reason);
            self.channels.release(reservation).await?;
            return self
                .record_failure(payment, PaymentFailure::Settlement, reason)
                .await;
        }

        payment.status = resolve(payment.status, PaymentTransition::Succeed)?;
        payment.paid_at = Some(self.clock.now());

        if let Err(e) = PaymentQueries::new(&self.db).insert(&payment).await {
            error!("Failed to record payment {}: {}", payment.id, e);
            self.channels.release(reservation).await?;
            return Err(LedgerError::Database(format!(
                "Failed to record payment: {}",
                e
            )));
        }
        self.channels.settle(reservation).await;

        info!(
            "Payment {} succeeded: {} msat + {} msat fee to {} via channel {} (owner={})",
            payment.id,
            payment.amount_msats,
            payment.fee_msats,
            payment.destination,
            payment.channel_id.as_deref().unwrap_or("-"),
            owner
        );
        Ok(payment)
    }

    /// Get a payment
    pub async fn get(&self, owner: &str, payment_id: &str) -> LedgerResult<Payment> {
        PaymentQueries::new(&self.db)
            .get(owner, payment_id)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to get payment: {}", e)))?
            .ok_or_else(|| LedgerError::not_found("payment", payment_id))
    }

    /// List an owner's payments, newest first
    pub async fn list(
        &self,
        owner: &str,
        status: Option<PaymentStatus>,
        limit: u32,
    ) -> LedgerResult<Vec<Payment>> {
        require_owner(owner)?;
        PaymentQueries::new(&self.db)
            .list(owner, status, limit)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to list payments: {}", e)))
    }

    async fn record_failure(
        &self,
        mut payment: Payment,
        failure: PaymentFailure,
        message: String,
    ) -> LedgerResult<Payment> {
        payment.status = resolve(payment.status, PaymentTransition::Fail)?;
        payment.failure = Some(failure);
        payment.error_message = Some(message);
        payment.fee_msats = 0;

        PaymentQueries::new(&self.db)
            .insert(&payment)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to record payment: {}", e)))?;

        info!(
            "Payment {} failed ({}) for owner {}",
            payment.id, failure, payment.owner
        );
        Ok(payment)
    }
}

fn resolve(status: PaymentStatus, transition: PaymentTransition) -> LedgerResult<PaymentStatus> {
    status.apply(transition).ok_or_else(|| {
        LedgerError::InvalidTransition(format!(
            "payment is {}, expected {}",
            status,
            transition.source()
        ))
    })
}
