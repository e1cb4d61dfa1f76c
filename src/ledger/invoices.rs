//! Invoice lifecycle
//!
//! An invoice leaves `pending` exactly once. Each exit is a compare-and-set
//! against the stored status and deadline, so concurrent callers racing on
//! the same invoice see one winner and everyone else gets a typed error.

use crate::{
    clock::Clock,
    config::Config,
    db::{Database, Invoice, InvoiceQueries},
    ids::IdGenerator,
    state::{InvoiceStatus, InvoiceTransition},
    LedgerError, LedgerResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{require_amount, require_owner, MAX_MSATS, MAX_SATS};

/// Suggested tip amounts (satoshis)
pub const TIP_PRESETS_SATS: [u64; 4] = [5_000, 10_000, 21_000, 50_000];

const DEFAULT_DESCRIPTION: &str = "Lightning payment";

/// One line of a point-of-sale cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutItem {
    /// Item name as shown on the receipt
    pub name: String,
    /// Unit price (satoshis)
    pub price_sats: u64,
    /// Units sold
    pub quantity: u32,
}

/// Invoice lifecycle service
pub struct InvoiceLifecycle {
    config: Arc<Config>,
    db: Arc<Database>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl InvoiceLifecycle {
    /// Create a new invoice lifecycle service
    pub fn new(
        config: Arc<Config>,
        db: Arc<Database>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            db,
            ids,
            clock,
        }
    }

    /// Issue a pending invoice payable until `now + ttl`
    pub async fn create(
        &self,
        owner: &str,
        amount_msats: u64,
        description: &str,
        ttl: Duration,
    ) -> LedgerResult<Invoice> {
        require_owner(owner)?;
        require_amount("Invoice amount", amount_msats, MAX_MSATS)?;
        let description = self.description(description)?;
        let ttl = ttl_millis(ttl)?;

        let payment_hash = self.ids.payment_hash()?;
        let payment_request = self.ids.payment_request(amount_msats, &payment_hash);
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| LedgerError::Validation("Invoice expiry is out of range".to_string()))?;

        let invoice = Invoice {
            id: Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            payment_request,
            payment_hash,
            amount_msats,
            description,
            status: InvoiceStatus::Pending,
            created_at: now,
            expires_at,
            paid_at: None,
        };

        InvoiceQueries::new(&self.db)
            .insert(&invoice)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to save invoice: {}", e)))?;

        info!(
            "Created invoice {} for {} msat (owner={}, expires_at={})",
            invoice.payment_hash, amount_msats, owner, invoice.expires_at
        );
        Ok(invoice)
    }

    /// Issue an invoice for a point-of-sale cart
    pub async fn create_checkout(
        &self,
        owner: &str,
        items: &[CheckoutItem],
    ) -> LedgerResult<Invoice> {
        if items.is_empty() {
            return Err(LedgerError::Validation("Cart is empty".to_string()));
        }

        let mut total_sats: u64 = 0;
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let name = item.name.trim();
            if name.is_empty() {
                return Err(LedgerError::Validation("Item name is required".to_string()));
            }
            if item.quantity == 0 {
                return Err(LedgerError::Validation(format!(
                    "Quantity of {} must be greater than 0",
                    name
                )));
            }
            require_amount("Item price", item.price_sats, MAX_SATS)?;

            total_sats = item
                .price_sats
                .checked_mul(u64::from(item.quantity))
                .and_then(|line| total_sats.checked_add(line))
                .filter(|total| *total <= MAX_SATS)
                .ok_or_else(|| LedgerError::Validation("Cart total is too large".to_string()))?;
            lines.push(format!("{}x {}", item.quantity, name));
        }

        debug!("Checkout for {}: {} item(s), {} sats", owner, items.len(), total_sats);
        self.create(
            owner,
            total_sats * 1_000,
            &lines.join(", "),
            self.config.ledger.checkout_ttl(),
        )
        .await
    }

    /// Issue a tip invoice
    pub async fn create_tip(
        &self,
        owner: &str,
        amount_sats: u64,
        recipient: &str,
        message: Option<&str>,
    ) -> LedgerResult<Invoice> {
        require_amount("Tip amount", amount_sats, MAX_SATS)?;
        let recipient = recipient.trim();
        if recipient.is_empty() {
            return Err(LedgerError::Validation(
                "Tip recipient is required".to_string(),
            ));
        }

        let description = match message.map(str::trim).filter(|m| !m.is_empty()) {
            Some(message) => message.to_string(),
            None => format!("Tip to {}", recipient),
        };

        self.create(
            owner,
            amount_sats * 1_000,
            &description,
            self.config.ledger.tip_ttl(),
        )
        .await
    }

    /// Settle a pending invoice
    ///
    /// Fails with `Expired` once the deadline has passed, whether or not the
    /// sweeper has already recorded it, and with `InvalidTransition` if the
    /// invoice left pending some other way first.
    pub async fn mark_paid(&self, owner: &str, payment_hash: &str) -> LedgerResult<Invoice> {
        require_owner(owner)?;
        let now = self.clock.now();
        if self
            .apply(owner, payment_hash, InvoiceTransition::Pay, now)
            .await?
        {
            let invoice = self.get(owner, payment_hash).await?;
            info!(
                "Invoice {} paid: {} msat (owner={})",
                payment_hash, invoice.amount_msats, owner
            );
            return Ok(invoice);
        }

        // A payer that arrived before the deadline but lost to a concurrent
        // expire saw a live invoice, so it gets a transition conflict
        let invoice = self.get(owner, payment_hash).await?;
        if now >= invoice.expires_at
            && matches!(invoice.status, InvoiceStatus::Pending | InvoiceStatus::Expired)
        {
            return Err(LedgerError::Expired(format!(
                "invoice {} expired at {}",
                payment_hash, invoice.expires_at
            )));
        }
        Err(rejected(payment_hash, invoice.status, InvoiceTransition::Pay))
    }

    /// Withdraw a pending invoice
    pub async fn cancel(&self, owner: &str, payment_hash: &str) -> LedgerResult<Invoice> {
        require_owner(owner)?;
        let now = self.clock.now();
        let canceled = self
            .apply(owner, payment_hash, InvoiceTransition::Cancel, now)
            .await?;

        let invoice = self.get(owner, payment_hash).await?;
        if !canceled {
            return Err(rejected(
                payment_hash,
                invoice.status,
                InvoiceTransition::Cancel,
            ));
        }
        info!("Invoice {} canceled (owner={})", payment_hash, owner);
        Ok(invoice)
    }

    /// Record that a pending invoice's deadline has passed
    ///
    /// Expiring an invoice that is already expired is a no-op.
    pub async fn expire(&self, owner: &str, payment_hash: &str) -> LedgerResult<Invoice> {
        require_owner(owner)?;
        let now = self.clock.now();
        let expired = self
            .apply(owner, payment_hash, InvoiceTransition::Expire, now)
            .await?;

        let invoice = self.get(owner, payment_hash).await?;
        if expired {
            info!("Invoice {} expired (owner={})", payment_hash, owner);
            return Ok(invoice);
        }

        match invoice.status {
            InvoiceStatus::Expired => {
                debug!("Invoice {} already expired", payment_hash);
                Ok(invoice)
            }
            InvoiceStatus::Pending => Err(LedgerError::InvalidTransition(format!(
                "invoice {} is not due until {}",
                payment_hash, invoice.expires_at
            ))),
            status => Err(rejected(payment_hash, status, InvoiceTransition::Expire)),
        }
    }

    /// Get an invoice by payment hash
    pub async fn get(&self, owner: &str, payment_hash: &str) -> LedgerResult<Invoice> {
        InvoiceQueries::new(&self.db)
            .get_by_hash(owner, payment_hash)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to get invoice: {}", e)))?
            .ok_or_else(|| LedgerError::not_found("invoice", payment_hash))
    }

    /// List an owner's invoices, newest first
    pub async fn list(
        &self,
        owner: &str,
        status: Option<InvoiceStatus>,
        limit: u32,
    ) -> LedgerResult<Vec<Invoice>> {
        require_owner(owner)?;
        InvoiceQueries::new(&self.db)
            .list(owner, status, limit)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to list invoices: {}", e)))
    }

    async fn apply(
        &self,
        owner: &str,
        payment_hash: &str,
        transition: InvoiceTransition,
        now: chrono::DateTime<chrono::Utc>,
    ) -> LedgerResult<bool> {
        InvoiceQueries::new(&self.db)
            .transition(owner, payment_hash, transition, now)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to update invoice: {}", e)))
    }

    fn description(&self, description: &str) -> LedgerResult<String> {
        let description = description.trim();
        if description.is_empty() {
            return Ok(DEFAULT_DESCRIPTION.to_string());
        }
        let max = self.config.ledger.max_description_len;
        if description.chars().count() > max {
            return Err(LedgerError::Validation(format!(
                "Description must not exceed {} characters",
                max
            )));
        }
        Ok(description.to_string())
    }
}

fn ttl_millis(ttl: Duration) -> LedgerResult<chrono::Duration> {
    let millis = i64::try_from(ttl.as_millis())
        .map_err(|_| LedgerError::Validation("Invoice TTL is too large".to_string()))?;
    if millis <= 0 {
        return Err(LedgerError::Validation(
            "Invoice TTL must be at least 1 ms".to_string(),
        ));
    }
    Ok(chrono::Duration::milliseconds(millis))
}

fn rejected(
    payment_hash: &str,
    status: InvoiceStatus,
    transition: InvoiceTransition,
) -> LedgerError {
    LedgerError::InvalidTransition(format!(
        "invoice {} is {}, expected {}",
        payment_hash,
        status,
        transition.source()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ids::testing::{BrokenEntropy, SequenceIdGenerator};
    use crate::ids::{is_hex_id, PAYMENT_HASH_LEN};

    async fn lifecycle() -> (Arc<InvoiceLifecycle>, Arc<ManualClock>) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::starting_now());
        let invoices = InvoiceLifecycle::new(
            Arc::new(Config::default()),
            db,
            Arc::new(SequenceIdGenerator::default()),
            clock.clone(),
        );
        (Arc::new(invoices), clock)
    }

    const HOUR: Duration = Duration::from_secs(3_600);

    #[tokio::test]
    async fn test_create_then_pay() {
        let (invoices, clock) = lifecycle().await;
        let invoice = invoices
            .create("alice", 10_000_000, "Coffee", HOUR)
            .await
            .unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert_eq!(invoice.expires_at, clock.now() + chrono::Duration::hours(1));
        assert!(is_hex_id(&invoice.payment_hash, PAYMENT_HASH_LEN));
        assert!(invoice.payment_request.starts_with("lnbc10000n1p"));

        clock.advance(chrono::Duration::minutes(10));
        let paid = invoices.mark_paid("alice", &invoice.payment_hash).await.unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert_eq!(paid.paid_at, Some(clock.now()));
        assert_eq!(paid.amount_msats, 10_000_000);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (invoices, _) = lifecycle().await;
        assert!(matches!(
            invoices.create("alice", 0, "x", HOUR).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            invoices.create("alice", 1_000, "x", Duration::ZERO).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            invoices.create("alice", MAX_MSATS + 1, "x", HOUR).await,
            Err(LedgerError::Validation(_))
        ));
        let long = "x".repeat(641);
        assert!(matches!(
            invoices.create("alice", 1_000, &long, HOUR).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_description_gets_default() {
        let (invoices, _) = lifecycle().await;
        let invoice = invoices.create("alice", 1_000, "   ", HOUR).await.unwrap();
        assert_eq!(invoice.description, "Lightning payment");
    }

    #[tokio::test]
    async fn test_entropy_failure_creates_nothing() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let invoices = InvoiceLifecycle::new(
            Arc::new(Config::default()),
            db,
            Arc::new(BrokenEntropy),
            Arc::new(ManualClock::starting_now()),
        );

        let err = invoices.create("alice", 1_000, "x", HOUR).await.unwrap_err();
        assert!(matches!(err, LedgerError::Generation(_)));
        assert!(invoices.list("alice", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pay_after_deadline_is_expired() {
        let (invoices, clock) = lifecycle().await;
        let invoice = invoices
            .create("alice", 5_000, "x", Duration::from_secs(60))
            .await
            .unwrap();

        // Exactly at the deadline the invoice is no longer payable
        clock.advance(chrono::Duration::seconds(60));
        let err = invoices.mark_paid("alice", &invoice.payment_hash).await.unwrap_err();
        assert!(matches!(err, LedgerError::Expired(_)));

        let stored = invoices.get("alice", &invoice.payment_hash).await.unwrap();
        assert_eq!(stored.status, InvoiceStatus::Pending);
        assert_eq!(stored.paid_at, None);
    }

    #[tokio::test]
    async fn test_expire_is_idempotent() {
        let (invoices, clock) = lifecycle().await;
        let invoice = invoices
            .create("alice", 5_000, "x", Duration::from_secs(60))
            .await
            .unwrap();

        let err = invoices.expire("alice", &invoice.payment_hash).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition(_)));

        clock.advance(chrono::Duration::seconds(61));
        let first = invoices.expire("alice", &invoice.payment_hash).await.unwrap();
        let second = invoices.expire("alice", &invoice.payment_hash).await.unwrap();
        assert_eq!(first.status, InvoiceStatus::Expired);
        assert_eq!(first, second);

        let err = invoices.mark_paid("alice", &invoice.payment_hash).await.unwrap_err();
        assert!(matches!(err, LedgerError::Expired(_)));
    }

    #[tokio::test]
    async fn test_payer_losing_to_expire_sees_conflict() {
        let (invoices, clock) = lifecycle().await;
        let invoice = invoices
            .create("alice", 5_000, "x", Duration::from_secs(60))
            .await
            .unwrap();
        let before_deadline = clock.now() + chrono::Duration::seconds(59);

        clock.advance(chrono::Duration::seconds(60));
        invoices.expire("alice", &invoice.payment_hash).await.unwrap();

        // The payer read the clock before the deadline; the expire landed first
        clock.set(before_deadline);
        let err = invoices.mark_paid("alice", &invoice.payment_hash).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition(_)));
        assert_eq!(
            invoices.get("alice", &invoice.payment_hash).await.unwrap().status,
            InvoiceStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_terminal_invoices_are_immutable() {
        let (invoices, clock) = lifecycle().await;
        let paid = invoices.create("alice", 5_000, "x", HOUR).await.unwrap();
        let canceled = invoices.create("alice", 6_000, "y", HOUR).await.unwrap();
        invoices.mark_paid("alice", &paid.payment_hash).await.unwrap();
        invoices.cancel("alice", &canceled.payment_hash).await.unwrap();

        let paid_before = invoices.get("alice", &paid.payment_hash).await.unwrap();
        let canceled_before = invoices.get("alice", &canceled.payment_hash).await.unwrap();
        clock.advance(chrono::Duration::hours(2));

        for hash in [&paid.payment_hash, &canceled.payment_hash] {
            assert!(matches!(
                invoices.mark_paid("alice", hash).await,
                Err(LedgerError::InvalidTransition(_))
            ));
            assert!(matches!(
                invoices.cancel("alice", hash).await,
                Err(LedgerError::InvalidTransition(_))
            ));
            assert!(matches!(
                invoices.expire("alice", hash).await,
                Err(LedgerError::InvalidTransition(_))
            ));
        }

        assert_eq!(invoices.get("alice", &paid.payment_hash).await.unwrap(), paid_before);
        assert_eq!(
            invoices.get("alice", &canceled.payment_hash).await.unwrap(),
            canceled_before
        );
    }

    #[tokio::test]
    async fn test_other_owner_sees_not_found() {
        let (invoices, _) = lifecycle().await;
        let invoice = invoices.create("alice", 5_000, "x", HOUR).await.unwrap();

        let err = invoices.mark_paid("mallory", &invoice.payment_hash).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { entity: "invoice", .. }));
        let err = invoices.cancel("mallory", &invoice.payment_hash).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
        assert!(invoices.list("mallory", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_builds_description_and_total() {
        let (invoices, clock) = lifecycle().await;
        let cart = vec![
            CheckoutItem {
                name: "Coffee".to_string(),
                price_sats: 5_000,
                quantity: 2,
            },
            CheckoutItem {
                name: "Bagel".to_string(),
                price_sats: 3_500,
                quantity: 1,
            },
        ];

        let invoice = invoices.create_checkout("shop", &cart).await.unwrap();
        assert_eq!(invoice.description, "2x Coffee, 1x Bagel");
        assert_eq!(invoice.amount_msats, 13_500_000);
        assert_eq!(invoice.expires_at, clock.now() + chrono::Duration::minutes(15));
    }

    #[tokio::test]
    async fn test_checkout_rejects_bad_carts() {
        let (invoices, _) = lifecycle().await;
        assert!(matches!(
            invoices.create_checkout("shop", &[]).await,
            Err(LedgerError::Validation(_))
        ));

        let zero_quantity = [CheckoutItem {
            name: "Coffee".to_string(),
            price_sats: 5_000,
            quantity: 0,
        }];
        assert!(matches!(
            invoices.create_checkout("shop", &zero_quantity).await,
            Err(LedgerError::Validation(_))
        ));

        let overflow = [CheckoutItem {
            name: "Yacht".to_string(),
            price_sats: MAX_SATS,
            quantity: 2,
        }];
        assert!(matches!(
            invoices.create_checkout("shop", &overflow).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_tip_description() {
        let (invoices, clock) = lifecycle().await;
        let plain = invoices.create_tip("bob", 21_000, "satoshi", None).await.unwrap();
        assert_eq!(plain.description, "Tip to satoshi");
        assert_eq!(plain.amount_msats, 21_000_000);
        assert_eq!(plain.expires_at, clock.now() + chrono::Duration::hours(24));

        let with_message = invoices
            .create_tip("bob", TIP_PRESETS_SATS[0], "satoshi", Some("Great talk!"))
            .await
            .unwrap();
        assert_eq!(with_message.description, "Great talk!");

        assert!(matches!(
            invoices.create_tip("bob", 5_000, " ", None).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pay_and_cancel_have_one_winner() {
        for _ in 0..20 {
            let (invoices, _) = lifecycle().await;
            let invoice = invoices.create("alice", 5_000, "x", HOUR).await.unwrap();
            let hash = invoice.payment_hash.clone();

            let pay = tokio::spawn({
                let invoices = invoices.clone();
                let hash = hash.clone();
                async move { invoices.mark_paid("alice", &hash).await }
            });
            let cancel = tokio::spawn({
                let invoices = invoices.clone();
                let hash = hash.clone();
                async move { invoices.cancel("alice", &hash).await }
            });

            let pay = pay.await.unwrap();
            let cancel = cancel.await.unwrap();
            assert!(pay.is_ok() != cancel.is_ok());

            let stored = invoices.get("alice", &hash).await.unwrap();
            match pay {
                Ok(_) => assert_eq!(stored.status, InvoiceStatus::Paid),
                Err(e) => {
                    assert!(matches!(e, LedgerError::InvalidTransition(_)));
                    assert_eq!(stored.status, InvoiceStatus::Canceled);
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pay_racing_the_deadline_has_one_winner() {
        for _ in 0..20 {
            let (invoices, clock) = lifecycle().await;
            let invoice = invoices
                .create("alice", 5_000, "x", Duration::from_secs(60))
                .await
                .unwrap();
            let hash = invoice.payment_hash.clone();

            let pay = tokio::spawn({
                let invoices = invoices.clone();
                let hash = hash.clone();
                async move { invoices.mark_paid("alice", &hash).await }
            });
            let expire = tokio::spawn({
                let invoices = invoices.clone();
                let clock = clock.clone();
                let hash = hash.clone();
                let deadline = invoice.expires_at;
                async move {
                    clock.set(deadline);
                    invoices.expire("alice", &hash).await
                }
            });

            let pay = pay.await.unwrap();
            let expire = expire.await.unwrap();
            assert!(pay.is_ok() != expire.is_ok());

            let stored = invoices.get("alice", &hash).await.unwrap();
            match pay {
                Ok(_) => {
                    assert!(matches!(expire, Err(LedgerError::InvalidTransition(_))));
                    assert_eq!(stored.status, InvoiceStatus::Paid);
                }
                Err(e) => {
                    assert!(matches!(
                        e,
                        LedgerError::Expired(_) | LedgerError::InvalidTransition(_)
                    ));
                    assert_eq!(stored.status, InvoiceStatus::Expired);
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_payers_one_success() {
        let (invoices, _) = lifecycle().await;
        let invoice = invoices.create("alice", 5_000, "x", HOUR).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let invoices = invoices.clone();
            let hash = invoice.payment_hash.clone();
            handles.push(tokio::spawn(async move {
                invoices.mark_paid("alice", &hash).await
            }));
        }

        let mut paid = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                paid += 1;
            }
        }
        assert_eq!(paid, 1);
    }
}
