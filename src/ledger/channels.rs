//! Channel accounting
//!
//! Balances only ever move between the two sides of one channel, in a
//! single statement, so `local + remote == capacity` holds at every point a
//! reader can observe. Closed channels are frozen and never selected for
//! payments.

use crate::{
    clock::Clock,
    db::{Channel, ChannelQueries, Database, ReserveOutcome},
    ids::IdGenerator,
    state::{ChannelStatus, ChannelTransition},
    LedgerError, LedgerResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{require_amount, require_owner, MAX_SATS};

/// Balance moved from local to remote on behalf of a payment in progress
///
/// Must be handed back to [`ChannelAccounting`] exactly once, either to
/// keep the debit or to release it.
#[derive(Debug)]
#[must_use = "a reservation must be settled or released"]
pub struct Reservation {
    owner: String,
    channel_id: String,
    amount_sats: u64,
}

impl Reservation {
    /// Channel the balance was taken from
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Reserved amount (satoshis)
    pub fn amount_sats(&self) -> u64 {
        self.amount_sats
    }
}

/// Channel accounting service
pub struct ChannelAccounting {
    db: Arc<Database>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    /// Outstanding reservations per channel; such a channel cannot close
    in_flight: Mutex<HashMap<String, u32>>,
}

impl ChannelAccounting {
    /// Create a new channel accounting service
    pub fn new(db: Arc<Database>, ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            ids,
            clock,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Open a channel funded entirely from the local side
    pub async fn open(
        &self,
        owner: &str,
        remote_pubkey: &str,
        capacity_sats: u64,
        announce_channel: bool,
    ) -> LedgerResult<Channel> {
        require_owner(owner)?;
        require_amount("Channel capacity", capacity_sats, MAX_SATS)?;
        let remote_pubkey = remote_pubkey.trim();
        if remote_pubkey.is_empty() {
            return Err(LedgerError::Validation(
                "Remote node pubkey is required".to_string(),
            ));
        }

        let id = self.ids.channel_id()?;
        let now = self.clock.now();
        let channel = Channel {
            id,
            owner: owner.to_string(),
            remote_pubkey: remote_pubkey.to_string(),
            capacity_sats,
            local_balance_sats: capacity_sats,
            remote_balance_sats: 0,
            status: ChannelStatus::Active,
            is_public: announce_channel,
            opened_at: now,
            closed_at: None,
            updated_at: now,
        };

        ChannelQueries::new(&self.db)
            .insert(&channel)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to save channel: {}", e)))?;

        info!(
            "Opened channel {} to {} with capacity {} sats (owner={}, public={})",
            channel.id, channel.remote_pubkey, capacity_sats, owner, announce_channel
        );
        Ok(channel)
    }

    /// Close an active channel, freezing its balances
    pub async fn close(&self, owner: &str, channel_id: &str) -> LedgerResult<Channel> {
        require_owner(owner)?;

        let in_flight = self.in_flight.lock().await;
        self.get(owner, channel_id).await?;
        if let Some(count) = in_flight.get(channel_id) {
            return Err(LedgerError::InvalidTransition(format!(
                "channel {} has {} payment(s) in flight",
                channel_id, count
            )));
        }

        let queries = ChannelQueries::new(&self.db);
        let closed = queries
            .transition(owner, channel_id, ChannelTransition::Close, self.clock.now())
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to close channel: {}", e)))?;
        drop(in_flight);

        let channel = self.get(owner, channel_id).await?;
        if !closed {
            return Err(LedgerError::InvalidTransition(format!(
                "channel {} is {}, expected {}",
                channel_id,
                channel.status,
                ChannelTransition::Close.source()
            )));
        }

        info!(
            "Closed channel {} (owner={}): local={}, remote={}",
            channel_id, owner, channel.local_balance_sats, channel.remote_balance_sats
        );
        Ok(channel)
    }

    /// Get a channel
    pub async fn get(&self, owner: &str, channel_id: &str) -> LedgerResult<Channel> {
        ChannelQueries::new(&self.db)
            .get(owner, channel_id)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to get channel: {}", e)))?
            .ok_or_else(|| LedgerError::not_found("channel", channel_id))
    }

    /// List an owner's channels
    pub async fn list(
        &self,
        owner: &str,
        status: Option<ChannelStatus>,
    ) -> LedgerResult<Vec<Channel>> {
        require_owner(owner)?;
        ChannelQueries::new(&self.db)
            .list(owner, status)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to list channels: {}", e)))
    }

    /// Reserve `amount_sats` on the owner's best active channel
    ///
    /// Picks the channel with the largest local balance (ties: smallest id)
    /// and shifts the amount from local to remote in one step.
    pub async fn reserve_for_payment(
        &self,
        owner: &str,
        amount_sats: u64,
    ) -> LedgerResult<Reservation> {
        require_owner(owner)?;
        require_amount("Payment amount", amount_sats, MAX_SATS)?;

        let mut in_flight = self.in_flight.lock().await;
        let outcome = ChannelQueries::new(&self.db)
            .reserve(owner, amount_sats, self.clock.now())
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to reserve balance: {}", e)))?;

        match outcome {
            ReserveOutcome::Reserved(channel) => {
                *in_flight.entry(channel.id.clone()).or_insert(0) += 1;
                debug!(
                    "Reserved {} sats on channel {} for owner {}",
                    amount_sats, channel.id, owner
                );
                Ok(Reservation {
                    owner: owner.to_string(),
                    channel_id: channel.id,
                    amount_sats,
                })
            }
            ReserveOutcome::Insufficient { available_sats } => {
                warn!(
                    "No channel can cover {} sats for owner {} (largest: {} sats)",
                    amount_sats, owner, available_sats
                );
                Err(LedgerError::InsufficientBalance {
                    requested_sats: amount_sats,
                    available_sats,
                })
            }
        }
    }

    /// Reverse a prior reservation: credit local, debit remote
    ///
    /// The reservation is given up whatever the outcome. If the store
    /// refuses the credit, the debit stays in place and is logged for
    /// reconciliation.
    pub async fn release(&self, reservation: Reservation) -> LedgerResult<Channel> {
        let mut in_flight = self.in_flight.lock().await;
        Self::forget(&mut in_flight, &reservation.channel_id);
        let released = self
            .release_balance(
                &reservation.owner,
                &reservation.channel_id,
                reservation.amount_sats,
            )
            .await;
        if let Err(e) = &released {
            error!(
                "Stranded reservation of {} sats on channel {} (owner={}): {}",
                reservation.amount_sats, reservation.channel_id, reservation.owner, e
            );
        }
        released
    }

    /// Keep a reservation's debit for good
    pub(crate) async fn settle(&self, reservation: Reservation) {
        let mut in_flight = self.in_flight.lock().await;
        Self::forget(&mut in_flight, &reservation.channel_id);
        debug!(
            "Settled {} sats on channel {}",
            reservation.amount_sats, reservation.channel_id
        );
    }

    async fn release_balance(
        &self,
        owner: &str,
        channel_id: &str,
        amount_sats: u64,
    ) -> LedgerResult<Channel> {
        let released = ChannelQueries::new(&self.db)
            .release(owner, channel_id, amount_sats, self.clock.now())
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to release balance: {}", e)))?;

        let channel = self.get(owner, channel_id).await?;
        if !released {
            if channel.status != ChannelStatus::Active {
                return Err(LedgerError::InvalidTransition(format!(
                    "channel {} is {}, balances are frozen",
                    channel_id, channel.status
                )));
            }
            return Err(LedgerError::Validation(format!(
                "cannot release {} sats on channel {}: remote balance is {}",
                amount_sats, channel_id, channel.remote_balance_sats
            )));
        }

        info!(
            "Released {} sats on channel {} (owner={})",
            amount_sats, channel_id, owner
        );
        Ok(channel)
    }

    fn forget(in_flight: &mut HashMap<String, u32>, channel_id: &str) {
        if let Some(count) = in_flight.get_mut(channel_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(channel_id);
            }
        }
    }
}
