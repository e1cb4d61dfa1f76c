//! Routing fee estimation for outgoing payments
//!
//! The ledger does not route, so the fee is a policy applied to the amount.
//! The default charges a flat base plus a proportional rate; any other
//! policy can be plugged in through [`FeeEstimator`].

use crate::config::LedgerConfig;
use tracing::debug;

/// Fee policy for outgoing payments
pub trait FeeEstimator: Send + Sync {
    /// Fee in millisatoshis for sending `amount_msats`, or a reason to refuse
    fn estimate_fee(&self, amount_msats: u64) -> Result<u64, String>;
}

/// Base fee plus parts-per-million of the amount, rounded down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProportionalFee {
    /// Flat fee (millisatoshis)
    base_msat: u64,
    /// Proportional fee (parts per million)
    ppm: u64,
}

impl ProportionalFee {
    /// Create a fee policy
    pub fn new(base_msat: u64, ppm: u64) -> Self {
        Self { base_msat, ppm }
    }

    /// Fee policy from the `[ledger]` section
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.payment_fee_base_msat, config.payment_fee_ppm)
    }
}

impl Default for ProportionalFee {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

impl FeeEstimator for ProportionalFee {
    fn estimate_fee(&self, amount_msats: u64) -> Result<u64, String> {
        let proportional = (u128::from(amount_msats) * u128::from(self.ppm) / 1_000_000) as u64;
        let fee = self
            .base_msat
            .checked_add(proportional)
            .ok_or_else(|| format!("fee overflow for {} msat", amount_msats))?;
        debug!(
            "Estimated fee: {} msat ({} msat @ {} ppm + {} base)",
            fee, amount_msats, self.ppm, self.base_msat
        );
        Ok(fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fee_is_tenth_of_a_percent() {
        let fees = ProportionalFee::default();
        assert_eq!(fees.estimate_fee(3_000_000), Ok(3_000));
        // Rounds down like the wallet always has
        assert_eq!(fees.estimate_fee(1_999), Ok(1));
        assert_eq!(fees.estimate_fee(999), Ok(0));
    }

    #[test]
    fn test_base_fee_is_added() {
        let fees = ProportionalFee::new(1_000, 10_000);
        // 1_000 base + 1% of 1_000_000
        assert_eq!(fees.estimate_fee(1_000_000), Ok(11_000));
    }

    #[test]
    fn test_overflow_is_refused() {
        let fees = ProportionalFee::new(u64::MAX, 1_000);
        assert!(fees.estimate_fee(1_000_000).is_err());
    }
}
