//! Entity status variants and the transitions between them
//!
//! Each transition names exactly one legal source status. Storage uses the
//! source status as the compare-and-set guard, so an update only lands if
//! nobody moved the entity first.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status string not recognised for the entity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {entity} status: {value}")]
pub struct UnknownStatus {
    /// Entity kind
    pub entity: &'static str,
    /// Rejected value
    pub value: String,
}

macro_rules! status_strings {
    ($ty:ident, $entity:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Storage and wire representation
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownStatus;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(UnknownStatus {
                        entity: $entity,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Channel status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Funding not yet confirmed
    Opening,
    /// Usable for payments
    Active,
    /// Close negotiated, not final
    Closing,
    /// Final; balances frozen
    Closed,
}

status_strings!(ChannelStatus, "channel", {
    Opening => "opening",
    Active => "active",
    Closing => "closing",
    Closed => "closed",
});

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Awaiting payment
    Pending,
    /// Paid before its deadline
    Paid,
    /// Deadline passed unpaid
    Expired,
    /// Withdrawn by the owner
    Canceled,
}

status_strings!(InvoiceStatus, "invoice", {
    Pending => "pending",
    Paid => "paid",
    Expired => "expired",
    Canceled => "canceled",
});

impl InvoiceStatus {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        self != InvoiceStatus::Pending
    }

    /// Resulting status, or `None` when `self` is not the transition's source
    pub fn apply(self, transition: InvoiceTransition) -> Option<InvoiceStatus> {
        (self == transition.source()).then(|| transition.target())
    }
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Balance reserved, outcome not yet known; never persisted
    Pending,
    /// Settled; the balance debit is final
    Succeeded,
    /// Rejected; balances untouched
    Failed,
}

status_strings!(PaymentStatus, "payment", {
    Pending => "pending",
    Succeeded => "succeeded",
    Failed => "failed",
});

impl PaymentStatus {
    /// Resulting status, or `None` when `self` is not the transition's source
    pub fn apply(self, transition: PaymentTransition) -> Option<PaymentStatus> {
        (self == transition.source()).then(|| transition.target())
    }
}

impl ChannelStatus {
    /// Resulting status, or `None` when `self` is not the transition's source
    pub fn apply(self, transition: ChannelTransition) -> Option<ChannelStatus> {
        (self == transition.source()).then(|| transition.target())
    }
}

/// Channel state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelTransition {
    /// active → closed
    Close,
}

impl ChannelTransition {
    /// The only status this transition may start from
    pub const fn source(self) -> ChannelStatus {
        match self {
            ChannelTransition::Close => ChannelStatus::Active,
        }
    }

    /// Status after the transition
    pub const fn target(self) -> ChannelStatus {
        match self {
            ChannelTransition::Close => ChannelStatus::Closed,
        }
    }
}

/// Invoice state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceTransition {
    /// pending → paid
    Pay,
    /// pending → canceled
    Cancel,
    /// pending → expired
    Expire,
}

impl InvoiceTransition {
    /// The only status this transition may start from
    pub const fn source(self) -> InvoiceStatus {
        InvoiceStatus::Pending
    }

    /// Status after the transition
    pub const fn target(self) -> InvoiceStatus {
        match self {
            InvoiceTransition::Pay => InvoiceStatus::Paid,
            InvoiceTransition::Cancel => InvoiceStatus::Canceled,
            InvoiceTransition::Expire => InvoiceStatus::Expired,
        }
    }
}

/// Payment state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTransition {
    /// pending → succeeded
    Succeed,
    /// pending → failed
    Fail,
}

impl PaymentTransition {
    /// The only status this transition may start from
    pub const fn source(self) -> PaymentStatus {
        PaymentStatus::Pending
    }

    /// Status after the transition
    pub const fn target(self) -> PaymentStatus {
        match self {
            PaymentTransition::Succeed => PaymentStatus::Succeeded,
            PaymentTransition::Fail => PaymentStatus::Failed,
        }
    }
}

/// Why a payment failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFailure {
    /// No active channel could cover the amount
    InsufficientBalance,
    /// The fee estimator refused the payment
    FeeEstimation,
    /// The settlement callback reported failure
    Settlement,
}

status_strings!(PaymentFailure, "payment failure", {
    InsufficientBalance => "insufficient_balance",
    FeeEstimation => "fee_estimation_failed",
    Settlement => "settlement_failed",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_transitions_only_leave_pending() {
        for transition in [
            InvoiceTransition::Pay,
            InvoiceTransition::Cancel,
            InvoiceTransition::Expire,
        ] {
            assert_eq!(
                InvoiceStatus::Pending.apply(transition),
                Some(transition.target())
            );
            for terminal in [
                InvoiceStatus::Paid,
                InvoiceStatus::Expired,
                InvoiceStatus::Canceled,
            ] {
                assert!(terminal.is_terminal());
                assert_eq!(terminal.apply(transition), None);
            }
        }
    }

    #[test]
    fn test_channel_close_requires_active() {
        assert_eq!(
            ChannelStatus::Active.apply(ChannelTransition::Close),
            Some(ChannelStatus::Closed)
        );
        assert_eq!(ChannelStatus::Opening.apply(ChannelTransition::Close), None);
        assert_eq!(ChannelStatus::Closing.apply(ChannelTransition::Close), None);
        assert_eq!(ChannelStatus::Closed.apply(ChannelTransition::Close), None);
    }

    #[test]
    fn test_payment_resolution_is_final() {
        assert_eq!(
            PaymentStatus::Pending.apply(PaymentTransition::Succeed),
            Some(PaymentStatus::Succeeded)
        );
        assert_eq!(PaymentStatus::Succeeded.apply(PaymentTransition::Fail), None);
        assert_eq!(PaymentStatus::Failed.apply(PaymentTransition::Succeed), None);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!("canceled".parse::<InvoiceStatus>(), Ok(InvoiceStatus::Canceled));
        assert_eq!(ChannelStatus::Closing.to_string(), "closing");
        assert_eq!(
            PaymentFailure::InsufficientBalance.as_str(),
            "insufficient_balance"
        );
        let err = "cancelled".parse::<InvoiceStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown invoice status: cancelled");
    }
}
