//! Database models

use crate::state::{ChannelStatus, InvoiceStatus, PaymentFailure, PaymentStatus};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Payment channel owned by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel ID (16 bytes hex)
    pub id: String,
    /// Owning user
    pub owner: String,
    /// Counterparty node public key
    pub remote_pubkey: String,
    /// Total value locked (satoshis); never changes
    pub capacity_sats: u64,
    /// Our side of the channel (satoshis)
    pub local_balance_sats: u64,
    /// Counterparty side of the channel (satoshis)
    pub remote_balance_sats: u64,
    /// Channel status
    pub status: ChannelStatus,
    /// Announced to the network
    pub is_public: bool,
    /// Open time
    pub opened_at: DateTime<Utc>,
    /// Close time
    pub closed_at: Option<DateTime<Utc>>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    /// `local + remote == capacity`
    pub fn is_balanced(&self) -> bool {
        self.local_balance_sats.checked_add(self.remote_balance_sats) == Some(self.capacity_sats)
    }
}

/// Invoice issued by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice ID
    pub id: String,
    /// Owning user
    pub owner: String,
    /// Payment request handed to the payer (opaque)
    pub payment_request: String,
    /// Payment hash (32 bytes hex, globally unique)
    pub payment_hash: String,
    /// Amount in millisatoshis
    pub amount_msats: u64,
    /// Description shown to the payer
    pub description: String,
    /// Invoice status
    pub status: InvoiceStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Payment deadline
    pub expires_at: DateTime<Utc>,
    /// Settlement time (paid invoices only)
    pub paid_at: Option<DateTime<Utc>>,
}

/// Outgoing payment made by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment ID
    pub id: String,
    /// Owning user
    pub owner: String,
    /// Payment hash
    pub payment_hash: String,
    /// Payment request paid
    pub payment_request: String,
    /// Amount in millisatoshis
    pub amount_msats: u64,
    /// Routing fee in millisatoshis
    pub fee_msats: u64,
    /// Destination node
    pub destination: String,
    /// Payment status
    pub status: PaymentStatus,
    /// Failure category (failed payments only)
    pub failure: Option<PaymentFailure>,
    /// Failure detail (failed payments only)
    pub error_message: Option<String>,
    /// Channel that carried the payment
    pub channel_id: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Settlement time (succeeded payments only)
    pub paid_at: Option<DateTime<Utc>>,
}

/// Timestamps are stored as milliseconds since the epoch
pub(crate) fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

pub(crate) const CHANNEL_COLUMNS: &str = "id, owner, remote_pubkey, capacity_sats, local_balance_sats, remote_balance_sats, status, is_public, opened_at, closed_at, updated_at";

pub(crate) const INVOICE_COLUMNS: &str = "id, owner, payment_request, payment_hash, amount_msats, description, status, created_at, expires_at, paid_at";

pub(crate) const PAYMENT_COLUMNS: &str = "id, owner, payment_hash, payment_request, amount_msats, fee_msats, destination, status, failure, error_message, channel_id, created_at, paid_at";

pub(crate) fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        owner: row.get(1)?,
        remote_pubkey: row.get(2)?,
        capacity_sats: row.get::<_, i64>(3)? as u64,
        local_balance_sats: row.get::<_, i64>(4)? as u64,
        remote_balance_sats: row.get::<_, i64>(5)? as u64,
        status: row.get(6)?,
        is_public: row.get::<_, i32>(7)? != 0,
        opened_at: from_millis(row.get(8)?),
        closed_at: row.get::<_, Option<i64>>(9)?.map(from_millis),
        updated_at: from_millis(row.get(10)?),
    })
}

pub(crate) fn invoice_from_row(row: &Row<'_>) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        id: row.get(0)?,
        owner: row.get(1)?,
        payment_request: row.get(2)?,
        payment_hash: row.get(3)?,
        amount_msats: row.get::<_, i64>(4)? as u64,
        description: row.get(5)?,
        status: row.get(6)?,
        created_at: from_millis(row.get(7)?),
        expires_at: from_millis(row.get(8)?),
        paid_at: row.get::<_, Option<i64>>(9)?.map(from_millis),
    })
}

pub(crate) fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        owner: row.get(1)?,
        payment_hash: row.get(2)?,
        payment_request: row.get(3)?,
        amount_msats: row.get::<_, i64>(4)? as u64,
        fee_msats: row.get::<_, i64>(5)? as u64,
        destination: row.get(6)?,
        status: row.get(7)?,
        failure: row.get(8)?,
        error_message: row.get(9)?,
        channel_id: row.get(10)?,
        created_at: from_millis(row.get(11)?),
        paid_at: row.get::<_, Option<i64>>(12)?.map(from_millis),
    })
}

macro_rules! sql_status {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    value
                        .as_str()?
                        .parse()
                        .map_err(|e| FromSqlError::Other(Box::new(e)))
                }
            }
        )+
    };
}

sql_status!(ChannelStatus, InvoiceStatus, PaymentStatus, PaymentFailure);
