//! Identifier generation
//!
//! Payment hashes and channel ids are random bytes from the operating
//! system's CSPRNG, hex-encoded. Uniqueness is probabilistic: nothing
//! checks a fresh id against previous ones.

use crate::{LedgerError, LedgerResult};
use rand::rngs::OsRng;
use rand::RngCore;

/// Payment hash length in bytes
pub const PAYMENT_HASH_LEN: usize = 32;

/// Channel id length in bytes
pub const CHANNEL_ID_LEN: usize = 16;

/// Hex characters of the payment hash embedded in a payment request
const REQUEST_HASH_CHARS: usize = 50;

/// Capability for producing ledger identifiers
///
/// A production deployment can put a real invoice encoder behind
/// [`IdGenerator::payment_request`] without touching any caller.
pub trait IdGenerator: Send + Sync {
    /// Fill `buf` with secure random bytes
    fn fill_bytes(&self, buf: &mut [u8]) -> LedgerResult<()>;

    /// New 32-byte payment hash, hex-encoded
    fn payment_hash(&self) -> LedgerResult<String> {
        let mut bytes = [0u8; PAYMENT_HASH_LEN];
        self.fill_bytes(&mut bytes)?;
        Ok(hex::encode(bytes))
    }

    /// New 16-byte channel id, hex-encoded
    fn channel_id(&self) -> LedgerResult<String> {
        let mut bytes = [0u8; CHANNEL_ID_LEN];
        self.fill_bytes(&mut bytes)?;
        Ok(hex::encode(bytes))
    }

    /// Payment request string handed to the payer
    ///
    /// The default is a placeholder shaped like a mainnet BOLT11 string; it
    /// is opaque to the ledger and never parsed back.
    fn payment_request(&self, amount_msats: u64, payment_hash: &str) -> String {
        let prefix = payment_hash.get(..REQUEST_HASH_CHARS).unwrap_or(payment_hash);
        format!("lnbc{}n1p{}", amount_msats / 1_000, prefix)
    }
}

/// Identifier generator backed by the OS random source
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRngIdGenerator;

impl IdGenerator for OsRngIdGenerator {
    fn fill_bytes(&self, buf: &mut [u8]) -> LedgerResult<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| LedgerError::Generation(format!("OS entropy source unavailable: {}", e)))
    }
}

/// Check that `value` is a lowercase hex string of `bytes` bytes
pub fn is_hex_id(value: &str, bytes: usize) -> bool {
    value.len() == bytes * 2
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Deterministic generator: ids are a big-endian counter, so they sort
    /// in creation order
    #[derive(Debug, Default)]
    pub struct SequenceIdGenerator {
        next: AtomicU64,
    }

    impl IdGenerator for SequenceIdGenerator {
        fn fill_bytes(&self, buf: &mut [u8]) -> LedgerResult<()> {
            let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            buf.fill(0);
            let counter = n.to_be_bytes();
            let start = buf.len().saturating_sub(counter.len());
            let tail = buf.len() - start;
            buf[start..].copy_from_slice(&counter[counter.len() - tail..]);
            Ok(())
        }
    }

    /// Generator whose entropy source is always down
    #[derive(Debug, Default)]
    pub struct BrokenEntropy;

    impl IdGenerator for BrokenEntropy {
        fn fill_bytes(&self, _buf: &mut [u8]) -> LedgerResult<()> {
            Err(LedgerError::Generation("entropy source offline".to_string()))
        }
    }
}
