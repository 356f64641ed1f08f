//! Per-address transaction nonce management for EVM settlement.
//!
//! The registry caches nonces locally and seeds them from the pending tag, which
//! includes mempool transactions. This prevents "nonce too low" errors when the
//! facilitator restarts while transactions are still in flight.
//!
//! - **First call for an address** (or first after [`NonceRegistry::reset`]): fetches
//!   the nonce using `.pending()`.
//! - **Subsequent calls**: increment the cached nonce locally without touching RPC.
//! - **Per-address serialization**: each address has its own async mutex, so
//!   concurrent settlements on one wallet hand out strictly increasing, gap-free
//!   nonces while different wallets proceed in parallel.

use alloy::primitives::Address;
use alloy::providers::Provider;
use alloy::transports::TransportResult;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sentinel meaning the nonce has not been fetched yet (or was reset).
const UNSET: u64 = u64::MAX;

/// Where a handed-out nonce came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceSource {
    /// Locally incremented from the cached value.
    Cache,
    /// Freshly fetched from the chain's pending tag.
    Chain,
}

/// Per-address monotonic nonce counter with lazy refresh from chain.
#[derive(Clone, Debug, Default)]
pub struct NonceRegistry {
    nonces: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

impl NonceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, address: Address) -> Arc<Mutex<u64>> {
        // Locks the dashmap shard briefly to clone the Arc; the per-address mutex
        // is never held across a dashmap access.
        let entry = self
            .nonces
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(UNSET)));
        Arc::clone(entry.value())
    }

    /// Hand out the next nonce for `address`.
    ///
    /// Callers for one address are serialized (FIFO under tokio's mutex fairness);
    /// each caller receives a unique value. On first use or after [`reset`], the
    /// value comes from the chain's pending tag; afterwards it is incremented
    /// locally.
    ///
    /// [`reset`]: NonceRegistry::reset
    pub async fn next<P: Provider>(
        &self,
        provider: &P,
        address: Address,
    ) -> TransportResult<(u64, NonceSource)> {
        // The slot stores the next nonce to hand out.
        let slot = self.slot(address);
        let mut nonce = slot.lock().await;
        if *nonce == UNSET {
            tracing::trace!(%address, "fetching pending nonce");
            let fetched = provider.get_transaction_count(address).pending().await?;
            *nonce = fetched + 1;
            Ok((fetched, NonceSource::Chain))
        } else {
            let handed_out = *nonce;
            tracing::trace!(%address, nonce = handed_out, "handing out cached nonce");
            *nonce = handed_out + 1;
            Ok((handed_out, NonceSource::Cache))
        }
    }

    /// Monotonic update: adopt `nonce` only if it is higher than the cached value.
    ///
    /// Used after observing an externally submitted transaction so the counter
    /// realigns without going backwards.
    pub async fn set_if_higher(&self, address: Address, nonce: u64) {
        let slot = self.slot(address);
        let mut current = slot.lock().await;
        if *current == UNSET || nonce > *current {
            *current = nonce;
        }
    }

    /// Return a reserved-but-unused nonce.
    ///
    /// A caller that took a nonce from [`next`] but aborted before broadcast must
    /// call this, otherwise the gap stalls every later transaction until a reset.
    /// Floors at zero; a no-op for unseen addresses.
    ///
    /// [`next`]: NonceRegistry::next
    pub async fn decrement(&self, address: Address) {
        if let Some(slot) = self.nonces.get(&address) {
            let slot = Arc::clone(slot.value());
            let mut current = slot.lock().await;
            if *current != UNSET {
                *current = current.saturating_sub(1);
            }
        }
    }

    /// Re-sync the counter from the chain's pending tag, overwriting the cache.
    ///
    /// Called after a classified nonce error, when the local view cannot be
    /// trusted (the failed transaction may or may not have reached the mempool).
    /// The next [`next`] call hands out exactly the fetched value.
    ///
    /// [`next`]: NonceRegistry::next
    pub async fn reset<P: Provider>(
        &self,
        provider: &P,
        address: Address,
    ) -> TransportResult<u64> {
        let slot = self.slot(address);
        let mut nonce = slot.lock().await;
        let fetched = provider.get_transaction_count(address).pending().await?;
        *nonce = fetched;
        tracing::debug!(%address, nonce = fetched, "nonce re-synced from chain");
        Ok(fetched)
    }

    /// Drop the cached value so the next [`next`] call queries the chain.
    ///
    /// [`next`]: NonceRegistry::next
    pub async fn invalidate(&self, address: Address) {
        if let Some(slot) = self.nonces.get(&address) {
            let slot = Arc::clone(slot.value());
            let mut nonce = slot.lock().await;
            *nonce = UNSET;
        }
    }
}

/// Vendor RPC error fragments that indicate a nonce problem.
///
/// Different node implementations phrase the same failure differently; any match
/// triggers a nonce re-sync and retry in the settlement path.
const NONCE_ERROR_FRAGMENTS: &[&str] = &[
    "nonce too low",
    "nonce too high",
    "replacement transaction underpriced",
    "already known",
    "OldNonce",
    "NonceTooLow",
];

/// Whether an RPC error message indicates a recoverable nonce problem.
pub fn is_nonce_error(message: &str) -> bool {
    NONCE_ERROR_FRAGMENTS
        .iter()
        .any(|fragment| message.contains(fragment))
}
