//! Pool of EVM signing identities used for settlement.
//!
//! Each wallet tracks health (native balance against a minimum), the set of
//! in-flight transactions, and when it was last handed out. Acquisition filters to
//! healthy wallets with spare pending capacity and picks one according to the
//! configured [`SelectionStrategy`]. The pool never queues: when nothing is
//! available the caller gets an error immediately.
//!
//! All pool state lives behind a single async mutex. Pools are small (tens of
//! wallets at most), so coarse locking keeps the invariants easy to hold:
//! `pending_txs.len() == pending_tx_count` and
//! `is_healthy ⇔ native_balance ≥ min_native_balance` at the last observation.

use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::nonce::NonceRegistry;

/// How the pool picks among eligible wallets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    /// Circular cursor over the wallet list in insertion order.
    RoundRobin,
    /// Smallest `pending_tx_count`, ties broken by least-recently used.
    LeastPending,
    /// Round-robin for up to three probes, skipping wallets within one slot of
    /// their pending cap, then least-pending as fallback.
    #[default]
    Hybrid,
}

impl std::str::FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(SelectionStrategy::RoundRobin),
            "least-pending" => Ok(SelectionStrategy::LeastPending),
            "hybrid" => Ok(SelectionStrategy::Hybrid),
            other => Err(format!("Unknown wallet selection strategy: {other}")),
        }
    }
}

/// Tunables for the pool. Defaults follow the operational profile of small
/// facilitator deployments.
#[derive(Debug, Clone)]
pub struct WalletPoolConfig {
    /// Concurrent in-flight transactions allowed per wallet.
    pub max_pending_per_wallet: u32,
    /// Minimum native balance (wei) below which a wallet is unhealthy.
    pub min_native_balance: U256,
    /// Cadence of the background health check.
    pub health_check_interval: Duration,
    /// Age after which a tracked pending transaction is considered lost.
    pub pending_tx_timeout: Duration,
    /// Wallet selection strategy for acquisition.
    pub selection_strategy: SelectionStrategy,
    /// Broadcast attempts per settlement when nonce errors are observed.
    pub max_retry_attempts: u32,
    /// Delay between broadcast retries.
    pub retry_delay: Duration,
}

/// 0.01 ETH in wei.
const DEFAULT_MIN_NATIVE_BALANCE_WEI: u64 = 10_000_000_000_000_000;

impl Default for WalletPoolConfig {
    fn default() -> Self {
        Self {
            max_pending_per_wallet: 3,
            min_native_balance: U256::from(DEFAULT_MIN_NATIVE_BALANCE_WEI),
            health_check_interval: Duration::from_secs(60),
            pending_tx_timeout: Duration::from_secs(300),
            selection_strategy: SelectionStrategy::default(),
            max_retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// A signing identity owned by the pool.
#[derive(Debug)]
struct FacilitatorWallet {
    address: Address,
    pending_tx_count: u32,
    last_used_at: Instant,
    is_healthy: bool,
    native_balance: U256,
    pending_txs: HashMap<String, Instant>,
}

impl FacilitatorWallet {
    fn new(address: Address, created_at: Instant) -> Self {
        Self {
            address,
            pending_tx_count: 0,
            last_used_at: created_at,
            is_healthy: true,
            native_balance: U256::ZERO,
            pending_txs: HashMap::new(),
        }
    }
}

/// Read-only view of one wallet, for the scheduler and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSnapshot {
    pub address: Address,
    pub pending_tx_count: u32,
    pub is_healthy: bool,
    pub native_balance: U256,
}

/// A borrowed wallet paired with the capability to release it.
///
/// The lease id makes release idempotent: releasing an already-released lease is
/// a no-op instead of corrupting the pending count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletLease {
    pub address: Address,
    lease_id: u64,
}

/// Why no wallet could be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WalletAcquireError {
    #[error("no wallets configured")]
    NoWalletsConfigured,
    #[error("all wallets unhealthy")]
    AllUnhealthy,
    #[error("all wallets busy")]
    AllBusy,
}

struct PoolState {
    wallets: Vec<FacilitatorWallet>,
    round_robin_cursor: usize,
    active_leases: HashMap<u64, Address>,
    next_lease_id: u64,
}

/// Pool of EVM signing identities with health tracking and bounded per-wallet
/// concurrency.
pub struct WalletPool {
    state: Mutex<PoolState>,
    config: WalletPoolConfig,
}

impl WalletPool {
    /// Build a pool over the given addresses, preserving order for round-robin.
    ///
    /// All wallets start healthy; the first health check corrects that before the
    /// pool serves acquisitions in normal startup order.
    pub fn new(addresses: Vec<Address>, config: WalletPoolConfig) -> Self {
        let created_at = Instant::now();
        let wallets = addresses
            .into_iter()
            .map(|address| FacilitatorWallet::new(address, created_at))
            .collect();
        Self {
            state: Mutex::new(PoolState {
                wallets,
                round_robin_cursor: 0,
                active_leases: HashMap::new(),
                next_lease_id: 0,
            }),
            config,
        }
    }

    pub fn config(&self) -> &WalletPoolConfig {
        &self.config
    }

    /// Borrow a wallet for one settlement.
    ///
    /// Atomically bumps the wallet's pending count and last-used stamp. Returns
    /// immediately with an error when nothing is eligible; there is no queueing.
    pub async fn acquire(&self) -> Result<WalletLease, WalletAcquireError> {
        let mut state = self.state.lock().await;
        if state.wallets.is_empty() {
            return Err(WalletAcquireError::NoWalletsConfigured);
        }
        if !state.wallets.iter().any(|w| w.is_healthy) {
            return Err(WalletAcquireError::AllUnhealthy);
        }
        let max_pending = self.config.max_pending_per_wallet;
        let eligible = |w: &FacilitatorWallet| w.is_healthy && w.pending_tx_count < max_pending;
        if !state.wallets.iter().any(|w| eligible(w)) {
            return Err(WalletAcquireError::AllBusy);
        }

        let index = match self.config.selection_strategy {
            SelectionStrategy::RoundRobin => Self::pick_round_robin(&mut state, &eligible),
            SelectionStrategy::LeastPending => Self::pick_least_pending(&state, &eligible),
            SelectionStrategy::Hybrid => {
                Self::pick_hybrid(&mut state, &eligible, max_pending)
            }
        };
        // An eligible wallet exists, so every strategy yields one.
        let index = index.expect("eligible wallet disappeared under the lock");

        let lease_id = state.next_lease_id;
        state.next_lease_id += 1;
        let address = state.wallets[index].address;
        state.active_leases.insert(lease_id, address);
        let wallet = &mut state.wallets[index];
        wallet.pending_tx_count += 1;
        wallet.last_used_at = Instant::now();
        tracing::debug!(
            wallet = %address,
            pending = wallet.pending_tx_count,
            "wallet acquired"
        );
        Ok(WalletLease { address, lease_id })
    }

    fn pick_round_robin(
        state: &mut PoolState,
        eligible: &impl Fn(&FacilitatorWallet) -> bool,
    ) -> Option<usize> {
        let n = state.wallets.len();
        for step in 0..n {
            let index = (state.round_robin_cursor + step) % n;
            if eligible(&state.wallets[index]) {
                state.round_robin_cursor = (index + 1) % n;
                return Some(index);
            }
        }
        None
    }

    fn pick_least_pending(
        state: &PoolState,
        eligible: &impl Fn(&FacilitatorWallet) -> bool,
    ) -> Option<usize> {
        state
            .wallets
            .iter()
            .enumerate()
            .filter(|(_, w)| eligible(w))
            .min_by_key(|(_, w)| (w.pending_tx_count, w.last_used_at))
            .map(|(index, _)| index)
    }

    fn pick_hybrid(
        state: &mut PoolState,
        eligible: &impl Fn(&FacilitatorWallet) -> bool,
        max_pending: u32,
    ) -> Option<usize> {
        let n = state.wallets.len();
        let probes = n.min(3);
        for step in 0..probes {
            let index = (state.round_robin_cursor + step) % n;
            let wallet = &state.wallets[index];
            // Skip wallets that are one slot away from their cap; they are likely
            // to reject the next acquisition anyway.
            if eligible(wallet) && wallet.pending_tx_count < max_pending.saturating_sub(1) {
                state.round_robin_cursor = (index + 1) % n;
                return Some(index);
            }
        }
        let fallback = Self::pick_least_pending(state, eligible);
        if let Some(index) = fallback {
            state.round_robin_cursor = (index + 1) % n;
        }
        fallback
    }

    /// Record a broadcast transaction against the leased wallet.
    pub async fn track_pending(&self, lease: &WalletLease, tx_id: &str, nonce: u64) {
        self.track_pending_at(lease, tx_id, nonce, Instant::now())
            .await
    }

    async fn track_pending_at(
        &self,
        lease: &WalletLease,
        tx_id: &str,
        nonce: u64,
        submitted_at: Instant,
    ) {
        let mut state = self.state.lock().await;
        if let Some(wallet) = state.wallets.iter_mut().find(|w| w.address == lease.address) {
            wallet.pending_txs.insert(tx_id.to_string(), submitted_at);
            tracing::debug!(
                wallet = %lease.address,
                tx = tx_id,
                nonce,
                "tracking pending transaction"
            );
        }
    }

    /// Return a leased wallet to the pool.
    ///
    /// Decrements the pending count (floored at zero) and drops the tracked
    /// transaction, if any. Safe against double invocation: a lease releases at
    /// most once.
    pub async fn release(&self, lease: &WalletLease, tx_id: Option<&str>, success: bool) {
        let mut state = self.state.lock().await;
        if state.active_leases.remove(&lease.lease_id).is_none() {
            tracing::debug!(wallet = %lease.address, "duplicate wallet release ignored");
            return;
        }
        if let Some(wallet) = state.wallets.iter_mut().find(|w| w.address == lease.address) {
            wallet.pending_tx_count = wallet.pending_tx_count.saturating_sub(1);
            if let Some(tx_id) = tx_id {
                wallet.pending_txs.remove(tx_id);
            }
            tracing::debug!(
                wallet = %lease.address,
                pending = wallet.pending_tx_count,
                success,
                "wallet released"
            );
        }
    }

    /// Record a freshly observed native balance, recomputing health.
    pub async fn update_balance(&self, address: Address, balance: U256) {
        let mut state = self.state.lock().await;
        if let Some(wallet) = state.wallets.iter_mut().find(|w| w.address == address) {
            wallet.native_balance = balance;
            wallet.is_healthy = balance >= self.config.min_native_balance;
        }
    }

    /// Periodic maintenance: refresh balances and health, reap stale pending
    /// transactions, and re-sync nonces for idle wallets.
    ///
    /// Balance reads fan out per wallet; one slow or failing RPC downgrades only
    /// that wallet and never stalls the rest.
    pub async fn health_check<P: Provider>(&self, provider: &P, nonces: &NonceRegistry) {
        let addresses = self.addresses().await;
        let balance_futures = addresses.iter().map(|address| {
            let address = *address;
            async move { (address, provider.get_balance(address).await) }
        });
        let balances = futures_util::future::join_all(balance_futures).await;

        let mut idle_wallets = Vec::new();
        {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            for (address, balance) in balances {
                let Some(wallet) = state.wallets.iter_mut().find(|w| w.address == address)
                else {
                    continue;
                };
                match balance {
                    Ok(balance) => {
                        wallet.native_balance = balance;
                        wallet.is_healthy = balance >= self.config.min_native_balance;
                        if !wallet.is_healthy {
                            tracing::warn!(
                                wallet = %address,
                                balance = %balance,
                                min = %self.config.min_native_balance,
                                "wallet below minimum native balance"
                            );
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            wallet = %address,
                            error = %error,
                            "balance check failed, leaving health unchanged"
                        );
                    }
                }

                let timeout = self.config.pending_tx_timeout;
                let stale: Vec<String> = wallet
                    .pending_txs
                    .iter()
                    .filter(|(_, submitted_at)| {
                        now.duration_since(**submitted_at) > timeout
                    })
                    .map(|(tx_id, _)| tx_id.clone())
                    .collect();
                for tx_id in stale {
                    wallet.pending_txs.remove(&tx_id);
                    wallet.pending_tx_count = wallet.pending_tx_count.saturating_sub(1);
                    tracing::warn!(
                        wallet = %address,
                        tx = %tx_id,
                        timeout_secs = timeout.as_secs(),
                        "reaped stale pending transaction"
                    );
                }

                if wallet.pending_tx_count == 0 {
                    idle_wallets.push(address);
                }
            }
        }

        // Nonce re-sync happens outside the pool lock; it is safe for an idle
        // wallet to be acquired meanwhile because the registry serializes per
        // address.
        for address in idle_wallets {
            if let Err(error) = nonces.reset(provider, address).await {
                tracing::warn!(wallet = %address, error = %error, "nonce re-sync failed");
            }
        }
    }

    /// Addresses in pool order.
    pub async fn addresses(&self) -> Vec<Address> {
        self.state
            .lock()
            .await
            .wallets
            .iter()
            .map(|w| w.address)
            .collect()
    }

    /// Point-in-time view of every wallet.
    pub async fn snapshot(&self) -> Vec<WalletSnapshot> {
        self.state
            .lock()
            .await
            .wallets
            .iter()
            .map(|w| WalletSnapshot {
                address: w.address,
                pending_tx_count: w.pending_tx_count,
                is_healthy: w.is_healthy,
                native_balance: w.native_balance,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const W1: Address = address!("0x0000000000000000000000000000000000000001");
    const W2: Address = address!("0x0000000000000000000000000000000000000002");
    const W3: Address = address!("0x0000000000000000000000000000000000000003");

    fn pool_with(strategy: SelectionStrategy, addresses: Vec<Address>) -> WalletPool {
        WalletPool::new(
            addresses,
            WalletPoolConfig {
                selection_strategy: strategy,
                ..WalletPoolConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn empty_pool_reports_no_wallets() {
        let pool = pool_with(SelectionStrategy::RoundRobin, vec![]);
        assert_eq!(
            pool.acquire().await.unwrap_err(),
            WalletAcquireError::NoWalletsConfigured
        );
    }

    #[tokio::test]
    async fn unhealthy_wallets_are_not_acquired() {
        let pool = pool_with(SelectionStrategy::RoundRobin, vec![W1, W2]);
        pool.update_balance(W1, U256::ZERO).await;
        pool.update_balance(W2, U256::ZERO).await;
        assert_eq!(
            pool.acquire().await.unwrap_err(),
            WalletAcquireError::AllUnhealthy
        );
    }

    #[tokio::test]
    async fn saturated_pool_reports_all_busy_immediately() {
        let pool = pool_with(SelectionStrategy::RoundRobin, vec![W1, W2, W3]);
        let mut leases = Vec::new();
        for _ in 0..9 {
            leases.push(pool.acquire().await.unwrap());
        }
        assert_eq!(pool.acquire().await.unwrap_err(), WalletAcquireError::AllBusy);

        // Capacity invariant: sum of pending never exceeds N * max.
        let total: u32 = pool
            .snapshot()
            .await
            .iter()
            .map(|w| w.pending_tx_count)
            .sum();
        assert_eq!(total, 9);

        let lease = leases.pop().unwrap();
        pool.release(&lease, None, false).await;
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn round_robin_cycles_in_insertion_order() {
        let pool = pool_with(SelectionStrategy::RoundRobin, vec![W1, W2, W3]);
        let mut order = Vec::new();
        for _ in 0..6 {
            let lease = pool.acquire().await.unwrap();
            order.push(lease.address);
            pool.release(&lease, None, true).await;
        }
        assert_eq!(order, vec![W1, W2, W3, W1, W2, W3]);
    }

    #[tokio::test]
    async fn least_pending_prefers_unloaded_wallets() {
        let pool = pool_with(SelectionStrategy::LeastPending, vec![W1, W2]);
        let first = pool.acquire().await.unwrap();
        assert_eq!(first.address, W1);
        // W1 now has one pending; the next acquisition must go to W2.
        let second = pool.acquire().await.unwrap();
        assert_eq!(second.address, W2);
    }

    #[tokio::test]
    async fn hybrid_skips_nearly_full_wallets() {
        let pool = pool_with(SelectionStrategy::Hybrid, vec![W1, W2]);
        // Load W1 to max-1 pending (2 of 3).
        let a = pool.acquire().await.unwrap();
        assert_eq!(a.address, W1);
        let b = pool.acquire().await.unwrap();
        assert_eq!(b.address, W2);
        let c = pool.acquire().await.unwrap();
        assert_eq!(c.address, W1);
        // W1 sits at 2 == max-1 now; hybrid probes skip it.
        let d = pool.acquire().await.unwrap();
        assert_eq!(d.address, W2);
        // Both at max-1: probes fail, least-pending fallback breaks the tie
        // toward the least recently used wallet and hands out remaining capacity.
        let e = pool.acquire().await.unwrap();
        assert_eq!(e.address, W1);
        let f = pool.acquire().await.unwrap();
        assert_eq!(f.address, W2);
        assert_eq!(pool.acquire().await.unwrap_err(), WalletAcquireError::AllBusy);
    }

    #[tokio::test]
    async fn hybrid_share_is_fair_over_many_acquisitions() {
        let wallets = vec![W1, W2, W3];
        let pool = pool_with(SelectionStrategy::Hybrid, wallets.clone());
        let mut counts: HashMap<Address, u32> = HashMap::new();
        let rounds = 300;
        for _ in 0..rounds {
            let lease = pool.acquire().await.unwrap();
            *counts.entry(lease.address).or_default() += 1;
            pool.release(&lease, None, true).await;
        }
        let mean = rounds as f64 / wallets.len() as f64;
        let tolerance = 2.0 * rounds as f64 / wallets.len() as f64 / wallets.len() as f64;
        for wallet in &wallets {
            let share = *counts.get(wallet).unwrap_or(&0) as f64;
            assert!(
                (share - mean).abs() <= tolerance,
                "wallet {wallet} got {share} of {rounds}, expected about {mean}"
            );
        }
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let pool = pool_with(SelectionStrategy::RoundRobin, vec![W1]);
        let lease = pool.acquire().await.unwrap();
        pool.track_pending(&lease, "0xabc", 5).await;
        pool.release(&lease, Some("0xabc"), true).await;
        pool.release(&lease, Some("0xabc"), true).await;
        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot[0].pending_tx_count, 0);
        // Pending count stayed at zero; the wallet is still usable.
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn stale_pending_transactions_are_reaped() {
        use alloy::primitives::U64;
        use alloy::providers::{ProviderBuilder, mock::Asserter};

        let pool = WalletPool::new(
            vec![W1],
            WalletPoolConfig {
                pending_tx_timeout: Duration::from_secs(300),
                ..WalletPoolConfig::default()
            },
        );
        let lease = pool.acquire().await.unwrap();
        let long_ago = Instant::now() - Duration::from_secs(301);
        pool.track_pending_at(&lease, "0xdead", 1, long_ago).await;

        let asserter = Asserter::new();
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_mocked_client(asserter.clone());
        // Balance read for W1, then the pending-tag nonce fetch for the re-sync.
        asserter.push_success(&U256::from(10).pow(U256::from(18)));
        asserter.push_success(&U64::from(4));

        let nonces = NonceRegistry::new();
        pool.health_check(&provider, &nonces).await;

        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot[0].pending_tx_count, 0);
        assert!(snapshot[0].is_healthy);
        assert_eq!(snapshot[0].native_balance, U256::from(10).pow(U256::from(18)));
    }

    #[tokio::test]
    async fn health_check_marks_poor_wallets_unhealthy() {
        use alloy::primitives::U64;
        use alloy::providers::{ProviderBuilder, mock::Asserter};

        let pool = pool_with(SelectionStrategy::RoundRobin, vec![W1]);
        let asserter = Asserter::new();
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_mocked_client(asserter.clone());
        asserter.push_success(&U256::from(1)); // 1 wei, far below the minimum
        asserter.push_success(&U64::from(0)); // idle wallet nonce re-sync

        let nonces = NonceRegistry::new();
        pool.health_check(&provider, &nonces).await;

        assert_eq!(
            pool.acquire().await.unwrap_err(),
            WalletAcquireError::AllUnhealthy
        );
    }
}
