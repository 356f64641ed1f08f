//! Background maintenance loops.
//!
//! Two independent periodic jobs run for the lifetime of the process:
//!
//! - **Gas-balance refresher** (every 5 minutes, once immediately at startup):
//!   reads the native balance of every (network, wallet) pair and publishes it
//!   as a gauge. Per-wallet failures are logged and skipped.
//! - **Wallet-pool health check** (every 60 seconds by default): refreshes
//!   balances and health, reaps stale pending transactions, and re-syncs nonces
//!   for idle wallets, fanning out so one slow RPC does not stall the rest.
//!
//! A third low-frequency tick runs discovery cleanup daily. All loops stop when
//! the process-wide cancellation token fires; in-flight RPCs are abandoned.

use futures_util::future::join_all;
use opentelemetry::KeyValue;
use opentelemetry::metrics::Gauge;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::chain::NetworkProvider;
use crate::chain::svm::SvmProviderLike;
use crate::discovery::DiscoveryRegistry;
use crate::provider_cache::ProviderCache;

const GAS_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DISCOVERY_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const WEI_PER_ETH: f64 = 1e18;
const LAMPORTS_PER_SOL: f64 = 1e9;

/// Spawns and tracks the background loops.
pub struct Scheduler {
    providers: Arc<ProviderCache>,
    discovery: Arc<DiscoveryRegistry>,
    health_check_interval: Duration,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        providers: Arc<ProviderCache>,
        discovery: Arc<DiscoveryRegistry>,
        health_check_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            providers,
            discovery,
            health_check_interval,
            shutdown,
        }
    }

    /// Start all loops. The returned tracker resolves once every loop has
    /// observed the shutdown signal and exited.
    pub fn spawn(self) -> TaskTracker {
        let tracker = TaskTracker::new();

        let gauge = opentelemetry::global::meter("x402-facilitator")
            .f64_gauge("facilitator.wallet.native_balance")
            .with_description("Native balance of facilitator signing wallets")
            .build();

        {
            let providers = Arc::clone(&self.providers);
            let shutdown = self.shutdown.clone();
            let gauge = gauge.clone();
            tracker.spawn(async move {
                let mut interval = tokio::time::interval(GAS_REFRESH_INTERVAL);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = interval.tick() => refresh_gas_balances(&providers, &gauge).await,
                    }
                }
                tracing::debug!("gas-balance refresher stopped");
            });
        }

        {
            let providers = Arc::clone(&self.providers);
            let shutdown = self.shutdown.clone();
            let health_interval = self.health_check_interval;
            tracker.spawn(async move {
                let mut interval = tokio::time::interval(health_interval);
                // The pools already ran their first health check at startup.
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = interval.tick() => run_health_checks(&providers).await,
                    }
                }
                tracing::debug!("wallet health loop stopped");
            });
        }

        {
            let discovery = Arc::clone(&self.discovery);
            let shutdown = self.shutdown.clone();
            tracker.spawn(async move {
                let mut interval = tokio::time::interval(DISCOVERY_CLEANUP_INTERVAL);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = interval.tick() => discovery.cleanup().await,
                    }
                }
                tracing::debug!("discovery cleanup loop stopped");
            });
        }

        tracker.close();
        tracker
    }
}

/// Read and publish the native balance of every (network, wallet) pair.
async fn refresh_gas_balances(providers: &ProviderCache, gauge: &Gauge<f64>) {
    let tasks = providers.into_iter().map(|(network, provider)| {
        let network = *network;
        async move {
            match provider {
                NetworkProvider::Evm(evm) => {
                    for address in evm.wallet_pool().addresses().await {
                        match evm.native_balance(address).await {
                            Ok(balance) => {
                                evm.wallet_pool().update_balance(address, balance).await;
                                let eth =
                                    u128::try_from(balance).unwrap_or(u128::MAX) as f64
                                        / WEI_PER_ETH;
                                gauge.record(
                                    eth,
                                    &[
                                        KeyValue::new("network", network.to_string()),
                                        KeyValue::new("wallet", address.to_string()),
                                    ],
                                );
                            }
                            Err(error) => {
                                tracing::warn!(
                                    network = %network,
                                    wallet = %address,
                                    error = %error,
                                    "gas balance refresh failed"
                                );
                            }
                        }
                    }
                }
                NetworkProvider::Svm(svm) => {
                    let fee_payer = svm.fee_payer_pubkey();
                    match svm.get_balance(&fee_payer).await {
                        Ok(lamports) => {
                            gauge.record(
                                lamports as f64 / LAMPORTS_PER_SOL,
                                &[
                                    KeyValue::new("network", network.to_string()),
                                    KeyValue::new("wallet", fee_payer.to_string()),
                                ],
                            );
                        }
                        Err(error) => {
                            tracing::warn!(
                                network = %network,
                                wallet = %fee_payer,
                                error = %error,
                                "gas balance refresh failed"
                            );
                        }
                    }
                }
            }
        }
    });
    join_all(tasks).await;
}

/// Run the wallet-pool health check on every EVM provider concurrently.
async fn run_health_checks(providers: &ProviderCache) {
    let tasks = providers.into_iter().filter_map(|(_, provider)| match provider {
        NetworkProvider::Evm(evm) => Some(async move {
            evm.wallet_pool().health_check(evm.inner(), evm.nonces()).await;
        }),
        NetworkProvider::Svm(_) => None,
    });
    join_all(tasks).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn loops_stop_on_cancellation() {
        let providers = Arc::new(ProviderCache::from_providers(HashMap::new()));
        let discovery = Arc::new(DiscoveryRegistry::new(None, false));
        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::new(
            providers,
            discovery,
            Duration::from_secs(60),
            shutdown.clone(),
        );
        let tracker = scheduler.spawn();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), tracker.wait())
            .await
            .expect("scheduler loops exit promptly on shutdown");
    }
}
