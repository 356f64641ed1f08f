//! Per-network provider construction and lookup.
//!
//! At startup every allowed network with a matching signer gets a provider: EVM
//! networks need at least one EVM private key, SVM networks need the fee-payer
//! keypair. A network whose provider fails to initialize is logged and skipped
//! so one unreachable RPC endpoint does not take the whole facilitator down.

use std::borrow::Borrow;
use std::collections::HashMap;

use crate::chain::svm::SvmProvider;
use crate::chain::{NetworkProvider, NetworkProviderOps, evm::EvmProvider};
use crate::config::Config;
use crate::network::{Network, NetworkFamily};

/// A cache of pre-initialized providers keyed by network.
#[derive(Clone)]
pub struct ProviderCache {
    providers: HashMap<Network, NetworkProvider>,
}

/// Lookup of configured providers by network.
pub trait ProviderMap {
    type Value;

    /// Returns the provider for the specified network, if configured.
    fn by_network<N: Borrow<Network>>(&self, network: N) -> Option<&Self::Value>;

    /// All configured providers, in unspecified order.
    fn values(&self) -> impl Iterator<Item = &Self::Value>;
}

impl<'a> IntoIterator for &'a ProviderCache {
    type Item = (&'a Network, &'a NetworkProvider);
    type IntoIter = std::collections::hash_map::Iter<'a, Network, NetworkProvider>;

    fn into_iter(self) -> Self::IntoIter {
        self.providers.iter()
    }
}

impl ProviderCache {
    /// Build providers for every allowed network that has a signer configured.
    pub async fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let mut providers = HashMap::new();
        for network in Network::variants() {
            if !config.is_network_allowed(*network) {
                continue;
            }
            match network.family() {
                NetworkFamily::Evm => {
                    if config.evm_private_keys.is_empty() {
                        continue;
                    }
                    let rpc_url = config.rpc_url_for(*network);
                    match EvmProvider::try_new(
                        &config.evm_private_keys,
                        &rpc_url,
                        *network,
                        config.wallet_pool.clone(),
                    )
                    .await
                    {
                        Ok(provider) => {
                            providers.insert(*network, NetworkProvider::Evm(provider));
                        }
                        Err(error) => {
                            tracing::warn!(
                                network = %network,
                                error = %error,
                                "skipping network: EVM provider initialization failed"
                            );
                        }
                    }
                }
                NetworkFamily::Solana => {
                    let Some(key) = &config.svm_private_key else {
                        continue;
                    };
                    let rpc_url = config.rpc_url_for(*network);
                    match SvmProvider::try_new(key, rpc_url.to_string(), *network) {
                        Ok(provider) => {
                            providers.insert(*network, NetworkProvider::Svm(provider));
                        }
                        Err(error) => {
                            tracing::warn!(
                                network = %network,
                                error = %error,
                                "skipping network: SVM provider initialization failed"
                            );
                        }
                    }
                }
            }
        }

        if providers.is_empty() {
            tracing::warn!(
                "no providers configured; verify and settle will reject every network"
            );
        } else {
            for (network, provider) in &providers {
                tracing::info!(
                    network = %network,
                    signer = %provider.signer_address(),
                    "provider ready"
                );
            }
        }
        Ok(Self { providers })
    }

    /// Assemble a cache directly from providers; used by tests.
    pub fn from_providers(providers: HashMap<Network, NetworkProvider>) -> Self {
        Self { providers }
    }
}

impl ProviderMap for ProviderCache {
    type Value = NetworkProvider;

    fn by_network<N: Borrow<Network>>(&self, network: N) -> Option<&NetworkProvider> {
        self.providers.get(network.borrow())
    }

    fn values(&self) -> impl Iterator<Item = &NetworkProvider> {
        self.providers.values()
    }
}
