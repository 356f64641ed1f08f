//! EVM chain provider: JSON-RPC plumbing, signing wallets, and settlement state.
//!
//! The provider composes an Alloy filler stack for gas, blob gas, chain ID, and
//! wallet signing. Transaction nonces are deliberately left out of the filler
//! chain: settlement assigns them explicitly through the [`NonceRegistry`] so
//! failures can be classified and recovered per wallet.

use alloy::network::{Ethereum, EthereumWallet, NetworkWallet};
use alloy::primitives::{Address, U256};
use alloy::providers::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, WalletFiller,
};
use alloy::providers::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy::signers::local::PrivateKeySigner;
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

use crate::chain::{FacilitatorLocalError, NetworkProviderOps};
use crate::network::Network;
use crate::nonce::NonceRegistry;
use crate::types::MixedAddress;
use crate::wallet_pool::{WalletPool, WalletPoolConfig};

/// The fully composed Ethereum provider type used in this project.
///
/// Gas, blob gas, and chain ID are filled automatically; nonces are not (see the
/// module docs) and the wallet filler signs with whichever pool wallet the
/// transaction names as `from`.
pub type InnerProvider = FillProvider<
    JoinFill<
        JoinFill<Identity, JoinFill<GasFiller, JoinFill<BlobGasFiller, ChainIdFiller>>>,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider,
>;

/// Chain descriptor pairing a [`Network`] with its numeric chain ID.
#[derive(Clone, Debug)]
pub struct EvmChain {
    pub network: Network,
    pub chain_id: u64,
}

impl TryFrom<Network> for EvmChain {
    type Error = FacilitatorLocalError;

    fn try_from(network: Network) -> Result<Self, Self::Error> {
        let chain_id = network
            .evm_chain_id()
            .ok_or(FacilitatorLocalError::UnsupportedNetwork(None))?;
        Ok(EvmChain { network, chain_id })
    }
}

/// Provider for one EVM network: RPC transport, signer set, wallet pool, and
/// nonce registry.
///
/// Wallet health, pending-transaction tracking, and nonce counters are all
/// chain-local, so each configured network carries its own pool state over the
/// shared key list.
#[derive(Clone)]
pub struct EvmProvider {
    inner: Arc<InnerProvider>,
    chain: EvmChain,
    eip1559: bool,
    eip712_native: bool,
    signer_addresses: Arc<Vec<Address>>,
    wallet_pool: Arc<WalletPool>,
    nonces: NonceRegistry,
}

impl EvmProvider {
    /// Connect to `rpc_url` and initialize settlement state for `network`.
    ///
    /// Derives wallet addresses from the configured private keys (order
    /// preserved for round-robin), pre-fetches each wallet's pending-tag nonce,
    /// and runs a first health check so acquisition starts from observed state.
    /// Prefetch failures are logged and deferred to the next scheduler pass
    /// rather than failing startup.
    pub async fn try_new(
        private_keys: &[String],
        rpc_url: &Url,
        network: Network,
        pool_config: WalletPoolConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let chain = EvmChain::try_from(network)?;
        if private_keys.is_empty() {
            return Err("no EVM private keys configured".into());
        }

        let mut signers = private_keys.iter().map(|key| {
            PrivateKeySigner::from_str(key)
                .map_err(|e| -> Box<dyn std::error::Error> { Box::new(e) })
        });
        let first = signers.next().expect("checked non-empty above")?;
        let mut wallet = EthereumWallet::from(first);
        for signer in signers {
            wallet.register_signer(signer?);
        }
        let signer_addresses: Vec<Address> =
            NetworkWallet::<Ethereum>::signer_addresses(&wallet).collect();

        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(BlobGasFiller, ChainIdFiller::default()),
        );
        let inner = ProviderBuilder::default()
            .filler(filler)
            .wallet(wallet)
            .connect_http(rpc_url.clone());

        let nonces = NonceRegistry::new();
        for address in &signer_addresses {
            if let Err(error) = nonces.reset(&inner, *address).await {
                tracing::warn!(
                    wallet = %address,
                    network = %network,
                    error = %error,
                    "pending nonce prefetch failed, deferring to first use"
                );
                nonces.invalidate(*address).await;
            }
        }

        let wallet_pool = Arc::new(WalletPool::new(signer_addresses.clone(), pool_config));
        wallet_pool.health_check(&inner, &nonces).await;

        tracing::info!(
            network = %network,
            rpc = %rpc_url,
            signers = signer_addresses.len(),
            "Initialized EVM provider"
        );

        Ok(Self {
            inner: Arc::new(inner),
            chain,
            eip1559: network.is_eip1559(),
            eip712_native: network.is_eip712_native(),
            signer_addresses: Arc::new(signer_addresses),
            wallet_pool,
            nonces,
        })
    }

    /// Build a provider over a mocked transport, skipping startup RPC.
    #[cfg(test)]
    pub(crate) fn for_test(
        asserter: &alloy::providers::mock::Asserter,
        network: Network,
        wallet_pool: Arc<WalletPool>,
        nonces: NonceRegistry,
    ) -> Self {
        let signer = PrivateKeySigner::random();
        let wallet = EthereumWallet::from(signer);
        let signer_addresses: Vec<Address> =
            NetworkWallet::<Ethereum>::signer_addresses(&wallet).collect();
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(BlobGasFiller, ChainIdFiller::default()),
        );
        let inner = ProviderBuilder::default()
            .filler(filler)
            .wallet(wallet)
            .connect_mocked_client(asserter.clone());
        Self {
            inner: Arc::new(inner),
            chain: EvmChain::try_from(network).expect("EVM network"),
            eip1559: network.is_eip1559(),
            eip712_native: network.is_eip712_native(),
            signer_addresses: Arc::new(signer_addresses),
            wallet_pool,
            nonces,
        }
    }

    pub fn inner(&self) -> &InnerProvider {
        &self.inner
    }

    pub fn chain(&self) -> &EvmChain {
        &self.chain
    }

    /// Whether outgoing transactions may use EIP-1559 fee fields.
    pub fn is_eip1559(&self) -> bool {
        self.eip1559
    }

    /// Whether this chain requires zkStack EIP-712-native wallet actions.
    pub fn is_eip712_native(&self) -> bool {
        self.eip712_native
    }

    pub fn wallet_pool(&self) -> &Arc<WalletPool> {
        &self.wallet_pool
    }

    pub fn nonces(&self) -> &NonceRegistry {
        &self.nonces
    }

    pub fn signer_addresses(&self) -> &[Address] {
        &self.signer_addresses
    }

    /// Native balance of `address`, in wei.
    pub async fn native_balance(&self, address: Address) -> Result<U256, FacilitatorLocalError> {
        self.inner
            .get_balance(address)
            .await
            .map_err(|e| FacilitatorLocalError::RpcTransport(format!("{e:?}")))
    }

    /// Current legacy gas price, for networks without EIP-1559 support.
    pub async fn gas_price(&self) -> Result<u128, FacilitatorLocalError> {
        self.inner
            .get_gas_price()
            .await
            .map_err(|e| FacilitatorLocalError::RpcTransport(format!("{e:?}")))
    }
}

impl std::fmt::Debug for EvmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmProvider")
            .field("network", &self.chain.network)
            .field("chain_id", &self.chain.chain_id)
            .field("signers", &self.signer_addresses.len())
            .finish_non_exhaustive()
    }
}

impl NetworkProviderOps for EvmProvider {
    fn signer_address(&self) -> MixedAddress {
        // The primary signer; the pool may settle with any registered wallet.
        self.signer_addresses[0].into()
    }

    fn network(&self) -> Network {
        self.chain.network
    }
}
