//! Facilitator facade: scheme and network routing over the configured providers.
//!
//! [`FacilitatorLocal`] resolves the (scheme, network) pair of each request to a
//! chain-family provider and delegates verification and settlement to it. The
//! network allow-list is enforced here before settlement, and successful
//! settlements feed the discovery registry without blocking the response.

use std::sync::Arc;
use tracing::instrument;

use crate::chain::{FacilitatorLocalError, NetworkProvider};
use crate::config::Config;
use crate::discovery::DiscoveryRegistry;
use crate::facilitator::Facilitator;
use crate::provider_cache::ProviderMap;
use crate::types::{
    SettleRequest, SettleResponse, SupportedPaymentKindsResponse, VerifyRequest, VerifyResponse,
};

/// A concrete [`Facilitator`] that verifies and settles payments using a
/// network-aware provider cache.
///
/// Generic over the [`ProviderMap`] implementation to allow custom caches in
/// tests and embeddings.
pub struct FacilitatorLocal<A> {
    provider_map: A,
    config: Arc<Config>,
    discovery: Arc<DiscoveryRegistry>,
}

impl<A> FacilitatorLocal<A> {
    pub fn new(provider_map: A, config: Arc<Config>, discovery: Arc<DiscoveryRegistry>) -> Self {
        FacilitatorLocal {
            provider_map,
            config,
            discovery,
        }
    }

    pub fn discovery(&self) -> &Arc<DiscoveryRegistry> {
        &self.discovery
    }
}

impl<A> Facilitator for FacilitatorLocal<A>
where
    A: ProviderMap<Value = NetworkProvider> + Sync,
{
    type Error = FacilitatorLocalError;

    /// Verifies a proposed payment payload against the declared requirements.
    ///
    /// Routing failures (unknown or unconfigured network) surface as structured
    /// errors carrying the payer when the payload names one.
    #[instrument(skip_all, err, fields(network = %request.payment_payload.network))]
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        let network = request.network();
        let provider = self.provider_map.by_network(network).ok_or_else(|| {
            FacilitatorLocalError::UnsupportedNetwork(
                request.payment_payload.payload.payer_hint(),
            )
        })?;
        provider.verify(request).await
    }

    /// Settles a payment on-chain.
    ///
    /// The allow-list is checked before any chain interaction. On success the
    /// resource named in the requirements is registered with the discovery
    /// catalog on a detached task; registry failures never affect the response.
    #[instrument(skip_all, err, fields(network = %request.payment_payload.network))]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        let network = request.network();
        if !self.config.is_network_allowed(network) {
            return Err(FacilitatorLocalError::NetworkNotAllowed(network));
        }
        let provider = self.provider_map.by_network(network).ok_or_else(|| {
            FacilitatorLocalError::UnsupportedNetwork(
                request.payment_payload.payload.payer_hint(),
            )
        })?;
        let response = provider.settle(request).await?;

        if response.success {
            let discovery = Arc::clone(&self.discovery);
            let requirements = request.payment_requirements.clone();
            tokio::spawn(async move {
                discovery.register(&requirements).await;
            });
        }
        Ok(response)
    }

    /// Enumerates every (version, scheme, network) kind the configured providers
    /// can settle. SVM kinds carry the fee-payer address in `extra`.
    async fn supported(&self) -> Result<SupportedPaymentKindsResponse, Self::Error> {
        let mut kinds = vec![];
        for provider in self.provider_map.values() {
            match provider.supported().await {
                Ok(supported) => kinds.extend(supported.kinds),
                Err(error) => {
                    tracing::warn!(error = %error, "provider failed to report supported kinds");
                }
            }
        }
        Ok(SupportedPaymentKindsResponse { kinds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::NetworkProviderOps;
    use crate::chain::svm::SvmProvider;
    use crate::network::Network;
    use crate::nonce::NonceRegistry;
    use crate::provider_cache::ProviderCache;
    use crate::types::{
        ExactPaymentPayload, ExactSvmPayload, FacilitatorErrorReason, PaymentPayload,
        PaymentRequirements, Scheme, TokenAmount, X402Version,
    };
    use crate::wallet_pool::{WalletPool, WalletPoolConfig};
    use alloy::providers::mock::Asserter;
    use solana_keypair::Keypair;
    use std::collections::HashMap;

    fn config(allowed: Option<Vec<Network>>) -> Arc<Config> {
        Arc::new(Config {
            host: [0, 0, 0, 0].into(),
            port: 8080,
            evm_private_keys: vec![],
            svm_private_key: None,
            allowed_networks: allowed,
            default_evm_network: Network::Base,
            evm_rpc_url: None,
            svm_rpc_url: None,
            rpc_overrides: HashMap::new(),
            gas_threshold_evm_wei: alloy::primitives::U256::from(1u64),
            gas_threshold_svm_lamports: 1,
            wallet_pool: WalletPoolConfig::default(),
            allow_localhost_resources: false,
        })
    }

    fn svm_request(network: Network) -> VerifyRequest {
        VerifyRequest {
            payment_payload: PaymentPayload {
                x402_version: X402Version::V1,
                scheme: Scheme::Exact,
                network,
                payload: ExactPaymentPayload::Svm(ExactSvmPayload {
                    transaction: "AQID".to_string(),
                }),
            },
            payment_requirements: PaymentRequirements {
                scheme: Scheme::Exact,
                network,
                max_amount_required: TokenAmount::from(1u64),
                resource: "https://api.example.com/x".parse().unwrap(),
                description: String::new(),
                mime_type: "application/json".into(),
                output_schema: None,
                pay_to: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".parse().unwrap(),
                max_timeout_seconds: 10,
                asset: "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZ5nc4pb".parse().unwrap(),
                extra: None,
            },
        }
    }

    fn facilitator_with(
        providers: HashMap<Network, NetworkProvider>,
        allowed: Option<Vec<Network>>,
    ) -> FacilitatorLocal<ProviderCache> {
        FacilitatorLocal::new(
            ProviderCache::from_providers(providers),
            config(allowed),
            Arc::new(DiscoveryRegistry::new(None, false)),
        )
    }

    #[tokio::test]
    async fn unconfigured_network_maps_to_invalid_network() {
        let facilitator = facilitator_with(HashMap::new(), None);
        let error = facilitator
            .verify(&svm_request(Network::SolanaDevnet))
            .await
            .unwrap_err();
        assert_eq!(
            error.verify_reason(),
            FacilitatorErrorReason::InvalidNetwork
        );
    }

    #[tokio::test]
    async fn settle_enforces_allow_list_before_routing() {
        let facilitator = facilitator_with(HashMap::new(), Some(vec![Network::Base]));
        let error = facilitator
            .settle(&svm_request(Network::SolanaDevnet))
            .await
            .unwrap_err();
        assert_eq!(
            error.settle_reason(),
            FacilitatorErrorReason::NetworkNotAllowed
        );
    }

    #[tokio::test]
    async fn supported_aggregates_kinds_with_fee_payer_extra() {
        let keypair = Keypair::new();
        let svm = SvmProvider::try_new(
            &keypair.to_base58_string(),
            "http://127.0.0.1:1".to_string(),
            Network::SolanaDevnet,
        )
        .unwrap();
        let asserter = Asserter::new();
        let evm = crate::chain::evm::EvmProvider::for_test(
            &asserter,
            Network::BaseSepolia,
            Arc::new(WalletPool::new(vec![], WalletPoolConfig::default())),
            NonceRegistry::new(),
        );
        let mut providers = HashMap::new();
        providers.insert(Network::SolanaDevnet, NetworkProvider::Svm(svm.clone()));
        providers.insert(Network::BaseSepolia, NetworkProvider::Evm(evm));

        let facilitator = facilitator_with(providers, None);
        let supported = facilitator.supported().await.unwrap();
        assert_eq!(supported.kinds.len(), 2);

        let svm_kind = supported
            .kinds
            .iter()
            .find(|kind| kind.network == Network::SolanaDevnet)
            .unwrap();
        let fee_payer = svm_kind.extra.as_ref().unwrap()["feePayer"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(fee_payer, svm.signer_address().to_string());

        let evm_kind = supported
            .kinds
            .iter()
            .find(|kind| kind.network == Network::BaseSepolia)
            .unwrap();
        assert!(evm_kind.extra.is_none());
    }
}
