//! Verification and settlement of exact-amount EVM payments.
//!
//! A payment is an ERC-3009 `transferWithAuthorization` signed by the payer under
//! the asset's EIP-712 domain. Verification checks the domain, signature, validity
//! window, amount, recipient, and payer balance without any state-changing call.
//! Settlement re-runs verification, borrows a wallet from the pool, assigns an
//! explicit nonce, broadcasts the transfer, and waits for the receipt.

pub mod contract;
pub mod signature;

use alloy::contract::SolCallBuilder;
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::providers::PendingTransactionBuilder;
use alloy::sol_types::{Eip712Domain, SolCall, eip712_domain};
use std::time::Duration;
use tracing::{Instrument, instrument};
use tracing_core::Level;

use crate::chain::evm::{EvmProvider, InnerProvider};
use crate::chain::{FacilitatorLocalError, NetworkProviderOps, TimingViolation};
use crate::facilitator::Facilitator;
use crate::network::USDCDeployment;
use crate::timestamp::UnixTimestamp;
use crate::types::{
    EvmAddress, EvmSignature, ExactPaymentPayload, MixedAddress, PaymentRequirements, Scheme,
    SettleRequest, SettleResponse, SupportedPaymentKind, SupportedPaymentKindsResponse,
    TransactionRef, VerifyRequest, VerifyResponse, X402Version,
};
use crate::wallet_pool::WalletLease;

use contract::{IEIP3009, VALIDATOR_6492_ADDRESS, Validator6492};
use signature::{SignedMessage, StructuredSignature};

/// Skew tolerance applied to `validAfter`: the authorization must have become
/// valid at least this many seconds ago.
const VALID_AFTER_SKEW_SECS: u64 = 6;

/// Gas allotted to a `transferWithAuthorization` call. Generous for USDC-style
/// tokens across the supported chains.
const TRANSFER_GAS_LIMIT: u64 = 150_000;

/// Ceiling on how long settlement waits for a receipt, regardless of what the
/// requirements ask for.
const MAX_RECEIPT_WAIT_SECS: u64 = 120;

/// A fully specified ERC-3009 authorization payload for EVM settlement.
#[derive(Debug, Clone)]
pub struct ExactEvmPayment {
    /// Authorized sender (`from`), an EOA or smart wallet.
    pub from: Address,
    /// Authorized recipient (`to`).
    pub to: Address,
    /// Transfer amount in token base units.
    pub value: U256,
    /// Not valid before this timestamp (inclusive).
    pub valid_after: UnixTimestamp,
    /// Not valid at/after this timestamp (exclusive).
    pub valid_before: UnixTimestamp,
    /// Unique 32-byte nonce (replay protection at the token contract).
    pub nonce: B256,
    /// Raw signature bytes as supplied by the client.
    pub signature: EvmSignature,
}

struct ValidatedPayment<'a> {
    contract: IEIP3009::IEIP3009Instance<&'a InnerProvider>,
    payment: ExactEvmPayment,
    signature: StructuredSignature,
}

impl Facilitator for EvmProvider {
    type Error = FacilitatorLocalError;

    /// Verifies an exact EVM payment against the declared requirements.
    #[instrument(skip_all, err, fields(network = %self.network()))]
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        let validated = assert_valid_payment(self, request).await?;
        Ok(VerifyResponse::valid(EvmAddress(validated.payment.from)))
    }

    /// Settles an exact EVM payment on-chain via `transferWithAuthorization`.
    #[instrument(skip_all, err, fields(network = %self.network()))]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        let validated = assert_valid_payment(self, request).await?;
        let payer: MixedAddress = EvmAddress(validated.payment.from).into();

        let lease = self.wallet_pool().acquire().await?;

        // Fresh gas gate on the acquired wallet; the pool's health view may be a
        // minute old.
        let min_balance = self.wallet_pool().config().min_native_balance;
        match self.native_balance(lease.address).await {
            Ok(balance) if balance < min_balance => {
                self.wallet_pool().release(&lease, None, false).await;
                return Err(FacilitatorLocalError::GasBalanceTooLow(self.network()));
            }
            Ok(balance) => {
                self.wallet_pool().update_balance(lease.address, balance).await;
            }
            Err(error) => {
                self.wallet_pool().release(&lease, None, false).await;
                return Err(error);
            }
        }

        let (pending, nonce) = match self.broadcast_with_retry(&validated, &lease).await {
            Ok(result) => result,
            Err(error) => {
                self.wallet_pool().release(&lease, None, false).await;
                return Err(error);
            }
        };
        let tx_hash = *pending.tx_hash();
        let tx_id = tx_hash.to_string();
        self.wallet_pool().track_pending(&lease, &tx_id, nonce).await;

        let wait = receipt_wait_budget(&request.payment_requirements);
        let receipt = pending
            .with_timeout(Some(wait))
            .get_receipt()
            .instrument(tracing::info_span!("get_receipt", transaction = %tx_hash))
            .await;

        match receipt {
            Ok(receipt) => {
                let success = receipt.status();
                self.wallet_pool()
                    .release(&lease, Some(&tx_id), success)
                    .await;
                if success {
                    tracing::event!(Level::INFO,
                        status = "ok",
                        tx = %receipt.transaction_hash,
                        "transferWithAuthorization succeeded"
                    );
                } else {
                    tracing::event!(Level::WARN,
                        status = "failed",
                        tx = %receipt.transaction_hash,
                        "transferWithAuthorization reverted"
                    );
                }
                Ok(SettleResponse {
                    success,
                    error_reason: (!success)
                        .then_some(crate::types::FacilitatorErrorReason::BlockchainTransactionFailed),
                    payer: Some(payer),
                    transaction: Some(TransactionRef::Evm(receipt.transaction_hash.0)),
                    network: self.network(),
                })
            }
            Err(error) => {
                // The transaction may still land later; the facilitator does not
                // chase orphans. Stale entries are reaped by the health check.
                self.wallet_pool()
                    .release(&lease, Some(&tx_id), false)
                    .await;
                tracing::warn!(tx = %tx_hash, error = %error, "receipt wait failed");
                Ok(SettleResponse {
                    success: false,
                    error_reason: Some(
                        crate::types::FacilitatorErrorReason::BlockchainTransactionFailed,
                    ),
                    payer: Some(payer),
                    transaction: Some(TransactionRef::Evm(tx_hash.0)),
                    network: self.network(),
                })
            }
        }
    }

    async fn supported(&self) -> Result<SupportedPaymentKindsResponse, Self::Error> {
        Ok(SupportedPaymentKindsResponse {
            kinds: vec![SupportedPaymentKind {
                x402_version: X402Version::V1,
                scheme: Scheme::Exact,
                network: self.network(),
                extra: None,
            }],
        })
    }
}

impl EvmProvider {
    /// Broadcast the transfer, re-syncing the wallet nonce and retrying when the
    /// RPC reports a nonce problem.
    async fn broadcast_with_retry(
        &self,
        validated: &ValidatedPayment<'_>,
        lease: &WalletLease,
    ) -> Result<(PendingTransactionBuilder<alloy::network::Ethereum>, u64), FacilitatorLocalError>
    {
        let retry_config = self.wallet_pool().config();
        let max_attempts = retry_config.max_retry_attempts.max(1);
        let retry_delay = retry_config.retry_delay;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let (nonce, _) = self
                .nonces()
                .next(self.inner(), lease.address)
                .await
                .map_err(|e| FacilitatorLocalError::RpcTransport(format!("{e:?}")))?;

            let gas_price = if self.is_eip1559() {
                None
            } else {
                Some(self.gas_price().await?)
            };
            let call = build_transfer_call(
                &validated.contract,
                &validated.payment,
                &validated.signature,
            )
            .configure(lease.address, nonce, gas_price);

            match call.send().await {
                Ok(pending) => {
                    tracing::info!(
                        wallet = %lease.address,
                        nonce,
                        tx = %pending.tx_hash(),
                        attempt,
                        "transfer broadcast"
                    );
                    return Ok((pending, nonce));
                }
                Err(error) => {
                    let message = format!("{error:?}");
                    if crate::nonce::is_nonce_error(&message) && attempt < max_attempts {
                        tracing::warn!(
                            wallet = %lease.address,
                            nonce,
                            attempt,
                            error = %message,
                            "nonce error on broadcast, re-syncing and retrying"
                        );
                        self.nonces()
                            .reset(self.inner(), lease.address)
                            .await
                            .map_err(|e| {
                                FacilitatorLocalError::RpcTransport(format!("{e:?}"))
                            })?;
                        tokio::time::sleep(retry_delay).await;
                        continue;
                    }
                    // The reserved nonce was never broadcast; return it so the
                    // wallet's sequence stays gap-free.
                    self.nonces().decrement(lease.address).await;
                    return Err(FacilitatorLocalError::ContractCall(message));
                }
            }
        }
    }
}

/// How long settlement may wait for a receipt: the requirements' timeout clamped
/// to a safety ceiling.
fn receipt_wait_budget(requirements: &PaymentRequirements) -> Duration {
    Duration::from_secs(requirements.max_timeout_seconds.min(MAX_RECEIPT_WAIT_SECS))
}

enum TransferCall<'a> {
    /// Bytes-signature overload, used for contract-wallet signatures.
    Bytes(SolCallBuilder<&'a &'a InnerProvider, IEIP3009::transferWithAuthorization_0Call>),
    /// Split (v, r, s) overload, used for plain EOA signatures.
    Vrs(SolCallBuilder<&'a &'a InnerProvider, IEIP3009::transferWithAuthorization_1Call>),
}

impl<'a> TransferCall<'a> {
    fn configure(self, from: Address, nonce: u64, gas_price: Option<u128>) -> Self {
        fn apply<'b, C: SolCall>(
            tx: SolCallBuilder<&'b &'b InnerProvider, C>,
            from: Address,
            nonce: u64,
            gas_price: Option<u128>,
        ) -> SolCallBuilder<&'b &'b InnerProvider, C> {
            let tx = tx.from(from).nonce(nonce).gas(TRANSFER_GAS_LIMIT);
            match gas_price {
                Some(price) => tx.gas_price(price),
                None => tx,
            }
        }
        match self {
            TransferCall::Bytes(tx) => TransferCall::Bytes(apply(tx, from, nonce, gas_price)),
            TransferCall::Vrs(tx) => TransferCall::Vrs(apply(tx, from, nonce, gas_price)),
        }
    }

    async fn send(
        self,
    ) -> Result<PendingTransactionBuilder<alloy::network::Ethereum>, alloy::contract::Error> {
        match self {
            TransferCall::Bytes(tx) => tx.send().await,
            TransferCall::Vrs(tx) => tx.send().await,
        }
    }
}

/// Pick the `transferWithAuthorization` overload matching the signature kind.
///
/// EOA signatures use the split (v, r, s) overload; contract-wallet and
/// 6492-wrapped signatures use the bytes overload with the inner signature.
fn build_transfer_call<'a>(
    contract: &'a IEIP3009::IEIP3009Instance<&'a InnerProvider>,
    payment: &ExactEvmPayment,
    structured: &StructuredSignature,
) -> TransferCall<'a> {
    let valid_after = U256::from(payment.valid_after.as_secs());
    let valid_before = U256::from(payment.valid_before.as_secs());
    match structured {
        StructuredSignature::EOA(signature) => {
            let v = 27 + u8::from(signature.v());
            let r = B256::from(signature.r());
            let s = B256::from(signature.s());
            TransferCall::Vrs(contract.transferWithAuthorization_1(
                payment.from,
                payment.to,
                payment.value,
                valid_after,
                valid_before,
                payment.nonce,
                v,
                r,
                s,
            ))
        }
        StructuredSignature::EIP1271(bytes) => TransferCall::Bytes(
            contract.transferWithAuthorization_0(
                payment.from,
                payment.to,
                payment.value,
                valid_after,
                valid_before,
                payment.nonce,
                bytes.clone(),
            ),
        ),
        StructuredSignature::EIP6492 { inner, .. } => TransferCall::Bytes(
            contract.transferWithAuthorization_0(
                payment.from,
                payment.to,
                payment.value,
                valid_after,
                valid_before,
                payment.nonce,
                inner.clone(),
            ),
        ),
    }
}

/// Runs every verification step in order; the first failure wins.
async fn assert_valid_payment<'a>(
    provider: &'a EvmProvider,
    request: &VerifyRequest,
) -> Result<ValidatedPayment<'a>, FacilitatorLocalError> {
    let payload = &request.payment_payload;
    let requirements = &request.payment_requirements;

    let evm_payload = match &payload.payload {
        ExactPaymentPayload::Evm(payload) => payload,
        ExactPaymentPayload::Svm(_) => {
            return Err(FacilitatorLocalError::PayloadMismatch(None));
        }
    };
    let payer_evm = evm_payload.authorization.from;
    let payer: MixedAddress = payer_evm.into();

    if payload.network != provider.network() {
        return Err(FacilitatorLocalError::NetworkMismatch(
            Some(payer),
            provider.network(),
            payload.network,
        ));
    }
    if requirements.network != provider.network() {
        return Err(FacilitatorLocalError::NetworkMismatch(
            Some(payer),
            provider.network(),
            requirements.network,
        ));
    }
    if payload.scheme != requirements.scheme {
        return Err(FacilitatorLocalError::SchemeMismatch(Some(payer)));
    }

    let asset_address: Address = requirements.asset.try_into().map_err(|_| {
        FacilitatorLocalError::InvalidRequirements(
            "asset is not an EVM address".to_string(),
        )
    })?;
    let contract = IEIP3009::new(asset_address, provider.inner());

    let payment = ExactEvmPayment {
        from: payer_evm.into(),
        to: evm_payload.authorization.to.into(),
        value: evm_payload.authorization.value.into(),
        valid_after: evm_payload.authorization.valid_after,
        valid_before: evm_payload.authorization.valid_before,
        nonce: B256::from(evm_payload.authorization.nonce.0),
        signature: evm_payload.signature.clone(),
    };

    // 1. Domain extraction.
    let domain = assert_domain(provider, &contract, &asset_address, requirements).await?;
    // 2. Signature recovery (with ERC-6492 unwrap).
    let structured = assert_signature(provider, payer, &payment, &domain).await?;
    // 3. Authorization window.
    assert_time(
        payer,
        payment.valid_after,
        payment.valid_before,
        provider.network().estimated_block_time_secs(),
    )?;
    // 4. Authorized amount covers the requirement.
    assert_enough_value(&payer, payment.value, requirements.max_amount_required.into())?;
    // 5. Recipient matches.
    let required_to: Address = requirements.pay_to.try_into().map_err(|_| {
        FacilitatorLocalError::InvalidRequirements("payTo is not an EVM address".to_string())
    })?;
    if payment.to != required_to {
        return Err(FacilitatorLocalError::ReceiverMismatch(
            payer,
            payment.to.to_string(),
            required_to.to_string(),
        ));
    }
    // 6. Payer balance covers the authorized value.
    assert_enough_balance(&contract, payer, payment.value).await?;

    Ok(ValidatedPayment {
        contract,
        payment,
        signature: structured,
    })
}

/// Constructs the EIP-712 domain for signature verification.
///
/// `name`/`version` resolve from `requirements.extra`, then the known USDC
/// deployment when the asset matches, then on-chain reads. If nothing yields a
/// value the requirements are unusable.
#[instrument(skip_all, err, fields(asset = %asset_address))]
async fn assert_domain(
    provider: &EvmProvider,
    contract: &IEIP3009::IEIP3009Instance<&InnerProvider>,
    asset_address: &Address,
    requirements: &PaymentRequirements,
) -> Result<Eip712Domain, FacilitatorLocalError> {
    let known = USDCDeployment::by_network(provider.network())
        .filter(|usdc| usdc.address().0 == *asset_address);

    let name = match requirements
        .extra_name()
        .or_else(|| known.map(|usdc| usdc.eip712.name.clone()))
    {
        Some(name) => name,
        None => contract
            .name()
            .call()
            .into_future()
            .instrument(tracing::info_span!("fetch_eip712_name", otel.kind = "client"))
            .await
            .map_err(|e| {
                FacilitatorLocalError::InvalidRequirements(format!(
                    "EIP-712 name unavailable: {e}"
                ))
            })?,
    };
    let version = match requirements
        .extra_version()
        .or_else(|| known.map(|usdc| usdc.eip712.version.clone()))
    {
        Some(version) => version,
        None => contract
            .version()
            .call()
            .into_future()
            .instrument(tracing::info_span!("fetch_eip712_version", otel.kind = "client"))
            .await
            .map_err(|e| {
                FacilitatorLocalError::InvalidRequirements(format!(
                    "EIP-712 version unavailable: {e}"
                ))
            })?,
    };
    Ok(eip712_domain! {
        name: name,
        version: version,
        chain_id: provider.chain().chain_id,
        verifying_contract: *asset_address,
    })
}

/// Verifies the payment signature.
///
/// EOA signatures recover offline during classification. Contract-wallet and
/// wrapped signatures are validated through the universal validator via
/// `eth_call`; any failure there means the signature cannot be accepted.
#[instrument(skip_all, err)]
async fn assert_signature(
    provider: &EvmProvider,
    payer: MixedAddress,
    payment: &ExactEvmPayment,
    domain: &Eip712Domain,
) -> Result<StructuredSignature, FacilitatorLocalError> {
    let signed = SignedMessage::extract(payment, domain)
        .map_err(|e| FacilitatorLocalError::InvalidSignature(Some(payer), e.to_string()))?;
    match &signed.signature {
        StructuredSignature::EOA(_) => Ok(signed.signature),
        StructuredSignature::EIP1271(bytes) => {
            assert_validator_accepts(provider, payer, signed.address, signed.hash, bytes.clone())
                .await?;
            Ok(signed.signature)
        }
        StructuredSignature::EIP6492 { original, .. } => {
            assert_validator_accepts(
                provider,
                payer,
                signed.address,
                signed.hash,
                original.clone(),
            )
            .await?;
            Ok(signed.signature)
        }
    }
}

async fn assert_validator_accepts(
    provider: &EvmProvider,
    payer: MixedAddress,
    signer: Address,
    hash: B256,
    signature: Bytes,
) -> Result<(), FacilitatorLocalError> {
    let validator = Validator6492::new(VALIDATOR_6492_ADDRESS, provider.inner());
    let accepted = validator
        .isValidSigWithSideEffects(signer, hash, signature)
        .call()
        .into_future()
        .instrument(tracing::info_span!("validate_contract_signature", otel.kind = "client"))
        .await
        .map_err(|e| FacilitatorLocalError::InvalidSignature(Some(payer), format!("{e}")))?;
    if accepted {
        Ok(())
    } else {
        Err(FacilitatorLocalError::InvalidSignature(
            Some(payer),
            "signature rejected by validator".to_string(),
        ))
    }
}

/// Validates the authorization window against the current time.
///
/// `validAfter` must be at least [`VALID_AFTER_SKEW_SECS`] in the past to absorb
/// clock skew, and `validBefore` must leave room for at least one block.
#[instrument(skip_all, err)]
fn assert_time(
    payer: MixedAddress,
    valid_after: UnixTimestamp,
    valid_before: UnixTimestamp,
    block_time_secs: u64,
) -> Result<(), FacilitatorLocalError> {
    let now = UnixTimestamp::now();
    if valid_after > now - VALID_AFTER_SKEW_SECS {
        return Err(FacilitatorLocalError::InvalidTiming(
            payer,
            TimingViolation::NotYetValid,
        ));
    }
    if valid_before <= now + block_time_secs {
        return Err(FacilitatorLocalError::InvalidTiming(
            payer,
            TimingViolation::Expired,
        ));
    }
    Ok(())
}

/// Verifies that the authorized `value` covers the required amount.
#[instrument(skip_all, err, fields(sent = %sent, required = %required))]
fn assert_enough_value(
    payer: &MixedAddress,
    sent: U256,
    required: U256,
) -> Result<(), FacilitatorLocalError> {
    if sent < required {
        Err(FacilitatorLocalError::InsufficientValue(*payer))
    } else {
        Ok(())
    }
}

/// Checks the payer's on-chain token balance against the authorized value.
#[instrument(skip_all, err, fields(token_contract = %contract.address()))]
async fn assert_enough_balance(
    contract: &IEIP3009::IEIP3009Instance<&InnerProvider>,
    payer: MixedAddress,
    value: U256,
) -> Result<(), FacilitatorLocalError> {
    let sender: Address = payer
        .try_into()
        .map_err(|_| FacilitatorLocalError::InvalidRequirements("payer namespace".into()))?;
    let balance = contract
        .balanceOf(sender)
        .call()
        .into_future()
        .instrument(tracing::info_span!(
            "fetch_token_balance",
            sender = %sender,
            otel.kind = "client"
        ))
        .await
        .map_err(|e| crate::chain::classify_call_error(format!("{e:?}")))?;
    if balance < value {
        Err(FacilitatorLocalError::InsufficientFunds(payer))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::nonce::NonceRegistry;
    use crate::types::{
        ExactEvmPayload, ExactEvmPayloadAuthorization, HexEncodedNonce, PaymentPayload,
        TokenAmount,
    };
    use crate::wallet_pool::{WalletPool, WalletPoolConfig};
    use alloy::providers::mock::Asserter;
    use alloy::signers::SignerSync;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::sol_types::{SolStruct, SolValue};
    use std::sync::Arc;

    const ASSET: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";
    const PAY_TO: &str = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";

    fn test_provider(asserter: &Asserter, wallets: usize) -> EvmProvider {
        let addresses: Vec<Address> = (1..=wallets)
            .map(|i| Address::repeat_byte(i as u8))
            .collect();
        EvmProvider::for_test(
            asserter,
            Network::BaseSepolia,
            Arc::new(WalletPool::new(addresses, WalletPoolConfig::default())),
            NonceRegistry::new(),
        )
    }

    fn domain() -> Eip712Domain {
        eip712_domain! {
            name: "USDC",
            version: "2",
            chain_id: 84532u64,
            verifying_contract: ASSET.parse::<Address>().unwrap(),
        }
    }

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: Network::BaseSepolia,
            max_amount_required: TokenAmount::from(1_000_000u64),
            resource: "https://api.example.com/weather".parse().unwrap(),
            description: "Weather data".into(),
            mime_type: "application/json".into(),
            output_schema: None,
            pay_to: PAY_TO.parse().unwrap(),
            max_timeout_seconds: 60,
            asset: ASSET.parse().unwrap(),
            extra: Some(serde_json::json!({"name": "USDC", "version": "2"})),
        }
    }

    fn signed_payload(
        signer: &PrivateKeySigner,
        to: &str,
        value: u64,
        valid_after: u64,
        valid_before: u64,
    ) -> PaymentPayload {
        let authorization = ExactEvmPayloadAuthorization {
            from: signer.address().into(),
            to: to.parse().unwrap(),
            value: TokenAmount::from(value),
            valid_after: UnixTimestamp::from_secs(valid_after),
            valid_before: UnixTimestamp::from_secs(valid_before),
            nonce: HexEncodedNonce([7u8; 32]),
        };
        let message = crate::types::TransferWithAuthorization {
            from: signer.address(),
            to: to.parse().unwrap(),
            value: U256::from(value),
            validAfter: U256::from(valid_after),
            validBefore: U256::from(valid_before),
            nonce: B256::from([7u8; 32]),
        };
        let hash = message.eip712_signing_hash(&domain());
        let signature = signer.sign_hash_sync(&hash).unwrap();
        PaymentPayload {
            x402_version: X402Version::V1,
            scheme: Scheme::Exact,
            network: Network::BaseSepolia,
            payload: ExactPaymentPayload::Evm(ExactEvmPayload {
                signature: EvmSignature(signature.as_bytes().to_vec().into()),
                authorization,
            }),
        }
    }

    fn push_balance(asserter: &Asserter, balance: u64) {
        asserter.push_success(&Bytes::from(U256::from(balance).abi_encode()));
    }

    fn now() -> u64 {
        UnixTimestamp::now().as_secs()
    }

    #[tokio::test]
    async fn happy_path_verifies_and_names_payer() {
        let asserter = Asserter::new();
        let provider = test_provider(&asserter, 1);
        let signer = PrivateKeySigner::random();
        let payload = signed_payload(&signer, PAY_TO, 1_000_000, 0, now() + 300);
        push_balance(&asserter, 2_000_000);

        let request = VerifyRequest {
            payment_payload: payload,
            payment_requirements: requirements(),
        };
        let response = provider.verify(&request).await.unwrap();
        assert_eq!(
            response,
            VerifyResponse::valid(EvmAddress(signer.address()))
        );
    }

    #[tokio::test]
    async fn wrong_recipient_is_rejected() {
        let asserter = Asserter::new();
        let provider = test_provider(&asserter, 1);
        let signer = PrivateKeySigner::random();
        let other_to = "0x00000000000000000000000000000000000000CC";
        let payload = signed_payload(&signer, other_to, 1_000_000, 0, now() + 300);

        let request = VerifyRequest {
            payment_payload: payload,
            payment_requirements: requirements(),
        };
        let error = provider.verify(&request).await.unwrap_err();
        assert!(matches!(
            error,
            FacilitatorLocalError::ReceiverMismatch(_, _, _)
        ));
        assert_eq!(
            error.verify_reason(),
            crate::types::FacilitatorErrorReason::InvalidExactEvmPayloadRecipientMismatch
        );
    }

    #[tokio::test]
    async fn expired_authorization_is_rejected() {
        let asserter = Asserter::new();
        let provider = test_provider(&asserter, 1);
        let signer = PrivateKeySigner::random();
        let payload = signed_payload(&signer, PAY_TO, 1_000_000, 0, now().saturating_sub(1));

        let request = VerifyRequest {
            payment_payload: payload,
            payment_requirements: requirements(),
        };
        let error = provider.verify(&request).await.unwrap_err();
        assert_eq!(
            error.verify_reason(),
            crate::types::FacilitatorErrorReason::InvalidExactEvmPayloadAuthorizationValidBefore
        );
    }

    #[tokio::test]
    async fn future_valid_after_is_rejected() {
        let asserter = Asserter::new();
        let provider = test_provider(&asserter, 1);
        let signer = PrivateKeySigner::random();
        let payload = signed_payload(&signer, PAY_TO, 1_000_000, now() + 60, now() + 300);

        let request = VerifyRequest {
            payment_payload: payload,
            payment_requirements: requirements(),
        };
        let error = provider.verify(&request).await.unwrap_err();
        assert_eq!(
            error.verify_reason(),
            crate::types::FacilitatorErrorReason::InvalidExactEvmPayloadAuthorizationValidAfter
        );
    }

    #[tokio::test]
    async fn undervalued_authorization_is_rejected() {
        let asserter = Asserter::new();
        let provider = test_provider(&asserter, 1);
        let signer = PrivateKeySigner::random();
        let payload = signed_payload(&signer, PAY_TO, 999_999, 0, now() + 300);

        let request = VerifyRequest {
            payment_payload: payload,
            payment_requirements: requirements(),
        };
        let error = provider.verify(&request).await.unwrap_err();
        assert_eq!(
            error.verify_reason(),
            crate::types::FacilitatorErrorReason::InvalidExactEvmPayloadAuthorizationValue
        );
    }

    #[tokio::test]
    async fn insufficient_balance_is_rejected() {
        let asserter = Asserter::new();
        let provider = test_provider(&asserter, 1);
        let signer = PrivateKeySigner::random();
        let payload = signed_payload(&signer, PAY_TO, 1_000_000, 0, now() + 300);
        push_balance(&asserter, 999_999);

        let request = VerifyRequest {
            payment_payload: payload,
            payment_requirements: requirements(),
        };
        let error = provider.verify(&request).await.unwrap_err();
        assert_eq!(
            error.verify_reason(),
            crate::types::FacilitatorErrorReason::InsufficientFunds
        );
    }

    #[tokio::test]
    async fn forged_signature_is_rejected() {
        let asserter = Asserter::new();
        let provider = test_provider(&asserter, 1);
        let signer = PrivateKeySigner::random();
        let forger = PrivateKeySigner::random();
        // Signed by the forger, claiming to be `signer`.
        let mut payload = signed_payload(&forger, PAY_TO, 1_000_000, 0, now() + 300);
        if let ExactPaymentPayload::Evm(evm) = &mut payload.payload {
            evm.authorization.from = signer.address().into();
        }
        // The mismatched 65-byte signature falls through to the on-chain
        // validator, which is unreachable here; that still must surface as an
        // invalid signature, not an RPC failure.
        asserter.push_failure_msg("execution reverted");

        let request = VerifyRequest {
            payment_payload: payload,
            payment_requirements: requirements(),
        };
        let error = provider.verify(&request).await.unwrap_err();
        assert_eq!(
            error.verify_reason(),
            crate::types::FacilitatorErrorReason::InvalidExactEvmPayloadSignature
        );
    }

    #[tokio::test]
    async fn verification_ignores_replayed_nonces() {
        // The facilitator does not track ERC-3009 nonces; replay protection is
        // the token contract's job. Verifying the same payload twice succeeds
        // twice.
        let asserter = Asserter::new();
        let provider = test_provider(&asserter, 1);
        let signer = PrivateKeySigner::random();
        let payload = signed_payload(&signer, PAY_TO, 1_000_000, 0, now() + 300);

        for _ in 0..2 {
            push_balance(&asserter, 2_000_000);
            let request = VerifyRequest {
                payment_payload: payload.clone(),
                payment_requirements: requirements(),
            };
            assert!(provider.verify(&request).await.unwrap().is_valid());
        }
    }

    #[tokio::test]
    async fn settle_on_exhausted_pool_fails_without_consuming_nonce() {
        let asserter = Asserter::new();
        let provider = test_provider(&asserter, 1);
        // Saturate the single wallet.
        let leases: Vec<_> = {
            let mut leases = Vec::new();
            for _ in 0..3 {
                leases.push(provider.wallet_pool().acquire().await.unwrap());
            }
            leases
        };

        let signer = PrivateKeySigner::random();
        let payload = signed_payload(&signer, PAY_TO, 1_000_000, 0, now() + 300);
        push_balance(&asserter, 2_000_000); // verification balance read

        let request = VerifyRequest {
            payment_payload: payload,
            payment_requirements: requirements(),
        };
        let error = provider.settle(&request).await.unwrap_err();
        assert_eq!(
            error.settle_reason(),
            crate::types::FacilitatorErrorReason::AllWalletsBusy
        );
        drop(leases);
    }

    #[tokio::test]
    async fn settle_gas_gate_releases_wallet() {
        let asserter = Asserter::new();
        let provider = test_provider(&asserter, 1);
        let signer = PrivateKeySigner::random();
        let payload = signed_payload(&signer, PAY_TO, 1_000_000, 0, now() + 300);
        push_balance(&asserter, 2_000_000); // verification balance read
        asserter.push_success(&U256::from(1u64)); // wallet native balance: 1 wei

        let request = VerifyRequest {
            payment_payload: payload,
            payment_requirements: requirements(),
        };
        let error = provider.settle(&request).await.unwrap_err();
        assert_eq!(
            error.settle_reason(),
            crate::types::FacilitatorErrorReason::InsufficientFacilitatorGasBalance
        );
        // The wallet went back to the pool.
        let snapshot = provider.wallet_pool().snapshot().await;
        assert_eq!(snapshot[0].pending_tx_count, 0);
    }

    #[test]
    fn time_window_boundaries() {
        let payer: MixedAddress = EvmAddress(Address::ZERO).into();
        let now = UnixTimestamp::now();
        // Became valid long ago, expires far in the future.
        assert!(assert_time(payer, now - 100, now + 100, 2).is_ok());
        // Became valid just now: inside the skew tolerance.
        assert!(matches!(
            assert_time(payer, now - 2, now + 100, 2),
            Err(FacilitatorLocalError::InvalidTiming(_, TimingViolation::NotYetValid))
        ));
        // Expires before the next block can land.
        assert!(matches!(
            assert_time(payer, now - 100, now + 2, 2),
            Err(FacilitatorLocalError::InvalidTiming(_, TimingViolation::Expired))
        ));
    }

    #[test]
    fn receipt_wait_budget_is_clamped() {
        let mut reqs = requirements();
        reqs.max_timeout_seconds = 30;
        assert_eq!(receipt_wait_budget(&reqs), Duration::from_secs(30));
        reqs.max_timeout_seconds = 600;
        assert_eq!(receipt_wait_budget(&reqs), Duration::from_secs(120));
    }
}
