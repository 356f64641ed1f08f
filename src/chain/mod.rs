//! Blockchain providers for payment verification and settlement.
//!
//! Two families are supported:
//!
//! - **EVM** ([`evm`]): EIP-155 chains settled through ERC-3009
//!   `transferWithAuthorization`, signed by a pool of facilitator wallets.
//! - **SVM** ([`svm`]): Solana-style chains settled by co-signing a
//!   client-constructed SPL transfer as the fee payer.
//!
//! [`NetworkProvider`] wraps the family-specific providers behind one
//! [`Facilitator`](crate::facilitator::Facilitator) implementation, and
//! [`FacilitatorLocalError`] is the internal error currency that maps onto the
//! wire-level reason taxonomy.

pub mod evm;
pub mod svm;

use crate::facilitator::Facilitator;
use crate::network::Network;
use crate::types::{
    FacilitatorErrorReason, MixedAddress, SettleRequest, SettleResponse,
    SupportedPaymentKindsResponse, VerifyRequest, VerifyResponse,
};
use crate::wallet_pool::WalletAcquireError;

/// Which bound of the authorization window was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingViolation {
    /// `validAfter` is still in the future (with skew tolerance).
    NotYetValid,
    /// `validBefore` leaves no room for on-chain inclusion.
    Expired,
}

/// Errors raised while verifying or settling a payment.
///
/// Where the payer identity is known it travels with the error so failed
/// responses can still name the payer.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorLocalError {
    #[error("payload scheme does not match requirements")]
    SchemeMismatch(Option<MixedAddress>),
    #[error("network mismatch: provider serves {1}, request names {2}")]
    NetworkMismatch(Option<MixedAddress>, Network, Network),
    #[error("network not supported by this facilitator")]
    UnsupportedNetwork(Option<MixedAddress>),
    #[error("network {0} is not in the allow-list")]
    NetworkNotAllowed(Network),
    #[error("payload family does not match the network")]
    PayloadMismatch(Option<MixedAddress>),
    #[error("invalid payment requirements: {0}")]
    InvalidRequirements(String),
    #[error("authorization window violation")]
    InvalidTiming(MixedAddress, TimingViolation),
    #[error("invalid signature: {1}")]
    InvalidSignature(Option<MixedAddress>, String),
    #[error("recipient mismatch: authorized {1}, required {2}")]
    ReceiverMismatch(MixedAddress, String, String),
    #[error("payer balance below required amount")]
    InsufficientFunds(MixedAddress),
    #[error("authorized value below required amount")]
    InsufficientValue(MixedAddress),
    #[error("RPC transport failure: {0}")]
    RpcTransport(String),
    #[error("contract call failed: {0}")]
    ContractCall(String),
    #[error("facilitator wallet gas balance below threshold on {0}")]
    GasBalanceTooLow(Network),
    #[error(transparent)]
    WalletUnavailable(#[from] WalletAcquireError),
    #[error("cannot decode SVM transaction: {0}")]
    SvmTransactionDecoding(String),
    #[error("unexpected SVM instruction sequence: {0}")]
    SvmInstructionShape(String),
    #[error("SVM transaction does not satisfy requirements: {0}")]
    SvmTransactionInvalid(String),
    #[error("SVM transfer amount below required amount")]
    SvmAmountMismatch(Option<MixedAddress>),
    #[error("SVM transaction simulation failed: {0}")]
    SvmSimulationFailed(String),
    #[error("SVM transaction expired before confirmation (block height exceeded)")]
    SvmBlockHeightExceeded(Option<MixedAddress>),
    #[error("SVM transaction confirmation timed out")]
    SvmConfirmationTimeout(Option<MixedAddress>),
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl FacilitatorLocalError {
    /// The payer identity attached to this error, when one was established.
    pub fn payer(&self) -> Option<MixedAddress> {
        match self {
            FacilitatorLocalError::SchemeMismatch(payer)
            | FacilitatorLocalError::NetworkMismatch(payer, _, _)
            | FacilitatorLocalError::UnsupportedNetwork(payer)
            | FacilitatorLocalError::PayloadMismatch(payer)
            | FacilitatorLocalError::InvalidSignature(payer, _)
            | FacilitatorLocalError::SvmAmountMismatch(payer)
            | FacilitatorLocalError::SvmBlockHeightExceeded(payer)
            | FacilitatorLocalError::SvmConfirmationTimeout(payer) => *payer,
            FacilitatorLocalError::InvalidTiming(payer, _)
            | FacilitatorLocalError::ReceiverMismatch(payer, _, _)
            | FacilitatorLocalError::InsufficientFunds(payer)
            | FacilitatorLocalError::InsufficientValue(payer) => Some(*payer),
            _ => None,
        }
    }

    fn reason(&self) -> FacilitatorErrorReason {
        match self {
            FacilitatorLocalError::SchemeMismatch(_) => FacilitatorErrorReason::InvalidScheme,
            FacilitatorLocalError::NetworkMismatch(_, _, _)
            | FacilitatorLocalError::UnsupportedNetwork(_) => {
                FacilitatorErrorReason::InvalidNetwork
            }
            FacilitatorLocalError::NetworkNotAllowed(_) => {
                FacilitatorErrorReason::NetworkNotAllowed
            }
            FacilitatorLocalError::PayloadMismatch(_) => FacilitatorErrorReason::InvalidPayload,
            FacilitatorLocalError::InvalidRequirements(_) => {
                FacilitatorErrorReason::InvalidPaymentRequirements
            }
            FacilitatorLocalError::InvalidTiming(_, TimingViolation::NotYetValid) => {
                FacilitatorErrorReason::InvalidExactEvmPayloadAuthorizationValidAfter
            }
            FacilitatorLocalError::InvalidTiming(_, TimingViolation::Expired) => {
                FacilitatorErrorReason::InvalidExactEvmPayloadAuthorizationValidBefore
            }
            FacilitatorLocalError::InvalidSignature(_, _) => {
                FacilitatorErrorReason::InvalidExactEvmPayloadSignature
            }
            FacilitatorLocalError::ReceiverMismatch(_, _, _) => {
                FacilitatorErrorReason::InvalidExactEvmPayloadRecipientMismatch
            }
            FacilitatorLocalError::InsufficientFunds(_) => {
                FacilitatorErrorReason::InsufficientFunds
            }
            FacilitatorLocalError::InsufficientValue(_) => {
                FacilitatorErrorReason::InvalidExactEvmPayloadAuthorizationValue
            }
            FacilitatorLocalError::RpcTransport(_) => FacilitatorErrorReason::RpcConnectionFailed,
            FacilitatorLocalError::ContractCall(_) => {
                FacilitatorErrorReason::BlockchainTransactionFailed
            }
            FacilitatorLocalError::GasBalanceTooLow(_) => {
                FacilitatorErrorReason::InsufficientFacilitatorGasBalance
            }
            FacilitatorLocalError::WalletUnavailable(WalletAcquireError::NoWalletsConfigured) => {
                FacilitatorErrorReason::NoWalletsConfigured
            }
            FacilitatorLocalError::WalletUnavailable(WalletAcquireError::AllBusy) => {
                FacilitatorErrorReason::AllWalletsBusy
            }
            // Unhealthy means below the gas threshold at the last observation.
            FacilitatorLocalError::WalletUnavailable(WalletAcquireError::AllUnhealthy) => {
                FacilitatorErrorReason::InsufficientFacilitatorGasBalance
            }
            FacilitatorLocalError::SvmTransactionDecoding(_)
            | FacilitatorLocalError::SvmTransactionInvalid(_) => {
                FacilitatorErrorReason::InvalidExactSvmPayloadTransaction
            }
            FacilitatorLocalError::SvmInstructionShape(_) => {
                FacilitatorErrorReason::InvalidExactSvmPayloadTransactionInstructions
            }
            FacilitatorLocalError::SvmAmountMismatch(_) => {
                FacilitatorErrorReason::InvalidExactSvmPayloadTransactionAmountMismatch
            }
            FacilitatorLocalError::SvmSimulationFailed(_) => {
                FacilitatorErrorReason::InvalidExactSvmPayloadTransactionSimulationFailed
            }
            FacilitatorLocalError::SvmBlockHeightExceeded(_) => {
                FacilitatorErrorReason::SettleExactSvmBlockHeightExceeded
            }
            FacilitatorLocalError::SvmConfirmationTimeout(_) => {
                FacilitatorErrorReason::SettleExactSvmTransactionConfirmationTimedOut
            }
            FacilitatorLocalError::Unexpected(_) => FacilitatorErrorReason::UnexpectedVerifyError,
        }
    }

    /// The wire reason for a failed verification.
    pub fn verify_reason(&self) -> FacilitatorErrorReason {
        self.reason()
    }

    /// The wire reason for a failed settlement.
    pub fn settle_reason(&self) -> FacilitatorErrorReason {
        match self {
            FacilitatorLocalError::Unexpected(_) => FacilitatorErrorReason::UnexpectedSettleError,
            _ => self.reason(),
        }
    }
}

/// Classify a chain call failure by message: connection-level problems map to
/// `rpc_connection_failed`, everything else to `blockchain_transaction_failed`.
pub fn classify_call_error(message: String) -> FacilitatorLocalError {
    const TRANSPORT_FRAGMENTS: &[&str] = &[
        "connection",
        "connect",
        "timeout",
        "timed out",
        "dns",
        "transport",
        "hyper",
    ];
    let lowered = message.to_ascii_lowercase();
    if TRANSPORT_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
    {
        FacilitatorLocalError::RpcTransport(message)
    } else {
        FacilitatorLocalError::ContractCall(message)
    }
}

/// Common operations exposed by every network provider.
pub trait NetworkProviderOps {
    /// The signer identity advertised for this network (pool primary on EVM,
    /// fee payer on SVM).
    fn signer_address(&self) -> MixedAddress;

    /// The network this provider serves.
    fn network(&self) -> Network;
}

/// A provider bound to one configured network, either family.
#[derive(Clone)]
pub enum NetworkProvider {
    Evm(evm::EvmProvider),
    Svm(svm::SvmProvider),
}

impl NetworkProviderOps for NetworkProvider {
    fn signer_address(&self) -> MixedAddress {
        match self {
            NetworkProvider::Evm(provider) => provider.signer_address(),
            NetworkProvider::Svm(provider) => provider.signer_address(),
        }
    }

    fn network(&self) -> Network {
        match self {
            NetworkProvider::Evm(provider) => provider.network(),
            NetworkProvider::Svm(provider) => provider.network(),
        }
    }
}

impl Facilitator for NetworkProvider {
    type Error = FacilitatorLocalError;

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        match self {
            NetworkProvider::Evm(provider) => provider.verify(request).await,
            NetworkProvider::Svm(provider) => provider.verify(request).await,
        }
    }

    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        match self {
            NetworkProvider::Evm(provider) => provider.settle(request).await,
            NetworkProvider::Svm(provider) => provider.settle(request).await,
        }
    }

    async fn supported(&self) -> Result<SupportedPaymentKindsResponse, Self::Error> {
        match self {
            NetworkProvider::Evm(provider) => provider.supported().await,
            NetworkProvider::Svm(provider) => provider.supported().await,
        }
    }
}
