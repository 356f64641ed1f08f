//! Type definitions for the x402 protocol.
//!
//! This mirrors the structures and validation logic from the official x402 SDKs.
//! The key objects are `PaymentPayload`, `PaymentRequirements`, `VerifyResponse`, and
//! `SettleResponse`, which encode payment intent, authorization, and the result of
//! verification/settlement.
//!
//! EVM payments use ERC-3009 authorization (EIP-712 typed signatures); SVM payments
//! carry a base64-serialized, partially-signed transaction. Serialization follows the
//! wire format consumed by external x402 clients.

use alloy::primitives::{Bytes, U256};
use alloy::{hex, sol};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use solana_pubkey::Pubkey;
use std::fmt;
use std::fmt::{Debug, Display};
use std::str::FromStr;
use url::Url;

use crate::network::Network;
use crate::timestamp::UnixTimestamp;

/// Represents the protocol version. Currently only version 1 is supported.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum X402Version {
    /// Version `1`.
    V1,
}

impl Serialize for X402Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            X402Version::V1 => serializer.serialize_u8(1),
        }
    }
}

impl Display for X402Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            X402Version::V1 => write!(f, "1"),
        }
    }
}

#[derive(Debug)]
pub struct X402VersionError(pub u8);

impl Display for X402VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unsupported x402Version: {}", self.0)
    }
}

impl std::error::Error for X402VersionError {}

impl TryFrom<u8> for X402Version {
    type Error = X402VersionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(X402Version::V1),
            _ => Err(X402VersionError(value)),
        }
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        X402Version::try_from(num).map_err(serde::de::Error::custom)
    }
}

/// Enumerates payment schemes. Only "exact" is supported in this implementation,
/// meaning the transferred amount must satisfy the declared requirement exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// An EVM signature over ERC-3009 `TransferWithAuthorization` typed data.
///
/// Serialized as a 0x-prefixed hex string. The byte length is deliberately not
/// constrained here: 64/65-byte EOA signatures, EIP-1271 contract signature blobs,
/// and ERC-6492 wrapped signatures are all carried through this type and
/// classified during verification.
#[derive(Clone, PartialEq, Eq)]
pub struct EvmSignature(pub Bytes);

impl From<Bytes> for EvmSignature {
    fn from(bytes: Bytes) -> Self {
        EvmSignature(bytes)
    }
}

impl Debug for EvmSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvmSignature({})", self.0)
    }
}

impl EvmSignature {
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<'de> Deserialize<'de> for EvmSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static SIG_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^0x([0-9a-fA-F]{2})*$").expect("Invalid regex for EVM signature")
        });

        if !SIG_REGEX.is_match(&s) {
            return Err(serde::de::Error::custom(
                "Invalid EVM signature format: must be 0x-prefixed hex",
            ));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| serde::de::Error::custom("Failed to decode EVM signature hex string"))?;
        Ok(EvmSignature(bytes.into()))
    }
}

impl Serialize for EvmSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(&self.0)))
    }
}

/// Represents an EVM address.
///
/// Wrapper around `alloy::primitives::Address`, providing display/serialization support.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct EvmAddress(pub alloy::primitives::Address);

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to decode EVM address")]
pub struct EvmAddressDecodingError;

impl FromStr for EvmAddress {
    type Err = EvmAddressDecodingError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address =
            alloy::primitives::Address::from_str(s).map_err(|_| EvmAddressDecodingError)?;
        Ok(Self(address))
    }
}

impl From<EvmAddress> for alloy::primitives::Address {
    fn from(address: EvmAddress) -> Self {
        address.0
    }
}

impl From<alloy::primitives::Address> for EvmAddress {
    fn from(address: alloy::primitives::Address) -> Self {
        EvmAddress(address)
    }
}

/// A Solana account address, base58-encoded on the wire.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub struct SvmAddress(pub Pubkey);

impl SvmAddress {
    pub fn pubkey(&self) -> &Pubkey {
        &self.0
    }
}

impl Display for SvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Pubkey> for SvmAddress {
    fn from(pubkey: Pubkey) -> Self {
        SvmAddress(pubkey)
    }
}

impl From<SvmAddress> for Pubkey {
    fn from(address: SvmAddress) -> Self {
        address.0
    }
}

impl AsRef<[u8]> for SvmAddress {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to decode Solana address")]
pub struct SvmAddressDecodingError;

impl FromStr for SvmAddress {
    type Err = SvmAddressDecodingError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pubkey = Pubkey::from_str(s).map_err(|_| SvmAddressDecodingError)?;
        Ok(Self(pubkey))
    }
}

impl Serialize for SvmAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for SvmAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Represents a 32-byte random nonce, hex-encoded with 0x prefix.
/// Must be exactly 64 hex characters long.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct HexEncodedNonce(pub [u8; 32]);

impl Debug for HexEncodedNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexEncodedNonce(0x{})", hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for HexEncodedNonce {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static NONCE_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("Invalid nonce regex"));

        if !NONCE_REGEX.is_match(&s) {
            return Err(serde::de::Error::custom("Invalid nonce format"));
        }

        let bytes =
            hex::decode(&s[2..]).map_err(|_| serde::de::Error::custom("Invalid hex in nonce"))?;

        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid length for nonce"))?;

        Ok(HexEncodedNonce(array))
    }
}

impl Serialize for HexEncodedNonce {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

/// A precise on-chain token amount in base units (e.g., USDC with 6 decimals).
///
/// Represented as a stringified non-negative decimal integer in JSON to prevent
/// precision loss; bounded by `U256`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub U256);

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid token amount: expected non-negative decimal integer")]
pub struct TokenAmountParseError;

impl FromStr for TokenAmount {
    type Err = TokenAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TokenAmountParseError);
        }
        let value = U256::from_str_radix(s, 10).map_err(|_| TokenAmountParseError)?;
        Ok(TokenAmount(value))
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An address in the namespace of either supported chain family.
///
/// The wire format is a plain string; parsing tries the EVM form first and falls
/// back to a base58 Solana public key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MixedAddress {
    Evm(EvmAddress),
    Svm(SvmAddress),
}

impl From<EvmAddress> for MixedAddress {
    fn from(address: EvmAddress) -> Self {
        MixedAddress::Evm(address)
    }
}

impl From<alloy::primitives::Address> for MixedAddress {
    fn from(value: alloy::primitives::Address) -> Self {
        MixedAddress::Evm(value.into())
    }
}

impl From<SvmAddress> for MixedAddress {
    fn from(address: SvmAddress) -> Self {
        MixedAddress::Svm(address)
    }
}

impl From<Pubkey> for MixedAddress {
    fn from(value: Pubkey) -> Self {
        MixedAddress::Svm(value.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MixedAddressError {
    #[error("Not an EVM address")]
    NotEvmAddress,
    #[error("Not a Solana address")]
    NotSvmAddress,
    #[error("Invalid address format")]
    InvalidAddressFormat,
}

impl TryFrom<MixedAddress> for EvmAddress {
    type Error = MixedAddressError;

    fn try_from(value: MixedAddress) -> Result<Self, Self::Error> {
        match value {
            MixedAddress::Evm(address) => Ok(address),
            MixedAddress::Svm(_) => Err(MixedAddressError::NotEvmAddress),
        }
    }
}

impl TryFrom<MixedAddress> for alloy::primitives::Address {
    type Error = MixedAddressError;

    fn try_from(value: MixedAddress) -> Result<Self, Self::Error> {
        let evm: EvmAddress = value.try_into()?;
        Ok(evm.into())
    }
}

impl TryFrom<MixedAddress> for SvmAddress {
    type Error = MixedAddressError;

    fn try_from(value: MixedAddress) -> Result<Self, Self::Error> {
        match value {
            MixedAddress::Svm(address) => Ok(address),
            MixedAddress::Evm(_) => Err(MixedAddressError::NotSvmAddress),
        }
    }
}

impl Display for MixedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MixedAddress::Evm(address) => write!(f, "{address}"),
            MixedAddress::Svm(address) => write!(f, "{address}"),
        }
    }
}

impl FromStr for MixedAddress {
    type Err = MixedAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(address) = EvmAddress::from_str(s) {
            return Ok(MixedAddress::Evm(address));
        }
        if let Ok(address) = SvmAddress::from_str(s) {
            return Ok(MixedAddress::Svm(address));
        }
        Err(MixedAddressError::InvalidAddressFormat)
    }
}

impl<'de> Deserialize<'de> for MixedAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for MixedAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Reference to a confirmed on-chain transaction: a 32-byte hash on EVM networks,
/// a base58 signature on SVM networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRef {
    Evm([u8; 32]),
    Svm(String),
}

impl Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionRef::Evm(hash) => write!(f, "0x{}", hex::encode(hash)),
            TransactionRef::Svm(signature) => write!(f, "{signature}"),
        }
    }
}

impl Serialize for TransactionRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TransactionRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        static TX_HASH_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid regex"));

        if TX_HASH_REGEX.is_match(&s) {
            let bytes = hex::decode(s.trim_start_matches("0x"))
                .map_err(|_| serde::de::Error::custom("Invalid hex in transaction hash"))?;
            let array: [u8; 32] = bytes
                .try_into()
                .map_err(|_| serde::de::Error::custom("Transaction hash must be 32 bytes"))?;
            Ok(TransactionRef::Evm(array))
        } else if !s.is_empty() {
            Ok(TransactionRef::Svm(s))
        } else {
            Err(serde::de::Error::custom("Empty transaction reference"))
        }
    }
}

/// EIP-712 structured data for ERC-3009-based authorization.
/// Defines who can transfer how much and when.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayloadAuthorization {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
}

/// Full payload required to authorize an ERC-3009 transfer:
/// includes the signature and the EIP-712 struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    pub signature: EvmSignature,
    pub authorization: ExactEvmPayloadAuthorization,
}

/// SVM payment payload: a base64-serialized, partially-signed transaction with
/// the payer signature present and the fee-payer slot left for the facilitator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactSvmPayload {
    pub transaction: String,
}

/// The scheme-specific payload inside a [`PaymentPayload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExactPaymentPayload {
    Evm(ExactEvmPayload),
    Svm(ExactSvmPayload),
}

impl ExactPaymentPayload {
    /// The payer identity encoded in the payload, when statically known.
    ///
    /// EVM payloads carry the payer as `authorization.from`; for SVM payloads the
    /// payer is only known after transaction introspection.
    pub fn payer_hint(&self) -> Option<MixedAddress> {
        match self {
            ExactPaymentPayload::Evm(payload) => Some(payload.authorization.from.into()),
            ExactPaymentPayload::Svm(_) => None,
        }
    }
}

/// Describes a signed request to transfer a specific amount of funds on-chain.
/// Includes the scheme, network, and signed payload contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    pub payload: ExactPaymentPayload,
}

/// Requirements set by the payment-gated endpoint for an acceptable payment.
/// This includes the required amount, recipient, asset, network, and metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: Network,
    pub max_amount_required: TokenAmount,
    pub resource: Url,
    pub description: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    pub pay_to: MixedAddress,
    pub max_timeout_seconds: u64,
    pub asset: MixedAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl PaymentRequirements {
    /// EIP-712 domain name carried in `extra`, if present.
    pub fn extra_name(&self) -> Option<String> {
        self.extra
            .as_ref()
            .and_then(|e| e.get("name")?.as_str().map(str::to_string))
    }

    /// EIP-712 domain version carried in `extra`, if present.
    pub fn extra_version(&self) -> Option<String> {
        self.extra
            .as_ref()
            .and_then(|e| e.get("version")?.as_str().map(str::to_string))
    }
}

/// Wrapper for a payment payload and requirements sent by the client to a facilitator
/// to be verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

impl VerifyRequest {
    pub fn network(&self) -> Network {
        self.payment_payload.network
    }
}

/// Wrapper for a payment payload and requirements sent by the client
/// to be used for settlement.
pub type SettleRequest = VerifyRequest;

/// Machine-readable reasons returned in failed verify/settle responses.
///
/// The serialized names are part of the wire contract and consumed by client SDKs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum FacilitatorErrorReason {
    // Validation
    #[error("invalid_x402_version")]
    #[serde(rename = "invalid_x402_version")]
    InvalidX402Version,
    #[error("invalid_scheme")]
    #[serde(rename = "invalid_scheme")]
    InvalidScheme,
    #[error("invalid_network")]
    #[serde(rename = "invalid_network")]
    InvalidNetwork,
    #[error("invalid_payload")]
    #[serde(rename = "invalid_payload")]
    InvalidPayload,
    #[error("invalid_payment_requirements")]
    #[serde(rename = "invalid_payment_requirements")]
    InvalidPaymentRequirements,
    #[error("network_not_allowed")]
    #[serde(rename = "network_not_allowed")]
    NetworkNotAllowed,

    // Semantic
    #[error("payment_expired")]
    #[serde(rename = "payment_expired")]
    PaymentExpired,
    #[error("insufficient_funds")]
    #[serde(rename = "insufficient_funds")]
    InsufficientFunds,
    #[error("invalid_payment")]
    #[serde(rename = "invalid_payment")]
    InvalidPayment,
    #[error("invalid_transaction_state")]
    #[serde(rename = "invalid_transaction_state")]
    InvalidTransactionState,

    // EVM signature and authorization
    #[error("invalid_exact_evm_payload_signature")]
    #[serde(rename = "invalid_exact_evm_payload_signature")]
    InvalidExactEvmPayloadSignature,
    #[error("invalid_exact_evm_payload_authorization_valid_after")]
    #[serde(rename = "invalid_exact_evm_payload_authorization_valid_after")]
    InvalidExactEvmPayloadAuthorizationValidAfter,
    #[error("invalid_exact_evm_payload_authorization_valid_before")]
    #[serde(rename = "invalid_exact_evm_payload_authorization_valid_before")]
    InvalidExactEvmPayloadAuthorizationValidBefore,
    #[error("invalid_exact_evm_payload_authorization_value")]
    #[serde(rename = "invalid_exact_evm_payload_authorization_value")]
    InvalidExactEvmPayloadAuthorizationValue,
    #[error("invalid_exact_evm_payload_recipient_mismatch")]
    #[serde(rename = "invalid_exact_evm_payload_recipient_mismatch")]
    InvalidExactEvmPayloadRecipientMismatch,

    // SVM structural
    #[error("invalid_exact_svm_payload_transaction")]
    #[serde(rename = "invalid_exact_svm_payload_transaction")]
    InvalidExactSvmPayloadTransaction,
    #[error("invalid_exact_svm_payload_transaction_instructions")]
    #[serde(rename = "invalid_exact_svm_payload_transaction_instructions")]
    InvalidExactSvmPayloadTransactionInstructions,
    #[error("invalid_exact_svm_payload_transaction_amount_mismatch")]
    #[serde(rename = "invalid_exact_svm_payload_transaction_amount_mismatch")]
    InvalidExactSvmPayloadTransactionAmountMismatch,
    #[error("invalid_exact_svm_payload_transaction_simulation_failed")]
    #[serde(rename = "invalid_exact_svm_payload_transaction_simulation_failed")]
    InvalidExactSvmPayloadTransactionSimulationFailed,

    // Settlement / RPC
    #[error("rpc_connection_failed")]
    #[serde(rename = "rpc_connection_failed")]
    RpcConnectionFailed,
    #[error("blockchain_transaction_failed")]
    #[serde(rename = "blockchain_transaction_failed")]
    BlockchainTransactionFailed,
    #[error("settle_exact_svm_block_height_exceeded")]
    #[serde(rename = "settle_exact_svm_block_height_exceeded")]
    SettleExactSvmBlockHeightExceeded,
    #[error("settle_exact_svm_transaction_confirmation_timed_out")]
    #[serde(rename = "settle_exact_svm_transaction_confirmation_timed_out")]
    SettleExactSvmTransactionConfirmationTimedOut,
    #[error("insufficient_facilitator_gas_balance")]
    #[serde(rename = "insufficient_facilitator_gas_balance")]
    InsufficientFacilitatorGasBalance,
    #[error("all_wallets_busy")]
    #[serde(rename = "all_wallets_busy")]
    AllWalletsBusy,
    #[error("no_wallets_configured")]
    #[serde(rename = "no_wallets_configured")]
    NoWalletsConfigured,

    // Unknown
    #[error("unexpected_verify_error")]
    #[serde(rename = "unexpected_verify_error")]
    UnexpectedVerifyError,
    #[error("unexpected_settle_error")]
    #[serde(rename = "unexpected_settle_error")]
    UnexpectedSettleError,
}

/// Result returned by a facilitator after verifying a [`PaymentPayload`] against the
/// provided [`PaymentRequirements`].
///
/// Indicates whether the payment authorization is valid and identifies the payer.
/// If invalid, it includes a reason describing why verification failed.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyResponse {
    /// The payload matches the requirements and passes all checks.
    Valid { payer: MixedAddress },
    /// The payload was well-formed but failed verification for the given reason.
    /// `payer` is absent when the payer identity could not be established.
    Invalid {
        reason: FacilitatorErrorReason,
        payer: Option<MixedAddress>,
    },
}

impl VerifyResponse {
    pub fn valid<A: Into<MixedAddress>>(payer: A) -> Self {
        VerifyResponse::Valid {
            payer: payer.into(),
        }
    }

    pub fn invalid(payer: Option<MixedAddress>, reason: FacilitatorErrorReason) -> Self {
        VerifyResponse::Invalid { reason, payer }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResponse::Valid { .. })
    }

    pub fn payer(&self) -> Option<MixedAddress> {
        match self {
            VerifyResponse::Valid { payer } => Some(*payer),
            VerifyResponse::Invalid { payer, .. } => *payer,
        }
    }
}

// The `payer` field is always present on the wire, empty when unknown.
impl Serialize for VerifyResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            VerifyResponse::Valid { payer } => {
                let mut s = serializer.serialize_struct("VerifyResponse", 2)?;
                s.serialize_field("isValid", &true)?;
                s.serialize_field("payer", &payer.to_string())?;
                s.end()
            }
            VerifyResponse::Invalid { reason, payer } => {
                let mut s = serializer.serialize_struct("VerifyResponse", 3)?;
                s.serialize_field("isValid", &false)?;
                s.serialize_field("invalidReason", reason)?;
                let payer = payer.map(|p| p.to_string()).unwrap_or_default();
                s.serialize_field("payer", &payer)?;
                s.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            is_valid: bool,
            payer: String,
            #[serde(default)]
            invalid_reason: Option<FacilitatorErrorReason>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let payer = if raw.payer.is_empty() {
            None
        } else {
            Some(
                raw.payer
                    .parse::<MixedAddress>()
                    .map_err(serde::de::Error::custom)?,
            )
        };

        match (raw.is_valid, raw.invalid_reason) {
            (true, None) => {
                let payer = payer
                    .ok_or_else(|| serde::de::Error::custom("`payer` required when valid"))?;
                Ok(VerifyResponse::Valid { payer })
            }
            (false, Some(reason)) => Ok(VerifyResponse::Invalid { payer, reason }),
            (true, Some(_)) => Err(serde::de::Error::custom(
                "`invalidReason` must be absent when `isValid` is true",
            )),
            (false, None) => Err(serde::de::Error::custom(
                "`invalidReason` must be present when `isValid` is false",
            )),
        }
    }
}

/// Returned from a facilitator after attempting to settle a payment on-chain.
/// Indicates success/failure, the transaction reference, and payer identity.
#[derive(Debug, Clone, PartialEq)]
pub struct SettleResponse {
    pub success: bool,
    pub error_reason: Option<FacilitatorErrorReason>,
    pub payer: Option<MixedAddress>,
    pub transaction: Option<TransactionRef>,
    pub network: Network,
}

// `payer` and `transaction` are always present on the wire, empty on failure.
impl Serialize for SettleResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = if self.error_reason.is_some() { 5 } else { 4 };
        let mut s = serializer.serialize_struct("SettleResponse", fields)?;
        s.serialize_field("success", &self.success)?;
        if let Some(reason) = &self.error_reason {
            s.serialize_field("errorReason", reason)?;
        }
        let payer = self.payer.map(|p| p.to_string()).unwrap_or_default();
        s.serialize_field("payer", &payer)?;
        let transaction = self
            .transaction
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        s.serialize_field("transaction", &transaction)?;
        s.serialize_field("network", &self.network)?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for SettleResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            success: bool,
            #[serde(default)]
            error_reason: Option<FacilitatorErrorReason>,
            payer: String,
            transaction: String,
            network: Network,
        }

        let raw = Raw::deserialize(deserializer)?;
        let payer = if raw.payer.is_empty() {
            None
        } else {
            Some(
                raw.payer
                    .parse::<MixedAddress>()
                    .map_err(serde::de::Error::custom)?,
            )
        };
        let transaction = if raw.transaction.is_empty() {
            None
        } else {
            serde_json::from_value(serde_json::Value::String(raw.transaction))
                .map_err(serde::de::Error::custom)?
        };
        Ok(SettleResponse {
            success: raw.success,
            error_reason: raw.error_reason,
            payer,
            transaction,
            network: raw.network,
        })
    }
}

/// A single entry of the `/supported` listing: a (version, scheme, network) triple
/// this facilitator can settle, with optional scheme-specific metadata such as the
/// SVM fee-payer address.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKindsResponse {
    pub kinds: Vec<SupportedPaymentKind>,
}

/// A simple error structure returned on unexpected or fatal server errors.
/// Used when no structured protocol-level response is appropriate.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

/// Metadata required to identify a token in EIP-712 typed data signatures.
///
/// These values must match exactly what the token contract returns from `name()` and
/// `version()`; they feed the EIP-712 domain separator when verifying
/// `transferWithAuthorization` signatures.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TokenDeploymentEip712 {
    pub name: String,
    pub version: String,
}

/// A fungible token identified by its address and network, used for selecting or
/// matching assets across chains (e.g., USDC on Base).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TokenAsset {
    pub address: EvmAddress,
    pub network: Network,
}

/// A specific deployed ERC-20 token instance, including the metadata needed for
/// EIP-712 signing.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TokenDeployment {
    pub asset: TokenAsset,
    pub decimals: u8,
    pub eip712: TokenDeploymentEip712,
}

impl TokenDeployment {
    pub fn address(&self) -> EvmAddress {
        self.asset.address
    }

    pub fn network(&self) -> Network {
        self.asset.network
    }
}

sol!(
    /// Solidity-compatible struct definition for ERC-3009 `transferWithAuthorization`.
    ///
    /// This matches the EIP-3009 format used in EIP-712 typed data:
    /// it defines the authorization to transfer tokens from `from` to `to`
    /// for a specific `value`, valid only between `validAfter` and `validBefore`
    /// and identified by a unique `nonce`.
    ///
    /// This struct is primarily used to reconstruct the typed data domain/message
    /// when verifying a client's signature.
    #[derive(Serialize, Deserialize)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    fn evm_payload_json() -> serde_json::Value {
        serde_json::json!({
            "x402Version": 1,
            "scheme": "exact",
            "network": "base-sepolia",
            "payload": {
                "signature": format!("0x{}", "11".repeat(65)),
                "authorization": {
                    "from": "0x857b06519E91e3A54538791bDbb0E22373e36b66",
                    "to": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
                    "value": "1000000",
                    "validAfter": "0",
                    "validBefore": "1999999999",
                    "nonce": format!("0x{}", "01".repeat(32)),
                }
            }
        })
    }

    #[test]
    fn parses_evm_payment_payload() {
        let payload: PaymentPayload = serde_json::from_value(evm_payload_json()).unwrap();
        assert_eq!(payload.scheme, Scheme::Exact);
        assert_eq!(payload.network, Network::BaseSepolia);
        match &payload.payload {
            ExactPaymentPayload::Evm(evm) => {
                assert_eq!(evm.authorization.value, TokenAmount::from(1_000_000u64));
                assert_eq!(evm.signature.as_slice().len(), 65);
            }
            ExactPaymentPayload::Svm(_) => panic!("expected EVM payload"),
        }
    }

    #[test]
    fn parses_svm_payment_payload() {
        let json = serde_json::json!({
            "x402Version": 1,
            "scheme": "exact",
            "network": "solana-devnet",
            "payload": { "transaction": "AQID" }
        });
        let payload: PaymentPayload = serde_json::from_value(json).unwrap();
        match &payload.payload {
            ExactPaymentPayload::Svm(svm) => assert_eq!(svm.transaction, "AQID"),
            ExactPaymentPayload::Evm(_) => panic!("expected SVM payload"),
        }
    }

    #[test]
    fn rejects_unknown_scheme_and_version() {
        let mut json = evm_payload_json();
        json["scheme"] = "upto".into();
        assert!(serde_json::from_value::<PaymentPayload>(json).is_err());

        let mut json = evm_payload_json();
        json["x402Version"] = 2.into();
        assert!(serde_json::from_value::<PaymentPayload>(json).is_err());
    }

    #[test]
    fn token_amount_is_decimal_string() {
        let amount: TokenAmount = serde_json::from_str("\"1000000\"").unwrap();
        assert_eq!(amount, TokenAmount(U256::from(1_000_000u64)));
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"1000000\"");
        assert!(serde_json::from_str::<TokenAmount>("\"0x10\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"-5\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"\"").is_err());
    }

    #[test]
    fn token_amount_accepts_max_u256() {
        let max = U256::MAX.to_string();
        let amount: TokenAmount = max.parse().unwrap();
        assert_eq!(amount.0, U256::MAX);
    }

    #[test]
    fn signature_accepts_wrapped_lengths() {
        // 65-byte EOA
        let eoa = format!("\"0x{}\"", "ab".repeat(65));
        let sig: EvmSignature = serde_json::from_str(&eoa).unwrap();
        assert_eq!(sig.as_slice().len(), 65);
        // Longer 6492-style blob
        let wrapped = format!("\"0x{}\"", "cd".repeat(300));
        let sig: EvmSignature = serde_json::from_str(&wrapped).unwrap();
        assert_eq!(sig.as_slice().len(), 300);
        // Odd-length hex is malformed
        assert!(serde_json::from_str::<EvmSignature>("\"0xabc\"").is_err());
        assert!(serde_json::from_str::<EvmSignature>("\"abcd\"").is_err());
    }

    #[test]
    fn mixed_address_parses_both_namespaces() {
        let evm: MixedAddress = "0x857b06519E91e3A54538791bDbb0E22373e36b66".parse().unwrap();
        assert!(matches!(evm, MixedAddress::Evm(_)));
        let svm: MixedAddress = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
            .parse()
            .unwrap();
        assert!(matches!(svm, MixedAddress::Svm(_)));
        assert!("not an address!".parse::<MixedAddress>().is_err());
    }

    #[test]
    fn verify_response_wire_shape() {
        let payer: MixedAddress = "0x857b06519E91e3A54538791bDbb0E22373e36b66".parse().unwrap();
        let valid = VerifyResponse::valid(payer);
        let json = serde_json::to_value(&valid).unwrap();
        assert_eq!(json["isValid"], true);
        assert_eq!(json["payer"], "0x857b06519E91e3A54538791bDbb0E22373e36b66");
        assert!(json.get("invalidReason").is_none());

        let invalid = VerifyResponse::invalid(None, FacilitatorErrorReason::InvalidScheme);
        let json = serde_json::to_value(&invalid).unwrap();
        assert_eq!(json["isValid"], false);
        assert_eq!(json["invalidReason"], "invalid_scheme");
        assert_eq!(json["payer"], "");
    }

    #[test]
    fn settle_response_failure_carries_empty_transaction() {
        let response = SettleResponse {
            success: false,
            error_reason: Some(FacilitatorErrorReason::AllWalletsBusy),
            payer: None,
            transaction: None,
            network: Network::Base,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errorReason"], "all_wallets_busy");
        assert_eq!(json["transaction"], "");
        assert_eq!(json["network"], "base");
    }

    #[test]
    fn settle_response_round_trips() {
        let response = SettleResponse {
            success: true,
            error_reason: None,
            payer: Some("0x857b06519E91e3A54538791bDbb0E22373e36b66".parse().unwrap()),
            transaction: Some(TransactionRef::Evm([7u8; 32])),
            network: Network::BaseSepolia,
        };
        let json = serde_json::to_string(&response).unwrap();
        let back: SettleResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn error_reasons_serialize_to_taxonomy_strings() {
        let cases = [
            (
                FacilitatorErrorReason::InvalidExactEvmPayloadAuthorizationValidBefore,
                "invalid_exact_evm_payload_authorization_valid_before",
            ),
            (
                FacilitatorErrorReason::SettleExactSvmBlockHeightExceeded,
                "settle_exact_svm_block_height_exceeded",
            ),
            (
                FacilitatorErrorReason::InsufficientFacilitatorGasBalance,
                "insufficient_facilitator_gas_balance",
            ),
            (FacilitatorErrorReason::AllWalletsBusy, "all_wallets_busy"),
        ];
        for (reason, expected) in cases {
            assert_eq!(
                serde_json::to_value(reason).unwrap(),
                serde_json::Value::String(expected.to_string())
            );
            assert_eq!(reason.to_string(), expected);
        }
    }

    #[test]
    fn requirements_extra_accessors() {
        let requirements = PaymentRequirements {
            scheme: Scheme::Exact,
            network: Network::BaseSepolia,
            max_amount_required: TokenAmount::from(1_000_000u64),
            resource: "https://api.example.com/weather".parse().unwrap(),
            description: "Weather data".into(),
            mime_type: "application/json".into(),
            output_schema: None,
            pay_to: "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".parse().unwrap(),
            max_timeout_seconds: 60,
            asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".parse().unwrap(),
            extra: Some(serde_json::json!({"name": "USDC", "version": "2"})),
        };
        assert_eq!(requirements.extra_name().as_deref(), Some("USDC"));
        assert_eq!(requirements.extra_version().as_deref(), Some("2"));
    }
}
