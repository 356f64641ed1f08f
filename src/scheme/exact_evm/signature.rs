//! Signature parsing for ERC-3009 payment authorization.
//!
//! Clients sign `TransferWithAuthorization` typed data in one of three forms:
//! a plain EOA signature, an EIP-1271 contract-wallet signature, or an ERC-6492
//! wrapped signature for a not-yet-deployed wallet. The wrapper must be removed
//! before recovery; the magic suffix identifies it.

use alloy::primitives::{Address, B256, Bytes, Signature, U256, hex};
use alloy::sol_types::{Eip712Domain, SolStruct, SolType};

use super::ExactEvmPayment;
use super::contract::Sig6492;
use crate::types::TransferWithAuthorization;

/// The fixed 32-byte magic suffix defined by [ERC-6492](https://eips.ethereum.org/EIPS/eip-6492).
///
/// Any signature ending with this constant is treated as a wrapped signature; the
/// preceding bytes ABI-decode as `(address factory, bytes factoryCalldata, bytes innerSig)`.
const EIP6492_MAGIC_SUFFIX: [u8; 32] =
    hex!("6492649264926492649264926492649264926492649264926492649264926492");

/// Canonical data required to verify a signature.
#[derive(Debug, Clone)]
pub struct SignedMessage {
    /// Expected signer (an EOA or contract wallet).
    pub address: Address,
    /// 32-byte EIP-712 digest that was signed.
    pub hash: B256,
    /// Classified signature.
    pub signature: StructuredSignature,
}

impl SignedMessage {
    /// Compute the EIP-712 digest for `payment` under `domain` and classify the
    /// attached signature bytes.
    pub fn extract(
        payment: &ExactEvmPayment,
        domain: &Eip712Domain,
    ) -> Result<Self, StructuredSignatureFormatError> {
        let transfer_with_authorization = TransferWithAuthorization {
            from: payment.from,
            to: payment.to,
            value: payment.value,
            validAfter: U256::from(payment.valid_after.as_secs()),
            validBefore: U256::from(payment.valid_before.as_secs()),
            nonce: payment.nonce,
        };
        let eip712_hash = transfer_with_authorization.eip712_signing_hash(domain);
        let signature = StructuredSignature::try_from_bytes(
            payment.signature.clone(),
            payment.from,
            &eip712_hash,
        )?;
        Ok(Self {
            address: payment.from,
            hash: eip712_hash,
            signature,
        })
    }
}

/// A structured representation of an Ethereum signature.
///
/// Normalizes the three supported cases:
/// - **EOA**: recovered offline against the expected signer.
/// - **ERC-6492 wrapped**: counterfactual contract wallets; carries deployment
///   metadata plus the inner signature.
/// - **EIP-1271**: plain contract-wallet signature blobs.
#[derive(Debug, Clone)]
pub enum StructuredSignature {
    /// An ERC-6492 wrapped signature.
    EIP6492 {
        /// Factory contract that can deploy the wallet deterministically.
        factory: Address,
        /// Calldata to invoke on the factory (often a CREATE2 deployment).
        factory_calldata: Bytes,
        /// Inner signature for the wallet itself, probably EIP-1271.
        inner: Bytes,
        /// Full original bytes including the wrapper and magic suffix.
        original: Bytes,
    },
    /// Normalized EOA signature.
    #[allow(clippy::upper_case_acronyms)]
    EOA(Signature),
    /// A plain EIP-1271 signature (no 6492 wrapper).
    EIP1271(Bytes),
}

/// Errors from parsing a structured signature.
#[derive(Debug, thiserror::Error)]
pub enum StructuredSignatureFormatError {
    /// The ERC-6492 wrapper could not be decoded.
    #[error("invalid ERC-6492 wrapper: {0}")]
    InvalidEIP6492Format(alloy::sol_types::Error),
    /// The signature was empty.
    #[error("empty signature")]
    Empty,
}

impl StructuredSignature {
    /// Classify raw signature bytes.
    ///
    /// The 6492 suffix is checked first; the inner bytes of a wrapper may
    /// themselves be an EOA signature (pre-deployment EOA-controlled wallets),
    /// which still recovers offline. A 64/65-byte blob that fails to recover the
    /// expected signer is treated as EIP-1271 rather than rejected here, leaving
    /// the final word to the on-chain validator.
    pub fn try_from_bytes(
        bytes: crate::types::EvmSignature,
        expected_signer: Address,
        prehash: &B256,
    ) -> Result<Self, StructuredSignatureFormatError> {
        let bytes: Bytes = bytes.0;
        if bytes.is_empty() {
            return Err(StructuredSignatureFormatError::Empty);
        }
        let is_eip6492 = bytes.len() >= 32 && bytes[bytes.len() - 32..] == EIP6492_MAGIC_SUFFIX;
        let signature = if is_eip6492 {
            let body = &bytes[..bytes.len() - 32];
            let sig6492 = Sig6492::abi_decode_params(body)
                .map_err(StructuredSignatureFormatError::InvalidEIP6492Format)?;
            StructuredSignature::EIP6492 {
                factory: sig6492.factory,
                factory_calldata: sig6492.factoryCalldata,
                inner: sig6492.innerSig,
                original: bytes,
            }
        } else {
            let eoa_signature = if bytes.len() == 65 {
                Signature::from_raw(&bytes).ok().map(Signature::normalized_s)
            } else if bytes.len() == 64 {
                Some(Signature::from_erc2098(&bytes).normalized_s())
            } else {
                None
            };
            match eoa_signature {
                None => StructuredSignature::EIP1271(bytes),
                Some(s) => {
                    let is_expected_signer = s
                        .recover_address_from_prehash(prehash)
                        .ok()
                        .is_some_and(|recovered| recovered == expected_signer);
                    if is_expected_signer {
                        StructuredSignature::EOA(s)
                    } else {
                        StructuredSignature::EIP1271(bytes)
                    }
                }
            }
        };
        Ok(signature)
    }
}
