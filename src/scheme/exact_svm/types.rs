//! Transaction introspection helpers for the SVM exact scheme.
//!
//! SVM payment payloads arrive as base64 bincode-serialized versioned
//! transactions. [`TransactionInt`] and [`InstructionInt`] wrap them with
//! bounds-checked access to instructions and their account references, which the
//! verifier uses to enforce the allowed instruction shape.

use solana_message::compiled_instruction::CompiledInstruction;
use solana_pubkey::{Pubkey, pubkey};
use solana_signature::Signature;
#[cfg(test)]
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;

use crate::chain::svm::{SvmChainError, SvmProviderLike};
use crate::util::Base64Bytes;

/// SPL Associated Token Account program.
pub const ATA_PROGRAM_PUBKEY: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Decode a base64 string into a versioned transaction.
pub fn decode_b64_transaction(encoded: &str) -> Result<VersionedTransaction, SvmIntError> {
    let bytes = Base64Bytes::from(encoded)
        .decode()
        .map_err(|e| SvmIntError::TransactionDecoding(e.to_string()))?;
    bincode::deserialize::<VersionedTransaction>(bytes.as_slice())
        .map_err(|e| SvmIntError::TransactionDecoding(e.to_string()))
}

/// A transaction plus the helpers verification needs.
pub struct TransactionInt {
    inner: VersionedTransaction,
}

impl TransactionInt {
    pub fn new(transaction: VersionedTransaction) -> Self {
        Self { inner: transaction }
    }

    pub fn inner(&self) -> &VersionedTransaction {
        &self.inner
    }

    pub fn into_inner(self) -> VersionedTransaction {
        self.inner
    }

    pub fn instruction_count(&self) -> usize {
        self.inner.message.instructions().len()
    }

    pub fn instruction(&self, index: usize) -> Result<InstructionInt, SvmIntError> {
        let instruction = self
            .inner
            .message
            .instructions()
            .get(index)
            .cloned()
            .ok_or(SvmIntError::NoInstructionAtIndex(index))?;
        let account_keys = self.inner.message.static_account_keys().to_vec();
        Ok(InstructionInt {
            index,
            instruction,
            account_keys,
        })
    }

    /// The fee payer: the first static account key.
    pub fn fee_payer(&self) -> Result<Pubkey, SvmIntError> {
        self.inner
            .message
            .static_account_keys()
            .first()
            .copied()
            .ok_or(SvmIntError::NoAccountAtIndex(0))
    }

    /// Every required signer slot holds a non-default signature.
    pub fn is_fully_signed(&self) -> bool {
        let num_required = self.inner.message.header().num_required_signatures as usize;
        if self.inner.signatures.len() < num_required {
            return false;
        }
        let default = Signature::default();
        self.inner
            .signatures
            .iter()
            .all(|signature| !default.eq(signature))
    }

    /// Add the facilitator's fee-payer signature.
    pub fn sign<P: SvmProviderLike>(self, provider: &P) -> Result<Self, SvmChainError> {
        let tx = provider.sign_as_fee_payer(self.inner)?;
        Ok(Self { inner: tx })
    }

    /// Sign with an arbitrary keypair, placing the signature at the signer's
    /// required-signer position. Used by tests to act as the paying client.
    #[cfg(test)]
    pub fn sign_with_keypair<S: Signer>(self, signer: &S) -> Result<Self, SvmIntError> {
        let mut tx = self.inner;
        let msg_bytes = tx.message.serialize();
        let signature = signer
            .try_sign_message(msg_bytes.as_slice())
            .map_err(|e| SvmIntError::Signing(e.to_string()))?;
        let num_required = tx.message.header().num_required_signatures as usize;
        let static_keys = tx.message.static_account_keys();
        let position = static_keys[..num_required.min(static_keys.len())]
            .iter()
            .position(|key| *key == signer.pubkey())
            .ok_or(SvmIntError::Signing("signer not in required signers".into()))?;
        if tx.signatures.len() < num_required {
            tx.signatures.resize(num_required, Signature::default());
        }
        tx.signatures[position] = signature;
        Ok(Self { inner: tx })
    }

    /// Serialize back to the wire encoding.
    #[cfg(test)]
    pub fn as_base64(&self) -> String {
        let bytes = bincode::serialize(&self.inner).expect("transaction serializes");
        Base64Bytes::encode(bytes).as_str().into_owned()
    }
}

/// One compiled instruction with resolved account keys.
pub struct InstructionInt {
    index: usize,
    instruction: CompiledInstruction,
    account_keys: Vec<Pubkey>,
}

impl InstructionInt {
    pub fn data_slice(&self) -> &[u8] {
        self.instruction.data.as_slice()
    }

    pub fn assert_not_empty(&self) -> Result<(), SvmIntError> {
        if self.instruction.accounts.is_empty() {
            return Err(SvmIntError::EmptyInstructionAtIndex(self.index));
        }
        Ok(())
    }

    pub fn program_id(&self) -> Pubkey {
        *self.instruction.program_id(self.account_keys.as_slice())
    }

    /// Resolve the instruction's `index`-th account reference.
    pub fn account(&self, index: u8) -> Result<Pubkey, SvmIntError> {
        let account_index = self
            .instruction
            .accounts
            .get(index as usize)
            .copied()
            .ok_or(SvmIntError::NoAccountAtIndex(index))?;
        self.account_keys
            .get(account_index as usize)
            .copied()
            .ok_or(SvmIntError::NoAccountAtIndex(index))
    }
}

/// Errors from transaction introspection.
#[derive(Debug, thiserror::Error)]
pub enum SvmIntError {
    #[error("cannot decode transaction: {0}")]
    TransactionDecoding(String),
    #[error("instruction at index {0} not found")]
    NoInstructionAtIndex(usize),
    #[error("no account at index {0}")]
    NoAccountAtIndex(u8),
    #[error("empty instruction at index {0}")]
    EmptyInstructionAtIndex(usize),
    #[error("signing failed: {0}")]
    Signing(String),
}
