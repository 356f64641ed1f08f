//! SVM chain provider: RPC plumbing and fee-payer signing for Solana-style networks.
//!
//! The facilitator acts as the fee payer for SVM settlements. Verification needs
//! simulation and account reads, so the provider sits behind the
//! [`SvmProviderLike`] trait which verification code and tests program against.

use solana_account::Account;
use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig};
use solana_commitment_config::CommitmentConfig;
use solana_hash::Hash;
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::{Signer, SignerError};
use solana_transaction::versioned::VersionedTransaction;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use crate::chain::NetworkProviderOps;
use crate::network::Network;
use crate::types::MixedAddress;

/// Errors from SVM RPC interaction and signing.
#[derive(Debug, thiserror::Error)]
pub enum SvmChainError {
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("simulation returned error: {0}")]
    Simulation(String),
    #[error("fee payer slot does not match facilitator signer")]
    FeePayerMismatch,
    #[error("transaction is missing required signatures")]
    NotFullySigned,
    #[error("transaction blockhash expired before confirmation")]
    BlockHeightExceeded,
    #[error("confirmation polling timed out")]
    ConfirmationTimeout,
    #[error("transaction failed on-chain: {0}")]
    TransactionFailed(String),
}

impl From<ClientError> for SvmChainError {
    fn from(error: ClientError) -> Self {
        SvmChainError::Transport(error.to_string())
    }
}

/// Operations the SVM verification and settlement pipelines need from a chain.
///
/// Implemented by [`SvmProvider`] over JSON-RPC; tests provide scripted
/// implementations.
pub trait SvmProviderLike: Send + Sync {
    /// The fee-payer public key this facilitator signs with.
    fn fee_payer_pubkey(&self) -> Pubkey;

    /// Add the facilitator's fee-payer signature to `tx`.
    ///
    /// The transaction must already name the facilitator in a required-signer
    /// slot; the client learns that address from `/supported`.
    fn sign_as_fee_payer(
        &self,
        tx: VersionedTransaction,
    ) -> Result<VersionedTransaction, SvmChainError>;

    /// Simulate `tx` without signature checks and against a fresh blockhash.
    fn simulate(
        &self,
        tx: &VersionedTransaction,
    ) -> impl Future<Output = Result<(), SvmChainError>> + Send;

    /// Fetch multiple accounts in one round trip; `None` entries are missing accounts.
    fn get_multiple_accounts(
        &self,
        pubkeys: &[Pubkey],
    ) -> impl Future<Output = Result<Vec<Option<Account>>, SvmChainError>> + Send;

    /// Decimal places of an SPL mint.
    fn get_mint_decimals(
        &self,
        mint: &Pubkey,
    ) -> impl Future<Output = Result<u8, SvmChainError>> + Send;

    /// Broadcast a fully signed transaction.
    fn send(
        &self,
        tx: &VersionedTransaction,
    ) -> impl Future<Output = Result<Signature, SvmChainError>> + Send;

    /// Poll until `signature` confirms, the blockhash expires, or `timeout` passes.
    fn confirm(
        &self,
        signature: &Signature,
        blockhash: &Hash,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), SvmChainError>> + Send;

    /// Native balance in lamports.
    fn get_balance(
        &self,
        pubkey: &Pubkey,
    ) -> impl Future<Output = Result<u64, SvmChainError>> + Send;
}

/// Provider for one SVM network.
#[derive(Clone)]
pub struct SvmProvider {
    network: Network,
    keypair: Arc<Keypair>,
    rpc_client: Arc<RpcClient>,
}

impl Debug for SvmProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvmProvider")
            .field("network", &self.network)
            .field("fee_payer", &self.keypair.pubkey())
            .field("rpc", &self.rpc_client.url())
            .finish()
    }
}

impl SvmProvider {
    pub fn try_new(
        base58_private_key: &str,
        rpc_url: String,
        network: Network,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        if network.svm_chain_reference().is_none() {
            return Err(format!("{network} is not an SVM network").into());
        }
        let keypair = Keypair::from_base58_string(base58_private_key);
        let rpc_client = RpcClient::new(rpc_url.clone());
        tracing::info!(
            network = %network,
            rpc = rpc_url,
            fee_payer = %keypair.pubkey(),
            "Initialized SVM provider"
        );
        Ok(Self {
            network,
            keypair: Arc::new(keypair),
            rpc_client: Arc::new(rpc_client),
        })
    }

    pub fn rpc_client(&self) -> Arc<RpcClient> {
        Arc::clone(&self.rpc_client)
    }
}

impl NetworkProviderOps for SvmProvider {
    fn signer_address(&self) -> MixedAddress {
        self.keypair.pubkey().into()
    }

    fn network(&self) -> Network {
        self.network
    }
}

impl SvmProviderLike for SvmProvider {
    fn fee_payer_pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    fn sign_as_fee_payer(
        &self,
        tx: VersionedTransaction,
    ) -> Result<VersionedTransaction, SvmChainError> {
        let mut tx = tx;
        let msg_bytes = tx.message.serialize();
        let signature = self.keypair.try_sign_message(msg_bytes.as_slice())?;
        let num_required = tx.message.header().num_required_signatures as usize;
        let static_keys = tx.message.static_account_keys();
        let position = static_keys[..num_required.min(static_keys.len())]
            .iter()
            .position(|key| *key == self.keypair.pubkey())
            .ok_or(SvmChainError::FeePayerMismatch)?;
        if tx.signatures.len() < num_required {
            tx.signatures.resize(num_required, Signature::default());
        }
        tx.signatures[position] = signature;
        Ok(tx)
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<(), SvmChainError> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: true,
            commitment: Some(CommitmentConfig::confirmed()),
            ..RpcSimulateTransactionConfig::default()
        };
        let simulation = self
            .rpc_client
            .simulate_transaction_with_config(tx, config)
            .await?;
        match simulation.value.err {
            None => Ok(()),
            Some(error) => Err(SvmChainError::Simulation(format!("{error:?}"))),
        }
    }

    async fn get_multiple_accounts(
        &self,
        pubkeys: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, SvmChainError> {
        let accounts = self.rpc_client.get_multiple_accounts(pubkeys).await?;
        Ok(accounts)
    }

    async fn get_mint_decimals(&self, mint: &Pubkey) -> Result<u8, SvmChainError> {
        let supply = self.rpc_client.get_token_supply(mint).await?;
        Ok(supply.decimals)
    }

    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, SvmChainError> {
        let signature = self
            .rpc_client
            .send_transaction_with_config(
                tx,
                RpcSendTransactionConfig {
                    skip_preflight: true,
                    ..RpcSendTransactionConfig::default()
                },
            )
            .await?;
        Ok(signature)
    }

    async fn confirm(
        &self,
        signature: &Signature,
        blockhash: &Hash,
        timeout: Duration,
    ) -> Result<(), SvmChainError> {
        let commitment = CommitmentConfig::confirmed();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let confirmed = self
                .rpc_client
                .confirm_transaction_with_commitment(signature, commitment)
                .await?;
            if confirmed.value {
                return Ok(());
            }
            // Not confirmed: distinguish an expired blockhash from slow inclusion.
            let blockhash_valid = self
                .rpc_client
                .is_blockhash_valid(blockhash, commitment)
                .await?;
            if !blockhash_valid {
                return Err(SvmChainError::BlockHeightExceeded);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SvmChainError::ConfirmationTimeout);
            }
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
    }

    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, SvmChainError> {
        let lamports = self.rpc_client.get_balance(pubkey).await?;
        Ok(lamports)
    }
}
