//! Verification and settlement of exact-amount SVM payments.
//!
//! The client supplies a partially signed transaction whose instruction sequence
//! must be an in-order prefix of
//! `[ComputeBudget::SetUnitLimit?, ComputeBudget::SetUnitPrice?, AtaCreate?, TransferChecked]`
//! with exactly one `TransferChecked`, in last position. The facilitator checks
//! the transfer against the requirements, signs as fee payer, simulates, and for
//! settlement submits and confirms.

pub mod types;

use solana_compute_budget_interface::ID as COMPUTE_BUDGET_PROGRAM;
use solana_pubkey::Pubkey;
use solana_transaction::versioned::VersionedTransaction;
use std::time::Duration;
use tracing::instrument;

use crate::chain::svm::{SvmChainError, SvmProvider, SvmProviderLike};
use crate::chain::{FacilitatorLocalError, NetworkProviderOps};
use crate::facilitator::Facilitator;
use crate::network::Network;
use crate::types::{
    ExactPaymentPayload, MixedAddress, PaymentRequirements, Scheme, SettleRequest,
    SettleResponse, SupportedPaymentKind, SupportedPaymentKindsResponse, SvmAddress,
    TransactionRef, VerifyRequest, VerifyResponse, X402Version,
};

use types::{ATA_PROGRAM_PUBKEY, SvmIntError, TransactionInt, decode_b64_transaction};

/// Ceiling on confirmation polling, regardless of the requirements' timeout.
const MAX_CONFIRM_WAIT_SECS: u64 = 120;

/// Compute-budget instruction discriminators.
const SET_COMPUTE_UNIT_LIMIT: u8 = 2;
const SET_COMPUTE_UNIT_PRICE: u8 = 3;

impl Facilitator for SvmProvider {
    type Error = FacilitatorLocalError;

    #[instrument(skip_all, err, fields(network = %self.network()))]
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        let verified = verify_transfer(self, self.network(), request).await?;
        Ok(VerifyResponse::valid(SvmAddress(verified.payer)))
    }

    #[instrument(skip_all, err, fields(network = %self.network()))]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        settle_transfer(self, self.network(), request).await
    }

    async fn supported(&self) -> Result<SupportedPaymentKindsResponse, Self::Error> {
        let extra = serde_json::json!({
            "feePayer": self.fee_payer_pubkey().to_string(),
        });
        Ok(SupportedPaymentKindsResponse {
            kinds: vec![SupportedPaymentKind {
                x402_version: X402Version::V1,
                scheme: Scheme::Exact,
                network: self.network(),
                extra: Some(extra),
            }],
        })
    }
}

/// A verified transfer: the payer's identity and the transaction carrying the
/// facilitator's fee-payer signature.
pub struct VerifiedTransfer {
    pub payer: Pubkey,
    pub transaction: VersionedTransaction,
}

/// The `TransferChecked` fields verification cares about.
#[derive(Debug)]
struct TransferChecked {
    amount: u64,
    decimals: u8,
    source: Pubkey,
    mint: Pubkey,
    destination: Pubkey,
    authority: Pubkey,
    token_program: Pubkey,
}

/// Position-independent classification of one instruction.
enum InstructionKind {
    ComputeUnitLimit,
    ComputeUnitPrice,
    AtaCreate,
    TransferChecked,
    Other(Pubkey),
}

/// Runs the SVM verification pipeline: decode, shape, requirement checks,
/// fee-payer signature, simulation.
pub(crate) async fn verify_transfer<P: SvmProviderLike>(
    provider: &P,
    network: Network,
    request: &VerifyRequest,
) -> Result<VerifiedTransfer, FacilitatorLocalError> {
    let payload = &request.payment_payload;
    let requirements = &request.payment_requirements;

    let svm_payload = match &payload.payload {
        ExactPaymentPayload::Svm(payload) => payload,
        ExactPaymentPayload::Evm(_) => {
            return Err(FacilitatorLocalError::PayloadMismatch(None));
        }
    };
    if payload.network != network {
        return Err(FacilitatorLocalError::NetworkMismatch(
            None,
            network,
            payload.network,
        ));
    }
    if requirements.network != network {
        return Err(FacilitatorLocalError::NetworkMismatch(
            None,
            network,
            requirements.network,
        ));
    }
    if payload.scheme != requirements.scheme {
        return Err(FacilitatorLocalError::SchemeMismatch(None));
    }

    // 1. Decode.
    let transaction = decode_b64_transaction(&svm_payload.transaction)
        .map_err(|e| FacilitatorLocalError::SvmTransactionDecoding(e.to_string()))?;
    let tx = TransactionInt::new(transaction);

    // 2. Instruction shape.
    let transfer_index = assert_instruction_shape(&tx)?;
    let transfer = extract_transfer_checked(&tx, transfer_index)?;

    // The facilitator must be the fee payer and must not be moving funds.
    let fee_payer = tx.fee_payer().map_err(introspection_error)?;
    if fee_payer != provider.fee_payer_pubkey() {
        return Err(FacilitatorLocalError::SvmTransactionInvalid(
            "fee payer slot does not name the facilitator".to_string(),
        ));
    }
    if transfer.authority == provider.fee_payer_pubkey() {
        return Err(FacilitatorLocalError::SvmTransactionInvalid(
            "fee payer may not be the transfer authority".to_string(),
        ));
    }

    // 3. Asset, recipient, and decimals.
    assert_transfer_matches(provider, requirements, &tx, transfer_index, &transfer).await?;

    // 4. Amount.
    let required: u64 = requirements
        .max_amount_required
        .0
        .try_into()
        .map_err(|_| {
            FacilitatorLocalError::InvalidRequirements(
                "required amount exceeds u64 token range".to_string(),
            )
        })?;
    if transfer.amount < required {
        return Err(FacilitatorLocalError::SvmAmountMismatch(Some(
            SvmAddress(transfer.authority).into(),
        )));
    }

    // 5. Fee-payer signature.
    let payer = transfer.authority;
    let signed = tx
        .sign(provider)
        .map_err(|e| svm_chain_error(e, Some(SvmAddress(payer).into())))?;

    // 6. Simulation.
    provider
        .simulate(signed.inner())
        .await
        .map_err(|e| match e {
            SvmChainError::Simulation(message) => {
                FacilitatorLocalError::SvmSimulationFailed(message)
            }
            other => svm_chain_error(other, Some(SvmAddress(payer).into())),
        })?;

    Ok(VerifiedTransfer {
        payer,
        transaction: signed.into_inner(),
    })
}

/// Settles a verified transfer: submit, then poll for confirmation.
pub(crate) async fn settle_transfer<P: SvmProviderLike>(
    provider: &P,
    network: Network,
    request: &SettleRequest,
) -> Result<SettleResponse, FacilitatorLocalError> {
    let verified = verify_transfer(provider, network, request).await?;
    let payer: MixedAddress = SvmAddress(verified.payer).into();

    let tx = TransactionInt::new(verified.transaction);
    if !tx.is_fully_signed() {
        return Err(FacilitatorLocalError::SvmTransactionInvalid(
            "transaction is missing required signatures".to_string(),
        ));
    }

    let signature = provider
        .send(tx.inner())
        .await
        .map_err(|e| svm_chain_error(e, Some(payer)))?;

    let wait = confirm_wait_budget(&request.payment_requirements);
    let blockhash = *tx.inner().message.recent_blockhash();
    match provider.confirm(&signature, &blockhash, wait).await {
        Ok(()) => {
            tracing::info!(signature = %signature, "SVM transfer confirmed");
            Ok(SettleResponse {
                success: true,
                error_reason: None,
                payer: Some(payer),
                transaction: Some(TransactionRef::Svm(signature.to_string())),
                network,
            })
        }
        Err(SvmChainError::BlockHeightExceeded) => {
            tracing::warn!(signature = %signature, "SVM transfer expired unconfirmed");
            Err(FacilitatorLocalError::SvmBlockHeightExceeded(Some(payer)))
        }
        Err(SvmChainError::ConfirmationTimeout) => {
            tracing::warn!(signature = %signature, "SVM confirmation timed out");
            Err(FacilitatorLocalError::SvmConfirmationTimeout(Some(payer)))
        }
        Err(other) => Err(svm_chain_error(other, Some(payer))),
    }
}

fn confirm_wait_budget(requirements: &PaymentRequirements) -> Duration {
    Duration::from_secs(requirements.max_timeout_seconds.min(MAX_CONFIRM_WAIT_SECS))
}

fn introspection_error(error: SvmIntError) -> FacilitatorLocalError {
    FacilitatorLocalError::SvmTransactionInvalid(error.to_string())
}

fn svm_chain_error(error: SvmChainError, payer: Option<MixedAddress>) -> FacilitatorLocalError {
    match error {
        SvmChainError::Transport(message) => FacilitatorLocalError::RpcTransport(message),
        SvmChainError::BlockHeightExceeded => {
            FacilitatorLocalError::SvmBlockHeightExceeded(payer)
        }
        SvmChainError::ConfirmationTimeout => FacilitatorLocalError::SvmConfirmationTimeout(payer),
        SvmChainError::Simulation(message) => FacilitatorLocalError::SvmSimulationFailed(message),
        other => FacilitatorLocalError::SvmTransactionInvalid(other.to_string()),
    }
}

/// Enforce the allowed instruction sequence and return the transfer's index.
///
/// The sequence must be an in-order prefix of
/// `[SetUnitLimit?, SetUnitPrice?, AtaCreate?, TransferChecked]`; exactly one
/// `TransferChecked`, and it must come last.
fn assert_instruction_shape(tx: &TransactionInt) -> Result<usize, FacilitatorLocalError> {
    let count = tx.instruction_count();
    if count == 0 {
        return Err(FacilitatorLocalError::SvmInstructionShape(
            "transaction has no instructions".to_string(),
        ));
    }

    // Stages of the allowed sequence. Advancing past a stage after consuming it
    // makes each appear at most once and keeps the declared order; a duplicate
    // or misplaced instruction lands below the watermark and is rejected.
    const STAGE_LIMIT: u8 = 0;
    const STAGE_PRICE: u8 = 1;
    const STAGE_ATA: u8 = 2;
    const STAGE_TRANSFER: u8 = 3;
    let mut stage = STAGE_LIMIT;
    let mut transfer_index = None;

    for index in 0..count {
        let kind = classify_instruction(tx, index)?;
        let instruction_stage = match kind {
            InstructionKind::ComputeUnitLimit => STAGE_LIMIT,
            InstructionKind::ComputeUnitPrice => STAGE_PRICE,
            InstructionKind::AtaCreate => STAGE_ATA,
            InstructionKind::TransferChecked => STAGE_TRANSFER,
            InstructionKind::Other(program) => {
                return Err(FacilitatorLocalError::SvmInstructionShape(format!(
                    "unexpected program {program} at index {index}"
                )));
            }
        };
        if instruction_stage < stage {
            return Err(FacilitatorLocalError::SvmInstructionShape(format!(
                "instruction at index {index} out of order"
            )));
        }
        if matches!(kind, InstructionKind::TransferChecked) {
            transfer_index = Some(index);
        }
        stage = instruction_stage + 1;
    }

    match transfer_index {
        Some(index) if index == count - 1 => Ok(index),
        Some(_) => Err(FacilitatorLocalError::SvmInstructionShape(
            "TransferChecked must be the last instruction".to_string(),
        )),
        None => Err(FacilitatorLocalError::SvmInstructionShape(
            "missing TransferChecked instruction".to_string(),
        )),
    }
}

fn classify_instruction(
    tx: &TransactionInt,
    index: usize,
) -> Result<InstructionKind, FacilitatorLocalError> {
    let instruction = tx.instruction(index).map_err(introspection_error)?;
    let program = instruction.program_id();
    let data = instruction.data_slice();

    if program == COMPUTE_BUDGET_PROGRAM {
        return match data.first() {
            Some(&SET_COMPUTE_UNIT_LIMIT) if data.len() == 5 => {
                Ok(InstructionKind::ComputeUnitLimit)
            }
            Some(&SET_COMPUTE_UNIT_PRICE) if data.len() == 9 => {
                Ok(InstructionKind::ComputeUnitPrice)
            }
            _ => Err(FacilitatorLocalError::SvmInstructionShape(format!(
                "unsupported compute budget instruction at index {index}"
            ))),
        };
    }
    if program == ATA_PROGRAM_PUBKEY {
        // Create (empty data or discriminator 0) and CreateIdempotent (1).
        return match data.first() {
            None | Some(0) | Some(1) => Ok(InstructionKind::AtaCreate),
            _ => Err(FacilitatorLocalError::SvmInstructionShape(format!(
                "unsupported ATA instruction at index {index}"
            ))),
        };
    }
    if program == spl_token::ID || program == spl_token_2022::ID {
        return Ok(InstructionKind::TransferChecked);
    }
    Ok(InstructionKind::Other(program))
}

/// Unpack the `TransferChecked` instruction, accepting Token and Token-2022.
fn extract_transfer_checked(
    tx: &TransactionInt,
    index: usize,
) -> Result<TransferChecked, FacilitatorLocalError> {
    let instruction = tx.instruction(index).map_err(introspection_error)?;
    instruction.assert_not_empty().map_err(introspection_error)?;
    let program = instruction.program_id();
    let data = instruction.data_slice();

    let (amount, decimals) = if program == spl_token::ID {
        match spl_token::instruction::TokenInstruction::unpack(data) {
            Ok(spl_token::instruction::TokenInstruction::TransferChecked { amount, decimals }) => {
                (amount, decimals)
            }
            _ => {
                return Err(FacilitatorLocalError::SvmInstructionShape(
                    "token instruction is not TransferChecked".to_string(),
                ));
            }
        }
    } else if program == spl_token_2022::ID {
        match spl_token_2022::instruction::TokenInstruction::unpack(data) {
            Ok(spl_token_2022::instruction::TokenInstruction::TransferChecked {
                amount,
                decimals,
            }) => (amount, decimals),
            _ => {
                return Err(FacilitatorLocalError::SvmInstructionShape(
                    "token instruction is not TransferChecked".to_string(),
                ));
            }
        }
    } else {
        return Err(FacilitatorLocalError::SvmInstructionShape(
            "transfer instruction uses an unknown token program".to_string(),
        ));
    };

    // TransferChecked account order: source, mint, destination, authority.
    Ok(TransferChecked {
        amount,
        decimals,
        source: instruction.account(0).map_err(introspection_error)?,
        mint: instruction.account(1).map_err(introspection_error)?,
        destination: instruction.account(2).map_err(introspection_error)?,
        authority: instruction.account(3).map_err(introspection_error)?,
        token_program: program,
    })
}

/// Asset, recipient-ATA, decimals, and account-existence checks.
async fn assert_transfer_matches<P: SvmProviderLike>(
    provider: &P,
    requirements: &PaymentRequirements,
    tx: &TransactionInt,
    transfer_index: usize,
    transfer: &TransferChecked,
) -> Result<(), FacilitatorLocalError> {
    let required_mint: SvmAddress = requirements.asset.try_into().map_err(|_| {
        FacilitatorLocalError::InvalidRequirements("asset is not a Solana address".to_string())
    })?;
    if transfer.mint != *required_mint.pubkey() {
        return Err(FacilitatorLocalError::SvmTransactionInvalid(
            "transfer mint does not match required asset".to_string(),
        ));
    }

    let pay_to: SvmAddress = requirements.pay_to.try_into().map_err(|_| {
        FacilitatorLocalError::InvalidRequirements("payTo is not a Solana address".to_string())
    })?;
    let (expected_ata, _) = Pubkey::find_program_address(
        &[
            pay_to.as_ref(),
            transfer.token_program.as_ref(),
            transfer.mint.as_ref(),
        ],
        &ATA_PROGRAM_PUBKEY,
    );
    if transfer.destination != expected_ata {
        return Err(FacilitatorLocalError::SvmTransactionInvalid(
            "destination is not the recipient's associated token account".to_string(),
        ));
    }

    let on_chain_decimals = provider
        .get_mint_decimals(&transfer.mint)
        .await
        .map_err(|e| svm_chain_error(e, None))?;
    if transfer.decimals != on_chain_decimals {
        return Err(FacilitatorLocalError::SvmTransactionInvalid(format!(
            "transfer decimals {} do not match mint decimals {}",
            transfer.decimals, on_chain_decimals
        )));
    }

    // When the transaction does not create the destination ATA itself, both
    // source and destination must already exist.
    let creates_ata = (0..transfer_index).any(|index| {
        matches!(
            classify_instruction(tx, index),
            Ok(InstructionKind::AtaCreate)
        )
    });
    if !creates_ata {
        let accounts = provider
            .get_multiple_accounts(&[transfer.source, transfer.destination])
            .await
            .map_err(|e| svm_chain_error(e, None))?;
        if accounts.first().is_none_or(Option::is_none) {
            return Err(FacilitatorLocalError::SvmTransactionInvalid(
                "source token account does not exist".to_string(),
            ));
        }
        if accounts.get(1).is_none_or(Option::is_none) {
            return Err(FacilitatorLocalError::SvmTransactionInvalid(
                "destination token account does not exist".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExactSvmPayload, FacilitatorErrorReason, PaymentPayload, TokenAmount};
    use solana_account::Account;
    use solana_hash::Hash;
    use solana_instruction::{AccountMeta, Instruction};
    use solana_keypair::Keypair;
    use solana_message::{Message, VersionedMessage};
    use solana_signature::Signature;
    use solana_signer::Signer;
    use std::sync::Mutex;

    const SYSTEM_PROGRAM: Pubkey = solana_pubkey::pubkey!("11111111111111111111111111111111");

    /// Scripted stand-in for the RPC-backed provider.
    struct MockSvmProvider {
        keypair: Keypair,
        mint_decimals: u8,
        simulation_error: Option<String>,
        send_result: Option<Signature>,
        confirm_result: Mutex<Option<SvmChainError>>,
    }

    impl MockSvmProvider {
        fn new() -> Self {
            Self {
                keypair: Keypair::new(),
                mint_decimals: 6,
                simulation_error: None,
                send_result: Some(Signature::from([42u8; 64])),
                confirm_result: Mutex::new(None),
            }
        }
    }

    impl SvmProviderLike for MockSvmProvider {
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
            let position = tx.message.static_account_keys()[..num_required]
                .iter()
                .position(|key| *key == self.keypair.pubkey())
                .ok_or(SvmChainError::FeePayerMismatch)?;
            if tx.signatures.len() < num_required {
                tx.signatures.resize(num_required, Signature::default());
            }
            tx.signatures[position] = signature;
            Ok(tx)
        }

        async fn simulate(&self, _tx: &VersionedTransaction) -> Result<(), SvmChainError> {
            match &self.simulation_error {
                None => Ok(()),
                Some(message) => Err(SvmChainError::Simulation(message.clone())),
            }
        }

        async fn get_multiple_accounts(
            &self,
            pubkeys: &[Pubkey],
        ) -> Result<Vec<Option<Account>>, SvmChainError> {
            Ok(pubkeys.iter().map(|_| Some(Account::default())).collect())
        }

        async fn get_mint_decimals(&self, _mint: &Pubkey) -> Result<u8, SvmChainError> {
            Ok(self.mint_decimals)
        }

        async fn send(&self, _tx: &VersionedTransaction) -> Result<Signature, SvmChainError> {
            self.send_result
                .ok_or_else(|| SvmChainError::Transport("send failed".to_string()))
        }

        async fn confirm(
            &self,
            _signature: &Signature,
            _blockhash: &Hash,
            _timeout: Duration,
        ) -> Result<(), SvmChainError> {
            match self.confirm_result.lock().unwrap().take() {
                None => Ok(()),
                Some(error) => Err(error),
            }
        }

        async fn get_balance(&self, _pubkey: &Pubkey) -> Result<u64, SvmChainError> {
            Ok(1_000_000_000)
        }
    }

    struct Fixture {
        provider: MockSvmProvider,
        payer: Keypair,
        mint: Pubkey,
        pay_to: Pubkey,
        destination: Pubkey,
    }

    impl Fixture {
        fn new() -> Self {
            let provider = MockSvmProvider::new();
            let payer = Keypair::new();
            let mint = Pubkey::new_unique();
            let pay_to = Pubkey::new_unique();
            let (destination, _) = Pubkey::find_program_address(
                &[pay_to.as_ref(), spl_token::ID.as_ref(), mint.as_ref()],
                &ATA_PROGRAM_PUBKEY,
            );
            Self {
                provider,
                payer,
                mint,
                pay_to,
                destination,
            }
        }

        fn compute_limit_ix(&self) -> Instruction {
            let mut data = vec![SET_COMPUTE_UNIT_LIMIT];
            data.extend_from_slice(&200_000u32.to_le_bytes());
            Instruction {
                program_id: COMPUTE_BUDGET_PROGRAM,
                accounts: vec![],
                data,
            }
        }

        fn compute_price_ix(&self) -> Instruction {
            let mut data = vec![SET_COMPUTE_UNIT_PRICE];
            data.extend_from_slice(&1_000u64.to_le_bytes());
            Instruction {
                program_id: COMPUTE_BUDGET_PROGRAM,
                accounts: vec![],
                data,
            }
        }

        fn ata_create_ix(&self) -> Instruction {
            Instruction {
                program_id: ATA_PROGRAM_PUBKEY,
                accounts: vec![
                    AccountMeta::new(self.provider.fee_payer_pubkey(), false),
                    AccountMeta::new(self.destination, false),
                    AccountMeta::new_readonly(self.pay_to, false),
                    AccountMeta::new_readonly(self.mint, false),
                    AccountMeta::new_readonly(SYSTEM_PROGRAM, false),
                    AccountMeta::new_readonly(spl_token::ID, false),
                ],
                data: vec![],
            }
        }

        fn transfer_ix(&self, amount: u64, decimals: u8) -> Instruction {
            let source = Pubkey::new_unique();
            spl_token::instruction::transfer_checked(
                &spl_token::ID,
                &source,
                &self.mint,
                &self.destination,
                &self.payer.pubkey(),
                &[],
                amount,
                decimals,
            )
            .unwrap()
        }

        fn payload_from(&self, instructions: &[Instruction]) -> PaymentPayload {
            let message = Message::new_with_blockhash(
                instructions,
                Some(&self.provider.fee_payer_pubkey()),
                &Hash::default(),
            );
            let tx = VersionedTransaction {
                signatures: vec![
                    Signature::default();
                    message.header.num_required_signatures as usize
                ],
                message: VersionedMessage::Legacy(message),
            };
            let tx = TransactionInt::new(tx)
                .sign_with_keypair(&self.payer)
                .unwrap();
            PaymentPayload {
                x402_version: X402Version::V1,
                scheme: Scheme::Exact,
                network: Network::SolanaDevnet,
                payload: ExactPaymentPayload::Svm(ExactSvmPayload {
                    transaction: tx.as_base64(),
                }),
            }
        }

        fn requirements(&self, amount: u64) -> PaymentRequirements {
            PaymentRequirements {
                scheme: Scheme::Exact,
                network: Network::SolanaDevnet,
                max_amount_required: TokenAmount::from(amount),
                resource: "https://api.example.com/report".parse().unwrap(),
                description: "Report".into(),
                mime_type: "application/json".into(),
                output_schema: None,
                pay_to: SvmAddress(self.pay_to).into(),
                max_timeout_seconds: 60,
                asset: SvmAddress(self.mint).into(),
                extra: None,
            }
        }

        fn request(&self, instructions: &[Instruction], amount: u64) -> VerifyRequest {
            VerifyRequest {
                payment_payload: self.payload_from(instructions),
                payment_requirements: self.requirements(amount),
            }
        }
    }

    #[tokio::test]
    async fn happy_path_verifies_and_names_authority() {
        let fixture = Fixture::new();
        let request = fixture.request(
            &[
                fixture.compute_limit_ix(),
                fixture.compute_price_ix(),
                fixture.transfer_ix(1_000_000, 6),
            ],
            1_000_000,
        );
        let verified = verify_transfer(&fixture.provider, Network::SolanaDevnet, &request)
            .await
            .unwrap();
        assert_eq!(verified.payer, fixture.payer.pubkey());
        assert!(TransactionInt::new(verified.transaction).is_fully_signed());
    }

    #[tokio::test]
    async fn bare_transfer_is_a_valid_prefix() {
        let fixture = Fixture::new();
        let request = fixture.request(&[fixture.transfer_ix(1_000_000, 6)], 1_000_000);
        assert!(
            verify_transfer(&fixture.provider, Network::SolanaDevnet, &request)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn ata_create_slot_is_accepted() {
        let fixture = Fixture::new();
        let request = fixture.request(
            &[
                fixture.compute_limit_ix(),
                fixture.compute_price_ix(),
                fixture.ata_create_ix(),
                fixture.transfer_ix(1_000_000, 6),
            ],
            1_000_000,
        );
        assert!(
            verify_transfer(&fixture.provider, Network::SolanaDevnet, &request)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn transfer_must_be_last() {
        let fixture = Fixture::new();
        let request = fixture.request(
            &[fixture.transfer_ix(1_000_000, 6), fixture.compute_limit_ix()],
            1_000_000,
        );
        let error = verify_transfer(&fixture.provider, Network::SolanaDevnet, &request)
            .await
            .unwrap_err();
        assert_eq!(
            error.verify_reason(),
            FacilitatorErrorReason::InvalidExactSvmPayloadTransactionInstructions
        );
    }

    #[tokio::test]
    async fn duplicate_transfer_is_rejected() {
        let fixture = Fixture::new();
        let request = fixture.request(
            &[fixture.transfer_ix(500_000, 6), fixture.transfer_ix(500_000, 6)],
            1_000_000,
        );
        let error = verify_transfer(&fixture.provider, Network::SolanaDevnet, &request)
            .await
            .unwrap_err();
        assert_eq!(
            error.verify_reason(),
            FacilitatorErrorReason::InvalidExactSvmPayloadTransactionInstructions
        );
    }

    #[tokio::test]
    async fn unknown_program_is_rejected() {
        let fixture = Fixture::new();
        let rogue = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![AccountMeta::new(Pubkey::new_unique(), false)],
            data: vec![1, 2, 3],
        };
        let request = fixture.request(&[rogue, fixture.transfer_ix(1_000_000, 6)], 1_000_000);
        let error = verify_transfer(&fixture.provider, Network::SolanaDevnet, &request)
            .await
            .unwrap_err();
        assert_eq!(
            error.verify_reason(),
            FacilitatorErrorReason::InvalidExactSvmPayloadTransactionInstructions
        );
    }

    #[tokio::test]
    async fn amount_below_requirement_is_rejected() {
        let fixture = Fixture::new();
        let request = fixture.request(&[fixture.transfer_ix(999_999, 6)], 1_000_000);
        let error = verify_transfer(&fixture.provider, Network::SolanaDevnet, &request)
            .await
            .unwrap_err();
        assert_eq!(
            error.verify_reason(),
            FacilitatorErrorReason::InvalidExactSvmPayloadTransactionAmountMismatch
        );
    }

    #[tokio::test]
    async fn wrong_mint_is_rejected() {
        let fixture = Fixture::new();
        let mut requirements = fixture.requirements(1_000_000);
        requirements.asset = SvmAddress(Pubkey::new_unique()).into();
        let request = VerifyRequest {
            payment_payload: fixture.payload_from(&[fixture.transfer_ix(1_000_000, 6)]),
            payment_requirements: requirements,
        };
        let error = verify_transfer(&fixture.provider, Network::SolanaDevnet, &request)
            .await
            .unwrap_err();
        assert_eq!(
            error.verify_reason(),
            FacilitatorErrorReason::InvalidExactSvmPayloadTransaction
        );
    }

    #[tokio::test]
    async fn wrong_destination_ata_is_rejected() {
        let fixture = Fixture::new();
        let mut requirements = fixture.requirements(1_000_000);
        requirements.pay_to = SvmAddress(Pubkey::new_unique()).into();
        let request = VerifyRequest {
            payment_payload: fixture.payload_from(&[fixture.transfer_ix(1_000_000, 6)]),
            payment_requirements: requirements,
        };
        let error = verify_transfer(&fixture.provider, Network::SolanaDevnet, &request)
            .await
            .unwrap_err();
        assert_eq!(
            error.verify_reason(),
            FacilitatorErrorReason::InvalidExactSvmPayloadTransaction
        );
    }

    #[tokio::test]
    async fn decimals_mismatch_is_rejected() {
        let fixture = Fixture::new();
        let request = fixture.request(&[fixture.transfer_ix(1_000_000, 9)], 1_000_000);
        let error = verify_transfer(&fixture.provider, Network::SolanaDevnet, &request)
            .await
            .unwrap_err();
        assert_eq!(
            error.verify_reason(),
            FacilitatorErrorReason::InvalidExactSvmPayloadTransaction
        );
    }

    #[tokio::test]
    async fn simulation_failure_is_surfaced() {
        let mut fixture = Fixture::new();
        fixture.provider.simulation_error = Some("InstructionError(0, Custom(1))".to_string());
        let request = fixture.request(&[fixture.transfer_ix(1_000_000, 6)], 1_000_000);
        let error = verify_transfer(&fixture.provider, Network::SolanaDevnet, &request)
            .await
            .unwrap_err();
        assert_eq!(
            error.verify_reason(),
            FacilitatorErrorReason::InvalidExactSvmPayloadTransactionSimulationFailed
        );
    }

    #[tokio::test]
    async fn garbage_payload_is_rejected_as_transaction() {
        let fixture = Fixture::new();
        let request = VerifyRequest {
            payment_payload: PaymentPayload {
                x402_version: X402Version::V1,
                scheme: Scheme::Exact,
                network: Network::SolanaDevnet,
                payload: ExactPaymentPayload::Svm(ExactSvmPayload {
                    transaction: "bm90IGEgdHJhbnNhY3Rpb24=".to_string(),
                }),
            },
            payment_requirements: fixture.requirements(1_000_000),
        };
        let error = verify_transfer(&fixture.provider, Network::SolanaDevnet, &request)
            .await
            .unwrap_err();
        assert_eq!(
            error.verify_reason(),
            FacilitatorErrorReason::InvalidExactSvmPayloadTransaction
        );
    }

    #[tokio::test]
    async fn settle_confirms_and_returns_signature() {
        let fixture = Fixture::new();
        let request = fixture.request(&[fixture.transfer_ix(1_000_000, 6)], 1_000_000);
        let response = settle_transfer(&fixture.provider, Network::SolanaDevnet, &request)
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(
            response.transaction,
            Some(TransactionRef::Svm(Signature::from([42u8; 64]).to_string()))
        );
        assert_eq!(response.network, Network::SolanaDevnet);
    }

    #[tokio::test]
    async fn settle_reports_block_height_exceeded() {
        let fixture = Fixture::new();
        *fixture.provider.confirm_result.lock().unwrap() =
            Some(SvmChainError::BlockHeightExceeded);
        let request = fixture.request(&[fixture.transfer_ix(1_000_000, 6)], 1_000_000);
        let error = settle_transfer(&fixture.provider, Network::SolanaDevnet, &request)
            .await
            .unwrap_err();
        assert_eq!(
            error.settle_reason(),
            FacilitatorErrorReason::SettleExactSvmBlockHeightExceeded
        );
    }

    #[tokio::test]
    async fn settle_reports_confirmation_timeout() {
        let fixture = Fixture::new();
        *fixture.provider.confirm_result.lock().unwrap() =
            Some(SvmChainError::ConfirmationTimeout);
        let request = fixture.request(&[fixture.transfer_ix(1_000_000, 6)], 1_000_000);
        let error = settle_transfer(&fixture.provider, Network::SolanaDevnet, &request)
            .await
            .unwrap_err();
        assert_eq!(
            error.settle_reason(),
            FacilitatorErrorReason::SettleExactSvmTransactionConfirmationTimedOut
        );
    }
}
