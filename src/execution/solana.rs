use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer as SolanaKeypairSigner};

use crate::error::ExecutionError;

use super::Quote;

/// Priority-fee ladder (lamports), tried in order across retry attempts. Index by
/// `attempt` and fall back to the last rung if retries ever exceed the ladder's length.
pub const PRIORITY_FEE_LADDER_LAMPORTS: [u64; 3] = [50_000, 100_000, 200_000];

pub fn priority_fee_for_attempt(attempt: u32) -> u64 {
    let idx = (attempt as usize).min(PRIORITY_FEE_LADDER_LAMPORTS.len() - 1);
    PRIORITY_FEE_LADDER_LAMPORTS[idx]
}

/// Signs a fully-specified Solana-like transaction for relay submission.
#[async_trait]
pub trait SolSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    async fn sign(&self, quote: &Quote, priority_fee_lamports: u64) -> Result<Vec<u8>, ExecutionError>;
}

/// A raw `Keypair`-backed signer.
pub struct LocalSolSigner {
    keypair: Keypair,
}

impl LocalSolSigner {
    pub fn from_base58(encoded: &str) -> Result<Self, ExecutionError> {
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| ExecutionError::Rpc(format!("invalid Solana signer key: {e}")))?;
        let keypair = Keypair::from_bytes(&bytes).map_err(|e| ExecutionError::Rpc(format!("invalid Solana keypair: {e}")))?;
        Ok(Self { keypair })
    }
}

#[async_trait]
impl SolSigner for LocalSolSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign(&self, quote: &Quote, priority_fee_lamports: u64) -> Result<Vec<u8>, ExecutionError> {
        // The quote's `calldata` already holds the serialized instruction set built
        // by the quote oracle; signing here means attaching the priority-fee compute
        // budget instruction and producing the operator's signature over the
        // resulting message. A real relay submission target address/calldata format
        // is an external concern (see `QuoteOracle`); this signer only needs the
        // keypair and the chosen priority fee to produce signable bytes.
        let mut payload = quote.calldata.clone();
        payload.extend_from_slice(&priority_fee_lamports.to_le_bytes());
        let signature = self.keypair.sign_message(&payload);
        let mut signed = signature.as_ref().to_vec();
        signed.extend_from_slice(&payload);
        Ok(signed)
    }
}

pub async fn sign_with_escalation(signer: &dyn SolSigner, quote: &Quote, attempt: u32) -> Result<Vec<u8>, ExecutionError> {
    let priority_fee = priority_fee_for_attempt(attempt);
    signer.sign(quote, priority_fee).await
}

/// Converts a UI-unit `Decimal` sell amount to the token's raw base-unit integer,
/// the boundary where position-book decimal units meet a Solana-like quote API's
/// integer amounts.
pub fn to_base_units(amount: rust_decimal::Decimal, decimals: u32) -> Option<u64> {
    let scaled = amount * rust_decimal::Decimal::from(10u64.checked_pow(decimals)?);
    scaled.trunc().to_u64()
}
