use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer as EthersSigner};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Eip1559TransactionRequest, TransactionRequest, U256};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::ExecutionError;

use super::Quote;

/// Signs a fully-specified EVM transaction for relay submission. Implementations
/// hold the operator's private key in memory for the process lifetime; key *custody*
/// (HSM, encrypted vault) is out of scope.
#[async_trait]
pub trait EvmSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign(&self, tx: TypedTransaction) -> Result<Vec<u8>, ExecutionError>;
}

/// A `LocalWallet`-backed signer, the idiomatic `ethers` way to hold a raw private key.
pub struct LocalEvmSigner {
    wallet: LocalWallet,
}

impl LocalEvmSigner {
    pub fn from_hex_key(hex_key: &str, chain_id: u64) -> Result<Self, ExecutionError> {
        let wallet: LocalWallet = hex_key
            .parse::<LocalWallet>()
            .map_err(|e| ExecutionError::Rpc(format!("invalid EVM signer key: {e}")))?;
        Ok(Self { wallet: wallet.with_chain_id(chain_id) })
    }
}

#[async_trait]
impl EvmSigner for LocalEvmSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign(&self, tx: TypedTransaction) -> Result<Vec<u8>, ExecutionError> {
        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| ExecutionError::Rpc(format!("EVM signing failed: {e}")))?;
        Ok(tx.rlp_signed(&signature).to_vec())
    }
}

fn decimal_to_u256_wei(amount: Decimal) -> U256 {
    // Gas/fee quantities here are already expressed in wei-scale integers by the
    // quote oracle; truncate any sub-wei remainder rather than round.
    let truncated = amount.trunc();
    U256::from(truncated.to_u128().unwrap_or(0))
}

/// Builds and signs one attempt of a mirror swap, escalating gas on retries per
/// the reference infrastructure's fee-bump idiom: EIP-1559 quotes get
/// `max_fee_per_gas = base_fee * 2^attempt`, legacy quotes get `gas_price` doubled
/// per attempt.
pub async fn sign_with_escalation(signer: &dyn EvmSigner, quote: &Quote, attempt: u32) -> Result<Vec<u8>, ExecutionError> {
    let multiplier = Decimal::from(2u64.saturating_pow(attempt));
    let to: Address = quote
        .target
        .parse()
        .map_err(|e| ExecutionError::Rpc(format!("invalid quote target address: {e}")))?;
    let value = decimal_to_u256_wei(quote.value);

    let tx: TypedTransaction = if let Some(base_fee) = quote.base_fee {
        let max_fee_per_gas = decimal_to_u256_wei(base_fee * multiplier);
        Eip1559TransactionRequest::new()
            .to(to)
            .value(value)
            .data(quote.calldata.clone())
            .max_fee_per_gas(max_fee_per_gas)
            .chain_id(quote.chain_id)
            .into()
    } else {
        let gas_price = quote
            .gas_price
            .map(|gp| decimal_to_u256_wei(gp * multiplier))
            .unwrap_or_default();
        TransactionRequest::new()
            .to(to)
            .value(value)
            .data(quote.calldata.clone())
            .gas_price(gas_price)
            .chain_id(quote.chain_id)
            .into()
    };

    signer.sign(tx).await
}
