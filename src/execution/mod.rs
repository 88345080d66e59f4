pub mod evm;
pub mod solana;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::error::ExecutionError;
use crate::position::Position;
use crate::quote_cache::QuoteCache;
use crate::types::{Chain, TradeEvent};

pub type TxId = String;

const DEFAULT_SLIPPAGE_BPS: u32 = 40; // 0.40%
const SLIPPAGE_REJECT_THRESHOLD_PCT: Decimal = Decimal::from_parts(40, 0, 0, false, 2); // 0.40

/// A priced, fully-specified swap ready to sign. Chain-agnostic: EVM fields
/// (`max_fee_per_gas`, `base_fee`, `gas_price`) are `None` for a Solana-like quote
/// and vice versa for any Solana-specific fields (there are none yet).
#[derive(Debug, Clone)]
pub struct Quote {
    pub target: String,
    pub calldata: Vec<u8>,
    pub value: Decimal,
    pub max_fee_per_gas: Option<Decimal>,
    pub base_fee: Option<Decimal>,
    pub gas_price: Option<Decimal>,
    pub chain_id: u64,
    pub price: Decimal,
    pub guaranteed_price: Option<Decimal>,
    pub price_impact_pct: Decimal,
    pub out_amount: Decimal,
    pub in_amount: Decimal,
}

impl Quote {
    pub fn effective_price(&self) -> Decimal {
        self.guaranteed_price.unwrap_or(self.price)
    }
}

/// External price/route source. `get_quote` is the lightweight form decoders use to
/// enrich a Solana-like swap message with `amount_out_min`; `get_swap_quote` is the
/// full form the execution engine needs to build a signable transaction.
#[async_trait]
pub trait QuoteOracle: Send + Sync {
    async fn get_quote(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: Decimal,
    ) -> Result<Decimal, crate::error::DecodeError>;

    async fn get_swap_quote(
        &self,
        sell_token: &str,
        buy_token: &str,
        sell_amount: Decimal,
        slippage_bps: u32,
    ) -> Result<Quote, ExecutionError>;

    /// Token decimals, looked up once per submission to scale a UI-unit sell amount
    /// into the raw base-unit integer a Solana-like quote API expects. Never called
    /// on the EVM path, where `ethers` calldata is built directly from decimal wei.
    async fn decimals(&self, token: &str) -> Result<u32, ExecutionError>;
}

/// Private next-block submission endpoint (bundle relay / sequencer RPC).
#[async_trait]
pub trait BundleRelay: Send + Sync {
    async fn submit(&self, chain: Chain, signed_tx: Vec<u8>) -> Result<TxId, ExecutionError>;
}

/// Per-chain balance lookups, used by the risk loop to evaluate drawdown.
#[async_trait]
pub trait BalanceOracle: Send + Sync {
    async fn wallet_balance(&self, chain: Chain, wallet: &str, token: &str) -> Result<Decimal, ExecutionError>;
}

/// Which submission attempt we're on, used for tracing spans and log fields. The
/// public return type of `mirror_buy`/`mirror_sell` stays `Result<(TxId, Decimal), ExecutionError>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmissionState {
    Quote,
    Sign,
    Submit,
    Confirmed,
    Failed,
}

/// Translates mirror decisions into submitted swap bundles, with retry and
/// gas/fee escalation. Holds one `QuoteOracle` + `Signer` pair per chain since the
/// two chains never share config endpoints or signing material.
pub struct ExecutionEngine {
    evm_oracle: Arc<dyn QuoteOracle>,
    sol_oracle: Arc<dyn QuoteOracle>,
    relay: Arc<dyn BundleRelay>,
    evm_signer: Arc<dyn evm::EvmSigner>,
    sol_signer: Arc<dyn solana::SolSigner>,
    quote_cache: QuoteCache,
    max_retries: u32,
}

impl ExecutionEngine {
    pub fn new(
        evm_oracle: Arc<dyn QuoteOracle>,
        sol_oracle: Arc<dyn QuoteOracle>,
        relay: Arc<dyn BundleRelay>,
        evm_signer: Arc<dyn evm::EvmSigner>,
        sol_signer: Arc<dyn solana::SolSigner>,
        max_retries: u32,
    ) -> Self {
        Self {
            evm_oracle,
            sol_oracle,
            relay,
            evm_signer,
            sol_signer,
            quote_cache: QuoteCache::new(256),
            max_retries,
        }
    }

    fn oracle_for(&self, chain: Chain) -> &Arc<dyn QuoteOracle> {
        match chain {
            Chain::Evm => &self.evm_oracle,
            Chain::Sol => &self.sol_oracle,
        }
    }

    async fn quote(&self, chain: Chain, sell_token: &str, buy_token: &str, sell_amount: Decimal) -> Result<Quote, ExecutionError> {
        if let Some(cached) = self.quote_cache.get(sell_token, buy_token, sell_amount).await {
            return Ok(cached);
        }

        let quote = self
            .oracle_for(chain)
            .get_swap_quote(sell_token, buy_token, sell_amount, DEFAULT_SLIPPAGE_BPS)
            .await?;

        self.quote_cache.put(sell_token, buy_token, sell_amount, quote.clone()).await;
        Ok(quote)
    }

    fn reject_if_slippage_exceeded(&self, quote: &Quote) -> Result<(), ExecutionError> {
        if quote.price_impact_pct > SLIPPAGE_REJECT_THRESHOLD_PCT {
            return Err(ExecutionError::SlippageExceeded {
                price_impact_pct: quote.price_impact_pct,
                threshold_pct: SLIPPAGE_REJECT_THRESHOLD_PCT,
            });
        }
        Ok(())
    }

    /// Scales a UI-unit sell amount to the units the chain's quote API expects.
    /// EVM quotes are built directly from decimal wei, so the amount passes through
    /// unchanged; Solana-like quotes expect a raw base-unit integer, so this looks up
    /// the sell token's decimals and applies `to_base_units` once, here, before the
    /// amount enters the retry loop (every attempt re-quotes the same scaled amount).
    async fn sell_amount_for_chain(&self, chain: Chain, sell_token: &str, sell_amount: Decimal) -> Result<Decimal, ExecutionError> {
        match chain {
            Chain::Evm => Ok(sell_amount),
            Chain::Sol => {
                let token_decimals = self.oracle_for(chain).decimals(sell_token).await?;
                let base_units = solana::to_base_units(sell_amount, token_decimals).ok_or_else(|| {
                    ExecutionError::Rpc(format!("sell amount {sell_amount} overflows base units at {token_decimals} decimals"))
                })?;
                Ok(Decimal::from(base_units))
            }
        }
    }

    /// Mirrors a leader's buy: sells `event.amount_in * mirror_ratio` of `token_in`
    /// for `token_out`.
    pub async fn mirror_buy(&self, event: &TradeEvent, mirror_ratio: Decimal) -> Result<(TxId, Decimal), ExecutionError> {
        let sell_amount = (event.amount_in * mirror_ratio).trunc();
        self.execute(event.chain, &event.token_in, &event.token_out, sell_amount).await
    }

    /// Mirrors an exit: sells the full remaining `position.size` of `position.token`
    /// back to... whatever the quote oracle accepts as the quote currency for that
    /// chain; the oracle is responsible for routing, this engine only submits.
    pub async fn mirror_sell(&self, position: &Position, quote_currency: &str) -> Result<(TxId, Decimal), ExecutionError> {
        let sell_amount = position.size.trunc();
        self.execute(position.chain, &position.token, quote_currency, sell_amount).await
    }

    async fn execute(&self, chain: Chain, sell_token: &str, buy_token: &str, sell_amount: Decimal) -> Result<(TxId, Decimal), ExecutionError> {
        let sell_amount = self.sell_amount_for_chain(chain, sell_token, sell_amount).await?;
        let mut state = SubmissionState::Quote;
        let mut last_error = String::new();

        for attempt in 0..self.max_retries {
            state = SubmissionState::Quote;
            let quote = match self.quote(chain, sell_token, buy_token, sell_amount).await {
                Ok(q) => q,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            if let Err(slippage_err) = self.reject_if_slippage_exceeded(&quote) {
                return Err(slippage_err);
            }

            state = SubmissionState::Sign;
            let signed = match chain {
                Chain::Evm => evm::sign_with_escalation(self.evm_signer.as_ref(), &quote, attempt).await,
                Chain::Sol => solana::sign_with_escalation(self.sol_signer.as_ref(), &quote, attempt).await,
            };
            let signed_tx = match signed {
                Ok(tx) => tx,
                Err(e) => {
                    last_error = e.to_string();
                    state = SubmissionState::Failed;
                    continue;
                }
            };

            state = SubmissionState::Submit;
            match self.relay.submit(chain, signed_tx).await {
                Ok(tx_id) => {
                    state = SubmissionState::Confirmed;
                    info!(?chain, attempt, tx_id = %tx_id, "mirror submission confirmed");
                    return Ok((tx_id, quote.effective_price()));
                }
                Err(e) => {
                    last_error = e.to_string();
                    state = SubmissionState::Failed;
                    warn!(?chain, attempt, error = %last_error, "submission attempt failed, escalating");
                    if chain == Chain::Sol {
                        let sleep_secs = 2u64.saturating_pow(attempt);
                        tokio::time::sleep(std::time::Duration::from_secs(sleep_secs)).await;
                    }
                }
            }
        }

        debug_assert!(state == SubmissionState::Failed || state == SubmissionState::Quote);
        Err(ExecutionError::Exhausted { attempts: self.max_retries, last_error })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::execution::evm::{EvmSigner, LocalEvmSigner};
    use crate::execution::solana::{LocalSolSigner, SolSigner};

    /// Records the `sell_amount` it was quoted with so tests can assert on the
    /// value that reached the quote API after chain-specific scaling.
    struct RecordingOracle {
        decimals: u32,
        last_sell_amount: Mutex<Option<Decimal>>,
    }

    #[async_trait]
    impl QuoteOracle for RecordingOracle {
        async fn get_quote(&self, _token_in: &str, _token_out: &str, _amount_in: Decimal) -> Result<Decimal, crate::error::DecodeError> {
            unimplemented!("not exercised by execution-engine tests")
        }

        async fn get_swap_quote(&self, _sell_token: &str, _buy_token: &str, sell_amount: Decimal, _slippage_bps: u32) -> Result<Quote, ExecutionError> {
            *self.last_sell_amount.lock().unwrap() = Some(sell_amount);
            Ok(Quote {
                target: "target".into(),
                calldata: vec![],
                value: Decimal::ZERO,
                max_fee_per_gas: None,
                base_fee: Some(dec!(20_000_000_000)),
                gas_price: None,
                chain_id: 1,
                price: dec!(1),
                guaranteed_price: None,
                price_impact_pct: dec!(0.1),
                out_amount: sell_amount,
                in_amount: sell_amount,
            })
        }

        async fn decimals(&self, _token: &str) -> Result<u32, ExecutionError> {
            Ok(self.decimals)
        }
    }

    struct AcceptingRelay;

    #[async_trait]
    impl BundleRelay for AcceptingRelay {
        async fn submit(&self, _chain: Chain, _signed_tx: Vec<u8>) -> Result<TxId, ExecutionError> {
            Ok("tx-1".into())
        }
    }

    fn engine(decimals: u32) -> (ExecutionEngine, Arc<RecordingOracle>) {
        let oracle = Arc::new(RecordingOracle { decimals, last_sell_amount: Mutex::new(None) });
        let evm_signer: Arc<dyn EvmSigner> = Arc::new(
            LocalEvmSigner::from_hex_key("0000000000000000000000000000000000000000000000000000000000000001", 1).unwrap(),
        );
        let sol_keypair = bs58::encode(solana_sdk::signature::Keypair::new().to_bytes()).into_string();
        let sol_signer: Arc<dyn SolSigner> = Arc::new(LocalSolSigner::from_base58(&sol_keypair).unwrap());

        let engine = ExecutionEngine::new(oracle.clone() as Arc<dyn QuoteOracle>, oracle.clone() as Arc<dyn QuoteOracle>, Arc::new(AcceptingRelay), evm_signer, sol_signer, 3);
        (engine, oracle)
    }

    #[tokio::test]
    async fn sell_amount_for_chain_passes_evm_amounts_through_unscaled() {
        let (engine, _oracle) = engine(9);
        let scaled = engine.sell_amount_for_chain(Chain::Evm, "TOKEN", dec!(1.5)).await.unwrap();
        assert_eq!(scaled, dec!(1.5));
    }

    #[tokio::test]
    async fn sell_amount_for_chain_scales_solana_amounts_to_base_units() {
        let (engine, _oracle) = engine(9);
        let scaled = engine.sell_amount_for_chain(Chain::Sol, "TOKEN", dec!(1.5)).await.unwrap();
        assert_eq!(scaled, Decimal::from(1_500_000_000u64));
    }

    #[tokio::test]
    async fn mirror_buy_on_solana_quotes_the_base_unit_scaled_amount() {
        let (engine, oracle) = engine(6);
        let event = TradeEvent::new("leader", "TOKEN_IN", "TOKEN_OUT", dec!(2), dec!(1), "sig1", 1, Chain::Sol).unwrap();

        engine.mirror_buy(&event, dec!(1)).await.unwrap();

        assert_eq!(*oracle.last_sell_amount.lock().unwrap(), Some(Decimal::from(2_000_000u64)));
    }
}
