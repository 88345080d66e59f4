use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which network a `TradeEvent` or `Position` originated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    Evm,
    Sol,
}

/// An observed swap, leader-originated or internally derived (a mirror fill).
///
/// Construction always goes through [`TradeEvent::new`]; there is no way to build
/// one that violates the constraints below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub wallet: String,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Decimal,
    pub amount_out_min: Decimal,
    pub tx_hash: String,
    pub timestamp: i64,
    pub chain: Chain,
}

/// Why a candidate `TradeEvent` was rejected at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeEventError {
    EmptyField(&'static str),
    NegativeAmountIn,
    NonPositiveAmountOutMin,
}

impl std::fmt::Display for TradeEventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeEventError::EmptyField(name) => write!(f, "{name} must not be empty"),
            TradeEventError::NegativeAmountIn => write!(f, "amount_in must be >= 0"),
            TradeEventError::NonPositiveAmountOutMin => write!(f, "amount_out_min must be > 0"),
        }
    }
}

impl std::error::Error for TradeEventError {}

impl TradeEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wallet: impl Into<String>,
        token_in: impl Into<String>,
        token_out: impl Into<String>,
        amount_in: Decimal,
        amount_out_min: Decimal,
        tx_hash: impl Into<String>,
        timestamp: i64,
        chain: Chain,
    ) -> Result<Self, TradeEventError> {
        let wallet = wallet.into();
        let token_in = token_in.into();
        let token_out = token_out.into();
        let tx_hash = tx_hash.into();

        if wallet.is_empty() {
            return Err(TradeEventError::EmptyField("wallet"));
        }
        if token_in.is_empty() {
            return Err(TradeEventError::EmptyField("token_in"));
        }
        if token_out.is_empty() {
            return Err(TradeEventError::EmptyField("token_out"));
        }
        if tx_hash.is_empty() {
            return Err(TradeEventError::EmptyField("tx_hash"));
        }
        if amount_in < Decimal::ZERO {
            return Err(TradeEventError::NegativeAmountIn);
        }
        if amount_out_min <= Decimal::ZERO {
            return Err(TradeEventError::NonPositiveAmountOutMin);
        }

        Ok(Self {
            wallet,
            token_in,
            token_out,
            amount_in,
            amount_out_min,
            tx_hash,
            timestamp,
            chain,
        })
    }

    /// `amount_in / amount_out_min`, the per-fill price used by the position book.
    /// `None` only if `amount_out_min` were zero, which construction already forbids.
    pub fn price(&self) -> Option<Decimal> {
        self.amount_in.checked_div(self.amount_out_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Result<TradeEvent, TradeEventError> {
        TradeEvent::new("0xWallet", "0xIn", "0xOut", dec!(100), dec!(10), "0xhash", 1_000, Chain::Evm)
    }

    #[test]
    fn accepts_valid_event() {
        let e = sample().unwrap();
        assert_eq!(e.price(), Some(dec!(10)));
    }

    #[test]
    fn rejects_empty_wallet() {
        let err = TradeEvent::new("", "0xIn", "0xOut", dec!(1), dec!(1), "0xhash", 1, Chain::Evm);
        assert_eq!(err.unwrap_err(), TradeEventError::EmptyField("wallet"));
    }

    #[test]
    fn rejects_negative_amount_in() {
        let err = TradeEvent::new("0xW", "0xIn", "0xOut", dec!(-1), dec!(1), "0xhash", 1, Chain::Evm);
        assert_eq!(err.unwrap_err(), TradeEventError::NegativeAmountIn);
    }

    #[test]
    fn rejects_zero_amount_out_min() {
        let err = TradeEvent::new("0xW", "0xIn", "0xOut", dec!(1), dec!(0), "0xhash", 1, Chain::Evm);
        assert_eq!(err.unwrap_err(), TradeEventError::NonPositiveAmountOutMin);
    }

    #[test]
    fn allows_zero_amount_in() {
        assert!(TradeEvent::new("0xW", "0xIn", "0xOut", dec!(0), dec!(1), "0xhash", 1, Chain::Evm).is_ok());
    }
}
