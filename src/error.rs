use std::fmt;

/// Configuration failures detected at startup. Always fatal (exit code 1).
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(field) => write!(f, "missing required config: {field}"),
            ConfigError::Invalid { field, reason } => {
                write!(f, "invalid config for {field}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Position-book violations. `AlreadyOpen`/`NotFound` correspond to spec invariant 4;
/// these are expected control flow, not bugs, so they are never panics.
#[derive(Debug, Clone, PartialEq)]
pub enum BookError {
    AlreadyOpen { wallet: String, token: String },
    NotFound { wallet: String, token: String },
}

impl fmt::Display for BookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookError::AlreadyOpen { wallet, token } => {
                write!(f, "position already open for ({wallet}, {token})")
            }
            BookError::NotFound { wallet, token } => {
                write!(f, "no position for ({wallet}, {token})")
            }
        }
    }
}

impl std::error::Error for BookError {}

/// Decode-time failures for a single wire message. Always non-fatal: the decoder
/// logs once and the feed task moves on to the next message.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    Malformed { tx_hash: String, reason: String },
    QuoteTimeout { token_in: String, token_out: String },
    QuoteFailed { token_in: String, token_out: String, reason: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed { tx_hash, reason } => {
                write!(f, "malformed payload for tx {tx_hash}: {reason}")
            }
            DecodeError::QuoteTimeout { token_in, token_out } => {
                write!(f, "quote oracle timed out for {token_in}->{token_out}")
            }
            DecodeError::QuoteFailed { token_in, token_out, reason } => {
                write!(f, "quote oracle failed for {token_in}->{token_out}: {reason}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Execution-engine failures. `SlippageExceeded` and `Exhausted` are terminal states
/// of the submission state machine; `Rpc` covers everything
/// else an external collaborator (quote oracle, relay, signer) can throw back at us.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionError {
    SlippageExceeded { price_impact_pct: rust_decimal::Decimal, threshold_pct: rust_decimal::Decimal },
    Exhausted { attempts: u32, last_error: String },
    Rpc(String),
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::SlippageExceeded { price_impact_pct, threshold_pct } => write!(
                f,
                "price impact {price_impact_pct}% exceeds threshold {threshold_pct}%"
            ),
            ExecutionError::Exhausted { attempts, last_error } => {
                write!(f, "exhausted {attempts} submission attempts, last error: {last_error}")
            }
            ExecutionError::Rpc(msg) => write!(f, "execution rpc error: {msg}"),
        }
    }
}

impl std::error::Error for ExecutionError {}
