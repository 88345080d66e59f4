//! Mirror-trading bot core: watches a configured set of leader wallets across an
//! EVM chain and a Solana-like chain, mirrors their swap activity at a fractional
//! size, and manages exit of the resulting positions under risk rules.

pub mod alerts;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod execution;
pub mod feed;
pub mod metrics;
pub mod orchestrator;
pub mod position;
pub mod quote_cache;
pub mod risk;
pub mod types;
pub mod wallets;

pub use config::Config;
pub use error::{BookError, ConfigError, DecodeError, ExecutionError};
pub use event_bus::EventBus;
pub use orchestrator::Orchestrator;
pub use position::{Position, PositionBook};
pub use types::{Chain, TradeEvent};
pub use wallets::WatchList;
