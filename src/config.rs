use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::ConfigError;

/// Which EVM ingestion variants run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvmIngestionMode {
    Pending,
    Logs,
    Both,
}

impl FromStr for EvmIngestionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EvmIngestionMode::Pending),
            "logs" => Ok(EvmIngestionMode::Logs),
            "both" => Ok(EvmIngestionMode::Both),
            other => Err(ConfigError::Invalid {
                field: "EVM_INGESTION_MODE",
                reason: format!("expected pending|logs|both, got {other:?}"),
            }),
        }
    }
}

/// Process-wide configuration loaded once at startup. Any invalid value here is a
/// fatal error (exit code 1).
#[derive(Debug, Clone)]
pub struct Config {
    pub evm_ws_url: String,
    pub evm_wallets_file: String,
    pub sol_ws_url_a: String,
    pub sol_ws_url_b: String,
    pub sol_wallets_file: String,
    pub quote_api_evm: String,
    pub quote_api_sol: String,
    pub bundle_relay_url: String,
    pub signer_key: Option<String>,
    pub keypair_path: Option<String>,
    pub mirror_ratio: Decimal,
    pub ttl_seconds: i64,
    pub alert_webhook_url: Option<String>,
    pub metrics_port: u16,
    pub event_bus_capacity: usize,
    pub max_retries: u32,
    pub risk_loop_interval_secs: u64,
    pub evm_ingestion_mode: EvmIngestionMode,
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn env_var_opt(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn env_var_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|_| ConfigError::Invalid {
            field: name,
            reason: format!("could not parse {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables, optionally sourced from a
    /// `.env` file first (mirroring the reference infrastructure's `dotenvy` use).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mirror_ratio_raw = std::env::var("MIRROR_RATIO").unwrap_or_else(|_| "0.02".to_string());
        let mirror_ratio = Decimal::from_str(&mirror_ratio_raw).map_err(|e| ConfigError::Invalid {
            field: "MIRROR_RATIO",
            reason: e.to_string(),
        })?;
        if mirror_ratio <= Decimal::ZERO || mirror_ratio > Decimal::ONE {
            return Err(ConfigError::Invalid {
                field: "MIRROR_RATIO",
                reason: format!("must be in (0, 1], got {mirror_ratio}"),
            });
        }

        let ttl_seconds: i64 = env_var_or("TTL_SECONDS", 86_400)?;
        if ttl_seconds <= 0 {
            return Err(ConfigError::Invalid {
                field: "TTL_SECONDS",
                reason: format!("must be positive, got {ttl_seconds}"),
            });
        }

        let metrics_port: u16 = env_var_or("METRICS_PORT", 8000)?;
        let event_bus_capacity: usize = env_var_or("EVENT_BUS_CAPACITY", 5000)?;
        let max_retries: u32 = env_var_or("MAX_RETRIES", 3)?;
        let risk_loop_interval_secs: u64 = env_var_or("RISK_LOOP_INTERVAL_SECS", 60)?;

        let evm_ingestion_mode = match env_var_opt("EVM_INGESTION_MODE") {
            Some(raw) => raw.parse()?,
            None => EvmIngestionMode::Both,
        };

        let signer_key = env_var_opt("SIGNER_KEY");
        let keypair_path = env_var_opt("KEYPAIR_PATH");
        if signer_key.is_none() && keypair_path.is_none() {
            return Err(ConfigError::Missing("SIGNER_KEY or KEYPAIR_PATH"));
        }

        Ok(Self {
            evm_ws_url: env_var("EVM_WS_URL")?,
            evm_wallets_file: env_var("EVM_WALLETS_FILE")?,
            sol_ws_url_a: env_var("SOL_WS_URL_A")?,
            sol_ws_url_b: env_var("SOL_WS_URL_B")?,
            sol_wallets_file: env_var("SOL_WALLETS_FILE")?,
            quote_api_evm: env_var("QUOTE_API_EVM")?,
            quote_api_sol: env_var("QUOTE_API_SOL")?,
            bundle_relay_url: env_var("BUNDLE_RELAY_URL")?,
            signer_key,
            keypair_path,
            mirror_ratio,
            ttl_seconds,
            alert_webhook_url: env_var_opt("ALERT_WEBHOOK_URL"),
            metrics_port,
            event_bus_capacity,
            max_retries,
            risk_loop_interval_secs,
            evm_ingestion_mode,
        })
    }
}
