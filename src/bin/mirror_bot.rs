use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use mirror_bot_core::alerts::{AlertNotifier, NullAlertNotifier, WebhookAlertNotifier};
use mirror_bot_core::config::{Config, EvmIngestionMode};
use mirror_bot_core::event_bus::EventBus;
use mirror_bot_core::execution::evm::LocalEvmSigner;
use mirror_bot_core::execution::solana::LocalSolSigner;
use mirror_bot_core::execution::ExecutionEngine;
use mirror_bot_core::feed::evm::{EvmFeedSource, IngestionMode};
use mirror_bot_core::feed::solana::SolanaFeedSource;
use mirror_bot_core::feed::FeedSource;
use mirror_bot_core::metrics::Metrics;
use mirror_bot_core::orchestrator::Orchestrator;
use mirror_bot_core::position::PositionBook;
use mirror_bot_core::wallets::WatchList;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "mirror_bot", about = "Leader-wallet mirror-trading bot")]
struct Cli {
    /// Path to a .env file (defaults to `.env` in the working directory)
    #[arg(long)]
    env_file: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Some(path) = &cli.env_file {
        let _ = dotenvy::from_path(path);
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "unrecoverable startup error");
            ExitCode::from(2)
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("mirror bot starting");

    let evm_wallets_raw = tokio::fs::read_to_string(&config.evm_wallets_file).await?;
    let evm_watch_list = WatchList::from_json(&evm_wallets_raw)?;
    let sol_wallets_raw = tokio::fs::read_to_string(&config.sol_wallets_file).await?;
    let sol_watch_list = WatchList::from_json(&sol_wallets_raw)?;
    info!(evm = evm_watch_list.len(), sol = sol_watch_list.len(), "watch lists loaded");

    let alerts: Arc<dyn AlertNotifier> = match &config.alert_webhook_url {
        Some(url) => Arc::new(WebhookAlertNotifier::new(url.clone())),
        None => Arc::new(NullAlertNotifier),
    };

    let metrics = Arc::new(Metrics::new());
    let bus = Arc::new(EventBus::new(config.event_bus_capacity));
    let book = Arc::new(PositionBook::new());

    let signer_material = match &config.signer_key {
        Some(key) => key.clone(),
        None => {
            let path = config.keypair_path.as_ref().expect("Config::from_env guarantees one of signer_key/keypair_path");
            tokio::fs::read_to_string(path).await?.trim().to_string()
        }
    };
    let evm_signer = Arc::new(LocalEvmSigner::from_hex_key(&signer_material, 1).map_err(|e| anyhow::anyhow!(e.to_string()))?);
    let sol_signer = Arc::new(LocalSolSigner::from_base58(&signer_material).map_err(|e| anyhow::anyhow!(e.to_string()))?);

    let evm_oracle = Arc::new(http_quote_oracle::HttpQuoteOracle::new(config.quote_api_evm.clone()));
    let sol_oracle = Arc::new(http_quote_oracle::HttpQuoteOracle::new(config.quote_api_sol.clone()));
    let relay = Arc::new(http_quote_oracle::HttpBundleRelay::new(config.bundle_relay_url.clone()));
    let balance_oracle = Arc::new(http_quote_oracle::HttpBalanceOracle::new(config.quote_api_evm.clone(), config.quote_api_sol.clone()));

    let engine = Arc::new(ExecutionEngine::new(evm_oracle.clone(), sol_oracle.clone(), relay, evm_signer, sol_signer, config.max_retries));

    let orchestrator = Arc::new(Orchestrator {
        bus: bus.clone(),
        book,
        engine,
        balance_oracle,
        alerts,
        metrics: metrics.clone(),
        mirror_ratio: config.mirror_ratio,
        ttl_seconds: config.ttl_seconds,
        risk_loop_interval_secs: config.risk_loop_interval_secs,
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let evm_ingestion_mode = match config.evm_ingestion_mode {
        EvmIngestionMode::Pending => IngestionMode::Pending,
        EvmIngestionMode::Logs => IngestionMode::Logs,
        EvmIngestionMode::Both => IngestionMode::Both,
    };
    let evm_feed = EvmFeedSource {
        ws_url: config.evm_ws_url.clone(),
        routers: mirror_bot_core::feed::evm::default_routers(),
        mode: evm_ingestion_mode,
    };
    let sol_feed_a = SolanaFeedSource { ws_url: config.sol_ws_url_a.clone(), label: "sol-feed-a", quote_oracle: sol_oracle.clone() };
    let sol_feed_b = SolanaFeedSource { ws_url: config.sol_ws_url_b.clone(), label: "sol-feed-b", quote_oracle: sol_oracle };

    let evm_watched = Arc::new(evm_watch_list.to_lowercase_set());
    let sol_watched = Arc::new(sol_watch_list.addresses_set());

    let mut handles = Vec::new();
    handles.push(tokio::spawn({
        let bus = bus.clone();
        let watched = evm_watched.clone();
        let shutdown = shutdown_rx.clone();
        async move { evm_feed.run(bus, watched, shutdown).await }
    }));
    handles.push(tokio::spawn({
        let bus = bus.clone();
        let watched = sol_watched.clone();
        let shutdown = shutdown_rx.clone();
        async move { sol_feed_a.run(bus, watched, shutdown).await }
    }));
    handles.push(tokio::spawn({
        let bus = bus.clone();
        let watched = sol_watched;
        let shutdown = shutdown_rx.clone();
        async move { sol_feed_b.run(bus, watched, shutdown).await }
    }));
    handles.push(tokio::spawn({
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown_rx.clone();
        async move { orchestrator.run_event_loop(shutdown).await }
    }));
    handles.push(tokio::spawn({
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown_rx.clone();
        async move { orchestrator.run_risk_loop(shutdown).await }
    }));
    handles.push(tokio::spawn(async move {
        if let Err(e) = mirror_bot_core::metrics::serve(metrics, config.metrics_port, shutdown_rx).await {
            error!(error = %e, "metrics server exited with an error");
        }
    }));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown_tx.send(true).ok();

    for handle in handles {
        let _ = handle.await;
    }

    info!("mirror bot stopped cleanly");
    Ok(())
}

/// Minimal `reqwest`-backed implementations of the external-collaborator traits,
/// wiring the generic JSON quote/relay/balance endpoints treated as out-of-scope
/// third-party infrastructure into the binary.
mod http_quote_oracle {
    use async_trait::async_trait;
    use mirror_bot_core::error::{DecodeError, ExecutionError};
    use mirror_bot_core::execution::{BalanceOracle, BundleRelay, Quote, QuoteOracle};
    use mirror_bot_core::types::Chain;
    use rust_decimal::Decimal;
    use serde::Deserialize;

    pub struct HttpQuoteOracle {
        client: reqwest::Client,
        base_url: String,
    }

    impl HttpQuoteOracle {
        pub fn new(base_url: String) -> Self {
            Self { client: reqwest::Client::new(), base_url }
        }
    }

    #[derive(Deserialize)]
    struct DecimalsResponse {
        decimals: u32,
    }

    #[derive(Deserialize)]
    struct QuoteResponse {
        target: String,
        calldata: String,
        value: Decimal,
        max_fee_per_gas: Option<Decimal>,
        base_fee: Option<Decimal>,
        gas_price: Option<Decimal>,
        chain_id: u64,
        price: Decimal,
        guaranteed_price: Option<Decimal>,
        price_impact_pct: Decimal,
        out_amount: Decimal,
        in_amount: Decimal,
    }

    #[async_trait]
    impl QuoteOracle for HttpQuoteOracle {
        async fn get_quote(&self, token_in: &str, token_out: &str, amount_in: Decimal) -> Result<Decimal, DecodeError> {
            let url = format!("{}/quote?in={token_in}&out={token_out}&amount={amount_in}", self.base_url);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| DecodeError::QuoteFailed { token_in: token_in.into(), token_out: token_out.into(), reason: e.to_string() })?;
            let parsed: QuoteResponse = response
                .json()
                .await
                .map_err(|e| DecodeError::QuoteFailed { token_in: token_in.into(), token_out: token_out.into(), reason: e.to_string() })?;
            Ok(parsed.out_amount)
        }

        async fn get_swap_quote(&self, sell_token: &str, buy_token: &str, sell_amount: Decimal, slippage_bps: u32) -> Result<Quote, ExecutionError> {
            let url = format!(
                "{}/swap_quote?sell={sell_token}&buy={buy_token}&amount={sell_amount}&slippage_bps={slippage_bps}",
                self.base_url
            );
            let response = self.client.get(&url).send().await.map_err(|e| ExecutionError::Rpc(e.to_string()))?;
            let parsed: QuoteResponse = response.json().await.map_err(|e| ExecutionError::Rpc(e.to_string()))?;
            let calldata = hex::decode(parsed.calldata.trim_start_matches("0x")).unwrap_or_default();

            Ok(Quote {
                target: parsed.target,
                calldata,
                value: parsed.value,
                max_fee_per_gas: parsed.max_fee_per_gas,
                base_fee: parsed.base_fee,
                gas_price: parsed.gas_price,
                chain_id: parsed.chain_id,
                price: parsed.price,
                guaranteed_price: parsed.guaranteed_price,
                price_impact_pct: parsed.price_impact_pct,
                out_amount: parsed.out_amount,
                in_amount: parsed.in_amount,
            })
        }

        async fn decimals(&self, token: &str) -> Result<u32, ExecutionError> {
            let url = format!("{}/decimals?token={token}", self.base_url);
            let response = self.client.get(&url).send().await.map_err(|e| ExecutionError::Rpc(e.to_string()))?;
            let parsed: DecimalsResponse = response.json().await.map_err(|e| ExecutionError::Rpc(e.to_string()))?;
            Ok(parsed.decimals)
        }
    }

    pub struct HttpBundleRelay {
        client: reqwest::Client,
        relay_url: String,
    }

    impl HttpBundleRelay {
        pub fn new(relay_url: String) -> Self {
            Self { client: reqwest::Client::new(), relay_url }
        }
    }

    #[derive(Deserialize)]
    struct RelayResponse {
        tx_id: String,
    }

    #[async_trait]
    impl BundleRelay for HttpBundleRelay {
        async fn submit(&self, _chain: Chain, signed_tx: Vec<u8>) -> Result<String, ExecutionError> {
            let response = self
                .client
                .post(&self.relay_url)
                .body(signed_tx)
                .send()
                .await
                .map_err(|e| ExecutionError::Rpc(e.to_string()))?;
            let parsed: RelayResponse = response.json().await.map_err(|e| ExecutionError::Rpc(e.to_string()))?;
            Ok(parsed.tx_id)
        }
    }

    pub struct HttpBalanceOracle {
        client: reqwest::Client,
        evm_base_url: String,
        sol_base_url: String,
    }

    impl HttpBalanceOracle {
        pub fn new(evm_base_url: String, sol_base_url: String) -> Self {
            Self { client: reqwest::Client::new(), evm_base_url, sol_base_url }
        }
    }

    #[derive(Deserialize)]
    struct BalanceResponse {
        balance: Decimal,
    }

    #[async_trait]
    impl BalanceOracle for HttpBalanceOracle {
        async fn wallet_balance(&self, chain: Chain, wallet: &str, token: &str) -> Result<Decimal, ExecutionError> {
            let base = match chain {
                Chain::Evm => &self.evm_base_url,
                Chain::Sol => &self.sol_base_url,
            };
            let url = format!("{base}/balance?wallet={wallet}&token={token}");
            let response = self.client.get(&url).send().await.map_err(|e| ExecutionError::Rpc(e.to_string()))?;
            let parsed: BalanceResponse = response.json().await.map_err(|e| ExecutionError::Rpc(e.to_string()))?;
            Ok(parsed.balance)
        }
    }
}
