use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::error::DecodeError;
use crate::execution::QuoteOracle;
use crate::types::{Chain, TradeEvent};

const QUOTE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct RouteHop {
    pub mint: String,
}

/// Shared wire shape of both the "enhanced" feed and the "shard" feed — they
/// carry the same fields, just over different transports.
#[derive(Debug, Deserialize)]
pub struct SolanaSwapMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub route: Vec<RouteHop>,
    #[serde(rename = "amountIn")]
    pub amount_in: String,
    pub account: String,
    pub tx: String,
}

/// Decodes a raw Solana-like swap message into a `TradeEvent`, enriching with a
/// live quote since the wire format never carries `amount_out_min` directly. A
/// quote-oracle timeout or failure drops the event with a warning.
pub async fn decode_swap(
    msg_raw: &str,
    watched: &HashSet<String>,
    quote_oracle: &Arc<dyn QuoteOracle>,
) -> Result<Option<TradeEvent>, DecodeError> {
    let msg: SolanaSwapMessage = serde_json::from_str(msg_raw).map_err(|e| DecodeError::Malformed {
        tx_hash: "unknown".into(),
        reason: e.to_string(),
    })?;

    if msg.kind != "swap" || msg.route.len() < 2 {
        return Ok(None);
    }
    if !watched.contains(&msg.account) {
        return Ok(None);
    }

    let malformed = |reason: String| DecodeError::Malformed { tx_hash: msg.tx.clone(), reason };

    let token_in = msg.route.first().expect("len >= 2 checked above").mint.clone();
    let token_out = msg.route.last().expect("len >= 2 checked above").mint.clone();
    let amount_in = Decimal::from_str(&msg.amount_in).map_err(|e| malformed(e.to_string()))?;

    let quote_call = quote_oracle.get_quote(&token_in, &token_out, amount_in);
    let amount_out_min = match tokio::time::timeout(QUOTE_TIMEOUT, quote_call).await {
        Ok(Ok(amount)) => amount,
        Ok(Err(e)) => {
            warn!(tx = %msg.tx, error = %e, "quote oracle failed enriching Solana-like swap");
            return Ok(None);
        }
        Err(_) => {
            warn!(tx = %msg.tx, "quote oracle timed out enriching Solana-like swap");
            return Ok(None);
        }
    };

    let event = TradeEvent::new(
        msg.account.clone(),
        token_in,
        token_out,
        amount_in,
        amount_out_min,
        msg.tx.clone(),
        chrono::Utc::now().timestamp(),
        Chain::Sol,
    )
    .map_err(|e| malformed(e.to_string()))?;

    Ok(Some(event))
}

/// A websocket subscriber against one Solana-like enhanced/shard feed. Both feed
/// variants (A and B) share this implementation since they carry the same wire
/// shape — only the endpoint differs.
pub struct SolanaFeedSource {
    pub ws_url: String,
    pub label: &'static str,
    pub quote_oracle: Arc<dyn QuoteOracle>,
}

#[async_trait::async_trait]
impl crate::feed::FeedSource for SolanaFeedSource {
    fn name(&self) -> &str {
        self.label
    }

    async fn run(
        &self,
        bus: Arc<crate::event_bus::EventBus>,
        watched: Arc<HashSet<String>>,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let ws_url = self.ws_url.clone();
        let label = self.label;
        let quote_oracle = self.quote_oracle.clone();

        crate::feed::run_with_backoff(label, shutdown, move || {
            let ws_url = ws_url.clone();
            let bus = bus.clone();
            let watched = watched.clone();
            let quote_oracle = quote_oracle.clone();
            async move { stream_solana_feed(&ws_url, &bus, &watched, &quote_oracle).await }
        })
        .await;
    }
}

async fn stream_solana_feed(
    ws_url: &str,
    bus: &crate::event_bus::EventBus,
    watched: &HashSet<String>,
    quote_oracle: &Arc<dyn QuoteOracle>,
) -> anyhow::Result<()> {
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message;

    let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url).await?;
    let (_write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        let Message::Text(text) = msg? else { continue };

        match decode_swap(&text, watched, quote_oracle).await {
            Ok(Some(event)) => bus.push(event).await,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "dropping malformed Solana-like swap payload"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct FixedOracle;

    #[async_trait]
    impl QuoteOracle for FixedOracle {
        async fn get_quote(&self, _token_in: &str, _token_out: &str, _amount_in: Decimal) -> Result<Decimal, DecodeError> {
            Ok(dec!(42))
        }

        async fn get_swap_quote(
            &self,
            _sell_token: &str,
            _buy_token: &str,
            _sell_amount: Decimal,
            _slippage_bps: u32,
        ) -> Result<crate::execution::Quote, crate::error::ExecutionError> {
            unimplemented!("not exercised by decoder tests")
        }

        async fn decimals(&self, _token: &str) -> Result<u32, crate::error::ExecutionError> {
            unimplemented!("not exercised by decoder tests")
        }
    }

    fn oracle() -> Arc<dyn QuoteOracle> {
        Arc::new(FixedOracle)
    }

    #[tokio::test]
    async fn enriches_amount_out_min_from_quote_oracle() {
        let watched: HashSet<String> = ["leader".to_string()].into_iter().collect();
        let raw = r#"{"type":"swap","route":[{"mint":"IN"},{"mint":"OUT"}],"amountIn":"10","account":"leader","tx":"sig1"}"#;

        let event = decode_swap(raw, &watched, &oracle()).await.unwrap().unwrap();
        assert_eq!(event.amount_out_min, dec!(42));
        assert_eq!(event.token_in, "IN");
        assert_eq!(event.token_out, "OUT");
    }

    #[tokio::test]
    async fn single_hop_route_is_ignored() {
        let watched: HashSet<String> = ["leader".to_string()].into_iter().collect();
        let raw = r#"{"type":"swap","route":[{"mint":"IN"}],"amountIn":"10","account":"leader","tx":"sig1"}"#;
        assert_eq!(decode_swap(raw, &watched, &oracle()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unwatched_account_is_ignored() {
        let watched: HashSet<String> = ["someone-else".to_string()].into_iter().collect();
        let raw = r#"{"type":"swap","route":[{"mint":"IN"},{"mint":"OUT"}],"amountIn":"10","account":"leader","tx":"sig1"}"#;
        assert_eq!(decode_swap(raw, &watched, &oracle()).await.unwrap(), None);
    }
}
