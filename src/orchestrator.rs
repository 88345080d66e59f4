use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::alerts::AlertNotifier;
use crate::error::{BookError, ExecutionError};
use crate::event_bus::EventBus;
use crate::execution::{BalanceOracle, ExecutionEngine};
use crate::metrics::Metrics;
use crate::position::PositionBook;
use crate::risk::should_exit;
use crate::types::{Chain, TradeEvent};

/// Wires the event bus, position book, execution engine, risk loop, alerting, and
/// metrics into the two long-lived tasks: the event loop and the risk loop.
pub struct Orchestrator {
    pub bus: Arc<EventBus>,
    pub book: Arc<PositionBook>,
    pub engine: Arc<ExecutionEngine>,
    pub balance_oracle: Arc<dyn BalanceOracle>,
    pub alerts: Arc<dyn AlertNotifier>,
    pub metrics: Arc<Metrics>,
    pub mirror_ratio: Decimal,
    pub ttl_seconds: i64,
    pub risk_loop_interval_secs: u64,
}

impl Orchestrator {
    /// Consumes the event bus until `shutdown` fires. Per event: open-or-update the
    /// book only after a successful mirror submission (cancellation never leaves the
    /// book mutated ahead of a confirmed trade).
    pub async fn run_event_loop(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            let event = tokio::select! {
                event = self.bus.pop() => event,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("event loop shutting down");
                        return;
                    }
                    continue;
                }
            };

            self.handle_event(event).await;
        }
    }

    async fn handle_event(&self, event: TradeEvent) {
        let start = std::time::Instant::now();
        let already_open = self.book.snapshot().await.iter().any(|p| p.wallet == event.wallet && p.token == event.token_out);

        let submission = self.engine.mirror_buy(&event, self.mirror_ratio).await;

        match submission {
            Ok((tx_id, filled_price)) => {
                let book_result = if already_open { self.book.update(&event).await } else { self.book.open(&event, self.mirror_ratio).await };

                match book_result {
                    Ok(position) => {
                        let event_type = if already_open { "mirror_update" } else { "mirror_open" };
                        self.metrics.events_total.with_label_values(&[event_type]).inc();
                        self.record_slippage(&event, filled_price);
                        self.notify(event_type, serde_json::json!({
                            "wallet": position.wallet,
                            "token": position.token,
                            "tx_id": tx_id,
                            "size": position.size.to_string(),
                        }))
                        .await;
                    }
                    Err(BookError::AlreadyOpen { wallet, token }) => {
                        warn!(wallet, token, "submission succeeded but position already open; leaving book untouched");
                    }
                    Err(BookError::NotFound { wallet, token }) => {
                        warn!(wallet, token, "submission succeeded but no position to update; leaving book untouched");
                    }
                }
            }
            Err(ExecutionError::SlippageExceeded { price_impact_pct, threshold_pct }) => {
                self.metrics.events_total.with_label_values(&["slippage_rejected"]).inc();
                self.notify(
                    "slippage_rejected",
                    serde_json::json!({
                        "wallet": event.wallet,
                        "token_out": event.token_out,
                        "price_impact_pct": price_impact_pct.to_string(),
                        "threshold_pct": threshold_pct.to_string(),
                    }),
                )
                .await;
            }
            Err(ExecutionError::Exhausted { attempts, last_error }) => {
                self.metrics.events_total.with_label_values(&["submission_failed"]).inc();
                self.notify(
                    "submission_failed",
                    serde_json::json!({ "wallet": event.wallet, "attempts": attempts, "last_error": last_error }),
                )
                .await;
            }
            Err(ExecutionError::Rpc(reason)) => {
                error!(reason, "mirror_buy failed with an rpc error");
                self.metrics.events_total.with_label_values(&["submission_failed"]).inc();
            }
        }

        self.metrics.trade_latency_seconds.observe(start.elapsed().as_secs_f64());
    }

    fn record_slippage(&self, event: &TradeEvent, filled_price: Decimal) {
        if let Some(quoted_price) = event.price() {
            if quoted_price != Decimal::ZERO {
                let slippage_bps = ((filled_price - quoted_price) / quoted_price * Decimal::from(10_000)).abs();
                if let Some(value) = rust_decimal::prelude::ToPrimitive::to_f64(&slippage_bps) {
                    self.metrics.slippage_bps.set(value);
                }
            }
        }
    }

    async fn notify(&self, event_type: &str, payload: serde_json::Value) {
        if let Err(e) = self.alerts.notify(event_type, payload).await {
            warn!(event_type, error = %e, "alert delivery failed");
        }
    }

    /// Periodically scans the book, closing positions whose risk evaluator fires.
    pub async fn run_risk_loop(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(Duration::from_secs(self.risk_loop_interval_secs));

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("risk loop shutting down");
                        return;
                    }
                    continue;
                }
            }

            self.sweep_positions().await;
        }
    }

    async fn sweep_positions(&self) {
        let now = chrono::Utc::now().timestamp();

        for position in self.book.snapshot().await {
            let balance = match self.balance_oracle.wallet_balance(position.chain, &position.wallet, &position.token).await {
                Ok(balance) => balance,
                Err(e) => {
                    warn!(wallet = %position.wallet, token = %position.token, error = %e, "balance oracle lookup failed, skipping this tick");
                    continue;
                }
            };

            if !should_exit(&position, balance, self.ttl_seconds, now) {
                continue;
            }

            let quote_currency = match position.chain {
                Chain::Evm => "0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE", // native-asset sentinel
                Chain::Sol => "So11111111111111111111111111111111111111112", // wrapped SOL mint
            };

            match self.engine.mirror_sell(&position, quote_currency).await {
                Ok((tx_id, filled_price)) => match self.book.close(&position.wallet, &position.token).await {
                    Ok(_) => {
                        self.metrics.events_total.with_label_values(&["mirror_close"]).inc();
                        self.notify(
                            "mirror_close",
                            serde_json::json!({
                                "wallet": position.wallet,
                                "token": position.token,
                                "tx_id": tx_id,
                                "filled_price": filled_price.to_string(),
                            }),
                        )
                        .await;
                    }
                    Err(e) => error!(wallet = %position.wallet, token = %position.token, error = %e, "closed position on-chain but book close failed"),
                },
                Err(e) => {
                    warn!(wallet = %position.wallet, token = %position.token, error = %e, "risk-triggered mirror_sell failed");
                    self.metrics.events_total.with_label_values(&["submission_failed"]).inc();
                }
            }
        }
    }
}
