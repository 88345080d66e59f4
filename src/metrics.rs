use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Process-wide Prometheus registry plus the metric handles the orchestrator writes
/// to. Scraping by a real consumer is out of scope here — this only
/// serves the exposition text, it does not talk to any specific Prometheus server.
pub struct Metrics {
    registry: Registry,
    pub events_total: IntCounterVec,
    pub trade_latency_seconds: Histogram,
    pub slippage_bps: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_total = IntCounterVec::new(
            Opts::new("mirrorbot_events_total", "Count of pipeline events by type"),
            &["event_type"],
        )
        .expect("static metric descriptor");

        let trade_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "mirrorbot_trade_latency_seconds",
            "Latency from event ingestion to submission outcome",
        ))
        .expect("static metric descriptor");

        let slippage_bps = Gauge::new("mirrorbot_slippage_bps", "Most recent observed slippage, in bps")
            .expect("static metric descriptor");

        registry.register(Box::new(events_total.clone())).expect("single registration");
        registry.register(Box::new(trade_latency_seconds.clone())).expect("single registration");
        registry.register(Box::new(slippage_bps.clone())).expect("single registration");

        Self { registry, events_total, trade_latency_seconds, slippage_bps }
    }

    fn render(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer).expect("text encoding never fails");
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves `/metrics` in Prometheus text exposition format over a hand-rolled TCP
/// accept loop, the same minimal-dependency shape the reference infrastructure uses
/// for its dashboard HTTP endpoint rather than pulling in a web framework.
pub async fn serve(metrics: std::sync::Arc<Metrics>, port: u16, mut shutdown: tokio::sync::watch::Receiver<bool>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "metrics server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (mut stream, _) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => { error!(error = %e, "metrics accept failed"); continue; }
                };
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    let body = metrics.render();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    if stream.write_all(response.as_bytes()).await.is_ok() {
                        let _ = stream.write_all(&body).await;
                    }
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("metrics server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_all_three_metric_families() {
        let metrics = Metrics::new();
        metrics.events_total.with_label_values(&["mirror_open"]).inc();
        metrics.slippage_bps.set(12.5);
        metrics.trade_latency_seconds.observe(0.25);

        let rendered = String::from_utf8(metrics.render()).unwrap();
        assert!(rendered.contains("mirrorbot_events_total"));
        assert!(rendered.contains("mirrorbot_trade_latency_seconds"));
        assert!(rendered.contains("mirrorbot_slippage_bps"));
    }
}
