pub mod evm;
pub mod solana;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::event_bus::EventBus;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One long-lived subscription against a feed endpoint. `subscribe` only returns on
/// shutdown; transient I/O failures are handled internally via reconnect-with-backoff.
#[async_trait]
pub trait FeedSource: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, bus: Arc<EventBus>, watched: Arc<HashSet<String>>, shutdown: tokio::sync::watch::Receiver<bool>);
}

/// Doubles `current` up to `MAX_BACKOFF`, used between reconnect attempts. Resets to
/// `INITIAL_BACKOFF` by the caller after any successful subscription.
pub fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

pub fn initial_backoff() -> Duration {
    INITIAL_BACKOFF
}

/// Runs `connect_and_stream` in a reconnect loop with exponential backoff, stopping
/// promptly once `shutdown` is signaled. Shared by every concrete `FeedSource` so the
/// backoff policy (1s -> 30s, doubling, reset on success) lives in exactly one place.
pub async fn run_with_backoff<F, Fut>(
    feed_name: &str,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
    mut connect_and_stream: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut backoff = initial_backoff();

    loop {
        if *shutdown.borrow() {
            return;
        }

        match connect_and_stream().await {
            Ok(()) => {
                info!(feed = feed_name, "feed stream ended cleanly");
                backoff = initial_backoff();
            }
            Err(e) => {
                warn!(feed = feed_name, error = %e, backoff_secs = backoff.as_secs(), "feed disconnected, reconnecting");
            }
        }

        if *shutdown.borrow() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }

        backoff = next_backoff(backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_max() {
        let mut backoff = initial_backoff();
        assert_eq!(backoff, Duration::from_secs(1));
        for _ in 0..10 {
            backoff = next_backoff(backoff);
        }
        assert_eq!(backoff, MAX_BACKOFF);
    }
}
