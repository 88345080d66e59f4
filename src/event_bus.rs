use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::types::TradeEvent;

/// Bounded FIFO queue of `TradeEvent`s, one per chain. Drop-oldest back-pressure:
/// freshness beats completeness for a mirror bot.
pub struct EventBus {
    capacity: usize,
    queue: Mutex<VecDeque<TradeEvent>>,
    notify: Notify,
    dropped: std::sync::atomic::AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Enqueues `event`, bounding the wait for the internal lock to 1s. If the lock
    /// cannot be acquired in time, or the queue is full, the event (the incoming one,
    /// or whichever is oldest) is dropped and a warning recorded.
    pub async fn push(&self, event: TradeEvent) {
        let locked = tokio::time::timeout(Duration::from_secs(1), self.queue.lock()).await;

        let mut queue = match locked {
            Ok(guard) => guard,
            Err(_) => {
                warn!(tx_hash = %event.tx_hash, "event bus enqueue timed out after 1s, dropping event");
                self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return;
            }
        };

        if queue.len() >= self.capacity {
            if let Some(oldest) = queue.pop_front() {
                warn!(
                    dropped_tx_hash = %oldest.tx_hash,
                    incoming_tx_hash = %event.tx_hash,
                    "event bus full, dropping oldest event"
                );
                self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }

        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    /// Dequeues the oldest event, waiting if the queue is currently empty.
    pub async fn pop(&self) -> TradeEvent {
        loop {
            {
                let mut queue = self.queue.lock().await;
                if let Some(event) = queue.pop_front() {
                    return event;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}
