use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::execution::Quote;

const TTL: Duration = Duration::from_secs(2);

type CacheKey = (String, String, Decimal);

struct Entry {
    quote: Quote,
    inserted_at: Instant,
}

/// Short-TTL quote cache sitting in front of a `QuoteOracle`, absorbing repeated
/// lookups within a single burst of leader activity. A miss (including an expired
/// hit) always falls through to a live quote; this is an optimization, never a
/// correctness requirement.
pub struct QuoteCache {
    inner: Mutex<LruCache<CacheKey, Entry>>,
}

impl QuoteCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(64).unwrap());
        Self { inner: Mutex::new(LruCache::new(capacity)) }
    }

    pub async fn get(&self, sell_token: &str, buy_token: &str, sell_amount: Decimal) -> Option<Quote> {
        let key = (sell_token.to_string(), buy_token.to_string(), sell_amount);
        let mut cache = self.inner.lock().await;
        match cache.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() < TTL => Some(entry.quote.clone()),
            Some(_) => {
                cache.pop(&key);
                None
            }
            None => None,
        }
    }

    pub async fn put(&self, sell_token: &str, buy_token: &str, sell_amount: Decimal, quote: Quote) {
        let key = (sell_token.to_string(), buy_token.to_string(), sell_amount);
        let mut cache = self.inner.lock().await;
        cache.put(key, Entry { quote, inserted_at: Instant::now() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote() -> Quote {
        Quote {
            target: "0xrouter".into(),
            calldata: vec![1, 2, 3],
            value: Decimal::ZERO,
            max_fee_per_gas: None,
            base_fee: None,
            gas_price: None,
            chain_id: 1,
            price: dec!(1.0),
            guaranteed_price: None,
            price_impact_pct: dec!(0.1),
            out_amount: dec!(100),
            in_amount: dec!(100),
        }
    }

    #[tokio::test]
    async fn hit_returns_cached_quote() {
        let cache = QuoteCache::new(16);
        cache.put("IN", "OUT", dec!(100), quote()).await;
        let hit = cache.get("IN", "OUT", dec!(100)).await;
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn miss_on_different_key() {
        let cache = QuoteCache::new(16);
        cache.put("IN", "OUT", dec!(100), quote()).await;
        assert!(cache.get("IN", "OUT", dec!(200)).await.is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_treated_as_a_miss() {
        let cache = QuoteCache::new(16);
        cache.put("IN", "OUT", dec!(100), quote()).await;
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(cache.get("IN", "OUT", dec!(100)).await.is_none());
    }
}
