use std::collections::HashMap;

use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::error::BookError;
use crate::types::{Chain, TradeEvent};

/// A currently-open mirror exposure for one (wallet, token) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub wallet: String,
    pub token: String,
    pub chain: Chain,
    pub size: Decimal,
    pub avg_price: Decimal,
    pub opened_at: i64,
    pub last_update: i64,
    pub origin_tx: String,
}

type Key = (String, String);

fn key_for(wallet: &str, token: &str) -> Key {
    (wallet.to_string(), token.to_string())
}

/// The concurrency-safe position book. A single mutex guards the whole map; the
/// critical section is arithmetic/map-only, never I/O, so contention stays bounded.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: Mutex<HashMap<Key, Position>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self { positions: Mutex::new(HashMap::new()) }
    }

    /// Opens a new position sized off `event` at `mirror_ratio`. Fails if a position
    /// for `(event.wallet, event.token_out)` already exists (invariant 4).
    pub async fn open(&self, event: &TradeEvent, mirror_ratio: Decimal) -> Result<Position, BookError> {
        let key = key_for(&event.wallet, &event.token_out);
        let mut positions = self.positions.lock().await;

        if positions.contains_key(&key) {
            return Err(BookError::AlreadyOpen { wallet: key.0, token: key.1 });
        }

        let size = event.amount_out_min * mirror_ratio;
        let avg_price = event
            .price()
            .expect("TradeEvent::new guarantees amount_out_min > 0");

        let position = Position {
            wallet: event.wallet.clone(),
            token: event.token_out.clone(),
            chain: event.chain,
            size,
            avg_price,
            opened_at: event.timestamp,
            last_update: event.timestamp,
            origin_tx: event.tx_hash.clone(),
        };

        positions.insert(key, position.clone());
        Ok(position)
    }

    /// Mutates an existing position per invariant 3. Fails if no position exists for
    /// `(event.wallet, event.token_out)`.
    pub async fn update(&self, event: &TradeEvent) -> Result<Position, BookError> {
        let key = key_for(&event.wallet, &event.token_out);
        let mut positions = self.positions.lock().await;

        let position = positions
            .get_mut(&key)
            .ok_or_else(|| BookError::NotFound { wallet: key.0.clone(), token: key.1.clone() })?;

        let fill_price = event
            .price()
            .expect("TradeEvent::new guarantees amount_out_min > 0");

        let old_size = position.size;
        let new_size = old_size + event.amount_out_min;
        let new_avg = (position.avg_price * old_size + fill_price * event.amount_out_min) / new_size;

        position.size = new_size;
        position.avg_price = new_avg;
        position.last_update = event.timestamp;

        Ok(position.clone())
    }

    /// Removes and returns the position for `(wallet, token)`. Fails if absent.
    pub async fn close(&self, wallet: &str, token: &str) -> Result<Position, BookError> {
        let key = key_for(wallet, token);
        let mut positions = self.positions.lock().await;
        positions
            .remove(&key)
            .ok_or_else(|| BookError::NotFound { wallet: key.0, token: key.1 })
    }

    /// Point-in-time clone of every open position, for the risk loop to scan without
    /// holding the book lock across its (I/O-bound) balance lookups.
    pub async fn snapshot(&self) -> Vec<Position> {
        self.positions.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.positions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chain;
    use rust_decimal_macros::dec;

    fn event(amount_in: Decimal, amount_out_min: Decimal, ts: i64) -> TradeEvent {
        TradeEvent::new("leader", "TOKEN_IN", "TOKEN_X", amount_in, amount_out_min, "0xhash", ts, Chain::Evm)
            .unwrap()
    }

    #[tokio::test]
    async fn open_then_update_matches_spec_scenario_1() {
        let book = PositionBook::new();
        let mirror_ratio = dec!(0.5);

        let opened = book.open(&event(dec!(100), dec!(10), 1), mirror_ratio).await.unwrap();
        assert_eq!(opened.size, dec!(5));
        assert_eq!(opened.avg_price, dec!(10));
        assert_eq!(opened.chain, Chain::Evm);

        let updated = book.update(&event(dec!(60), dec!(5), 2)).await.unwrap();
        assert_eq!(updated.size, dec!(10));
        assert_eq!(updated.avg_price, dec!(11));
        assert_eq!(updated.opened_at, 1);
        assert_eq!(updated.last_update, 2);
    }

    #[tokio::test]
    async fn duplicate_open_fails() {
        let book = PositionBook::new();
        book.open(&event(dec!(100), dec!(10), 1), dec!(0.5)).await.unwrap();

        let err = book.open(&event(dec!(50), dec!(5), 2), dec!(0.5)).await.unwrap_err();
        assert_eq!(err, BookError::AlreadyOpen { wallet: "leader".into(), token: "TOKEN_X".into() });
    }

    #[tokio::test]
    async fn update_on_missing_key_fails() {
        let book = PositionBook::new();
        let err = book.update(&event(dec!(100), dec!(10), 1)).await.unwrap_err();
        assert_eq!(err, BookError::NotFound { wallet: "leader".into(), token: "TOKEN_X".into() });
    }

    #[tokio::test]
    async fn close_removes_and_returns_position() {
        let book = PositionBook::new();
        book.open(&event(dec!(100), dec!(10), 1), dec!(0.5)).await.unwrap();

        let closed = book.close("leader", "TOKEN_X").await.unwrap();
        assert_eq!(closed.size, dec!(5));
        assert!(book.is_empty().await);

        let err = book.close("leader", "TOKEN_X").await.unwrap_err();
        assert_eq!(err, BookError::NotFound { wallet: "leader".into(), token: "TOKEN_X".into() });
    }

    #[tokio::test]
    async fn distinct_keys_do_not_collide() {
        let book = PositionBook::new();
        book.open(&event(dec!(100), dec!(10), 1), dec!(0.5)).await.unwrap();

        let other = TradeEvent::new("leader", "IN", "TOKEN_Y", dec!(40), dec!(4), "0xhash2", 2, Chain::Evm).unwrap();
        book.open(&other, dec!(0.5)).await.unwrap();

        assert_eq!(book.len().await, 2);
    }
}
