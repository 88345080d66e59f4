use rust_decimal::Decimal;

use crate::position::Position;

/// Stateless predicate deciding whether an open position must be closed.
///
/// Exit fires on drawdown (remaining value <= 10% of entry size) OR deadline
/// (age past `ttl_seconds`). A denormal/zero `position.size` degrades the
/// drawdown branch to `false` rather than panicking; the deadline branch is
/// still evaluated independently.
pub fn should_exit(position: &Position, current_wallet_balance: Decimal, ttl_seconds: i64, now: i64) -> bool {
    let drawdown_exit = if position.size > Decimal::ZERO {
        match current_wallet_balance.checked_div(position.size) {
            Some(ratio) => ratio <= Decimal::new(1, 1), // 0.1
            None => false,
        }
    } else {
        false
    };

    let deadline_exit = now - position.opened_at > ttl_seconds;

    drawdown_exit || deadline_exit
}
