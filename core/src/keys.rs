//! Shared-store key layout.
//!
//! Every backend builds keys through these helpers so the Redis scripts, the
//! in-memory store and operational tooling agree on names.

use crate::types::{CustomerId, VoucherId};
use chrono::{DateTime, Utc};

/// Remaining stock counter for a voucher.
#[must_use]
pub fn stock_key(voucher_id: VoucherId) -> String {
    format!("seckill:stock:{voucher_id}")
}

/// Set of customers admitted for a voucher.
#[must_use]
pub fn purchase_key(voucher_id: VoucherId) -> String {
    format!("seckill:order:{voucher_id}")
}

/// Hash holding the sale window (`begin`/`end`, epoch millis).
#[must_use]
pub fn window_key(voucher_id: VoucherId) -> String {
    format!("seckill:window:{voucher_id}")
}

/// Per-customer persistence lock.
#[must_use]
pub fn order_lock_key(customer_id: CustomerId) -> String {
    format!("lock:order:{customer_id}")
}

/// Daily id sequence counter: `icr:{namespace}:{yyyyMMdd}`.
#[must_use]
pub fn id_counter_key(namespace: &str, at: DateTime<Utc>) -> String {
    format!("icr:{namespace}:{}", at.format("%Y%m%d"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn key_layout() {
        let voucher = VoucherId::new(10);
        assert_eq!(stock_key(voucher), "seckill:stock:10");
        assert_eq!(purchase_key(voucher), "seckill:order:10");
        assert_eq!(window_key(voucher), "seckill:window:10");
        assert_eq!(order_lock_key(CustomerId::new(1010)), "lock:order:1010");
    }

    #[test]
    fn id_counter_key_is_per_day() {
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 23, 59, 59).unwrap();
        assert_eq!(id_counter_key("order", at), "icr:order:20250307");

        let next = at + chrono::Duration::seconds(1);
        assert_eq!(id_counter_key("order", next), "icr:order:20250308");
    }
}
