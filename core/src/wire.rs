//! Queue entry wire shape.
//!
//! An [`OrderIntent`] travels on the queue as a flat field map
//! `{id, userId, voucherId, createdAt}`; `createdAt` is epoch milliseconds.

use crate::error::{Result, SeckillError};
use crate::types::{CustomerId, OrderId, OrderIntent, VoucherId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

/// Field holding the order id.
pub const FIELD_ORDER_ID: &str = "id";
/// Field holding the customer id.
pub const FIELD_CUSTOMER_ID: &str = "userId";
/// Field holding the voucher id.
pub const FIELD_VOUCHER_ID: &str = "voucherId";
/// Field holding the admission time.
pub const FIELD_CREATED_AT: &str = "createdAt";

/// Opaque, queue-assigned entry id (`{millis}-{seq}` for streams).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub String);

impl EntryId {
    /// Wrap a queue-assigned id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One delivered queue entry: its id and raw field map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Entry id, used to acknowledge.
    pub id: EntryId,
    /// Raw fields as stored on the log.
    pub fields: HashMap<String, String>,
}

impl QueueEntry {
    /// Build an entry from an intent (used by in-process queues).
    #[must_use]
    pub fn from_intent(id: EntryId, intent: &OrderIntent) -> Self {
        let fields = intent
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self { id, fields }
    }

    /// Decode the field map into an order intent.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::MalformedEntry`] when a field is missing or unparsable.
    pub fn decode(&self) -> Result<OrderIntent> {
        OrderIntent::from_fields(&self.fields).map_err(|reason| SeckillError::MalformedEntry {
            entry_id: self.id.to_string(),
            reason,
        })
    }
}

impl OrderIntent {
    /// Encode as the flat wire field map, in wire order.
    #[must_use]
    pub fn to_fields(&self) -> [(&'static str, String); 4] {
        [
            (FIELD_CUSTOMER_ID, self.customer_id.to_string()),
            (FIELD_VOUCHER_ID, self.voucher_id.to_string()),
            (FIELD_ORDER_ID, self.order_id.to_string()),
            (FIELD_CREATED_AT, self.created_at.timestamp_millis().to_string()),
        ]
    }

    /// Decode from a wire field map.
    ///
    /// # Errors
    ///
    /// Returns a description of the first missing or unparsable field.
    pub fn from_fields(fields: &HashMap<String, String>) -> std::result::Result<Self, String> {
        let order_id: u64 = parse_field(fields, FIELD_ORDER_ID)?;
        let customer_id: u64 = parse_field(fields, FIELD_CUSTOMER_ID)?;
        let voucher_id: u64 = parse_field(fields, FIELD_VOUCHER_ID)?;
        let millis: i64 = parse_field(fields, FIELD_CREATED_AT)?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| format!("{FIELD_CREATED_AT} out of range: {millis}"))?;

        Ok(Self {
            order_id: OrderId::new(order_id),
            customer_id: CustomerId::new(customer_id),
            voucher_id: VoucherId::new(voucher_id),
            created_at,
        })
    }
}

fn parse_field<T: std::str::FromStr>(
    fields: &HashMap<String, String>,
    name: &str,
) -> std::result::Result<T, String> {
    let raw = fields
        .get(name)
        .ok_or_else(|| format!("missing field {name}"))?;
    raw.trim()
        .parse()
        .map_err(|_| format!("invalid {name}: {raw:?}"))
}
