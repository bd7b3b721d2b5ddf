//! Domain types for flash-sale admission and persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// The raw identifier.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a seckill voucher (the sale).
    VoucherId
);
numeric_id!(
    /// Identifier of an authenticated customer.
    CustomerId
);
numeric_id!(
    /// Globally unique order identifier produced by the id generator.
    OrderId
);

/// Inclusive begin/end bounds of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleWindow {
    /// First instant at which admissions are accepted.
    pub begin: DateTime<Utc>,
    /// Last instant at which admissions are accepted.
    pub end: DateTime<Utc>,
}

impl SaleWindow {
    /// Create a window; returns `None` when `end` precedes `begin`.
    #[must_use]
    pub fn new(begin: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (end >= begin).then_some(Self { begin, end })
    }

    /// Whether `now` falls inside the window (both bounds inclusive).
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        now >= self.begin && now <= self.end
    }
}

/// Immutable definition of a flash sale, owned by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeckillSale {
    /// Voucher being sold.
    pub voucher_id: VoucherId,
    /// Total stock at sale start.
    pub stock: u32,
    /// Sale window.
    pub window: SaleWindow,
}

/// Admission record carried from the gate to the persister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Pre-generated order id.
    pub order_id: OrderId,
    /// Buyer.
    pub customer_id: CustomerId,
    /// Voucher bought.
    pub voucher_id: VoucherId,
    /// Admission time.
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a persisted order.
///
/// Only `Unpaid` is produced by this pipeline; the other states belong to the
/// payment collaborator and exist so rows written by it can be read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Created, waiting for payment.
    Unpaid,
    /// Paid by the customer.
    Paid,
    /// Voucher redeemed.
    Redeemed,
    /// Cancelled before payment.
    Cancelled,
}

impl OrderStatus {
    /// Database representation.
    #[must_use]
    pub const fn code(self) -> i16 {
        match self {
            Self::Unpaid => 1,
            Self::Paid => 2,
            Self::Redeemed => 3,
            Self::Cancelled => 4,
        }
    }

    /// Parse the database representation.
    #[must_use]
    pub const fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(Self::Unpaid),
            2 => Some(Self::Paid),
            3 => Some(Self::Redeemed),
            4 => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// The canonical durable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedOrder {
    /// Order id issued at admission.
    pub order_id: OrderId,
    /// Buyer.
    pub customer_id: CustomerId,
    /// Voucher bought.
    pub voucher_id: VoucherId,
    /// Current status.
    pub status: OrderStatus,
    /// Admission time.
    pub created_at: DateTime<Utc>,
}

impl PersistedOrder {
    /// Build the initial (unpaid) order for an admitted intent.
    #[must_use]
    pub const fn from_intent(intent: &OrderIntent) -> Self {
        Self {
            order_id: intent.order_id,
            customer_id: intent.customer_id,
            voucher_id: intent.voucher_id,
            status: OrderStatus::Unpaid,
            created_at: intent.created_at,
        }
    }
}

/// Input to the atomic admission step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionRequest {
    /// Intent to enqueue if admitted.
    pub intent: OrderIntent,
    /// Time used for the window checks.
    pub now: DateTime<Utc>,
}

/// Status code returned by the atomic admission step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionStatus {
    /// Stock decremented, customer recorded, intent enqueued.
    Admitted,
    /// No stock left.
    OutOfStock,
    /// Customer already admitted for this voucher.
    DuplicatePurchase,
    /// Window not yet open.
    NotStarted,
    /// Window closed.
    Ended,
    /// No sale snapshot in the shared store.
    SaleNotFound,
}

impl AdmissionStatus {
    /// Wire code used by the admission script.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Admitted => 0,
            Self::OutOfStock => 1,
            Self::DuplicatePurchase => 2,
            Self::NotStarted => 3,
            Self::Ended => 4,
            Self::SaleNotFound => 5,
        }
    }

    /// Parse a script result code.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Admitted),
            1 => Some(Self::OutOfStock),
            2 => Some(Self::DuplicatePurchase),
            3 => Some(Self::NotStarted),
            4 => Some(Self::Ended),
            5 => Some(Self::SaleNotFound),
            _ => None,
        }
    }
}

/// User-facing reason for refusing an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    /// The sale has not started.
    NotStarted,
    /// The sale is over.
    Ended,
    /// Stock exhausted.
    OutOfStock,
    /// One order per customer per voucher.
    DuplicatePurchase,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::NotStarted => "sale has not started",
            Self::Ended => "sale has ended",
            Self::OutOfStock => "out of stock",
            Self::DuplicatePurchase => "customer already ordered this voucher",
        };
        f.write_str(reason)
    }
}

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Admission {
    /// Admitted; the order will be persisted asynchronously.
    Admitted(OrderId),
    /// Refused without touching stock or the purchase record.
    Rejected(Rejection),
}

impl Admission {
    /// The order id, when admitted.
    #[must_use]
    pub const fn order_id(&self) -> Option<OrderId> {
        match self {
            Self::Admitted(id) => Some(*id),
            Self::Rejected(_) => None,
        }
    }

    /// Whether the request was admitted.
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }
}
