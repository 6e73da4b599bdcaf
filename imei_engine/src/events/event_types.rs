use crate::{db_types::Order, reports::DeviceReport};

/// Emitted once, when an order reaches `success`. This is the hand-off to result delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderCompletedEvent {
    pub order: Order,
    pub report: Option<DeviceReport>,
    pub language: String,
}

impl OrderCompletedEvent {
    pub fn new(order: Order) -> Self {
        let report = order.report.clone();
        let language = order.language.clone();
        Self { order, report, language }
    }
}

/// Emitted once, when an order ends in `failed` or `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFailedEvent {
    pub order: Order,
    pub reason: String,
    /// Whether a refund was written together with the failure
    pub refunded: bool,
}

impl OrderFailedEvent {
    pub fn new(order: Order, refunded: bool) -> Self {
        let reason = order.failure_reason.clone().unwrap_or_else(|| "unknown".to_string());
        Self { order, reason, refunded }
    }
}

/// Emitted when a guest order's payment is confirmed for the first time.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentConfirmedEvent {
    pub order: Order,
}

impl PaymentConfirmedEvent {
    pub fn new(order: Order) -> Self {
        Self { order }
    }
}
