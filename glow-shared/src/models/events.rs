use uuid::Uuid;

pub const ORDER_COMPLETED_TOPIC: &str = "orders.completed";
pub const ORDER_FAILED_TOPIC: &str = "orders.failed";
pub const ORDER_REFUNDED_TOPIC: &str = "orders.refunded";

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderCompletedEvent {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub channel: String,
    pub payment_method: String,
    pub total: i64,
    pub coupon_id: Option<Uuid>,
    pub points_redeemed: i64,
    pub points_earned: i64,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderFailedEvent {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub reason: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderRefundedEvent {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub total: i64,
    pub points_restored: i64,
    pub points_clawed_back: i64,
    pub timestamp: i64,
}

/// Envelope used by event sinks so a single publisher can carry every order event.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEvent {
    Completed(OrderCompletedEvent),
    Failed(OrderFailedEvent),
    Refunded(OrderRefundedEvent),
}

impl OrderEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            OrderEvent::Completed(_) => ORDER_COMPLETED_TOPIC,
            OrderEvent::Failed(_) => ORDER_FAILED_TOPIC,
            OrderEvent::Refunded(_) => ORDER_REFUNDED_TOPIC,
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            OrderEvent::Completed(e) => e.order_id,
            OrderEvent::Failed(e) => e.order_id,
            OrderEvent::Refunded(e) => e.order_id,
        }
    }
}
