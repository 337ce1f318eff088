use async_trait::async_trait;
use chrono::Utc;
use glow_shared::models::events::{OrderCompletedEvent, OrderEvent, OrderFailedEvent, OrderRefundedEvent};

use crate::models::Order;

/// Downstream publication of order lifecycle changes.
///
/// Called after commit. A publish failure is logged by the caller and never
/// undoes the committed order.
#[async_trait]
pub trait OrderEventSink: Send + Sync {
    async fn publish(&self, event: OrderEvent) -> Result<(), String>;
}

/// Sink for local runs without a broker.
pub struct LoggingEventSink;

#[async_trait]
impl OrderEventSink for LoggingEventSink {
    async fn publish(&self, event: OrderEvent) -> Result<(), String> {
        tracing::info!(topic = event.topic(), order_id = %event.order_id(), "order event");
        Ok(())
    }
}

pub fn completed(order: &Order) -> OrderEvent {
    OrderEvent::Completed(OrderCompletedEvent {
        order_id: order.id,
        customer_id: order.customer_id,
        channel: order.channel.as_str().to_string(),
        payment_method: order.payment.method.as_str().to_string(),
        total: order.pricing.total,
        coupon_id: order.coupon_id(),
        points_redeemed: order.points_redeemed,
        points_earned: order.points_earned,
        timestamp: Utc::now().timestamp(),
    })
}

pub fn failed(order: &Order, reason: &str) -> OrderEvent {
    OrderEvent::Failed(OrderFailedEvent {
        order_id: order.id,
        customer_id: order.customer_id,
        reason: reason.to_string(),
        timestamp: Utc::now().timestamp(),
    })
}

pub fn refunded(order: &Order, points_restored: i64, points_clawed_back: i64) -> OrderEvent {
    OrderEvent::Refunded(OrderRefundedEvent {
        order_id: order.id,
        customer_id: order.customer_id,
        total: order.pricing.total,
        points_restored,
        points_clawed_back,
        timestamp: Utc::now().timestamp(),
    })
}
