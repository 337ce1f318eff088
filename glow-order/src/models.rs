use chrono::{DateTime, Utc};
use glow_catalog::{CartLine, PricingResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Draft,
    Pending,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "DRAFT",
            OrderStatus::Pending => "PENDING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DRAFT" => Some(OrderStatus::Draft),
            "PENDING" => Some(OrderStatus::Pending),
            "COMPLETED" => Some(OrderStatus::Completed),
            "FAILED" => Some(OrderStatus::Failed),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "REFUNDED" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }

    /// Statuses whose coupon reference counts towards the usage limit.
    pub fn holds_coupon(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Completed | OrderStatus::Refunded)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    CashOnDelivery,
    Gateway,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "CASH_ON_DELIVERY",
            PaymentMethod::Gateway => "GATEWAY",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CASH_ON_DELIVERY" => Some(PaymentMethod::CashOnDelivery),
            "GATEWAY" => Some(PaymentMethod::Gateway),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(PaymentStatus::Pending),
            "COMPLETED" => Some(PaymentStatus::Completed),
            "FAILED" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// Where the order was placed. Selects the cashback rate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalesChannel {
    Storefront,
    PointOfSale,
}

impl SalesChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalesChannel::Storefront => "STOREFRONT",
            SalesChannel::PointOfSale => "POINT_OF_SALE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "STOREFRONT" => Some(SalesChannel::Storefront),
            "POINT_OF_SALE" => Some(SalesChannel::PointOfSale),
            _ => None,
        }
    }
}

/// Snapshot of a cart line at checkout time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub unit_price: i64,
    pub quantity: u32,
}

impl OrderItem {
    pub fn line_total(&self) -> i64 {
        self.unit_price.saturating_mul(i64::from(self.quantity))
    }

    pub fn as_cart_line(&self) -> CartLine {
        CartLine {
            product_id: self.product_id,
            unit_price: self.unit_price,
            quantity: self.quantity,
        }
    }
}

/// Frozen money breakdown. Never recomputed once the order exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OrderPricing {
    pub subtotal: i64,
    pub discount: i64,
    pub points_value: i64,
    pub shipping: i64,
    pub tax: i64,
    pub total: i64,
}

impl From<&PricingResult> for OrderPricing {
    fn from(result: &PricingResult) -> Self {
        Self {
            subtotal: result.subtotal,
            discount: result.discount,
            points_value: result.points_value,
            shipping: result.shipping,
            tax: result.tax,
            total: result.total,
        }
    }
}

/// The coupon an order was placed with, and what it was worth at the time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CouponRef {
    pub coupon_id: Uuid,
    pub code: String,
    pub discount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payment {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub gateway_handle: Option<String>,
    pub gateway_payment_id: Option<String>,
}

impl Payment {
    pub fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            status: PaymentStatus::Pending,
            gateway_handle: None,
            gateway_payment_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShippingAddress {
    pub recipient: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

/// A placed order and its frozen pricing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub channel: SalesChannel,
    pub items: Vec<OrderItem>,
    pub pricing: OrderPricing,
    pub coupon: Option<CouponRef>,
    pub points_redeemed: i64,
    pub points_earned: i64,
    pub payment: Payment,
    pub shipping_method: String,
    pub address: Option<ShippingAddress>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(customer_id: Uuid, channel: SalesChannel, method: PaymentMethod) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            customer_id,
            channel,
            items: Vec::new(),
            pricing: OrderPricing::default(),
            coupon: None,
            points_redeemed: 0,
            points_earned: 0,
            payment: Payment::new(method),
            shipping_method: String::new(),
            address: None,
            status: OrderStatus::Draft,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn coupon_id(&self) -> Option<Uuid> {
        self.coupon.as_ref().map(|c| c.coupon_id)
    }

    pub fn update_status(&mut self, new_status: OrderStatus) {
        self.status = new_status;
        self.updated_at = Utc::now();
        if new_status == OrderStatus::Completed {
            self.completed_at = Some(self.updated_at);
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, OrderStatus::Draft | OrderStatus::Pending)
    }
}
