use glow_catalog::{IneligibleReason, PricingError};
use glow_core::payment::GatewayError;
use serde::Serialize;
use uuid::Uuid;

use crate::ledger::LedgerError;
use crate::manager::OrderError;
use crate::repository::StoreError;

/// Failure classes callers act on.
///
/// Validation and Eligibility are returned before anything is written and can
/// be retried after fixing the input. Conflict means the transaction rolled
/// back and the cart should be re-priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Eligibility,
    Conflict,
    External,
    NotFound,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Invalid quantity for product {0}")]
    InvalidQuantity(Uuid),

    #[error("Points to redeem must not be negative: {0}")]
    NegativePoints(i64),

    #[error("Unknown shipping method: {0}")]
    UnknownShippingMethod(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(Uuid),

    #[error("Product unavailable: {0}")]
    ProductUnavailable(Uuid),

    #[error("Coupon cannot be applied: {0}")]
    CouponIneligible(IneligibleReason),

    #[error("Insufficient points: requested {requested}, available {available}")]
    InsufficientPoints { requested: i64, available: i64 },

    #[error("Points worth {requested} exceed the amount due of {max}")]
    PointsExceedAmountDue { requested: i64, max: i64 },

    #[error("Coupon has already been used")]
    CouponAlreadyUsed,

    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i64,
        available: i64,
    },

    #[error("Invalid gateway signature")]
    InvalidSignature,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] OrderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CheckoutError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckoutError::EmptyCart
            | CheckoutError::InvalidQuantity(_)
            | CheckoutError::NegativePoints(_)
            | CheckoutError::UnknownShippingMethod(_)
            | CheckoutError::InvalidRequest(_) => ErrorKind::Validation,
            CheckoutError::ProductUnavailable(_)
            | CheckoutError::CouponIneligible(_)
            | CheckoutError::InsufficientPoints { .. }
            | CheckoutError::PointsExceedAmountDue { .. } => ErrorKind::Eligibility,
            CheckoutError::CouponAlreadyUsed
            | CheckoutError::InsufficientStock { .. }
            | CheckoutError::InvalidTransition(_) => ErrorKind::Conflict,
            CheckoutError::InvalidSignature | CheckoutError::Gateway(_) => ErrorKind::External,
            CheckoutError::CustomerNotFound(_) | CheckoutError::OrderNotFound(_) => ErrorKind::NotFound,
            CheckoutError::Store(StoreError::Duplicate(_)) | CheckoutError::Store(StoreError::Overdraft(_)) => {
                ErrorKind::Conflict
            }
            CheckoutError::Store(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable reason for clients
    pub fn code(&self) -> &'static str {
        match self {
            CheckoutError::EmptyCart => "empty_cart",
            CheckoutError::InvalidQuantity(_) => "invalid_quantity",
            CheckoutError::NegativePoints(_) => "negative_points",
            CheckoutError::UnknownShippingMethod(_) => "unknown_shipping_method",
            CheckoutError::InvalidRequest(_) => "invalid_request",
            CheckoutError::CustomerNotFound(_) => "customer_not_found",
            CheckoutError::ProductUnavailable(_) => "product_unavailable",
            CheckoutError::CouponIneligible(reason) => reason.code(),
            CheckoutError::InsufficientPoints { .. } => "insufficient_points",
            CheckoutError::PointsExceedAmountDue { .. } => "points_exceed_amount_due",
            CheckoutError::CouponAlreadyUsed => "already_used",
            CheckoutError::InsufficientStock { .. } => "insufficient_stock",
            CheckoutError::InvalidSignature => "invalid_signature",
            CheckoutError::Gateway(_) => "gateway_unavailable",
            CheckoutError::OrderNotFound(_) => "order_not_found",
            CheckoutError::InvalidTransition(_) => "invalid_transition",
            CheckoutError::Store(StoreError::Duplicate(_)) => "duplicate",
            CheckoutError::Store(StoreError::Overdraft(_)) => "ledger_overdraft",
            CheckoutError::Store(_) => "internal",
        }
    }
}

impl From<PricingError> for CheckoutError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::EmptyCart => CheckoutError::EmptyCart,
            PricingError::InvalidQuantity(id) => CheckoutError::InvalidQuantity(id),
            PricingError::NegativePrice(id) => CheckoutError::ProductUnavailable(id),
            PricingError::NegativePoints(points) => CheckoutError::NegativePoints(points),
            PricingError::CouponIneligible(reason) => CheckoutError::CouponIneligible(reason),
            PricingError::InsufficientPoints { requested, available } => {
                CheckoutError::InsufficientPoints { requested, available }
            }
            PricingError::PointsExceedAmountDue { requested, max } => {
                CheckoutError::PointsExceedAmountDue { requested, max }
            }
            PricingError::UnknownShippingMethod(method) => CheckoutError::UnknownShippingMethod(method),
            PricingError::Overflow => CheckoutError::InvalidRequest("order amount out of range".to_string()),
        }
    }
}

impl From<LedgerError> for CheckoutError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Overdraft { balance, requested } => CheckoutError::InsufficientPoints {
                requested,
                available: balance.max(0),
            },
            LedgerError::NegativePoints(points) => CheckoutError::NegativePoints(points),
        }
    }
}
