use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use glow_catalog::PricingResult;
use glow_order::{
    CheckoutLine, CheckoutOutcome, CheckoutRequest, Order, PaymentMethod, QuoteRequest, SalesChannel, ShippingAddress,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::Claims;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

/// Cart body. The customer comes from the token, never the body.
#[derive(Debug, Deserialize)]
pub struct CartBody {
    pub lines: Vec<CheckoutLine>,
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub points_to_redeem: i64,
    pub shipping_method: String,
}

impl CartBody {
    fn into_quote(self, customer_id: Uuid) -> QuoteRequest {
        QuoteRequest {
            customer_id,
            channel: SalesChannel::Storefront,
            lines: self.lines,
            coupon_code: self.coupon_code,
            points_to_redeem: self.points_to_redeem,
            shipping_method: self.shipping_method,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    #[serde(flatten)]
    pub cart: CartBody,
    pub payment_method: PaymentMethod,
    pub address: Option<ShippingAddress>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/checkout/quote", post(quote))
        .route("/v1/checkout", post(checkout))
        .route("/v1/orders", get(list_orders))
        .route("/v1/orders/{id}", get(get_order))
        .route("/v1/orders/{id}/cancel", post(cancel_order))
}

/// POST /v1/checkout/quote
async fn quote(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<CartBody>,
) -> Result<Json<PricingResult>, AppError> {
    let request = body.into_quote(claims.subject_id()?);
    Ok(Json(state.finalizer.quote(&request).await?))
}

/// POST /v1/checkout
async fn checkout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<CheckoutOutcome>, AppError> {
    let request = CheckoutRequest {
        cart: body.cart.into_quote(claims.subject_id()?),
        payment_method: body.payment_method,
        address: body.address,
    };
    Ok(Json(state.finalizer.finalize(&request).await?))
}

/// GET /v1/orders
async fn list_orders(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.finalizer.list_orders(claims.subject_id()?).await?))
}

/// GET /v1/orders/{id}
async fn get_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state.finalizer.get_order(id).await?;
    // Someone else's order looks exactly like a missing one
    if order.customer_id != claims.subject_id()? {
        return Err(AppError::NotFoundError(format!("Order not found: {}", id)));
    }
    Ok(Json(order))
}

/// POST /v1/orders/{id}/cancel
async fn cancel_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.finalizer.cancel_order(claims.subject_id()?, id).await?))
}
