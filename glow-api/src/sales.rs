use axum::{
    extract::{Path, State},
    routing::post,
    Extension, Json, Router,
};
use glow_order::{CheckoutLine, Order, PendingSaleTicket, StartSaleRequest};
use glow_shared::pii::Masked;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::Claims;
use crate::state::AppState;

fn default_counter_shipping() -> String {
    "in_store".to_string()
}

#[derive(Debug, Deserialize)]
pub struct StartSaleBody {
    pub customer_phone: Masked<String>,
    pub lines: Vec<CheckoutLine>,
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub points_to_redeem: i64,
    #[serde(default = "default_counter_shipping")]
    pub shipping_method: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmSaleBody {
    pub code: Masked<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/pos/sales", post(start_sale))
        .route("/v1/pos/sales/{id}/confirm", post(confirm_sale))
}

/// POST /v1/pos/sales
/// Quotes a counter sale and texts the customer a one-time code.
async fn start_sale(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<StartSaleBody>,
) -> Result<Json<PendingSaleTicket>, AppError> {
    let ticket = state
        .sales
        .start_sale(StartSaleRequest {
            seller_id: claims.subject_id()?,
            customer_phone: body.customer_phone.into_inner(),
            lines: body.lines,
            coupon_code: body.coupon_code,
            points_to_redeem: body.points_to_redeem,
            shipping_method: body.shipping_method,
        })
        .await?;
    Ok(Json(ticket))
}

/// POST /v1/pos/sales/{id}/confirm
async fn confirm_sale(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(body): Json<ConfirmSaleBody>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .sales
        .confirm_sale(claims.subject_id()?, id, body.code.expose())
        .await?;
    Ok(Json(order))
}
