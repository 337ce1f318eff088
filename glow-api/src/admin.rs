use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use glow_catalog::{Coupon, CouponKind, CouponScope};
use glow_order::{RefundOutcome, SweepReport};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use crate::worker;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateCouponRequest {
    pub code: String,
    pub description: Option<String>,
    pub kind: CouponKind,
    pub scope: CouponScope,
    #[serde(default)]
    pub min_order_amount: i64,
    pub usage_limit: Option<u32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl CreateCouponRequest {
    fn into_coupon(self) -> Coupon {
        let mut coupon = Coupon::new(&self.code, self.kind, self.scope);
        coupon.description = self.description;
        coupon.min_order_amount = self.min_order_amount;
        if let Some(limit) = self.usage_limit {
            coupon.usage_limit = limit;
        }
        if let Some(from) = self.valid_from {
            coupon.valid_from = from;
        }
        coupon.valid_until = self.valid_until;
        coupon
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/coupons", post(create_coupon))
        .route("/v1/admin/orders/{id}/refund", post(refund_order))
        .route("/v1/admin/sweep", post(sweep_now))
}

/// POST /v1/admin/coupons
async fn create_coupon(
    State(state): State<AppState>,
    Json(req): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<Coupon>), AppError> {
    let coupon = state.finalizer.create_coupon(req.into_coupon()).await?;
    Ok((StatusCode::CREATED, Json(coupon)))
}

/// POST /v1/admin/orders/{id}/refund
async fn refund_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RefundOutcome>, AppError> {
    Ok(Json(state.finalizer.refund(id).await?))
}

/// POST /v1/admin/sweep
/// Runs the pending-payment sweep immediately.
async fn sweep_now(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    let timeout = worker::pending_timeout(&state.business_rules);
    let report = worker::sweep_once(&state.finalizer, timeout).await?;
    Ok(Json(report))
}
