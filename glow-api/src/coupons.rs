use axum::{
    extract::{Query, State},
    routing::get,
    Extension, Json, Router,
};
use glow_catalog::Coupon;
use serde::Deserialize;

use crate::error::AppError;
use crate::middleware::Claims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EligibleQuery {
    pub subtotal: i64,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/coupons/eligible", get(eligible_coupons))
}

/// GET /v1/coupons/eligible?subtotal=...
async fn eligible_coupons(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<EligibleQuery>,
) -> Result<Json<Vec<Coupon>>, AppError> {
    if query.subtotal < 0 {
        return Err(AppError::ValidationError("Subtotal must not be negative".to_string()));
    }
    let coupons = state
        .finalizer
        .eligible_coupons(claims.subject_id()?, query.subtotal)
        .await?;
    Ok(Json(coupons))
}
