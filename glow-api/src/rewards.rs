use axum::{extract::State, routing::get, Extension, Json, Router};
use glow_order::{CustomerSummary, LedgerEntry};

use crate::error::AppError;
use crate::middleware::Claims;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/rewards", get(summary))
        .route("/v1/rewards/history", get(history))
}

/// GET /v1/rewards
async fn summary(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<CustomerSummary>, AppError> {
    Ok(Json(state.finalizer.customer_summary(claims.subject_id()?).await?))
}

/// GET /v1/rewards/history
async fn history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<LedgerEntry>>, AppError> {
    Ok(Json(state.finalizer.ledger_history(claims.subject_id()?).await?))
}
