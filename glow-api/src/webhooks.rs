use axum::{extract::State, routing::post, Json, Router};
use glow_core::payment::GatewayCallback;
use glow_order::{CheckoutError, PaymentUpdate};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments", post(handle_payment_webhook))
}

/// POST /v1/webhooks/payments
/// Signed capture/failure notifications from the payment gateway.
async fn handle_payment_webhook(
    State(state): State<AppState>,
    Json(callback): Json<GatewayCallback>,
) -> Result<Json<PaymentUpdate>, AppError> {
    tracing::info!(handle = %callback.handle, status = callback.status.as_str(), "received payment webhook");

    match state.finalizer.confirm_payment(&callback).await {
        Ok(update) => Ok(Json(update)),
        Err(CheckoutError::InvalidSignature) => {
            Err(AppError::AuthenticationError("Invalid gateway signature".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
