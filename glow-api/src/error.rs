use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use glow_order::{CheckoutError, ErrorKind, SaleError};
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    ValidationError(String),
    NotFoundError(String),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Eligibility => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::External => StatusCode::BAD_GATEWAY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Domain errors arrive wrapped in `anyhow` through the blanket `From`.
fn classify(err: &anyhow::Error) -> Option<(ErrorKind, &'static str)> {
    if let Some(e) = err.downcast_ref::<CheckoutError>() {
        return Some((e.kind(), e.code()));
    }
    if let Some(e) = err.downcast_ref::<SaleError>() {
        return Some((e.kind(), e.code()));
    }
    None
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, "unauthenticated", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", "Internal Server Error".to_string())
            }
            AppError::Anyhow(err) => match classify(&err) {
                Some((ErrorKind::Internal, code)) => {
                    tracing::error!("Internal Server Error: {:#}", err);
                    (StatusCode::INTERNAL_SERVER_ERROR, code, "Internal Server Error".to_string())
                }
                Some((kind, code)) => {
                    tracing::debug!(code, "request rejected: {}", err);
                    (status_for(kind), code, err.to_string())
                }
                None => {
                    tracing::error!("Internal Server Error: {:#}", err);
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal", "Internal Server Error".to_string())
                }
            },
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Anyhow(err.into())
    }
}
