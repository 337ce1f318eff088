use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::{AppState, AuthConfig};

pub const ROLE_CUSTOMER: &str = "CUSTOMER";
pub const ROLE_SELLER: &str = "SELLER";
pub const ROLE_ADMIN: &str = "ADMIN";

// ============================================================================
// JWT Claims
// ============================================================================

/// Tokens are issued by the identity service; `sub` is the customer or staff id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

impl Claims {
    pub fn subject_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::AuthenticationError("Token subject is not an id".to_string()))
    }
}

/// Signs claims for `subject`. Used by tests and local tooling.
pub fn issue_token(auth: &AuthConfig, subject: Uuid, role: &str) -> Result<String, AppError> {
    let claims = Claims {
        sub: subject.to_string(),
        role: role.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::seconds(auth.expiration as i64)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(auth.secret.as_bytes()))
        .map_err(|e| AppError::InternalServerError(format!("Token encoding failed: {}", e)))
}

fn authorize(state: &AppState, req: &Request, allowed: &[&str]) -> Result<Claims, StatusCode> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    if !allowed.contains(&token_data.claims.role.as_str()) {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(token_data.claims)
}

// ============================================================================
// Role middlewares
// ============================================================================

pub async fn customer_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let claims = authorize(&state, &req, &[ROLE_CUSTOMER])?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub async fn seller_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let claims = authorize(&state, &req, &[ROLE_SELLER, ROLE_ADMIN])?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let claims = authorize(&state, &req, &[ROLE_ADMIN])?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
