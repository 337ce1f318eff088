use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::CoreError;

type HmacSha256 = Hmac<Sha256>;

/// Handle returned by the hosted gateway when an order is registered with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub handle: String,
    pub order_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackStatus {
    Captured,
    Failed,
}

impl CallbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackStatus::Captured => "CAPTURED",
            CallbackStatus::Failed => "FAILED",
        }
    }
}

/// Inbound confirm/fail notification from the hosted gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCallback {
    pub handle: String,
    pub payment_id: String,
    pub status: CallbackStatus,
    pub signature: String,
}

impl GatewayCallback {
    /// The exact byte string the gateway signs.
    pub fn signed_payload(&self) -> String {
        signed_payload(&self.handle, &self.payment_id, self.status)
    }
}

pub fn signed_payload(handle: &str, payment_id: &str, status: CallbackStatus) -> String {
    format!("{}|{}|{}", handle, payment_id, status.as_str())
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment gateway unreachable: {0}")]
    Unreachable(String),

    #[error("Payment gateway rejected the request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Register an order with the gateway and obtain the handle the customer pays against.
    async fn create_order(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> Result<GatewayOrder, GatewayError>;
}

/// HMAC-SHA256 signer/verifier keyed with the gateway's shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    mac: HmacSha256,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(secret: &str) -> Result<Self, CoreError> {
        if secret.is_empty() {
            return Err(CoreError::ValidationError("gateway secret must not be empty".to_string()));
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| CoreError::InternalError(format!("invalid gateway secret: {}", e)))?;
        Ok(Self { mac })
    }

    /// Hex-encoded signature of `payload`.
    pub fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a callback's signature.
    pub fn verify(&self, callback: &GatewayCallback) -> bool {
        let Ok(expected) = hex::decode(callback.signature.trim()) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(callback.signed_payload().as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

/// In-process gateway used for local development and tests.
pub struct MockPaymentGateway {
    verifier: SignatureVerifier,
    available: AtomicBool,
}

impl MockPaymentGateway {
    pub fn new(verifier: SignatureVerifier) -> Self {
        Self {
            verifier,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Build the callback the real gateway would send for `handle`.
    pub fn sign_callback(&self, handle: &str, payment_id: &str, status: CallbackStatus) -> GatewayCallback {
        GatewayCallback {
            handle: handle.to_string(),
            payment_id: payment_id.to_string(),
            status,
            signature: self.verifier.sign(&signed_payload(handle, payment_id, status)),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_order(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> Result<GatewayOrder, GatewayError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(GatewayError::Unreachable("mock gateway is offline".to_string()));
        }
        if amount < 0 {
            return Err(GatewayError::Rejected(format!("negative amount {}", amount)));
        }

        tracing::debug!(%order_id, amount, "mock gateway order created");

        Ok(GatewayOrder {
            handle: format!("gw_{}", order_id.simple()),
            order_id,
            amount,
            currency: currency.to_string(),
            created_at: Utc::now(),
        })
    }
}
