use async_trait::async_trait;
use glow_shared::pii::{normalize_phone, Masked};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreError;

/// Identity-service view of a customer.
///
/// `reward_points` is a projection of the point ledger, refreshed in the same
/// transaction as every ledger append. It is never written on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<Masked<String>>,
    pub reward_points: i64,
}

impl Customer {
    pub fn new(id: Uuid, name: impl Into<String>, phone: Option<String>) -> Self {
        Self {
            id,
            name: name.into(),
            phone: phone.map(Masked::new),
            reward_points: 0,
        }
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_ref().map(|p| p.expose().as_str())
    }

    /// Whether `phone` refers to this customer, ignoring formatting.
    pub fn has_phone(&self, phone: &str) -> bool {
        match self.phone() {
            Some(own) => {
                let own = normalize_phone(own);
                !own.is_empty() && own == normalize_phone(phone)
            }
            None => false,
        }
    }
}

#[async_trait]
pub trait OtpSender: Send + Sync {
    /// Deliver a one-time code to the customer's phone.
    async fn send_code(&self, phone: &Masked<String>, code: &Masked<String>) -> Result<(), CoreError>;
}

/// Development sender: records that a code went out, never the code itself.
pub struct LoggingOtpSender;

#[async_trait]
impl OtpSender for LoggingOtpSender {
    async fn send_code(&self, phone: &Masked<String>, _code: &Masked<String>) -> Result<(), CoreError> {
        if phone.expose().trim().is_empty() {
            return Err(CoreError::DeliveryError("customer has no phone on record".to_string()));
        }
        tracing::info!(phone = %phone.redacted(), "one-time code dispatched");
        Ok(())
    }
}
