use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use glow_catalog::PricingResult;
use glow_core::identity::OtpSender;
use glow_core::CoreError;
use glow_shared::pii::{mask_phone, Masked};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CheckoutError, ErrorKind};
use crate::finalizer::{CheckoutLine, CheckoutRequest, OrderFinalizer, QuoteRequest};
use crate::models::{Order, PaymentMethod, SalesChannel};
use crate::repository::{CheckoutStore, StoreError};

/// A counter sale waiting for the customer to read back their one-time code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSale {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub customer_id: Uuid,
    pub lines: Vec<CheckoutLine>,
    pub coupon_code: Option<String>,
    pub points_to_redeem: i64,
    pub shipping_method: String,
    /// Hex SHA-256 of `"{sale_id}:{code}"`; the code itself is never stored
    pub otp_digest: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Durable, expiring storage for pending sales.
#[async_trait]
pub trait PendingSaleStore: Send + Sync {
    async fn put(&self, sale: &PendingSale, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<PendingSale>, StoreError>;

    /// Atomically fetch and delete. Only one caller ever gets `Some`.
    async fn take(&self, id: Uuid) -> Result<Option<PendingSale>, StoreError>;

    /// Atomically counts one confirmation attempt and returns the running
    /// total, or `None` once the sale has been taken or has expired.
    async fn record_attempt(&self, id: Uuid) -> Result<Option<u32>, StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSaleRequest {
    pub seller_id: Uuid,
    pub customer_phone: String,
    pub lines: Vec<CheckoutLine>,
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub points_to_redeem: i64,
    pub shipping_method: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingSaleTicket {
    pub sale_id: Uuid,
    pub customer_id: Uuid,
    pub masked_phone: String,
    pub quote: PricingResult,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum SaleError {
    #[error("Pending sale not found or expired")]
    NotFound,

    #[error("Incorrect code, {remaining} attempts left")]
    InvalidCode { remaining: u32 },

    #[error("Too many incorrect codes; sale discarded")]
    TooManyAttempts,

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] CoreError),
}

impl SaleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SaleError::NotFound => ErrorKind::NotFound,
            SaleError::InvalidCode { .. } => ErrorKind::Validation,
            SaleError::TooManyAttempts => ErrorKind::Conflict,
            SaleError::Checkout(e) => e.kind(),
            SaleError::Store(_) => ErrorKind::Internal,
            SaleError::Delivery(_) => ErrorKind::External,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SaleError::NotFound => "sale_not_found",
            SaleError::InvalidCode { .. } => "invalid_code",
            SaleError::TooManyAttempts => "too_many_attempts",
            SaleError::Checkout(e) => e.code(),
            SaleError::Store(_) => "internal",
            SaleError::Delivery(_) => "code_delivery_failed",
        }
    }
}

/// Seller-assisted checkout: quote, confirm with the customer's one-time
/// code, then place the order through the same finalizer as the storefront.
pub struct SaleService {
    finalizer: Arc<OrderFinalizer>,
    store: Arc<dyn CheckoutStore>,
    pending: Arc<dyn PendingSaleStore>,
    otp: Arc<dyn OtpSender>,
    ttl: Duration,
    max_attempts: u32,
}

impl SaleService {
    pub fn new(
        finalizer: Arc<OrderFinalizer>,
        store: Arc<dyn CheckoutStore>,
        pending: Arc<dyn PendingSaleStore>,
        otp: Arc<dyn OtpSender>,
        ttl: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            finalizer,
            store,
            pending,
            otp,
            ttl,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn start_sale(&self, request: StartSaleRequest) -> Result<PendingSaleTicket, SaleError> {
        let customer = self
            .store
            .find_customer_by_phone(&request.customer_phone)
            .await?
            .ok_or(SaleError::NotFound)?;
        let phone = customer.phone.clone().ok_or(SaleError::NotFound)?;

        let quote = self
            .finalizer
            .quote(&QuoteRequest {
                customer_id: customer.id,
                channel: SalesChannel::PointOfSale,
                lines: request.lines.clone(),
                coupon_code: request.coupon_code.clone(),
                points_to_redeem: request.points_to_redeem,
                shipping_method: request.shipping_method.clone(),
            })
            .await?;

        let now = Utc::now();
        let sale_id = Uuid::new_v4();
        let code = generate_code();
        let sale = PendingSale {
            id: sale_id,
            seller_id: request.seller_id,
            customer_id: customer.id,
            lines: request.lines,
            coupon_code: request.coupon_code,
            points_to_redeem: request.points_to_redeem,
            shipping_method: request.shipping_method,
            otp_digest: code_digest(sale_id, code.expose()),
            created_at: now,
            expires_at: now + self.ttl,
        };

        self.pending.put(&sale, self.ttl).await?;
        if let Err(e) = self.otp.send_code(&phone, &code).await {
            // Nobody can confirm a sale whose code never arrived
            self.pending.take(sale_id).await?;
            return Err(e.into());
        }

        tracing::info!(
            sale_id = %sale_id,
            seller_id = %sale.seller_id,
            customer_id = %customer.id,
            total = quote.total,
            "pending sale started"
        );

        Ok(PendingSaleTicket {
            sale_id,
            customer_id: customer.id,
            masked_phone: mask_phone(phone.expose()),
            quote,
            expires_at: sale.expires_at,
        })
    }

    /// Checks the code and, on success, places a completed point-of-sale order.
    pub async fn confirm_sale(&self, seller_id: Uuid, sale_id: Uuid, code: &str) -> Result<Order, SaleError> {
        let sale = self.pending.get(sale_id).await?.ok_or(SaleError::NotFound)?;
        if sale.seller_id != seller_id {
            return Err(SaleError::NotFound);
        }

        // Counted before the comparison so concurrent guesses share one budget
        let attempt = self
            .pending
            .record_attempt(sale_id)
            .await?
            .ok_or(SaleError::NotFound)?;
        if attempt > self.max_attempts {
            self.pending.take(sale_id).await?;
            return Err(SaleError::TooManyAttempts);
        }

        if code_digest(sale_id, code.trim()) != sale.otp_digest {
            if attempt >= self.max_attempts {
                self.pending.take(sale_id).await?;
                tracing::warn!(sale_id = %sale_id, "pending sale discarded after repeated bad codes");
                return Err(SaleError::TooManyAttempts);
            }
            return Err(SaleError::InvalidCode {
                remaining: self.max_attempts - attempt,
            });
        }

        // Consume before finalizing so a replayed code cannot place a second order
        let sale = self.pending.take(sale_id).await?.ok_or(SaleError::NotFound)?;

        let outcome = self
            .finalizer
            .finalize(&CheckoutRequest {
                cart: QuoteRequest {
                    customer_id: sale.customer_id,
                    channel: SalesChannel::PointOfSale,
                    lines: sale.lines,
                    coupon_code: sale.coupon_code,
                    points_to_redeem: sale.points_to_redeem,
                    shipping_method: sale.shipping_method,
                },
                payment_method: PaymentMethod::CashOnDelivery,
                address: None,
            })
            .await?;

        tracing::info!(sale_id = %sale_id, order_id = %outcome.order.id, "pending sale confirmed");
        Ok(outcome.order)
    }
}

fn generate_code() -> Masked<String> {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    Masked::new(format!("{:06}", code))
}

fn code_digest(sale_id: Uuid, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sale_id.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}
