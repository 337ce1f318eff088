use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coupon::{Coupon, CouponHolder, IneligibleReason};
use crate::shipping::ShippingConfig;

const BPS_DENOMINATOR: i128 = 10_000;

/// One priced cart line. `unit_price` is whatever the caller trusts: the
/// client's snapshot for previews, the locked product row at checkout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: Uuid,
    pub unit_price: i64,
    pub quantity: u32,
}

/// Channel-dependent rates, in basis points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rates {
    pub tax_rate_bps: u32,
    pub cashback_rate_bps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub shipping: ShippingConfig,

    /// Minor currency units one reward point is worth
    pub point_value_minor: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            shipping: ShippingConfig::default(),
            point_value_minor: 1,
        }
    }
}

/// Everything a single pricing pass reads.
#[derive(Debug, Clone)]
pub struct PricingRequest<'a> {
    pub lines: &'a [CartLine],
    pub coupon: Option<&'a Coupon>,
    pub holder: CouponHolder<'a>,
    /// How many of the holder's live orders already reference `coupon`
    pub coupon_uses: u32,
    pub points_to_redeem: i64,
    /// Points the holder may spend right now
    pub available_points: i64,
    pub shipping_method: &'a str,
    pub rates: Rates,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PricingResult {
    pub subtotal: i64,
    pub discount: i64,
    pub points_redeemed: i64,
    pub points_value: i64,
    pub shipping: i64,
    pub tax: i64,
    pub total: i64,
    pub points_earned: i64,
    pub coupon_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Invalid quantity for product {0}")]
    InvalidQuantity(Uuid),

    #[error("Invalid price for product {0}")]
    NegativePrice(Uuid),

    #[error("Points to redeem must not be negative: {0}")]
    NegativePoints(i64),

    #[error("Coupon cannot be applied: {0}")]
    CouponIneligible(IneligibleReason),

    #[error("Insufficient points: requested {requested}, available {available}")]
    InsufficientPoints { requested: i64, available: i64 },

    #[error("Points worth {requested} exceed the amount due of {max}")]
    PointsExceedAmountDue { requested: i64, max: i64 },

    #[error("Unknown shipping method: {0}")]
    UnknownShippingMethod(String),

    #[error("Amount out of range")]
    Overflow,
}

/// Storefront and point-of-sale pricing. Pure: no I/O, no clock reads.
#[derive(Debug, Clone)]
pub struct PricingEngine {
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    pub fn subtotal(lines: &[CartLine]) -> Result<i64, PricingError> {
        if lines.is_empty() {
            return Err(PricingError::EmptyCart);
        }
        lines.iter().try_fold(0i64, |acc, line| {
            if line.quantity == 0 {
                return Err(PricingError::InvalidQuantity(line.product_id));
            }
            if line.unit_price < 0 {
                return Err(PricingError::NegativePrice(line.product_id));
            }
            line.unit_price
                .checked_mul(i64::from(line.quantity))
                .and_then(|amount| acc.checked_add(amount))
                .ok_or(PricingError::Overflow)
        })
    }

    pub fn price(&self, request: &PricingRequest<'_>) -> Result<PricingResult, PricingError> {
        let subtotal = Self::subtotal(request.lines)?;

        let (discount, coupon_id) = match request.coupon {
            Some(coupon) => {
                coupon
                    .check_eligibility(&request.holder, subtotal, request.now)
                    .and_then(|_| coupon.check_usage(request.coupon_uses))
                    .map_err(PricingError::CouponIneligible)?;
                (coupon.discount_for(subtotal), Some(coupon.id))
            }
            None => (0, None),
        };

        let points_value = self.redemption_value(request, subtotal - discount)?;

        let shipping = self
            .config
            .shipping
            .charge_for(request.shipping_method, subtotal)
            .ok_or_else(|| PricingError::UnknownShippingMethod(request.shipping_method.to_string()))?;

        let tax = apply_bps(subtotal, request.rates.tax_rate_bps)?;

        let gross = subtotal
            .checked_add(shipping)
            .and_then(|v| v.checked_add(tax))
            .ok_or(PricingError::Overflow)?;
        let total = (gross - discount - points_value).max(0);

        let points_earned = apply_bps(subtotal - discount, request.rates.cashback_rate_bps)?;

        Ok(PricingResult {
            subtotal,
            discount,
            points_redeemed: request.points_to_redeem,
            points_value,
            shipping,
            tax,
            total,
            points_earned,
            coupon_id,
        })
    }

    /// Money value of the requested points, checked against balance and amount due.
    fn redemption_value(&self, request: &PricingRequest<'_>, amount_due: i64) -> Result<i64, PricingError> {
        let points = request.points_to_redeem;
        if points < 0 {
            return Err(PricingError::NegativePoints(points));
        }
        if points > request.available_points {
            return Err(PricingError::InsufficientPoints {
                requested: points,
                available: request.available_points.max(0),
            });
        }
        let value = points
            .checked_mul(self.config.point_value_minor)
            .ok_or(PricingError::Overflow)?;
        if value > amount_due {
            return Err(PricingError::PointsExceedAmountDue {
                requested: value,
                max: amount_due,
            });
        }
        Ok(value)
    }
}

fn apply_bps(amount: i64, bps: u32) -> Result<i64, PricingError> {
    let scaled = i128::from(amount) * i128::from(bps) / BPS_DENOMINATOR;
    i64::try_from(scaled).map_err(|_| PricingError::Overflow)
}
