use chrono::{DateTime, Utc};
use glow_shared::pii::normalize_phone;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponKind {
    /// Fixed amount off, in minor units
    Fixed { amount: i64 },
    /// Percentage of the subtotal, optionally capped
    Percentage { percent: u32, cap: Option<i64> },
}

/// Who may redeem a coupon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponScope {
    Global,
    Customer(Uuid),
    Phone(String),
}

/// A discount definition.
///
/// Coupons are immutable once an order references them; orders keep their own
/// snapshot of the discount they received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub description: Option<String>,
    pub kind: CouponKind,
    pub scope: CouponScope,
    pub min_order_amount: i64,
    /// Redemptions allowed per customer
    pub usage_limit: u32,
    pub is_active: bool,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Why a coupon cannot be applied. The `code()` strings are what clients see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    #[error("coupon not found")]
    NotFound,

    #[error("coupon is not active")]
    Inactive,

    #[error("coupon is not valid yet")]
    NotYetValid,

    #[error("coupon has expired")]
    Expired,

    #[error("coupon does not apply to this customer")]
    WrongScope,

    #[error("order subtotal is below the coupon minimum")]
    BelowMinimum,

    #[error("coupon has already been used")]
    AlreadyUsed,
}

impl IneligibleReason {
    pub fn code(&self) -> &'static str {
        match self {
            IneligibleReason::NotFound => "not_found",
            IneligibleReason::Inactive => "inactive",
            IneligibleReason::NotYetValid => "not_yet_valid",
            IneligibleReason::Expired => "expired",
            IneligibleReason::WrongScope => "wrong_scope",
            IneligibleReason::BelowMinimum => "below_minimum",
            IneligibleReason::AlreadyUsed => "already_used",
        }
    }
}

/// The customer a coupon is being checked for.
#[derive(Debug, Clone, Copy)]
pub struct CouponHolder<'a> {
    pub customer_id: Uuid,
    pub phone: Option<&'a str>,
}

impl Coupon {
    pub fn new(code: &str, kind: CouponKind, scope: CouponScope) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            code: Self::normalize_code(code),
            description: None,
            kind,
            scope,
            min_order_amount: 0,
            usage_limit: 1,
            is_active: true,
            valid_from: now,
            valid_until: None,
            created_at: now,
        }
    }

    /// Codes are case-insensitive; this is the stored form.
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn matches_code(&self, code: &str) -> bool {
        self.code == Self::normalize_code(code)
    }

    pub fn is_single_use(&self) -> bool {
        self.usage_limit == 1
    }

    pub fn applies_to(&self, holder: &CouponHolder<'_>) -> bool {
        match &self.scope {
            CouponScope::Global => true,
            CouponScope::Customer(id) => *id == holder.customer_id,
            CouponScope::Phone(phone) => holder.phone.is_some_and(|own| {
                let wanted = normalize_phone(phone);
                !wanted.is_empty() && wanted == normalize_phone(own)
            }),
        }
    }

    /// Checks, in order: active flag, validity window, scope, minimum order.
    pub fn check_eligibility(
        &self,
        holder: &CouponHolder<'_>,
        subtotal: i64,
        now: DateTime<Utc>,
    ) -> Result<(), IneligibleReason> {
        if !self.is_active {
            return Err(IneligibleReason::Inactive);
        }
        if now < self.valid_from {
            return Err(IneligibleReason::NotYetValid);
        }
        if let Some(until) = self.valid_until {
            if now > until {
                return Err(IneligibleReason::Expired);
            }
        }
        if !self.applies_to(holder) {
            return Err(IneligibleReason::WrongScope);
        }
        if subtotal < self.min_order_amount {
            return Err(IneligibleReason::BelowMinimum);
        }
        Ok(())
    }

    /// `uses` counts this customer's live orders that already carry the coupon.
    pub fn check_usage(&self, uses: u32) -> Result<(), IneligibleReason> {
        if uses >= self.usage_limit {
            return Err(IneligibleReason::AlreadyUsed);
        }
        Ok(())
    }

    /// Discount for `subtotal`, capped and clamped to `0..=subtotal`.
    pub fn discount_for(&self, subtotal: i64) -> i64 {
        if subtotal <= 0 {
            return 0;
        }
        let raw = match &self.kind {
            CouponKind::Fixed { amount } => *amount,
            CouponKind::Percentage { percent, cap } => {
                let pct = i128::from(subtotal) * i128::from(*percent) / 100;
                let pct = i64::try_from(pct).unwrap_or(i64::MAX);
                match cap {
                    Some(cap) => pct.min(*cap),
                    None => pct,
                }
            }
        };
        raw.clamp(0, subtotal)
    }

    /// Structural checks for a coupon about to be stored.
    pub fn validate(&self) -> Result<(), String> {
        if self.code.is_empty() {
            return Err("coupon code must not be empty".to_string());
        }
        if self.usage_limit == 0 {
            return Err("usage limit must be at least 1".to_string());
        }
        if self.min_order_amount < 0 {
            return Err("minimum order amount must not be negative".to_string());
        }
        match &self.kind {
            CouponKind::Fixed { amount } if *amount <= 0 => {
                return Err("fixed discount must be positive".to_string());
            }
            CouponKind::Percentage { percent, .. } if *percent == 0 || *percent > 100 => {
                return Err("percentage must be between 1 and 100".to_string());
            }
            CouponKind::Percentage { cap: Some(cap), .. } if *cap <= 0 => {
                return Err("percentage cap must be positive".to_string());
            }
            _ => {}
        }
        if let Some(until) = self.valid_until {
            if until <= self.valid_from {
                return Err("validity window ends before it starts".to_string());
            }
        }
        Ok(())
    }
}

/// Coupons `holder` could apply to an order of `subtotal` right now.
///
/// `coupons` should already be restricted to global coupons plus the ones
/// scoped to this customer; scope is re-checked anyway. `usage` maps coupon id
/// to how many of the customer's live orders reference it.
pub fn find_eligible(
    coupons: impl IntoIterator<Item = Coupon>,
    holder: &CouponHolder<'_>,
    subtotal: i64,
    now: DateTime<Utc>,
    usage: &HashMap<Uuid, u32>,
) -> Vec<Coupon> {
    let mut eligible: Vec<Coupon> = coupons
        .into_iter()
        .filter(|c| c.check_eligibility(holder, subtotal, now).is_ok())
        .filter(|c| c.check_usage(usage.get(&c.id).copied().unwrap_or(0)).is_ok())
        .collect();

    // Best deal first
    eligible.sort_by(|a, b| b.discount_for(subtotal).cmp(&a.discount_for(subtotal)).then_with(|| a.code.cmp(&b.code)));
    eligible
}
