use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Earn,
    Redeem,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Earn => "EARN",
            Direction::Redeem => "REDEEM",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "EARN" => Some(Direction::Earn),
            "REDEEM" => Some(Direction::Redeem),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryCategory {
    OrderCashback,
    OrderRedemption,
    RefundRestore,
    RefundClawback,
    Adjustment,
}

impl EntryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryCategory::OrderCashback => "ORDER_CASHBACK",
            EntryCategory::OrderRedemption => "ORDER_REDEMPTION",
            EntryCategory::RefundRestore => "REFUND_RESTORE",
            EntryCategory::RefundClawback => "REFUND_CLAWBACK",
            EntryCategory::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ORDER_CASHBACK" => Some(EntryCategory::OrderCashback),
            "ORDER_REDEMPTION" => Some(EntryCategory::OrderRedemption),
            "REFUND_RESTORE" => Some(EntryCategory::RefundRestore),
            "REFUND_CLAWBACK" => Some(EntryCategory::RefundClawback),
            "ADJUSTMENT" => Some(EntryCategory::Adjustment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Completed,
    Voided,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Completed => "COMPLETED",
            EntryStatus::Voided => "VOIDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "COMPLETED" => Some(EntryStatus::Completed),
            "VOIDED" => Some(EntryStatus::Voided),
            _ => None,
        }
    }
}

/// One append-only movement of reward points
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub order_id: Option<Uuid>,
    pub direction: Direction,
    pub points: i64,
    /// Money the points stood for when the entry was written, in minor units
    pub amount_equivalent: i64,
    pub category: EntryCategory,
    pub status: EntryStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn new(
        customer_id: Uuid,
        order_id: Option<Uuid>,
        direction: Direction,
        points: i64,
        amount_equivalent: i64,
        category: EntryCategory,
    ) -> Result<Self, LedgerError> {
        if points < 0 {
            return Err(LedgerError::NegativePoints(points));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            customer_id,
            order_id,
            direction,
            points,
            amount_equivalent,
            category,
            status: EntryStatus::Completed,
            description: None,
            created_at: Utc::now(),
        })
    }

    pub fn earn(
        customer_id: Uuid,
        order_id: Option<Uuid>,
        points: i64,
        amount_equivalent: i64,
        category: EntryCategory,
    ) -> Result<Self, LedgerError> {
        Self::new(customer_id, order_id, Direction::Earn, points, amount_equivalent, category)
    }

    pub fn redeem(
        customer_id: Uuid,
        order_id: Option<Uuid>,
        points: i64,
        amount_equivalent: i64,
        category: EntryCategory,
    ) -> Result<Self, LedgerError> {
        Self::new(customer_id, order_id, Direction::Redeem, points, amount_equivalent, category)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Signed effect on the balance; voided entries count for nothing.
    pub fn delta(&self) -> i64 {
        match (self.status, self.direction) {
            (EntryStatus::Voided, _) => 0,
            (EntryStatus::Completed, Direction::Earn) => self.points,
            (EntryStatus::Completed, Direction::Redeem) => -self.points,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger points must not be negative: {0}")]
    NegativePoints(i64),

    #[error("Ledger entry would overdraw balance: balance {balance}, redeem {requested}")]
    Overdraft { balance: i64, requested: i64 },
}

/// Balance derived from `entries`: earned minus redeemed over completed entries.
pub fn balance<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> i64 {
    entries.into_iter().map(LedgerEntry::delta).sum()
}

/// Replays `entries` on top of `balance`, failing if any prefix would go negative.
pub fn apply(balance: i64, entries: &[LedgerEntry]) -> Result<i64, LedgerError> {
    entries.iter().try_fold(balance, |running, entry| {
        if entry.points < 0 {
            return Err(LedgerError::NegativePoints(entry.points));
        }
        let next = running + entry.delta();
        if next < 0 {
            return Err(LedgerError::Overdraft {
                balance: running,
                requested: entry.points,
            });
        }
        Ok(next)
    })
}
