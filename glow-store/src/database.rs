use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;

use crate::app_config::BusinessRules;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    rule_key: String,
    rule_value: Value,
}

impl DbClient {
    pub async fn new(connection_string: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlays rules stored in the `business_rules` table on the file defaults.
    pub async fn fetch_business_rules(&self, defaults: BusinessRules) -> Result<BusinessRules, sqlx::Error> {
        let rows: Vec<RuleRow> = sqlx::query_as("SELECT rule_key, rule_value FROM business_rules")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = defaults;
        for row in rows {
            apply_rule(&mut rules, &row.rule_key, &row.rule_value);
        }
        Ok(rules)
    }
}

/// Expected format: `{"value": <number>}`. Unknown keys and malformed values are ignored.
fn apply_rule(rules: &mut BusinessRules, key: &str, raw: &Value) {
    let Some(v) = raw.get("value") else {
        return;
    };
    let as_u32 = || v.as_u64().and_then(|n| u32::try_from(n).ok());

    match key {
        "tax_rate_bps" => {
            if let Some(n) = as_u32() {
                rules.tax_rate_bps = n;
            }
        }
        "storefront_cashback_bps" => {
            if let Some(n) = as_u32() {
                rules.storefront_cashback_bps = n;
            }
        }
        "point_of_sale_cashback_bps" => {
            if let Some(n) = as_u32() {
                rules.point_of_sale_cashback_bps = n;
            }
        }
        "point_value_minor" => {
            if let Some(n) = v.as_i64().filter(|n| *n > 0) {
                rules.point_value_minor = n;
            }
        }
        "pending_payment_timeout_seconds" => {
            if let Some(n) = v.as_u64() {
                rules.pending_payment_timeout_seconds = n;
            }
        }
        "pending_sale_ttl_seconds" => {
            if let Some(n) = v.as_u64() {
                rules.pending_sale_ttl_seconds = n;
            }
        }
        "max_otp_attempts" => {
            if let Some(n) = as_u32() {
                rules.max_otp_attempts = n;
            }
        }
        other => {
            tracing::debug!(rule = other, "ignoring unknown business rule");
        }
    }
}
