use glow_catalog::{PricingConfig, ShippingConfig};
use glow_order::CheckoutRules;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub gateway: GatewayConfig,
    pub business_rules: BusinessRules,
    #[serde(default)]
    pub shipping: ShippingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    /// Applied to every channel
    pub tax_rate_bps: u32,
    pub storefront_cashback_bps: u32,
    pub point_of_sale_cashback_bps: u32,
    #[serde(default = "default_point_value")]
    pub point_value_minor: i64,
    pub pending_payment_timeout_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    pub pending_sale_ttl_seconds: u64,
    #[serde(default = "default_max_otp_attempts")]
    pub max_otp_attempts: u32,
}

fn default_point_value() -> i64 { 1 }
fn default_sweep_interval() -> u64 { 60 }
fn default_max_otp_attempts() -> u32 { 3 }

impl BusinessRules {
    pub fn checkout_rules(&self, currency: &str) -> CheckoutRules {
        CheckoutRules {
            tax_rate_bps: self.tax_rate_bps,
            storefront_cashback_bps: self.storefront_cashback_bps,
            point_of_sale_cashback_bps: self.point_of_sale_cashback_bps,
            currency: currency.to_string(),
        }
    }

    pub fn pricing_config(&self, shipping: ShippingConfig) -> PricingConfig {
        PricingConfig {
            shipping,
            point_value_minor: self.point_value_minor,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub key_id: String,
    pub secret: String,
    pub currency: String,
    #[serde(default = "default_failure_threshold")]
    pub circuit_failure_threshold: usize,
    #[serde(default = "default_reset_seconds")]
    pub circuit_reset_seconds: u64,
}

fn default_failure_threshold() -> usize { 5 }
fn default_reset_seconds() -> u64 { 30 }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `GLOW__GATEWAY__SECRET=...`
            .add_source(config::Environment::with_prefix("GLOW").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
