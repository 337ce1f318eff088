use glow_order::{OrderFinalizer, SaleService};
use glow_store::app_config::BusinessRules;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub finalizer: Arc<OrderFinalizer>,
    pub sales: Arc<SaleService>,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
}
