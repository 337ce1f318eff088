use chrono::Utc;
use glow_order::{CheckoutError, OrderFinalizer, SweepReport};
use glow_store::app_config::BusinessRules;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

/// Orders failed per sweep pass
const SWEEP_BATCH: i64 = 100;

/// Longer configured timeouts are clamped to this
const MAX_PENDING_TIMEOUT_SECS: u64 = 7 * 24 * 3600;

pub fn pending_timeout(rules: &BusinessRules) -> chrono::Duration {
    let seconds = rules.pending_payment_timeout_seconds.min(MAX_PENDING_TIMEOUT_SECS);
    chrono::Duration::seconds(seconds as i64)
}

/// Fails gateway orders that have waited longer than `timeout` for payment.
pub async fn sweep_once(finalizer: &OrderFinalizer, timeout: chrono::Duration) -> Result<SweepReport, CheckoutError> {
    finalizer.expire_pending(Utc::now() - timeout, SWEEP_BATCH).await
}

pub async fn start_sweep_worker(finalizer: Arc<OrderFinalizer>, rules: BusinessRules) {
    let timeout = pending_timeout(&rules);
    let mut ticker = interval(Duration::from_secs(rules.sweep_interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Pending payment sweep started: timeout {}s, every {}s",
        rules.pending_payment_timeout_seconds, rules.sweep_interval_seconds
    );

    loop {
        ticker.tick().await;
        match sweep_once(&finalizer, timeout).await {
            Ok(report) if report.expired > 0 => {
                info!("Sweep expired {} of {} stale orders", report.expired, report.examined)
            }
            Ok(_) => {}
            Err(e) => error!("Pending payment sweep failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(timeout: u64) -> BusinessRules {
        BusinessRules {
            tax_rate_bps: 1800,
            storefront_cashback_bps: 500,
            point_of_sale_cashback_bps: 500,
            point_value_minor: 1,
            pending_payment_timeout_seconds: timeout,
            sweep_interval_seconds: 60,
            pending_sale_ttl_seconds: 300,
            max_otp_attempts: 3,
        }
    }

    #[test]
    fn test_pending_timeout_is_clamped() {
        assert_eq!(pending_timeout(&rules(900)), chrono::Duration::seconds(900));
        assert_eq!(pending_timeout(&rules(u64::MAX)), chrono::Duration::days(7));
    }
}
