use glow_core::payment::{GatewayCallback, GatewayError, GatewayOrder, PaymentGateway, SignatureVerifier};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    /// Failing fast until the reset timeout passes
    Open,
    /// One trial call allowed
    HalfOpen,
}

#[derive(Debug)]
struct Breaker {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
}

/// Guards calls to the gateway. Only `Unreachable` failures count.
#[derive(Debug)]
pub struct CircuitBreaker {
    pub name: String,
    failure_threshold: usize,
    reset_timeout: Duration,
    inner: Mutex<Breaker>,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold: threshold.max(1),
            reset_timeout: timeout,
            inner: Mutex::new(Breaker {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Whether a call may go out now. Moves Open to HalfOpen once the timeout has passed.
    pub async fn check(&self) -> bool {
        let mut breaker = self.inner.lock().await;
        match breaker.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = breaker
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.reset_timeout);
                if cooled {
                    breaker.state = CircuitState::HalfOpen;
                    tracing::info!(breaker = %self.name, "circuit half-open, probing gateway");
                }
                cooled
            }
        }
    }

    pub async fn record_success(&self) {
        let mut breaker = self.inner.lock().await;
        if breaker.state != CircuitState::Closed {
            tracing::info!(breaker = %self.name, "circuit closed, gateway recovered");
        }
        breaker.state = CircuitState::Closed;
        breaker.consecutive_failures = 0;
        breaker.opened_at = None;
    }

    pub async fn record_failure(&self) {
        let mut breaker = self.inner.lock().await;
        breaker.consecutive_failures += 1;
        let tripped = breaker.state == CircuitState::HalfOpen
            || breaker.consecutive_failures >= self.failure_threshold;
        if tripped {
            breaker.state = CircuitState::Open;
            breaker.opened_at = Some(Instant::now());
            tracing::error!(
                breaker = %self.name,
                failures = breaker.consecutive_failures,
                "circuit open, failing gateway calls fast"
            );
        }
    }
}

/// Payment gateway adapter: outbound order creation behind a circuit breaker,
/// inbound callback signature checks.
pub struct PaymentOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    verifier: SignatureVerifier,
    breaker: CircuitBreaker,
}

impl PaymentOrchestrator {
    pub fn new(gateway: Arc<dyn PaymentGateway>, verifier: SignatureVerifier, breaker: CircuitBreaker) -> Self {
        Self {
            gateway,
            verifier,
            breaker,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Register an order with the gateway
    pub async fn create_gateway_order(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> Result<GatewayOrder, GatewayError> {
        if !self.breaker.check().await {
            return Err(GatewayError::Unreachable(format!(
                "circuit breaker [{}] is open",
                self.breaker.name
            )));
        }

        match self.gateway.create_order(order_id, amount, currency).await {
            Ok(order) => {
                self.breaker.record_success().await;
                Ok(order)
            }
            Err(GatewayError::Unreachable(reason)) => {
                self.breaker.record_failure().await;
                Err(GatewayError::Unreachable(reason))
            }
            // A rejection means the gateway is up
            Err(other) => {
                self.breaker.record_success().await;
                Err(other)
            }
        }
    }

    pub fn verify_callback(&self, callback: &GatewayCallback) -> bool {
        self.verifier.verify(callback)
    }
}
