use glow_api::{app, worker, AppState, AuthConfig};
use glow_catalog::PricingEngine;
use glow_core::identity::LoggingOtpSender;
use glow_core::payment::{MockPaymentGateway, SignatureVerifier};
use glow_order::{CircuitBreaker, OrderFinalizer, PaymentOrchestrator, SaleService};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "glow_api=debug,glow_order=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = glow_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Glow API on port {}", config.server.port);

    // Postgres
    let db = glow_store::DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");
    let rules = db
        .fetch_business_rules(config.business_rules.clone())
        .await
        .expect("Failed to load business rules");
    let store = Arc::new(glow_store::PgCheckoutStore::new(db.pool.clone()));

    // Redis Connection
    let redis_client = glow_store::RedisClient::new(&config.redis.url)
        .await
        .expect("Failed to connect to Redis");
    if let Err(e) = redis_client.ping().await {
        tracing::warn!("Redis not reachable yet: {}", e);
    }

    // Kafka Connection
    let kafka_producer = glow_store::EventProducer::new(&config.kafka.brokers).expect("Failed to create Kafka producer");

    // Payment gateway
    let verifier = SignatureVerifier::new(&config.gateway.secret).expect("Invalid gateway secret");
    let gateway = Arc::new(MockPaymentGateway::new(verifier.clone()));
    let payments = Arc::new(PaymentOrchestrator::new(
        gateway,
        verifier,
        CircuitBreaker::new(
            "payment_gateway",
            config.gateway.circuit_failure_threshold,
            Duration::from_secs(config.gateway.circuit_reset_seconds),
        ),
    ));
    tracing::info!("Payment gateway adapter ready (key {})", config.gateway.key_id);

    let finalizer = Arc::new(OrderFinalizer::new(
        store.clone(),
        PricingEngine::new(rules.pricing_config(config.shipping.clone())),
        rules.checkout_rules(&config.gateway.currency),
        payments,
        Arc::new(kafka_producer),
    ));

    let sales = Arc::new(SaleService::new(
        finalizer.clone(),
        store,
        Arc::new(redis_client),
        Arc::new(LoggingOtpSender),
        chrono::Duration::seconds(rules.pending_sale_ttl_seconds as i64),
        rules.max_otp_attempts,
    ));

    tokio::spawn(worker::start_sweep_worker(finalizer.clone(), rules.clone()));

    let app_state = AppState {
        finalizer,
        sales,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
        business_rules: rules,
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.expect("Failed to bind");
    axum::serve(listener, app).await.expect("Server error");
}
