//! Row-lock races against a real Postgres. Set `GLOW_TEST_DATABASE_URL` to
//! run them; without it every test returns early.

use glow_catalog::{Coupon, CouponKind, CouponScope, PricingConfig, PricingEngine, ShippingConfig, ShippingMethod};
use glow_core::payment::{MockPaymentGateway, SignatureVerifier};
use glow_order::{
    CheckoutError, CheckoutLine, CheckoutOutcome, CheckoutRequest, CheckoutRules, CheckoutStore, CheckoutTx,
    CircuitBreaker, EntryCategory, LedgerEntry, LoggingEventSink, OrderFinalizer, PaymentMethod, PaymentOrchestrator,
    QuoteRequest, SalesChannel, StoreError,
};
use glow_store::{DbClient, PgCheckoutStore};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct PgHarness {
    db: DbClient,
    store: Arc<PgCheckoutStore>,
    finalizer: Arc<OrderFinalizer>,
    customer_id: Uuid,
}

async fn pg_harness() -> Option<PgHarness> {
    let url = std::env::var("GLOW_TEST_DATABASE_URL").ok()?;
    let db = DbClient::new(&url).await.unwrap();
    db.migrate().await.unwrap();

    let store = Arc::new(PgCheckoutStore::new(db.pool.clone()));
    let verifier = SignatureVerifier::new("whsec_test").unwrap();
    let payments = Arc::new(PaymentOrchestrator::new(
        Arc::new(MockPaymentGateway::new(verifier.clone())),
        verifier,
        CircuitBreaker::new("payment", 5, Duration::from_secs(30)),
    ));
    let engine = PricingEngine::new(PricingConfig {
        shipping: ShippingConfig {
            free_shipping_threshold: 500,
            methods: vec![ShippingMethod {
                id: "standard".to_string(),
                flat_charge: 50,
                eta_label: "3-5 days".to_string(),
            }],
        },
        point_value_minor: 1,
    });
    let finalizer = Arc::new(OrderFinalizer::new(
        store.clone(),
        engine,
        CheckoutRules::default(),
        payments,
        Arc::new(LoggingEventSink),
    ));

    let customer_id = Uuid::new_v4();
    sqlx::query("INSERT INTO customers (id, name) VALUES ($1, $2)")
        .bind(customer_id)
        .bind("Asha")
        .execute(&db.pool)
        .await
        .unwrap();

    Some(PgHarness {
        db,
        store,
        finalizer,
        customer_id,
    })
}

impl PgHarness {
    async fn product(&self, price: i64, stock: i64) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO products (id, sku, name, category, price, stock) VALUES ($1, $2, $3, $4, $5, $6)")
            .bind(id)
            .bind(format!("SKU-{}", id.simple()))
            .bind("Vitamin C Serum")
            .bind("SERUM")
            .bind(price)
            .bind(stock)
            .execute(&self.db.pool)
            .await
            .unwrap();
        id
    }

    async fn stock(&self, id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(id)
            .fetch_one(&self.db.pool)
            .await
            .unwrap()
    }

    fn request(&self, product_id: Uuid) -> CheckoutRequest {
        CheckoutRequest {
            cart: QuoteRequest {
                customer_id: self.customer_id,
                channel: SalesChannel::Storefront,
                lines: vec![CheckoutLine { product_id, quantity: 1 }],
                coupon_code: None,
                points_to_redeem: 0,
                shipping_method: "standard".to_string(),
            },
            payment_method: PaymentMethod::CashOnDelivery,
            address: None,
        }
    }

    async fn race(&self, request: CheckoutRequest) -> [Result<CheckoutOutcome, CheckoutError>; 2] {
        let (fa, fb) = (self.finalizer.clone(), self.finalizer.clone());
        let (ra, rb) = (request.clone(), request);
        let (a, b) = tokio::join!(
            tokio::spawn(async move { fa.finalize(&ra).await }),
            tokio::spawn(async move { fb.finalize(&rb).await })
        );
        [a.unwrap(), b.unwrap()]
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_last_unit_goes_to_exactly_one_buyer() {
    let Some(h) = pg_harness().await else {
        return;
    };
    let product = h.product(300, 1).await;

    let results = h.race(h.request(product)).await;

    let won = results.iter().filter(|r| r.is_ok()).count();
    let lost = results
        .iter()
        .filter(|r| matches!(r, Err(CheckoutError::InsufficientStock { available: 0, .. })))
        .count();
    assert_eq!((won, lost), (1, 1));
    assert_eq!(h.stock(product).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_single_use_coupon_race() {
    let Some(h) = pg_harness().await else {
        return;
    };
    let product = h.product(1000, 10).await;
    let code = format!("ONCE-{}", Uuid::new_v4().simple());
    h.finalizer
        .create_coupon(Coupon::new(&code, CouponKind::Fixed { amount: 200 }, CouponScope::Customer(h.customer_id)))
        .await
        .unwrap();

    let mut request = h.request(product);
    request.cart.coupon_code = Some(code);
    let results = h.race(request).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(r, Err(CheckoutError::CouponAlreadyUsed))));
    assert_eq!(h.stock(product).await, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_double_redemption_race() {
    let Some(h) = pg_harness().await else {
        return;
    };
    let product = h.product(1000, 10).await;
    let seed = LedgerEntry::earn(h.customer_id, None, 100, 100, EntryCategory::Adjustment).unwrap();
    let mut tx = h.store.begin().await.unwrap();
    tx.append_ledger(h.customer_id, &[seed]).await.unwrap();
    tx.commit().await.unwrap();

    let mut request = h.request(product);
    request.cart.points_to_redeem = 80;
    let results = h.race(request).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(CheckoutError::InsufficientPoints { requested: 80, .. }))));
    assert_eq!(h.store.point_balance(h.customer_id).await.unwrap(), 70);
}

#[tokio::test]
async fn test_pg_ledger_rejects_overdraft() {
    let Some(h) = pg_harness().await else {
        return;
    };
    let redeem = LedgerEntry::redeem(h.customer_id, None, 100, 100, EntryCategory::OrderRedemption).unwrap();

    let mut tx = h.store.begin().await.unwrap();
    let err = tx.append_ledger(h.customer_id, &[redeem]).await.unwrap_err();
    assert!(matches!(err, StoreError::Overdraft(_)));
    drop(tx);

    assert_eq!(h.store.point_balance(h.customer_id).await.unwrap(), 0);
    let projected: i64 = sqlx::query_scalar("SELECT reward_points FROM customers WHERE id = $1")
        .bind(h.customer_id)
        .fetch_one(&h.db.pool)
        .await
        .unwrap();
    assert_eq!(projected, 0);
}
