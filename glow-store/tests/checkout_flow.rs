use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use glow_catalog::{
    Coupon, CouponKind, CouponScope, PricingConfig, PricingEngine, Product, ProductCategory, ShippingConfig,
    ShippingMethod,
};
use glow_core::identity::{Customer, OtpSender};
use glow_core::payment::{CallbackStatus, MockPaymentGateway, SignatureVerifier};
use glow_core::CoreError;
use glow_order::{
    CheckoutError, CheckoutLine, CheckoutRequest, CheckoutRules, CheckoutStore, CircuitBreaker, ConfirmOutcome,
    EntryCategory, OrderEventSink, OrderFinalizer, OrderStatus, PaymentMethod, PaymentOrchestrator, PendingSale,
    PendingSaleStore, PendingSaleTicket, QuoteRequest, SaleError, SaleService, SalesChannel, StartSaleRequest,
    StoreError,
};
use glow_shared::models::events::OrderEvent;
use glow_shared::pii::Masked;
use glow_store::{InMemoryCheckoutStore, InMemoryPendingSaleStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const PHONE: &str = "+91 98765 43210";

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<OrderEvent>>,
}

impl RecordingSink {
    fn topics(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.topic()).collect()
    }
}

#[async_trait]
impl OrderEventSink for RecordingSink {
    async fn publish(&self, event: OrderEvent) -> Result<(), String> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[derive(Default)]
struct CapturingOtpSender {
    last_code: Mutex<Option<String>>,
}

#[async_trait]
impl OtpSender for CapturingOtpSender {
    async fn send_code(&self, _phone: &Masked<String>, code: &Masked<String>) -> Result<(), CoreError> {
        *self.last_code.lock().unwrap() = Some(code.expose().clone());
        Ok(())
    }
}

struct Harness {
    store: Arc<InMemoryCheckoutStore>,
    gateway: Arc<MockPaymentGateway>,
    finalizer: Arc<OrderFinalizer>,
    events: Arc<RecordingSink>,
    customer_id: Uuid,
}

fn shipping() -> ShippingConfig {
    ShippingConfig {
        free_shipping_threshold: 500,
        methods: vec![
            ShippingMethod {
                id: "standard".to_string(),
                flat_charge: 50,
                eta_label: "3-5 days".to_string(),
            },
            ShippingMethod {
                id: "in_store".to_string(),
                flat_charge: 0,
                eta_label: "Collected at counter".to_string(),
            },
        ],
    }
}

async fn harness() -> Harness {
    let store = Arc::new(InMemoryCheckoutStore::new());
    let verifier = SignatureVerifier::new("whsec_test").unwrap();
    let gateway = Arc::new(MockPaymentGateway::new(verifier.clone()));
    let payments = Arc::new(PaymentOrchestrator::new(
        gateway.clone(),
        verifier,
        CircuitBreaker::new("payment", 5, Duration::from_secs(30)),
    ));
    let events = Arc::new(RecordingSink::default());
    let engine = PricingEngine::new(PricingConfig {
        shipping: shipping(),
        point_value_minor: 1,
    });
    let finalizer = Arc::new(OrderFinalizer::new(
        store.clone(),
        engine,
        CheckoutRules::default(),
        payments,
        events.clone(),
    ));

    let customer = Customer::new(Uuid::new_v4(), "Asha", Some(PHONE.to_string()));
    let customer_id = customer.id;
    store.insert_customer(customer).await.unwrap();

    Harness {
        store,
        gateway,
        finalizer,
        events,
        customer_id,
    }
}

impl Harness {
    async fn product(&self, price: i64, stock: i64) -> Uuid {
        let product = Product::new(
            format!("SKU-{}", Uuid::new_v4().simple()),
            "Vitamin C Serum",
            ProductCategory::Serum,
            price,
            stock,
        );
        let id = product.id;
        self.store.insert_product(product).await;
        id
    }

    async fn coupon(&self, coupon: Coupon) -> Coupon {
        self.finalizer.create_coupon(coupon).await.unwrap()
    }

    fn cart(&self, product_id: Uuid, quantity: u32) -> QuoteRequest {
        QuoteRequest {
            customer_id: self.customer_id,
            channel: SalesChannel::Storefront,
            lines: vec![CheckoutLine { product_id, quantity }],
            coupon_code: None,
            points_to_redeem: 0,
            shipping_method: "standard".to_string(),
        }
    }

    fn checkout(&self, cart: QuoteRequest, payment_method: PaymentMethod) -> CheckoutRequest {
        CheckoutRequest {
            cart,
            payment_method,
            address: None,
        }
    }

    async fn stock(&self, product_id: Uuid) -> i64 {
        self.store.product(product_id).await.unwrap().stock
    }

    async fn balance(&self) -> i64 {
        self.store.point_balance(self.customer_id).await.unwrap()
    }
}

#[tokio::test]
async fn test_capped_percentage_coupon_checkout() {
    let h = harness().await;
    let product = h.product(1000, 5).await;
    h.coupon(Coupon::new(
        "GLOW10",
        CouponKind::Percentage {
            percent: 10,
            cap: Some(80),
        },
        CouponScope::Global,
    ))
    .await;

    let mut cart = h.cart(product, 1);
    cart.coupon_code = Some("glow10".to_string());

    let outcome = h.finalizer.finalize(&h.checkout(cart, PaymentMethod::CashOnDelivery)).await.unwrap();
    let order = outcome.order;

    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.pricing.discount, 80);
    assert_eq!(order.pricing.shipping, 0);
    assert_eq!(order.pricing.tax, 180);
    assert_eq!(order.pricing.total, 1000 + 180 - 80);
    assert_eq!(order.points_earned, 46);
    assert!(outcome.gateway.is_none());

    assert_eq!(h.stock(product).await, 4);
    assert_eq!(h.balance().await, 46);
    let customer = h.store.get_customer(h.customer_id).await.unwrap().unwrap();
    assert_eq!(customer.reward_points, 46);
    assert_eq!(h.events.topics(), vec!["orders.completed"]);
}

#[tokio::test]
async fn test_insufficient_points_changes_nothing() {
    let h = harness().await;
    let product = h.product(1000, 5).await;
    h.store.seed_points(h.customer_id, 50).await.unwrap();

    let mut cart = h.cart(product, 1);
    cart.points_to_redeem = 100;

    let err = h
        .finalizer
        .finalize(&h.checkout(cart, PaymentMethod::CashOnDelivery))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::InsufficientPoints {
            requested: 100,
            available: 50
        }
    ));

    assert_eq!(h.stock(product).await, 5);
    assert_eq!(h.balance().await, 50);
    assert!(h.finalizer.list_orders(h.customer_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_used_single_use_coupon_is_excluded_and_rejected() {
    let h = harness().await;
    let product = h.product(1000, 10).await;
    h.coupon(Coupon::new("WELCOME", CouponKind::Fixed { amount: 100 }, CouponScope::Global))
        .await;

    assert_eq!(h.finalizer.eligible_coupons(h.customer_id, 1000).await.unwrap().len(), 1);

    let mut cart = h.cart(product, 1);
    cart.coupon_code = Some("WELCOME".to_string());
    h.finalizer
        .finalize(&h.checkout(cart.clone(), PaymentMethod::CashOnDelivery))
        .await
        .unwrap();

    assert!(h.finalizer.eligible_coupons(h.customer_id, 1000).await.unwrap().is_empty());

    let err = h
        .finalizer
        .finalize(&h.checkout(cart, PaymentMethod::CashOnDelivery))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::CouponAlreadyUsed));
    assert_eq!(h.stock(product).await, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_unit_goes_to_exactly_one_buyer() {
    let h = harness().await;
    let product = h.product(300, 1).await;

    let request = h.checkout(h.cart(product, 1), PaymentMethod::CashOnDelivery);
    let (a, b) = {
        let (fa, fb) = (h.finalizer.clone(), h.finalizer.clone());
        let (ra, rb) = (request.clone(), request.clone());
        tokio::join!(
            tokio::spawn(async move { fa.finalize(&ra).await }),
            tokio::spawn(async move { fb.finalize(&rb).await })
        )
    };
    let results = [a.unwrap(), b.unwrap()];

    let won = results.iter().filter(|r| r.is_ok()).count();
    let lost = results
        .iter()
        .filter(|r| matches!(r, Err(CheckoutError::InsufficientStock { available: 0, .. })))
        .count();
    assert_eq!((won, lost), (1, 1));
    assert_eq!(h.stock(product).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_use_coupon_race() {
    let h = harness().await;
    let product = h.product(1000, 10).await;
    h.coupon(Coupon::new("ONCE", CouponKind::Fixed { amount: 200 }, CouponScope::Customer(h.customer_id)))
        .await;

    let mut cart = h.cart(product, 1);
    cart.coupon_code = Some("ONCE".to_string());
    let request = h.checkout(cart, PaymentMethod::CashOnDelivery);

    let (fa, fb) = (h.finalizer.clone(), h.finalizer.clone());
    let (ra, rb) = (request.clone(), request.clone());
    let (a, b) = tokio::join!(
        tokio::spawn(async move { fa.finalize(&ra).await }),
        tokio::spawn(async move { fb.finalize(&rb).await })
    );
    let results = [a.unwrap(), b.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(r, Err(CheckoutError::CouponAlreadyUsed))));
    assert_eq!(h.stock(product).await, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_double_redemption_race() {
    let h = harness().await;
    let product = h.product(1000, 10).await;
    h.store.seed_points(h.customer_id, 100).await.unwrap();

    let mut cart = h.cart(product, 1);
    cart.points_to_redeem = 80;
    let request = h.checkout(cart, PaymentMethod::CashOnDelivery);

    let (fa, fb) = (h.finalizer.clone(), h.finalizer.clone());
    let (ra, rb) = (request.clone(), request.clone());
    let (a, b) = tokio::join!(
        tokio::spawn(async move { fa.finalize(&ra).await }),
        tokio::spawn(async move { fb.finalize(&rb).await })
    );
    let results = [a.unwrap(), b.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(CheckoutError::InsufficientPoints { requested: 80, .. }))));
    // 100 - 80 redeemed + 50 cashback on the winning order
    assert_eq!(h.balance().await, 70);
    assert!(h.balance().await >= 0);
}

#[tokio::test]
async fn test_shipping_threshold() {
    let h = harness().await;
    let cheap = h.product(400, 5).await;
    let dear = h.product(600, 5).await;

    let below = h.finalizer.quote(&h.cart(cheap, 1)).await.unwrap();
    assert_eq!(below.shipping, 50);

    let above = h.finalizer.quote(&h.cart(dear, 1)).await.unwrap();
    assert_eq!(above.shipping, 0);
}

#[tokio::test]
async fn test_gateway_capture_is_idempotent() {
    let h = harness().await;
    let product = h.product(1000, 3).await;

    let outcome = h
        .finalizer
        .finalize(&h.checkout(h.cart(product, 2), PaymentMethod::Gateway))
        .await
        .unwrap();
    assert_eq!(outcome.order.status, OrderStatus::Pending);
    let gateway = outcome.gateway.unwrap();
    assert_eq!(gateway.amount, outcome.order.pricing.total);
    assert_eq!(outcome.order.payment.gateway_handle.as_deref(), Some(gateway.handle.as_str()));
    assert_eq!(h.stock(product).await, 1);
    assert_eq!(h.balance().await, 0);

    let callback = h.gateway.sign_callback(&gateway.handle, "pay_1", CallbackStatus::Captured);
    let first = h.finalizer.confirm_payment(&callback).await.unwrap();
    assert_eq!(first.outcome, ConfirmOutcome::Completed);
    assert_eq!(first.order.status, OrderStatus::Completed);
    assert_eq!(first.order.payment.gateway_payment_id.as_deref(), Some("pay_1"));

    let again = h.finalizer.confirm_payment(&callback).await.unwrap();
    assert_eq!(again.outcome, ConfirmOutcome::AlreadyCompleted);

    let earned = h
        .finalizer
        .ledger_history(h.customer_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.category == EntryCategory::OrderCashback)
        .count();
    assert_eq!(earned, 1);
    assert_eq!(h.balance().await, first.order.points_earned);
    assert_eq!(h.stock(product).await, 1);
}

#[tokio::test]
async fn test_forged_callback_is_rejected() {
    let h = harness().await;
    let product = h.product(1000, 3).await;
    let outcome = h
        .finalizer
        .finalize(&h.checkout(h.cart(product, 1), PaymentMethod::Gateway))
        .await
        .unwrap();
    let handle = outcome.gateway.unwrap().handle;

    let mut callback = h.gateway.sign_callback(&handle, "pay_1", CallbackStatus::Failed);
    callback.status = CallbackStatus::Captured;

    let err = h.finalizer.confirm_payment(&callback).await.unwrap_err();
    assert!(matches!(err, CheckoutError::InvalidSignature));
    let order = h.finalizer.get_order(outcome.order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_failed_payment_releases_stock_and_coupon() {
    let h = harness().await;
    let product = h.product(1000, 3).await;
    h.coupon(Coupon::new("FIRST", CouponKind::Fixed { amount: 100 }, CouponScope::Global))
        .await;

    let mut cart = h.cart(product, 1);
    cart.coupon_code = Some("FIRST".to_string());
    let outcome = h
        .finalizer
        .finalize(&h.checkout(cart, PaymentMethod::Gateway))
        .await
        .unwrap();
    assert!(h.finalizer.eligible_coupons(h.customer_id, 1000).await.unwrap().is_empty());

    let handle = outcome.gateway.unwrap().handle;
    let callback = h.gateway.sign_callback(&handle, "pay_1", CallbackStatus::Failed);
    let update = h.finalizer.confirm_payment(&callback).await.unwrap();

    assert_eq!(update.outcome, ConfirmOutcome::Failed);
    assert_eq!(update.order.status, OrderStatus::Failed);
    assert_eq!(h.stock(product).await, 3);
    assert_eq!(h.finalizer.eligible_coupons(h.customer_id, 1000).await.unwrap().len(), 1);
    assert_eq!(h.events.topics(), vec!["orders.failed"]);
}

#[tokio::test]
async fn test_sweep_beats_late_capture() {
    let h = harness().await;
    let product = h.product(1000, 3).await;
    let outcome = h
        .finalizer
        .finalize(&h.checkout(h.cart(product, 1), PaymentMethod::Gateway))
        .await
        .unwrap();
    let handle = outcome.gateway.unwrap().handle;

    let report = h
        .finalizer
        .expire_pending(Utc::now() + ChronoDuration::seconds(1), 10)
        .await
        .unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(h.stock(product).await, 3);

    let callback = h.gateway.sign_callback(&handle, "pay_late", CallbackStatus::Captured);
    let update = h.finalizer.confirm_payment(&callback).await.unwrap();
    assert_eq!(update.outcome, ConfirmOutcome::AlreadyClosed);
    assert_eq!(update.order.status, OrderStatus::Failed);
    assert_eq!(h.balance().await, 0);

    // Nothing left to sweep
    let report = h
        .finalizer
        .expire_pending(Utc::now() + ChronoDuration::seconds(1), 10)
        .await
        .unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn test_cancelled_order_releases_stock_and_coupon() {
    let h = harness().await;
    let product = h.product(1000, 3).await;
    h.coupon(Coupon::new("FIRST", CouponKind::Fixed { amount: 100 }, CouponScope::Global))
        .await;

    let mut cart = h.cart(product, 2);
    cart.coupon_code = Some("FIRST".to_string());
    let outcome = h
        .finalizer
        .finalize(&h.checkout(cart, PaymentMethod::Gateway))
        .await
        .unwrap();
    assert_eq!(h.stock(product).await, 1);

    // Only the owner may cancel
    let err = h.finalizer.cancel_order(Uuid::new_v4(), outcome.order.id).await.unwrap_err();
    assert!(matches!(err, CheckoutError::OrderNotFound(_)));

    let order = h.finalizer.cancel_order(h.customer_id, outcome.order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(h.stock(product).await, 3);
    assert_eq!(h.finalizer.eligible_coupons(h.customer_id, 1000).await.unwrap().len(), 1);
    assert_eq!(h.events.topics(), vec!["orders.failed"]);

    // Repeating the cancel changes nothing
    let again = h.finalizer.cancel_order(h.customer_id, outcome.order.id).await.unwrap();
    assert_eq!(again.status, OrderStatus::Cancelled);
    assert_eq!(h.stock(product).await, 3);

    let handle = outcome.gateway.unwrap().handle;
    let callback = h.gateway.sign_callback(&handle, "pay_late", CallbackStatus::Captured);
    let update = h.finalizer.confirm_payment(&callback).await.unwrap();
    assert_eq!(update.outcome, ConfirmOutcome::AlreadyClosed);
    assert_eq!(h.balance().await, 0);
}

#[tokio::test]
async fn test_completed_order_cannot_be_cancelled() {
    let h = harness().await;
    let product = h.product(1000, 3).await;
    let outcome = h
        .finalizer
        .finalize(&h.checkout(h.cart(product, 1), PaymentMethod::CashOnDelivery))
        .await
        .unwrap();
    assert_eq!(outcome.order.status, OrderStatus::Completed);

    let err = h.finalizer.cancel_order(h.customer_id, outcome.order.id).await.unwrap_err();
    assert!(matches!(err, CheckoutError::InvalidTransition(_)));
    assert_eq!(h.stock(product).await, 2);
}

#[tokio::test]
async fn test_gateway_outage_fails_order() {
    let h = harness().await;
    let product = h.product(1000, 3).await;
    h.gateway.set_available(false);

    let err = h
        .finalizer
        .finalize(&h.checkout(h.cart(product, 1), PaymentMethod::Gateway))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::Gateway(_)));
    assert_eq!(h.stock(product).await, 3);

    let orders = h.finalizer.list_orders(h.customer_id).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Failed);
}

#[tokio::test]
async fn test_pending_orders_hold_points() {
    let h = harness().await;
    let product = h.product(1000, 5).await;
    h.store.seed_points(h.customer_id, 100).await.unwrap();

    let mut cart = h.cart(product, 1);
    cart.points_to_redeem = 80;
    h.finalizer
        .finalize(&h.checkout(cart.clone(), PaymentMethod::Gateway))
        .await
        .unwrap();

    let summary = h.finalizer.customer_summary(h.customer_id).await.unwrap();
    assert_eq!(summary.reward_points, 100);
    assert_eq!(summary.points_on_hold, 80);
    assert_eq!(summary.phone.as_deref(), Some("********3210"));

    let err = h
        .finalizer
        .finalize(&h.checkout(cart, PaymentMethod::CashOnDelivery))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::InsufficientPoints {
            requested: 80,
            available: 20
        }
    ));
}

#[tokio::test]
async fn test_refund_restores_points_and_stock() {
    let h = harness().await;
    let product = h.product(1000, 5).await;
    h.store.seed_points(h.customer_id, 100).await.unwrap();

    let mut cart = h.cart(product, 1);
    cart.points_to_redeem = 50;
    let order = h
        .finalizer
        .finalize(&h.checkout(cart, PaymentMethod::CashOnDelivery))
        .await
        .unwrap()
        .order;
    assert_eq!(order.pricing.points_value, 50);
    assert_eq!(order.points_earned, 50);
    assert_eq!(h.balance().await, 100);
    assert_eq!(h.stock(product).await, 4);

    let refund = h.finalizer.refund(order.id).await.unwrap();
    assert!(!refund.already_refunded);
    assert_eq!(refund.points_restored, 50);
    assert_eq!(refund.points_clawed_back, 50);
    assert_eq!(refund.order.status, OrderStatus::Refunded);
    assert_eq!(h.balance().await, 100);
    assert_eq!(h.stock(product).await, 5);

    let again = h.finalizer.refund(order.id).await.unwrap();
    assert!(again.already_refunded);
    assert_eq!(h.stock(product).await, 5);
}

#[tokio::test]
async fn test_refund_of_pending_order_is_rejected() {
    let h = harness().await;
    let product = h.product(1000, 5).await;
    let outcome = h
        .finalizer
        .finalize(&h.checkout(h.cart(product, 1), PaymentMethod::Gateway))
        .await
        .unwrap();

    let err = h.finalizer.refund(outcome.order.id).await.unwrap_err();
    assert!(matches!(err, CheckoutError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_counter_sale_with_one_time_code() {
    let h = harness().await;
    let product = h.product(700, 5).await;
    let otp = Arc::new(CapturingOtpSender::default());
    let sales = SaleService::new(
        h.finalizer.clone(),
        h.store.clone(),
        Arc::new(InMemoryPendingSaleStore::new()),
        otp.clone(),
        ChronoDuration::seconds(300),
        3,
    );
    let seller = Uuid::new_v4();

    let ticket = sales
        .start_sale(StartSaleRequest {
            seller_id: seller,
            customer_phone: "919876543210".to_string(),
            lines: vec![CheckoutLine {
                product_id: product,
                quantity: 1,
            }],
            coupon_code: None,
            points_to_redeem: 0,
            shipping_method: "in_store".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(ticket.customer_id, h.customer_id);
    assert_eq!(ticket.masked_phone, "********3210");
    assert_eq!(ticket.quote.shipping, 0);
    // Nothing is reserved until the customer confirms
    assert_eq!(h.stock(product).await, 5);

    let code = otp.last_code.lock().unwrap().clone().unwrap();
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let err = sales.confirm_sale(seller, ticket.sale_id, wrong).await.unwrap_err();
    assert!(matches!(err, SaleError::InvalidCode { remaining: 2 }));

    let err = sales.confirm_sale(Uuid::new_v4(), ticket.sale_id, &code).await.unwrap_err();
    assert!(matches!(err, SaleError::NotFound));

    let order = sales.confirm_sale(seller, ticket.sale_id, &code).await.unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.channel, SalesChannel::PointOfSale);
    assert_eq!(order.pricing.total, ticket.quote.total);
    assert_eq!(h.stock(product).await, 4);

    let replay = sales.confirm_sale(seller, ticket.sale_id, &code).await.unwrap_err();
    assert!(matches!(replay, SaleError::NotFound));
}

#[tokio::test]
async fn test_counter_sale_discarded_after_bad_codes() {
    let h = harness().await;
    let product = h.product(700, 5).await;
    let otp = Arc::new(CapturingOtpSender::default());
    let sales = SaleService::new(
        h.finalizer.clone(),
        h.store.clone(),
        Arc::new(InMemoryPendingSaleStore::new()),
        otp.clone(),
        ChronoDuration::seconds(300),
        2,
    );
    let seller = Uuid::new_v4();
    let ticket = sales
        .start_sale(StartSaleRequest {
            seller_id: seller,
            customer_phone: PHONE.to_string(),
            lines: vec![CheckoutLine {
                product_id: product,
                quantity: 1,
            }],
            coupon_code: None,
            points_to_redeem: 0,
            shipping_method: "in_store".to_string(),
        })
        .await
        .unwrap();
    let code = otp.last_code.lock().unwrap().clone().unwrap();
    let wrong = if code == "000000" { "111111" } else { "000000" };

    assert!(matches!(
        sales.confirm_sale(seller, ticket.sale_id, wrong).await,
        Err(SaleError::InvalidCode { remaining: 1 })
    ));
    assert!(matches!(
        sales.confirm_sale(seller, ticket.sale_id, wrong).await,
        Err(SaleError::TooManyAttempts)
    ));
    assert!(matches!(
        sales.confirm_sale(seller, ticket.sale_id, &code).await,
        Err(SaleError::NotFound)
    ));
    assert_eq!(h.stock(product).await, 5);
}

/// Pending-sale store that yields between every step, so concurrent
/// confirmations interleave the way they do against a remote store.
#[derive(Default)]
struct SlowPendingSales {
    inner: InMemoryPendingSaleStore,
}

impl SlowPendingSales {
    async fn pause() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[async_trait]
impl PendingSaleStore for SlowPendingSales {
    async fn put(&self, sale: &PendingSale, ttl: ChronoDuration) -> Result<(), StoreError> {
        Self::pause().await;
        self.inner.put(sale, ttl).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<PendingSale>, StoreError> {
        Self::pause().await;
        self.inner.get(id).await
    }

    async fn take(&self, id: Uuid) -> Result<Option<PendingSale>, StoreError> {
        Self::pause().await;
        self.inner.take(id).await
    }

    async fn record_attempt(&self, id: Uuid) -> Result<Option<u32>, StoreError> {
        Self::pause().await;
        self.inner.record_attempt(id).await
    }
}

impl Harness {
    fn slow_sales(&self, otp: Arc<CapturingOtpSender>, max_attempts: u32) -> Arc<SaleService> {
        Arc::new(SaleService::new(
            self.finalizer.clone(),
            self.store.clone(),
            Arc::new(SlowPendingSales::default()),
            otp,
            ChronoDuration::seconds(300),
            max_attempts,
        ))
    }
}

async fn start_counter_sale(sales: &SaleService, seller: Uuid, product: Uuid) -> PendingSaleTicket {
    sales
        .start_sale(StartSaleRequest {
            seller_id: seller,
            customer_phone: PHONE.to_string(),
            lines: vec![CheckoutLine {
                product_id: product,
                quantity: 1,
            }],
            coupon_code: None,
            points_to_redeem: 0,
            shipping_method: "in_store".to_string(),
        })
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bad_code_racing_good_code_cannot_revive_sale() {
    let h = harness().await;
    let product = h.product(700, 20).await;
    let otp = Arc::new(CapturingOtpSender::default());
    let sales = h.slow_sales(otp.clone(), 3);
    let seller = Uuid::new_v4();

    for _ in 0..10 {
        let sale_id = start_counter_sale(&sales, seller, product).await.sale_id;
        let code = otp.last_code.lock().unwrap().clone().unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        let good = tokio::spawn({
            let sales = sales.clone();
            let code = code.clone();
            async move { sales.confirm_sale(seller, sale_id, &code).await }
        });
        let bad = tokio::spawn({
            let sales = sales.clone();
            async move { sales.confirm_sale(seller, sale_id, wrong).await }
        });
        assert!(good.await.unwrap().is_ok());
        assert!(matches!(
            bad.await.unwrap(),
            Err(SaleError::InvalidCode { .. }) | Err(SaleError::NotFound)
        ));

        let replay = sales.confirm_sale(seller, sale_id, &code).await.unwrap_err();
        assert!(matches!(replay, SaleError::NotFound));
    }

    // Exactly one order per sale, each taking one unit
    let orders = h.store.list_orders(h.customer_id).await.unwrap();
    assert_eq!(orders.len(), 10);
    assert_eq!(h.stock(product).await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_guesses_share_one_attempt_budget() {
    let h = harness().await;
    let product = h.product(700, 5).await;
    let otp = Arc::new(CapturingOtpSender::default());
    let sales = h.slow_sales(otp.clone(), 3);
    let seller = Uuid::new_v4();
    let sale_id = start_counter_sale(&sales, seller, product).await.sale_id;
    let code = otp.last_code.lock().unwrap().clone().unwrap();

    let guesses: Vec<_> = (0..51)
        .map(|i| format!("{:06}", i))
        .filter(|guess| *guess != code)
        .take(50)
        .map(|guess| {
            let sales = sales.clone();
            tokio::spawn(async move { sales.confirm_sale(seller, sale_id, &guess).await })
        })
        .collect();

    let mut invalid = 0;
    let mut locked_out = 0;
    for guess in guesses {
        match guess.await.unwrap() {
            Err(SaleError::InvalidCode { .. }) => invalid += 1,
            Err(SaleError::TooManyAttempts) => locked_out += 1,
            Err(SaleError::NotFound) => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
    assert_eq!(invalid, 2);
    assert!(locked_out >= 1);

    let late = sales.confirm_sale(seller, sale_id, &code).await.unwrap_err();
    assert!(matches!(late, SaleError::NotFound));
    assert!(h.store.list_orders(h.customer_id).await.unwrap().is_empty());
    assert_eq!(h.stock(product).await, 5);
}

#[tokio::test]
async fn test_unknown_phone_cannot_start_sale() {
    let h = harness().await;
    let product = h.product(700, 5).await;
    let sales = SaleService::new(
        h.finalizer.clone(),
        h.store.clone(),
        Arc::new(InMemoryPendingSaleStore::new()),
        Arc::new(CapturingOtpSender::default()),
        ChronoDuration::seconds(300),
        3,
    );

    let err = sales
        .start_sale(StartSaleRequest {
            seller_id: Uuid::new_v4(),
            customer_phone: "+1 555 0100".to_string(),
            lines: vec![CheckoutLine {
                product_id: product,
                quantity: 1,
            }],
            coupon_code: None,
            points_to_redeem: 0,
            shipping_method: "in_store".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SaleError::NotFound));
}
