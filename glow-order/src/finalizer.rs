use chrono::{DateTime, Utc};
use glow_catalog::{
    find_eligible, CartLine, Coupon, CouponHolder, IneligibleReason, PricingEngine, PricingRequest, PricingResult,
    Product, Rates,
};
use glow_core::identity::Customer;
use glow_core::payment::{CallbackStatus, GatewayCallback, GatewayOrder};
use glow_shared::pii::mask_phone;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CheckoutError;
use crate::events::{self, OrderEventSink};
use crate::ledger::{self, EntryCategory, LedgerEntry};
use crate::manager::{OrderStateMachine, Transition};
use crate::models::{CouponRef, Order, OrderItem, OrderPricing, OrderStatus, PaymentMethod, SalesChannel, ShippingAddress};
use crate::orchestrator::PaymentOrchestrator;
use crate::repository::{CheckoutStore, CheckoutTx};

/// Tax and cashback policy. One tax rate for every channel; cashback differs
/// per channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRules {
    pub tax_rate_bps: u32,
    pub storefront_cashback_bps: u32,
    pub point_of_sale_cashback_bps: u32,
    pub currency: String,
}

impl CheckoutRules {
    pub fn rates(&self, channel: SalesChannel) -> Rates {
        let cashback_rate_bps = match channel {
            SalesChannel::Storefront => self.storefront_cashback_bps,
            SalesChannel::PointOfSale => self.point_of_sale_cashback_bps,
        };
        Rates {
            tax_rate_bps: self.tax_rate_bps,
            cashback_rate_bps,
        }
    }
}

impl Default for CheckoutRules {
    fn default() -> Self {
        Self {
            tax_rate_bps: 1800,
            storefront_cashback_bps: 500,
            point_of_sale_cashback_bps: 500,
            currency: "INR".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckoutLine {
    pub product_id: Uuid,
    pub quantity: u32,
}

/// Cart as submitted. Prices are never taken from the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub customer_id: Uuid,
    pub channel: SalesChannel,
    pub lines: Vec<CheckoutLine>,
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub points_to_redeem: i64,
    pub shipping_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    #[serde(flatten)]
    pub cart: QuoteRequest,
    pub payment_method: PaymentMethod,
    pub address: Option<ShippingAddress>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order: Order,
    /// Present for gateway orders: what the customer pays against
    pub gateway: Option<GatewayOrder>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmOutcome {
    Completed,
    AlreadyCompleted,
    Failed,
    /// Order had already failed or been cancelled; nothing changed
    AlreadyClosed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentUpdate {
    pub order: Order,
    pub outcome: ConfirmOutcome,
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundOutcome {
    pub order: Order,
    pub points_restored: i64,
    pub points_clawed_back: i64,
    pub already_refunded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerSummary {
    pub customer_id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    /// Derived from the ledger
    pub reward_points: i64,
    /// Points promised to pending gateway orders
    pub points_on_hold: i64,
}

/// Orchestrates checkout: pricing against live state, stock, coupon usage,
/// point ledger and payment, each step inside one store transaction.
pub struct OrderFinalizer {
    store: Arc<dyn CheckoutStore>,
    engine: PricingEngine,
    rules: CheckoutRules,
    payments: Arc<PaymentOrchestrator>,
    events: Arc<dyn OrderEventSink>,
}

impl OrderFinalizer {
    pub fn new(
        store: Arc<dyn CheckoutStore>,
        engine: PricingEngine,
        rules: CheckoutRules,
        payments: Arc<PaymentOrchestrator>,
        events: Arc<dyn OrderEventSink>,
    ) -> Self {
        Self {
            store,
            engine,
            rules,
            payments,
            events,
        }
    }

    pub fn rules(&self) -> &CheckoutRules {
        &self.rules
    }

    /// Live preview of what `finalize` would charge. Writes nothing.
    pub async fn quote(&self, request: &QuoteRequest) -> Result<PricingResult, CheckoutError> {
        let wanted = consolidate(&request.lines)?;
        let ids: Vec<Uuid> = wanted.keys().copied().collect();

        let customer = self
            .store
            .get_customer(request.customer_id)
            .await?
            .ok_or(CheckoutError::CustomerNotFound(request.customer_id))?;
        let products = self.store.get_products(&ids).await?;
        let lines = cart_lines(&wanted, &products)?;

        let coupon = self.resolve_coupon(request.coupon_code.as_deref()).await?;
        let coupon_uses = match &coupon {
            Some(c) => self.store.coupon_usage(customer.id).await?.get(&c.id).copied().unwrap_or(0),
            None => 0,
        };
        let balance = self.store.point_balance(customer.id).await?;
        let hold = self.store.pending_points_hold(customer.id).await?;

        let result = self.engine.price(&PricingRequest {
            lines: &lines,
            coupon: coupon.as_ref(),
            holder: holder(&customer),
            coupon_uses,
            points_to_redeem: request.points_to_redeem,
            available_points: (balance - hold).max(0),
            shipping_method: &request.shipping_method,
            rates: self.rules.rates(request.channel),
            now: Utc::now(),
        })?;
        Ok(result)
    }

    /// Places an order atomically.
    ///
    /// Cash-on-delivery orders complete in the same transaction, together with
    /// their ledger entries. Gateway orders commit as pending and are then
    /// registered with the gateway; if that fails the order is failed and its
    /// stock released.
    pub async fn finalize(&self, request: &CheckoutRequest) -> Result<CheckoutOutcome, CheckoutError> {
        let cart = &request.cart;
        let wanted = consolidate(&cart.lines)?;
        if cart.points_to_redeem < 0 {
            return Err(CheckoutError::NegativePoints(cart.points_to_redeem));
        }
        let ids: Vec<Uuid> = wanted.keys().copied().collect();
        let coupon = self.resolve_coupon(cart.coupon_code.as_deref()).await?;

        let mut tx = self.store.begin().await?;

        let customer = tx
            .lock_customer(cart.customer_id)
            .await?
            .ok_or(CheckoutError::CustomerNotFound(cart.customer_id))?;
        let products = tx.lock_products(&ids).await?;
        let lines = cart_lines(&wanted, &products)?;

        // Re-price from server-side state
        let balance = tx.point_balance(customer.id).await?;
        let result = self.engine.price(&PricingRequest {
            lines: &lines,
            coupon: coupon.as_ref(),
            holder: holder(&customer),
            coupon_uses: 0,
            points_to_redeem: cart.points_to_redeem,
            available_points: balance.max(0),
            shipping_method: &cart.shipping_method,
            rates: self.rules.rates(cart.channel),
            now: Utc::now(),
        })?;

        // Usage re-check under the customer lock
        if let Some(coupon) = &coupon {
            let uses = tx.coupon_uses(customer.id, coupon.id).await?;
            if coupon.check_usage(uses).is_err() {
                tracing::warn!(customer_id = %customer.id, code = %coupon.code, uses, "coupon already used");
                return Err(CheckoutError::CouponAlreadyUsed);
            }
        }

        for product in &products {
            let quantity = i64::from(wanted.get(&product.id).copied().unwrap_or(0));
            if !tx.adjust_stock(product.id, -quantity).await? {
                return Err(CheckoutError::InsufficientStock {
                    product_id: product.id,
                    requested: quantity,
                    available: product.stock,
                });
            }
        }

        // Points promised to other pending orders are not spendable
        let hold = tx.pending_points_hold(customer.id).await?;
        let available = (balance - hold).max(0);
        if cart.points_to_redeem > available {
            return Err(CheckoutError::InsufficientPoints {
                requested: cart.points_to_redeem,
                available,
            });
        }

        let mut order = build_order(request, &products, &wanted, &result, coupon.as_ref());
        OrderStateMachine::submit(&mut order)?;

        match request.payment_method {
            PaymentMethod::CashOnDelivery => {
                let entries = settlement_entries(&order)?;
                ledger::apply(balance, &entries)?;
                OrderStateMachine::complete(&mut order)?;
                tx.insert_order(&order).await?;
                tx.append_ledger(customer.id, &entries).await?;
                tx.commit().await?;

                tracing::info!(
                    order_id = %order.id,
                    customer_id = %order.customer_id,
                    total = order.pricing.total,
                    points_redeemed = order.points_redeemed,
                    points_earned = order.points_earned,
                    "order completed"
                );
                self.emit(events::completed(&order)).await;
                Ok(CheckoutOutcome { order, gateway: None })
            }
            PaymentMethod::Gateway => {
                tx.insert_order(&order).await?;
                tx.commit().await?;
                tracing::info!(order_id = %order.id, total = order.pricing.total, "order pending payment");

                self.register_with_gateway(order).await
            }
        }
    }

    async fn register_with_gateway(&self, order: Order) -> Result<CheckoutOutcome, CheckoutError> {
        let registration = self
            .payments
            .create_gateway_order(order.id, order.pricing.total, &self.rules.currency)
            .await;

        let mut tx = self.store.begin().await?;
        let mut current = tx
            .lock_order(order.id)
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(order.id.to_string()))?;

        match registration {
            Ok(gateway) => {
                current.payment.gateway_handle = Some(gateway.handle.clone());
                tx.update_order(&current).await?;
                tx.commit().await?;
                Ok(CheckoutOutcome {
                    order: current,
                    gateway: Some(gateway),
                })
            }
            Err(err) => {
                tracing::error!(order_id = %order.id, error = %err, "gateway registration failed");
                if OrderStateMachine::fail(&mut current)? == Transition::Applied {
                    release_stock(&mut tx, &current).await?;
                    tx.update_order(&current).await?;
                    tx.commit().await?;
                    self.emit(events::failed(&current, "gateway_unavailable")).await;
                }
                Err(CheckoutError::Gateway(err))
            }
        }
    }

    /// Handles a signed gateway callback. Safe to call any number of times.
    pub async fn confirm_payment(&self, callback: &GatewayCallback) -> Result<PaymentUpdate, CheckoutError> {
        if !self.payments.verify_callback(callback) {
            tracing::warn!(handle = %callback.handle, "rejected gateway callback with bad signature");
            return Err(CheckoutError::InvalidSignature);
        }

        match callback.status {
            CallbackStatus::Failed => self.fail_payment(&callback.handle, "payment_declined").await,
            CallbackStatus::Captured => self.capture(&callback.handle, &callback.payment_id).await,
        }
    }

    async fn capture(&self, handle: &str, payment_id: &str) -> Result<PaymentUpdate, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order_by_handle(handle)
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(handle.to_string()))?;

        match order.status {
            OrderStatus::Completed | OrderStatus::Refunded => {
                tracing::debug!(order_id = %order.id, "duplicate capture ignored");
                return Ok(PaymentUpdate {
                    order,
                    outcome: ConfirmOutcome::AlreadyCompleted,
                });
            }
            OrderStatus::Failed | OrderStatus::Cancelled => {
                tracing::warn!(order_id = %order.id, status = order.status.as_str(), "capture for closed order");
                return Ok(PaymentUpdate {
                    order,
                    outcome: ConfirmOutcome::AlreadyClosed,
                });
            }
            OrderStatus::Draft | OrderStatus::Pending => {}
        }

        tx.lock_customer(order.customer_id).await?;
        let balance = tx.point_balance(order.customer_id).await?;
        let entries = settlement_entries(&order)?;
        ledger::apply(balance, &entries)?;

        OrderStateMachine::complete(&mut order)?;
        order.payment.gateway_payment_id = Some(payment_id.to_string());
        tx.update_order(&order).await?;
        tx.append_ledger(order.customer_id, &entries).await?;
        tx.commit().await?;

        tracing::info!(order_id = %order.id, total = order.pricing.total, "gateway payment captured");
        self.emit(events::completed(&order)).await;
        Ok(PaymentUpdate {
            order,
            outcome: ConfirmOutcome::Completed,
        })
    }

    /// Pending → Failed for the order behind `handle`, releasing its stock.
    pub async fn fail_payment(&self, handle: &str, reason: &str) -> Result<PaymentUpdate, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .lock_order_by_handle(handle)
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(handle.to_string()))?;
        self.fail_locked(tx, order, reason).await
    }

    async fn fail_locked(
        &self,
        mut tx: Box<dyn CheckoutTx>,
        mut order: Order,
        reason: &str,
    ) -> Result<PaymentUpdate, CheckoutError> {
        let outcome = match order.status {
            OrderStatus::Pending => {
                OrderStateMachine::fail(&mut order)?;
                release_stock(&mut tx, &order).await?;
                tx.update_order(&order).await?;
                tx.commit().await?;
                tracing::info!(order_id = %order.id, reason, "order failed");
                self.emit(events::failed(&order, reason)).await;
                ConfirmOutcome::Failed
            }
            OrderStatus::Completed | OrderStatus::Refunded => ConfirmOutcome::AlreadyCompleted,
            _ => ConfirmOutcome::AlreadyClosed,
        };
        Ok(PaymentUpdate { order, outcome })
    }

    /// Customer-initiated Pending → Cancelled. The order's stock and any
    /// coupon use are released; points were never debited for a pending order.
    pub async fn cancel_order(&self, customer_id: Uuid, order_id: Uuid) -> Result<Order, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order_id)
            .await?
            .filter(|order| order.customer_id == customer_id)
            .ok_or_else(|| CheckoutError::OrderNotFound(order_id.to_string()))?;

        if OrderStateMachine::cancel(&mut order)? == Transition::Unchanged {
            return Ok(order);
        }
        release_stock(&mut tx, &order).await?;
        tx.update_order(&order).await?;
        tx.commit().await?;

        tracing::info!(order_id = %order.id, customer_id = %customer_id, "order cancelled by customer");
        self.emit(events::failed(&order, "cancelled_by_customer")).await;
        Ok(order)
    }

    /// Fails every pending order created at or before `older_than`.
    pub async fn expire_pending(&self, older_than: DateTime<Utc>, limit: i64) -> Result<SweepReport, CheckoutError> {
        let stale = self.store.list_stale_pending(older_than, limit).await?;
        let mut report = SweepReport {
            examined: stale.len(),
            expired: 0,
        };

        for order_id in stale {
            let mut tx = self.store.begin().await?;
            let Some(order) = tx.lock_order(order_id).await? else {
                continue;
            };
            // A callback may have landed since the listing
            if order.status != OrderStatus::Pending || order.created_at > older_than {
                continue;
            }
            let update = self.fail_locked(tx, order, "payment_timeout").await?;
            if update.outcome == ConfirmOutcome::Failed {
                report.expired += 1;
            }
        }

        if report.expired > 0 {
            tracing::info!(examined = report.examined, expired = report.expired, "pending payment sweep");
        }
        Ok(report)
    }

    /// Completed → Refunded: restock, give back redeemed points, take back
    /// earned points without driving the balance negative.
    pub async fn refund(&self, order_id: Uuid) -> Result<RefundOutcome, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(order_id.to_string()))?;

        if OrderStateMachine::refund(&mut order)? == Transition::Unchanged {
            return Ok(RefundOutcome {
                order,
                points_restored: 0,
                points_clawed_back: 0,
                already_refunded: true,
            });
        }

        tx.lock_customer(order.customer_id).await?;
        let balance = tx.point_balance(order.customer_id).await?;
        let point_value = self.engine.config().point_value_minor;

        let mut entries = Vec::new();
        if order.points_redeemed > 0 {
            entries.push(
                LedgerEntry::earn(
                    order.customer_id,
                    Some(order.id),
                    order.points_redeemed,
                    order.pricing.points_value,
                    EntryCategory::RefundRestore,
                )?
                .with_description(format!("Points returned for refunded order {}", order.id)),
            );
        }
        let clawback = order.points_earned.min(balance + order.points_redeemed).max(0);
        if clawback > 0 {
            entries.push(
                LedgerEntry::redeem(
                    order.customer_id,
                    Some(order.id),
                    clawback,
                    clawback.saturating_mul(point_value),
                    EntryCategory::RefundClawback,
                )?
                .with_description(format!("Cashback reversed for refunded order {}", order.id)),
            );
        }
        ledger::apply(balance, &entries)?;

        release_stock(&mut tx, &order).await?;
        tx.update_order(&order).await?;
        if !entries.is_empty() {
            tx.append_ledger(order.customer_id, &entries).await?;
        }
        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            points_restored = order.points_redeemed,
            points_clawed_back = clawback,
            "order refunded"
        );
        self.emit(events::refunded(&order, order.points_redeemed, clawback)).await;

        Ok(RefundOutcome {
            points_restored: order.points_redeemed,
            points_clawed_back: clawback,
            order,
            already_refunded: false,
        })
    }

    /// Coupons the customer could apply to an order of `subtotal` right now.
    pub async fn eligible_coupons(&self, customer_id: Uuid, subtotal: i64) -> Result<Vec<Coupon>, CheckoutError> {
        let customer = self
            .store
            .get_customer(customer_id)
            .await?
            .ok_or(CheckoutError::CustomerNotFound(customer_id))?;
        let coupons = self.store.list_coupons_for(customer.id, customer.phone()).await?;
        let usage = self.store.coupon_usage(customer.id).await?;
        Ok(find_eligible(coupons, &holder(&customer), subtotal, Utc::now(), &usage))
    }

    pub async fn customer_summary(&self, customer_id: Uuid) -> Result<CustomerSummary, CheckoutError> {
        let customer = self
            .store
            .get_customer(customer_id)
            .await?
            .ok_or(CheckoutError::CustomerNotFound(customer_id))?;
        let balance = self.store.point_balance(customer.id).await?;
        if balance != customer.reward_points {
            tracing::warn!(
                customer_id = %customer.id,
                projection = customer.reward_points,
                ledger = balance,
                "reward point projection out of date"
            );
        }
        let hold = self.store.pending_points_hold(customer.id).await?;

        Ok(CustomerSummary {
            customer_id: customer.id,
            name: customer.name.clone(),
            phone: customer.phone().map(mask_phone),
            reward_points: balance,
            points_on_hold: hold,
        })
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, CheckoutError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(order_id.to_string()))
    }

    pub async fn list_orders(&self, customer_id: Uuid) -> Result<Vec<Order>, CheckoutError> {
        Ok(self.store.list_orders(customer_id).await?)
    }

    pub async fn ledger_history(&self, customer_id: Uuid) -> Result<Vec<LedgerEntry>, CheckoutError> {
        Ok(self.store.ledger_entries(customer_id).await?)
    }

    pub async fn create_coupon(&self, coupon: Coupon) -> Result<Coupon, CheckoutError> {
        coupon.validate().map_err(CheckoutError::InvalidRequest)?;
        self.store.insert_coupon(&coupon).await?;
        tracing::info!(coupon_id = %coupon.id, code = %coupon.code, "coupon created");
        Ok(coupon)
    }

    async fn resolve_coupon(&self, code: Option<&str>) -> Result<Option<Coupon>, CheckoutError> {
        let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(None);
        };
        self.store
            .find_coupon_by_code(&Coupon::normalize_code(code))
            .await?
            .map(Some)
            .ok_or(CheckoutError::CouponIneligible(IneligibleReason::NotFound))
    }

    async fn emit(&self, event: glow_shared::models::events::OrderEvent) {
        let topic = event.topic();
        if let Err(e) = self.events.publish(event).await {
            tracing::error!(topic, error = %e, "failed to publish order event");
        }
    }
}

fn holder(customer: &Customer) -> CouponHolder<'_> {
    CouponHolder {
        customer_id: customer.id,
        phone: customer.phone(),
    }
}

/// Merges repeated products and validates quantities. Sorted by product id,
/// which is also the product lock order.
fn consolidate(lines: &[CheckoutLine]) -> Result<BTreeMap<Uuid, u32>, CheckoutError> {
    if lines.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }
    let mut wanted = BTreeMap::new();
    for line in lines {
        if line.quantity == 0 {
            return Err(CheckoutError::InvalidQuantity(line.product_id));
        }
        let quantity: &mut u32 = wanted.entry(line.product_id).or_insert(0);
        *quantity = quantity
            .checked_add(line.quantity)
            .ok_or(CheckoutError::InvalidQuantity(line.product_id))?;
    }
    Ok(wanted)
}

fn cart_lines(wanted: &BTreeMap<Uuid, u32>, products: &[Product]) -> Result<Vec<CartLine>, CheckoutError> {
    let by_id: HashMap<Uuid, &Product> = products.iter().map(|p| (p.id, p)).collect();
    wanted
        .iter()
        .map(|(id, quantity)| match by_id.get(id) {
            Some(product) if product.is_active => Ok(CartLine {
                product_id: product.id,
                unit_price: product.price,
                quantity: *quantity,
            }),
            _ => Err(CheckoutError::ProductUnavailable(*id)),
        })
        .collect()
}

fn build_order(
    request: &CheckoutRequest,
    products: &[Product],
    wanted: &BTreeMap<Uuid, u32>,
    result: &PricingResult,
    coupon: Option<&Coupon>,
) -> Order {
    let cart = &request.cart;
    let mut order = Order::new(cart.customer_id, cart.channel, request.payment_method);
    order.items = products
        .iter()
        .filter_map(|p| {
            wanted.get(&p.id).map(|quantity| OrderItem {
                product_id: p.id,
                sku: p.sku.clone(),
                name: p.name.clone(),
                unit_price: p.price,
                quantity: *quantity,
            })
        })
        .collect();
    order.pricing = OrderPricing::from(result);
    order.coupon = coupon.map(|c| CouponRef {
        coupon_id: c.id,
        code: c.code.clone(),
        discount: result.discount,
    });
    order.points_redeemed = result.points_redeemed;
    order.points_earned = result.points_earned;
    order.shipping_method = cart.shipping_method.clone();
    order.address = request.address.clone();
    order
}

/// Redeem then earn, the pair written when an order completes.
fn settlement_entries(order: &Order) -> Result<Vec<LedgerEntry>, CheckoutError> {
    let mut entries = Vec::with_capacity(2);
    if order.points_redeemed > 0 {
        entries.push(
            LedgerEntry::redeem(
                order.customer_id,
                Some(order.id),
                order.points_redeemed,
                order.pricing.points_value,
                EntryCategory::OrderRedemption,
            )?
            .with_description(format!("Redeemed on order {}", order.id)),
        );
    }
    if order.points_earned > 0 {
        entries.push(
            LedgerEntry::earn(
                order.customer_id,
                Some(order.id),
                order.points_earned,
                order.pricing.subtotal - order.pricing.discount,
                EntryCategory::OrderCashback,
            )?
            .with_description(format!("Cashback for order {}", order.id)),
        );
    }
    Ok(entries)
}

async fn release_stock(tx: &mut Box<dyn CheckoutTx>, order: &Order) -> Result<(), CheckoutError> {
    for item in &order.items {
        tx.adjust_stock(item.product_id, i64::from(item.quantity)).await?;
    }
    Ok(())
}
