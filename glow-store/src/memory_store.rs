use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use glow_catalog::{Coupon, Product};
use glow_core::identity::Customer;
use glow_order::ledger::{self, EntryCategory, LedgerEntry};
use glow_order::{
    CheckoutStore, CheckoutTx, Order, OrderStatus, PendingSale, PendingSaleStore, StoreError, StoreResult,
};
use glow_shared::pii::normalize_phone;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct State {
    customers: HashMap<Uuid, Customer>,
    /// normalized phone → customer id
    phones: HashMap<String, Uuid>,
    /// Keyed by id so iteration follows the product lock order
    products: BTreeMap<Uuid, Product>,
    coupons: HashMap<Uuid, Coupon>,
    orders: HashMap<Uuid, Order>,
    ledger: Vec<LedgerEntry>,
}

impl State {
    fn balance(&self, customer_id: Uuid) -> i64 {
        ledger::balance(self.ledger.iter().filter(|e| e.customer_id == customer_id))
    }

    fn hold(&self, customer_id: Uuid) -> i64 {
        self.orders
            .values()
            .filter(|o| o.customer_id == customer_id && o.status == OrderStatus::Pending)
            .map(|o| o.points_redeemed)
            .sum()
    }

    fn coupon_uses(&self, customer_id: Uuid, coupon_id: Uuid) -> u32 {
        let uses = self
            .orders
            .values()
            .filter(|o| o.customer_id == customer_id && o.coupon_id() == Some(coupon_id) && o.status.holds_coupon())
            .count();
        u32::try_from(uses).unwrap_or(u32::MAX)
    }

    fn customer(&self, id: Uuid) -> Option<Customer> {
        self.customers.get(&id).cloned()
    }
}

/// Process-local checkout store for tests and single-node demos.
///
/// A transaction holds the store-wide lock from `begin` until commit or
/// drop and works on a private copy of the state, so transactions are
/// serializable and an uncommitted one leaves no trace. Store-level reads
/// wait for any open transaction.
#[derive(Clone, Default)]
pub struct InMemoryCheckoutStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryCheckoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_customer(&self, customer: Customer) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.customers.contains_key(&customer.id) {
            return Err(StoreError::Duplicate(format!("customer {}", customer.id)));
        }
        if let Some(phone) = customer.phone().map(normalize_phone).filter(|p| !p.is_empty()) {
            if state.phones.contains_key(&phone) {
                return Err(StoreError::Duplicate("customer phone".to_string()));
            }
            state.phones.insert(phone, customer.id);
        }
        state.customers.insert(customer.id, customer);
        Ok(())
    }

    pub async fn insert_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    pub async fn product(&self, id: Uuid) -> Option<Product> {
        self.state.lock().await.products.get(&id).cloned()
    }

    /// Credits an opening balance as an adjustment entry.
    pub async fn seed_points(&self, customer_id: Uuid, points: i64) -> StoreResult<i64> {
        let entry = LedgerEntry::earn(customer_id, None, points, points, EntryCategory::Adjustment)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?
            .with_description("Opening balance");
        let mut tx = self.begin().await?;
        let balance = tx.append_ledger(customer_id, &[entry]).await?;
        tx.commit().await?;
        Ok(balance)
    }
}

#[async_trait]
impl CheckoutStore for InMemoryCheckoutStore {
    async fn begin(&self) -> StoreResult<Box<dyn CheckoutTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx { guard, working }))
    }

    async fn get_products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>> {
        let state = self.state.lock().await;
        let mut found: Vec<Product> = ids.iter().filter_map(|id| state.products.get(id).cloned()).collect();
        found.sort_by_key(|p| p.id);
        found.dedup_by_key(|p| p.id);
        Ok(found)
    }

    async fn get_customer(&self, id: Uuid) -> StoreResult<Option<Customer>> {
        Ok(self.state.lock().await.customer(id))
    }

    async fn find_customer_by_phone(&self, phone: &str) -> StoreResult<Option<Customer>> {
        let state = self.state.lock().await;
        Ok(state
            .phones
            .get(&normalize_phone(phone))
            .and_then(|id| state.customer(*id)))
    }

    async fn find_coupon_by_code(&self, code: &str) -> StoreResult<Option<Coupon>> {
        let state = self.state.lock().await;
        Ok(state.coupons.values().find(|c| c.matches_code(code)).cloned())
    }

    async fn list_coupons_for(&self, customer_id: Uuid, phone: Option<&str>) -> StoreResult<Vec<Coupon>> {
        let holder = glow_catalog::CouponHolder { customer_id, phone };
        let state = self.state.lock().await;
        let mut coupons: Vec<Coupon> = state.coupons.values().filter(|c| c.applies_to(&holder)).cloned().collect();
        coupons.sort_by_key(|c| c.created_at);
        Ok(coupons)
    }

    async fn insert_coupon(&self, coupon: &Coupon) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.coupons.values().any(|c| c.matches_code(&coupon.code)) {
            return Err(StoreError::Duplicate(format!("coupon code {}", coupon.code)));
        }
        let mut stored = coupon.clone();
        stored.code = Coupon::normalize_code(&coupon.code);
        state.coupons.insert(stored.id, stored);
        Ok(())
    }

    async fn coupon_usage(&self, customer_id: Uuid) -> StoreResult<HashMap<Uuid, u32>> {
        let state = self.state.lock().await;
        let mut usage = HashMap::new();
        for order in state.orders.values() {
            if order.customer_id != customer_id || !order.status.holds_coupon() {
                continue;
            }
            if let Some(coupon_id) = order.coupon_id() {
                *usage.entry(coupon_id).or_insert(0) += 1;
            }
        }
        Ok(usage)
    }

    async fn point_balance(&self, customer_id: Uuid) -> StoreResult<i64> {
        Ok(self.state.lock().await.balance(customer_id))
    }

    async fn pending_points_hold(&self, customer_id: Uuid) -> StoreResult<i64> {
        Ok(self.state.lock().await.hold(customer_id))
    }

    async fn ledger_entries(&self, customer_id: Uuid) -> StoreResult<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state.ledger.iter().filter(|e| e.customer_id == customer_id).cloned().collect())
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn list_orders(&self, customer_id: Uuid) -> StoreResult<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state.orders.values().filter(|o| o.customer_id == customer_id).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn list_stale_pending(&self, older_than: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut stale: Vec<&Order> = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.created_at <= older_than)
            .collect();
        stale.sort_by_key(|o| o.created_at);
        Ok(stale
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|o| o.id)
            .collect())
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
}

#[async_trait]
impl CheckoutTx for InMemoryTx {
    async fn lock_customer(&mut self, id: Uuid) -> StoreResult<Option<Customer>> {
        Ok(self.working.customer(id))
    }

    async fn lock_products(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Product>> {
        Ok(self
            .working
            .products
            .values()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn adjust_stock(&mut self, product_id: Uuid, delta: i64) -> StoreResult<bool> {
        let Some(product) = self.working.products.get_mut(&product_id) else {
            return Ok(false);
        };
        match product.stock.checked_add(delta) {
            Some(stock) if stock >= 0 => {
                product.stock = stock;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn coupon_uses(&mut self, customer_id: Uuid, coupon_id: Uuid) -> StoreResult<u32> {
        Ok(self.working.coupon_uses(customer_id, coupon_id))
    }

    async fn point_balance(&mut self, customer_id: Uuid) -> StoreResult<i64> {
        Ok(self.working.balance(customer_id))
    }

    async fn pending_points_hold(&mut self, customer_id: Uuid) -> StoreResult<i64> {
        Ok(self.working.hold(customer_id))
    }

    async fn lock_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn lock_order_by_handle(&mut self, handle: &str) -> StoreResult<Option<Order>> {
        Ok(self
            .working
            .orders
            .values()
            .find(|o| o.payment.gateway_handle.as_deref() == Some(handle))
            .cloned())
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        if self.working.orders.contains_key(&order.id) {
            return Err(StoreError::Duplicate(format!("order {}", order.id)));
        }
        self.working.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        if let Some(handle) = order.payment.gateway_handle.as_deref() {
            let taken = self
                .working
                .orders
                .values()
                .any(|o| o.id != order.id && o.payment.gateway_handle.as_deref() == Some(handle));
            if taken {
                return Err(StoreError::Duplicate(format!("gateway handle {}", handle)));
            }
        }
        match self.working.orders.get_mut(&order.id) {
            Some(existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(StoreError::Database(format!("order {} does not exist", order.id))),
        }
    }

    async fn append_ledger(&mut self, customer_id: Uuid, entries: &[LedgerEntry]) -> StoreResult<i64> {
        if !self.working.customers.contains_key(&customer_id) {
            return Err(StoreError::Database(format!("customer {} does not exist", customer_id)));
        }
        if let Some(stray) = entries.iter().find(|e| e.customer_id != customer_id) {
            return Err(StoreError::Corrupt(format!("ledger entry {} is for another customer", stray.id)));
        }
        ledger::apply(self.working.balance(customer_id), entries)?;
        self.working.ledger.extend_from_slice(entries);

        let balance = self.working.balance(customer_id);
        if let Some(customer) = self.working.customers.get_mut(&customer_id) {
            customer.reward_points = balance;
        }
        Ok(balance)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredSale {
    sale: PendingSale,
    expires_at: DateTime<Utc>,
    attempts: u32,
}

impl StoredSale {
    fn is_live(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

/// Expiring pending-sale storage for tests and single-node demos.
#[derive(Clone, Default)]
pub struct InMemoryPendingSaleStore {
    sales: Arc<Mutex<HashMap<Uuid, StoredSale>>>,
}

impl InMemoryPendingSaleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingSaleStore for InMemoryPendingSaleStore {
    async fn put(&self, sale: &PendingSale, ttl: Duration) -> Result<(), StoreError> {
        let stored = StoredSale {
            sale: sale.clone(),
            expires_at: Utc::now() + ttl,
            attempts: 0,
        };
        self.sales.lock().await.insert(sale.id, stored);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PendingSale>, StoreError> {
        let mut sales = self.sales.lock().await;
        match sales.get(&id) {
            Some(stored) if stored.is_live() => Ok(Some(stored.sale.clone())),
            Some(_) => {
                sales.remove(&id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn take(&self, id: Uuid) -> Result<Option<PendingSale>, StoreError> {
        let mut sales = self.sales.lock().await;
        Ok(sales.remove(&id).filter(StoredSale::is_live).map(|stored| stored.sale))
    }

    async fn record_attempt(&self, id: Uuid) -> Result<Option<u32>, StoreError> {
        let mut sales = self.sales.lock().await;
        match sales.get_mut(&id) {
            Some(stored) if stored.is_live() => {
                stored.attempts += 1;
                Ok(Some(stored.attempts))
            }
            Some(_) => {
                sales.remove(&id);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glow_catalog::ProductCategory;

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = InMemoryCheckoutStore::new();
        let product = Product::new("SER-1", "Niacinamide Serum", ProductCategory::Serum, 1000, 5);
        let id = product.id;
        store.insert_product(product).await;

        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.adjust_stock(id, -3).await.unwrap());
        }
        assert_eq!(store.product(id).await.unwrap().stock, 5);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.adjust_stock(id, -3).await.unwrap());
        assert!(!tx.adjust_stock(id, -3).await.unwrap());
        tx.commit().await.unwrap();
        assert_eq!(store.product(id).await.unwrap().stock, 2);
    }

    #[tokio::test]
    async fn test_ledger_append_refreshes_projection() {
        let store = InMemoryCheckoutStore::new();
        let customer = Customer::new(Uuid::new_v4(), "Asha", Some("+91 98765 43210".to_string()));
        let id = customer.id;
        store.insert_customer(customer).await.unwrap();

        assert_eq!(store.seed_points(id, 120).await.unwrap(), 120);
        assert_eq!(store.get_customer(id).await.unwrap().unwrap().reward_points, 120);
        assert_eq!(store.point_balance(id).await.unwrap(), 120);
        assert_eq!(store.ledger_entries(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_append_rejects_overdraft() {
        let store = InMemoryCheckoutStore::new();
        let customer = Customer::new(Uuid::new_v4(), "Asha", Some("+91 98765 43210".to_string()));
        let id = customer.id;
        store.insert_customer(customer).await.unwrap();

        let redeem = LedgerEntry::redeem(id, None, 100, 100, EntryCategory::OrderRedemption).unwrap();
        let mut tx = store.begin().await.unwrap();
        let err = tx.append_ledger(id, &[redeem]).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Overdraft(ledger::LedgerError::Overdraft { balance: 0, requested: 100 })
        ));
        tx.commit().await.unwrap();

        assert_eq!(store.point_balance(id).await.unwrap(), 0);
        assert_eq!(store.get_customer(id).await.unwrap().unwrap().reward_points, 0);
        assert!(store.ledger_entries(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_phone_lookup_is_normalized_and_unique() {
        let store = InMemoryCheckoutStore::new();
        let first = Customer::new(Uuid::new_v4(), "Asha", Some("+91 98765 43210".to_string()));
        let first_id = first.id;
        store.insert_customer(first).await.unwrap();

        let found = store.find_customer_by_phone("919876543210").await.unwrap().unwrap();
        assert_eq!(found.id, first_id);

        let clash = Customer::new(Uuid::new_v4(), "Ravi", Some("91-98765-43210".to_string()));
        assert!(matches!(store.insert_customer(clash).await, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_pending_sales_expire_and_take_once() {
        let store = InMemoryPendingSaleStore::new();
        let now = Utc::now();
        let sale = PendingSale {
            id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            lines: vec![],
            coupon_code: None,
            points_to_redeem: 0,
            shipping_method: "in_store".to_string(),
            otp_digest: String::new(),
            created_at: now,
            expires_at: now + Duration::seconds(60),
        };

        store.put(&sale, Duration::seconds(60)).await.unwrap();
        assert!(store.get(sale.id).await.unwrap().is_some());
        assert_eq!(store.record_attempt(sale.id).await.unwrap(), Some(1));
        assert_eq!(store.record_attempt(sale.id).await.unwrap(), Some(2));
        assert!(store.take(sale.id).await.unwrap().is_some());
        assert!(store.take(sale.id).await.unwrap().is_none());
        // A taken sale cannot be revived by a late attempt
        assert_eq!(store.record_attempt(sale.id).await.unwrap(), None);
        assert!(store.get(sale.id).await.unwrap().is_none());

        store.put(&sale, Duration::seconds(-1)).await.unwrap();
        assert!(store.get(sale.id).await.unwrap().is_none());
    }
}
