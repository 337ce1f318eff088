use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glow_catalog::{Coupon, CouponKind, CouponScope, Product, ProductCategory};
use glow_core::identity::Customer;
use glow_order::{
    CheckoutStore, CheckoutTx, CouponRef, Direction, EntryCategory, EntryStatus, LedgerEntry, Order, OrderItem,
    OrderPricing, OrderStatus, PaymentMethod, PaymentStatus, SalesChannel, StoreError, StoreResult,
};
use glow_order::ledger;
use glow_order::models::Payment;
use glow_shared::pii::{normalize_phone, Masked};
use serde_json::Value;
use sqlx::{Executor, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

const CUSTOMER_COLUMNS: &str = "id, name, phone, reward_points";
const PRODUCT_COLUMNS: &str = "id, sku, name, category, price, stock, is_active";
const COUPON_COLUMNS: &str = "id, code, description, kind, amount, percent, cap, scope, scope_customer_id, \
     scope_phone, min_order_amount, usage_limit, is_active, valid_from, valid_until, created_at";
const ORDER_COLUMNS: &str = "id, customer_id, channel, status, payment_method, payment_status, gateway_handle, \
     gateway_payment_id, subtotal, discount, points_value, shipping, tax, total, coupon_id, coupon_code, \
     coupon_discount, points_redeemed, points_earned, shipping_method, shipping_address, created_at, updated_at, \
     completed_at";
const LEDGER_COLUMNS: &str =
    "id, customer_id, order_id, direction, points, amount_equivalent, category, status, description, created_at";

const BALANCE_SQL: &str = "SELECT COALESCE(SUM(CASE WHEN direction = 'EARN' THEN points ELSE -points END), 0)::BIGINT \
     FROM point_ledger WHERE customer_id = $1 AND status = 'COMPLETED'";
const HOLD_SQL: &str =
    "SELECT COALESCE(SUM(points_redeemed), 0)::BIGINT FROM orders WHERE customer_id = $1 AND status = 'PENDING'";

fn db_err(e: sqlx::Error) -> StoreError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Duplicate(db.message().to_string()),
        _ => StoreError::Database(e.to_string()),
    }
}

fn corrupt(what: &str, value: &str) -> StoreError {
    StoreError::Corrupt(format!("unexpected {}: {}", what, value))
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    id: Uuid,
    name: String,
    phone: Option<String>,
    reward_points: i64,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: row.id,
            name: row.name,
            phone: row.phone.map(Masked::new),
            reward_points: row.reward_points,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    sku: String,
    name: String,
    category: String,
    price: i64,
    stock: i64,
    is_active: bool,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let category = ProductCategory::parse(&row.category).ok_or_else(|| corrupt("category", &row.category))?;
        Ok(Product {
            id: row.id,
            sku: row.sku,
            name: row.name,
            category,
            price: row.price,
            stock: row.stock,
            is_active: row.is_active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    id: Uuid,
    code: String,
    description: Option<String>,
    kind: String,
    amount: Option<i64>,
    percent: Option<i32>,
    cap: Option<i64>,
    scope: String,
    scope_customer_id: Option<Uuid>,
    scope_phone: Option<String>,
    min_order_amount: i64,
    usage_limit: i32,
    is_active: bool,
    valid_from: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = StoreError;

    fn try_from(row: CouponRow) -> Result<Self, Self::Error> {
        let kind = match (row.kind.as_str(), row.amount, row.percent) {
            ("FIXED", Some(amount), _) => CouponKind::Fixed { amount },
            ("PERCENTAGE", _, Some(percent)) => CouponKind::Percentage {
                percent: u32::try_from(percent).map_err(|_| corrupt("percent", &percent.to_string()))?,
                cap: row.cap,
            },
            _ => return Err(corrupt("coupon kind", &row.kind)),
        };
        let scope = match (row.scope.as_str(), row.scope_customer_id, row.scope_phone) {
            ("GLOBAL", _, _) => CouponScope::Global,
            ("CUSTOMER", Some(id), _) => CouponScope::Customer(id),
            ("PHONE", _, Some(phone)) => CouponScope::Phone(phone),
            _ => return Err(corrupt("coupon scope", &row.scope)),
        };
        Ok(Coupon {
            id: row.id,
            code: row.code,
            description: row.description,
            kind,
            scope,
            min_order_amount: row.min_order_amount,
            usage_limit: u32::try_from(row.usage_limit).map_err(|_| corrupt("usage limit", &row.usage_limit.to_string()))?,
            is_active: row.is_active,
            valid_from: row.valid_from,
            valid_until: row.valid_until,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    customer_id: Uuid,
    channel: String,
    status: String,
    payment_method: String,
    payment_status: String,
    gateway_handle: Option<String>,
    gateway_payment_id: Option<String>,
    subtotal: i64,
    discount: i64,
    points_value: i64,
    shipping: i64,
    tax: i64,
    total: i64,
    coupon_id: Option<Uuid>,
    coupon_code: Option<String>,
    coupon_discount: Option<i64>,
    points_redeemed: i64,
    points_earned: i64,
    shipping_method: String,
    shipping_address: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> StoreResult<Order> {
        let coupon = match (self.coupon_id, self.coupon_code) {
            (Some(coupon_id), Some(code)) => Some(CouponRef {
                coupon_id,
                code,
                discount: self.coupon_discount.unwrap_or(self.discount),
            }),
            _ => None,
        };
        let address = self
            .shipping_address
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("shipping address: {}", e)))?;

        Ok(Order {
            id: self.id,
            customer_id: self.customer_id,
            channel: SalesChannel::parse(&self.channel).ok_or_else(|| corrupt("channel", &self.channel))?,
            items,
            pricing: OrderPricing {
                subtotal: self.subtotal,
                discount: self.discount,
                points_value: self.points_value,
                shipping: self.shipping,
                tax: self.tax,
                total: self.total,
            },
            coupon,
            points_redeemed: self.points_redeemed,
            points_earned: self.points_earned,
            payment: Payment {
                method: PaymentMethod::parse(&self.payment_method)
                    .ok_or_else(|| corrupt("payment method", &self.payment_method))?,
                status: PaymentStatus::parse(&self.payment_status)
                    .ok_or_else(|| corrupt("payment status", &self.payment_status))?,
                gateway_handle: self.gateway_handle,
                gateway_payment_id: self.gateway_payment_id,
            },
            shipping_method: self.shipping_method,
            address,
            status: OrderStatus::parse(&self.status).ok_or_else(|| corrupt("order status", &self.status))?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    order_id: Uuid,
    product_id: Uuid,
    sku: String,
    name: String,
    unit_price: i64,
    quantity: i32,
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: Uuid,
    customer_id: Uuid,
    order_id: Option<Uuid>,
    direction: String,
    points: i64,
    amount_equivalent: i64,
    category: String,
    status: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: row.id,
            customer_id: row.customer_id,
            order_id: row.order_id,
            direction: Direction::parse(&row.direction).ok_or_else(|| corrupt("direction", &row.direction))?,
            points: row.points,
            amount_equivalent: row.amount_equivalent,
            category: EntryCategory::parse(&row.category).ok_or_else(|| corrupt("category", &row.category))?,
            status: EntryStatus::parse(&row.status).ok_or_else(|| corrupt("entry status", &row.status))?,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

async fn load_orders<'e, E>(executor: E, rows: Vec<OrderRow>) -> StoreResult<Vec<Order>>
where
    E: Executor<'e, Database = Postgres>,
{
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let items: Vec<OrderItemRow> = sqlx::query_as(
        "SELECT order_id, product_id, sku, name, unit_price, quantity FROM order_items \
         WHERE order_id = ANY($1) ORDER BY product_id",
    )
    .bind(&ids)
    .fetch_all(executor)
    .await
    .map_err(db_err)?;

    let mut by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    for item in items {
        let quantity = u32::try_from(item.quantity).map_err(|_| corrupt("quantity", &item.quantity.to_string()))?;
        by_order.entry(item.order_id).or_default().push(OrderItem {
            product_id: item.product_id,
            sku: item.sku,
            name: item.name,
            unit_price: item.unit_price,
            quantity,
        });
    }

    rows.into_iter()
        .map(|row| {
            let items = by_order.remove(&row.id).unwrap_or_default();
            row.into_order(items)
        })
        .collect()
}

/// Postgres-backed checkout store.
#[derive(Clone)]
pub struct PgCheckoutStore {
    pool: PgPool,
}

impl PgCheckoutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckoutStore for PgCheckoutStore {
    async fn begin(&self) -> StoreResult<Box<dyn CheckoutTx>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PgCheckoutTx { tx }))
    }

    async fn get_products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>> {
        let sql = format!("SELECT {} FROM products WHERE id = ANY($1) ORDER BY id", PRODUCT_COLUMNS);
        let rows: Vec<ProductRow> = sqlx::query_as(&sql).bind(ids).fetch_all(&self.pool).await.map_err(db_err)?;
        rows.into_iter().map(Product::try_from).collect()
    }

    async fn get_customer(&self, id: Uuid) -> StoreResult<Option<Customer>> {
        let sql = format!("SELECT {} FROM customers WHERE id = $1", CUSTOMER_COLUMNS);
        let row: Option<CustomerRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await.map_err(db_err)?;
        Ok(row.map(Customer::from))
    }

    async fn find_customer_by_phone(&self, phone: &str) -> StoreResult<Option<Customer>> {
        let normalized = normalize_phone(phone);
        if normalized.is_empty() {
            return Ok(None);
        }
        let sql = format!("SELECT {} FROM customers WHERE phone_normalized = $1", CUSTOMER_COLUMNS);
        let row: Option<CustomerRow> = sqlx::query_as(&sql)
            .bind(normalized)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Customer::from))
    }

    async fn find_coupon_by_code(&self, code: &str) -> StoreResult<Option<Coupon>> {
        let sql = format!("SELECT {} FROM coupons WHERE code = $1", COUPON_COLUMNS);
        let row: Option<CouponRow> = sqlx::query_as(&sql)
            .bind(Coupon::normalize_code(code))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Coupon::try_from).transpose()
    }

    async fn list_coupons_for(&self, customer_id: Uuid, phone: Option<&str>) -> StoreResult<Vec<Coupon>> {
        let sql = format!(
            "SELECT {} FROM coupons WHERE scope = 'GLOBAL' \
             OR (scope = 'CUSTOMER' AND scope_customer_id = $1) \
             OR (scope = 'PHONE' AND scope_phone = $2) \
             ORDER BY created_at",
            COUPON_COLUMNS
        );
        let rows: Vec<CouponRow> = sqlx::query_as(&sql)
            .bind(customer_id)
            .bind(phone.map(normalize_phone).filter(|p| !p.is_empty()))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Coupon::try_from).collect()
    }

    async fn insert_coupon(&self, coupon: &Coupon) -> StoreResult<()> {
        let (kind, amount, percent, cap) = match &coupon.kind {
            CouponKind::Fixed { amount } => ("FIXED", Some(*amount), None, None),
            CouponKind::Percentage { percent, cap } => (
                "PERCENTAGE",
                None,
                Some(i32::try_from(*percent).map_err(|_| corrupt("percent", &percent.to_string()))?),
                *cap,
            ),
        };
        let (scope, scope_customer_id, scope_phone) = match &coupon.scope {
            CouponScope::Global => ("GLOBAL", None, None),
            CouponScope::Customer(id) => ("CUSTOMER", Some(*id), None),
            CouponScope::Phone(phone) => ("PHONE", None, Some(normalize_phone(phone))),
        };
        let usage_limit =
            i32::try_from(coupon.usage_limit).map_err(|_| corrupt("usage limit", &coupon.usage_limit.to_string()))?;

        sqlx::query(
            "INSERT INTO coupons (id, code, description, kind, amount, percent, cap, scope, scope_customer_id, \
             scope_phone, min_order_amount, usage_limit, is_active, valid_from, valid_until, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(coupon.id)
        .bind(Coupon::normalize_code(&coupon.code))
        .bind(&coupon.description)
        .bind(kind)
        .bind(amount)
        .bind(percent)
        .bind(cap)
        .bind(scope)
        .bind(scope_customer_id)
        .bind(scope_phone)
        .bind(coupon.min_order_amount)
        .bind(usage_limit)
        .bind(coupon.is_active)
        .bind(coupon.valid_from)
        .bind(coupon.valid_until)
        .bind(coupon.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn coupon_usage(&self, customer_id: Uuid) -> StoreResult<HashMap<Uuid, u32>> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            "SELECT coupon_id, COUNT(*)::BIGINT FROM orders \
             WHERE customer_id = $1 AND coupon_id IS NOT NULL \
             AND status IN ('PENDING', 'COMPLETED', 'REFUNDED') \
             GROUP BY coupon_id",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(id, uses)| (id, u32::try_from(uses).unwrap_or(u32::MAX)))
            .collect())
    }

    async fn point_balance(&self, customer_id: Uuid) -> StoreResult<i64> {
        sqlx::query_scalar(BALANCE_SQL).bind(customer_id).fetch_one(&self.pool).await.map_err(db_err)
    }

    async fn pending_points_hold(&self, customer_id: Uuid) -> StoreResult<i64> {
        sqlx::query_scalar(HOLD_SQL).bind(customer_id).fetch_one(&self.pool).await.map_err(db_err)
    }

    async fn ledger_entries(&self, customer_id: Uuid) -> StoreResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM point_ledger WHERE customer_id = $1 ORDER BY created_at, id",
            LEDGER_COLUMNS
        );
        let rows: Vec<LedgerRow> = sqlx::query_as(&sql).bind(customer_id).fetch_all(&self.pool).await.map_err(db_err)?;
        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        let rows: Vec<OrderRow> = sqlx::query_as(&sql).bind(id).fetch_all(&self.pool).await.map_err(db_err)?;
        Ok(load_orders(&self.pool, rows).await?.into_iter().next())
    }

    async fn list_orders(&self, customer_id: Uuid) -> StoreResult<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE customer_id = $1 ORDER BY created_at DESC",
            ORDER_COLUMNS
        );
        let rows: Vec<OrderRow> = sqlx::query_as(&sql).bind(customer_id).fetch_all(&self.pool).await.map_err(db_err)?;
        load_orders(&self.pool, rows).await
    }

    async fn list_stale_pending(&self, older_than: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Uuid>> {
        sqlx::query_scalar(
            "SELECT id FROM orders WHERE status = 'PENDING' AND created_at <= $1 ORDER BY created_at LIMIT $2",
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }
}

/// One Postgres transaction. Rolled back by sqlx when dropped uncommitted.
pub struct PgCheckoutTx {
    tx: Transaction<'static, Postgres>,
}

impl PgCheckoutTx {
    async fn lock_order_where(&mut self, clause: &str, bind: OrderKey<'_>) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE {} FOR UPDATE", ORDER_COLUMNS, clause);
        let query = sqlx::query_as::<_, OrderRow>(&sql);
        let query = match bind {
            OrderKey::Id(id) => query.bind(id),
            OrderKey::Handle(handle) => query.bind(handle),
        };
        let rows = query.fetch_all(&mut *self.tx).await.map_err(db_err)?;
        Ok(load_orders(&mut *self.tx, rows).await?.into_iter().next())
    }
}

enum OrderKey<'a> {
    Id(Uuid),
    Handle(&'a str),
}

#[async_trait]
impl CheckoutTx for PgCheckoutTx {
    async fn lock_customer(&mut self, id: Uuid) -> StoreResult<Option<Customer>> {
        let sql = format!("SELECT {} FROM customers WHERE id = $1 FOR UPDATE", CUSTOMER_COLUMNS);
        let row: Option<CustomerRow> =
            sqlx::query_as(&sql).bind(id).fetch_optional(&mut *self.tx).await.map_err(db_err)?;
        Ok(row.map(Customer::from))
    }

    async fn lock_products(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Product>> {
        let sql = format!(
            "SELECT {} FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE",
            PRODUCT_COLUMNS
        );
        let rows: Vec<ProductRow> = sqlx::query_as(&sql).bind(ids).fetch_all(&mut *self.tx).await.map_err(db_err)?;
        rows.into_iter().map(Product::try_from).collect()
    }

    async fn adjust_stock(&mut self, product_id: Uuid, delta: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1 AND stock + $2 >= 0",
        )
        .bind(product_id)
        .bind(delta)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn coupon_uses(&mut self, customer_id: Uuid, coupon_id: Uuid) -> StoreResult<u32> {
        let uses: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::BIGINT FROM orders WHERE customer_id = $1 AND coupon_id = $2 \
             AND status IN ('PENDING', 'COMPLETED', 'REFUNDED')",
        )
        .bind(customer_id)
        .bind(coupon_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(u32::try_from(uses).unwrap_or(u32::MAX))
    }

    async fn point_balance(&mut self, customer_id: Uuid) -> StoreResult<i64> {
        sqlx::query_scalar(BALANCE_SQL).bind(customer_id).fetch_one(&mut *self.tx).await.map_err(db_err)
    }

    async fn pending_points_hold(&mut self, customer_id: Uuid) -> StoreResult<i64> {
        sqlx::query_scalar(HOLD_SQL).bind(customer_id).fetch_one(&mut *self.tx).await.map_err(db_err)
    }

    async fn lock_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        self.lock_order_where("id = $1", OrderKey::Id(id)).await
    }

    async fn lock_order_by_handle(&mut self, handle: &str) -> StoreResult<Option<Order>> {
        self.lock_order_where("gateway_handle = $1", OrderKey::Handle(handle)).await
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        let address = order
            .address
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("shipping address: {}", e)))?;

        sqlx::query(
            "INSERT INTO orders (id, customer_id, channel, status, payment_method, payment_status, gateway_handle, \
             gateway_payment_id, subtotal, discount, points_value, shipping, tax, total, coupon_id, coupon_code, \
             coupon_discount, points_redeemed, points_earned, shipping_method, shipping_address, created_at, \
             updated_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, \
             $21, $22, $23, $24)",
        )
        .bind(order.id)
        .bind(order.customer_id)
        .bind(order.channel.as_str())
        .bind(order.status.as_str())
        .bind(order.payment.method.as_str())
        .bind(order.payment.status.as_str())
        .bind(&order.payment.gateway_handle)
        .bind(&order.payment.gateway_payment_id)
        .bind(order.pricing.subtotal)
        .bind(order.pricing.discount)
        .bind(order.pricing.points_value)
        .bind(order.pricing.shipping)
        .bind(order.pricing.tax)
        .bind(order.pricing.total)
        .bind(order.coupon.as_ref().map(|c| c.coupon_id))
        .bind(order.coupon.as_ref().map(|c| c.code.clone()))
        .bind(order.coupon.as_ref().map(|c| c.discount))
        .bind(order.points_redeemed)
        .bind(order.points_earned)
        .bind(&order.shipping_method)
        .bind(address)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.completed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        for item in &order.items {
            let quantity = i32::try_from(item.quantity).map_err(|_| corrupt("quantity", &item.quantity.to_string()))?;
            sqlx::query(
                "INSERT INTO order_items (order_id, product_id, sku, name, unit_price, quantity) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(order.id)
            .bind(item.product_id)
            .bind(&item.sku)
            .bind(&item.name)
            .bind(item.unit_price)
            .bind(quantity)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        // Pricing columns are frozen at insert
        sqlx::query(
            "UPDATE orders SET status = $2, payment_status = $3, gateway_handle = $4, gateway_payment_id = $5, \
             updated_at = $6, completed_at = $7 WHERE id = $1",
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.payment.status.as_str())
        .bind(&order.payment.gateway_handle)
        .bind(&order.payment.gateway_payment_id)
        .bind(order.updated_at)
        .bind(order.completed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn append_ledger(&mut self, customer_id: Uuid, entries: &[LedgerEntry]) -> StoreResult<i64> {
        if let Some(stray) = entries.iter().find(|e| e.customer_id != customer_id) {
            return Err(StoreError::Corrupt(format!("ledger entry {} is for another customer", stray.id)));
        }

        // The customer row lock serializes every balance change for this customer
        let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM customers WHERE id = $1 FOR UPDATE")
            .bind(customer_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        if locked.is_none() {
            return Err(StoreError::Database(format!("customer {} does not exist", customer_id)));
        }
        let balance: i64 = sqlx::query_scalar(BALANCE_SQL)
            .bind(customer_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_err)?;
        ledger::apply(balance, entries)?;

        for entry in entries {
            sqlx::query(
                "INSERT INTO point_ledger (id, customer_id, order_id, direction, points, amount_equivalent, \
                 category, status, description, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(entry.id)
            .bind(entry.customer_id)
            .bind(entry.order_id)
            .bind(entry.direction.as_str())
            .bind(entry.points)
            .bind(entry.amount_equivalent)
            .bind(entry.category.as_str())
            .bind(entry.status.as_str())
            .bind(&entry.description)
            .bind(entry.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        }

        let refreshed: i64 = sqlx::query_scalar(
            "UPDATE customers SET reward_points = ( \
                 SELECT COALESCE(SUM(CASE WHEN direction = 'EARN' THEN points ELSE -points END), 0)::BIGINT \
                 FROM point_ledger WHERE customer_id = $1 AND status = 'COMPLETED') \
             WHERE id = $1 RETURNING reward_points",
        )
        .bind(customer_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(refreshed)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(db_err)
    }
}
