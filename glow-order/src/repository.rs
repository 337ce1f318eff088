use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glow_catalog::{Coupon, Product};
use glow_core::identity::Customer;
use std::collections::HashMap;
use uuid::Uuid;

use crate::ledger::{LedgerEntry, LedgerError};
use crate::models::Order;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The ledger write would take a balance below zero
    #[error(transparent)]
    Overdraft(#[from] LedgerError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read side of the checkout store plus the entry point for transactions.
///
/// Reads outside a transaction see committed state only. Every mutation of
/// stock, orders or the point ledger goes through a [`CheckoutTx`].
#[async_trait]
pub trait CheckoutStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn CheckoutTx>>;

    async fn get_products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>>;

    async fn get_customer(&self, id: Uuid) -> StoreResult<Option<Customer>>;

    async fn find_customer_by_phone(&self, phone: &str) -> StoreResult<Option<Customer>>;

    async fn find_coupon_by_code(&self, code: &str) -> StoreResult<Option<Coupon>>;

    /// Global coupons plus those scoped to the customer's id or phone
    async fn list_coupons_for(&self, customer_id: Uuid, phone: Option<&str>) -> StoreResult<Vec<Coupon>>;

    async fn insert_coupon(&self, coupon: &Coupon) -> StoreResult<()>;

    /// Coupon id → number of the customer's orders that hold it
    async fn coupon_usage(&self, customer_id: Uuid) -> StoreResult<HashMap<Uuid, u32>>;

    async fn point_balance(&self, customer_id: Uuid) -> StoreResult<i64>;

    /// Points promised to the customer's pending gateway orders
    async fn pending_points_hold(&self, customer_id: Uuid) -> StoreResult<i64>;

    async fn ledger_entries(&self, customer_id: Uuid) -> StoreResult<Vec<LedgerEntry>>;

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>>;

    async fn list_orders(&self, customer_id: Uuid) -> StoreResult<Vec<Order>>;

    /// Ids of pending orders created at or before `older_than`, oldest first
    async fn list_stale_pending(&self, older_than: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Uuid>>;
}

/// One atomic unit of checkout work.
///
/// Lock order is order → customer → products (products by ascending id).
/// Dropping a transaction without calling [`CheckoutTx::commit`] rolls it back.
#[async_trait]
pub trait CheckoutTx: Send {
    async fn lock_customer(&mut self, id: Uuid) -> StoreResult<Option<Customer>>;

    /// Locks and returns the products that exist among `ids`
    async fn lock_products(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Product>>;

    /// Applies `delta` to stock. Returns `false`, changing nothing, if stock would go negative.
    async fn adjust_stock(&mut self, product_id: Uuid, delta: i64) -> StoreResult<bool>;

    async fn coupon_uses(&mut self, customer_id: Uuid, coupon_id: Uuid) -> StoreResult<u32>;

    async fn point_balance(&mut self, customer_id: Uuid) -> StoreResult<i64>;

    async fn pending_points_hold(&mut self, customer_id: Uuid) -> StoreResult<i64>;

    async fn lock_order(&mut self, id: Uuid) -> StoreResult<Option<Order>>;

    async fn lock_order_by_handle(&mut self, handle: &str) -> StoreResult<Option<Order>>;

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()>;

    async fn update_order(&mut self, order: &Order) -> StoreResult<()>;

    /// Appends entries for one customer and refreshes their `reward_points`
    /// projection. Returns the new balance.
    async fn append_ledger(&mut self, customer_id: Uuid, entries: &[LedgerEntry]) -> StoreResult<i64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
