//! In-memory backend. Each operation holds one lock for its whole
//! read-modify-write, which is what makes the compare-and-clear and the
//! uniqueness checks atomic. Data is lost on restart.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{CartStore, CredentialStore, OrderStore, ProductCatalog, StoreError, StoreResult};
use crate::models::{
    Cart, CartClaim, CartSlot, CredentialRecord, CredentialUpdate, Order, OrderStatus, PaymentStatus, Product,
};

#[derive(Default)]
struct OrderTable {
    by_id: HashMap<Uuid, Order>,
    purchase_ids: HashSet<String>,
    claims: HashSet<CartClaim>,
}

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, CredentialRecord>>,
    products: RwLock<HashMap<Uuid, Product>>,
    carts: RwLock<HashMap<(Uuid, CartSlot), Cart>>,
    orders: RwLock<OrderTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a catalog entry. The catalog is otherwise read-only.
    pub async fn upsert_product(&self, product: Product) {
        debug!(product_id = %product.id, price = %product.price, "catalog entry stored");
        self.products.write().await.insert(product.id, product);
    }

    pub async fn remove_product(&self, id: Uuid) -> bool {
        self.products.write().await.remove(&id).is_some()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create(&self, record: CredentialRecord) -> StoreResult<CredentialRecord> {
        let mut users = self.users.write().await;
        if users.values().any(|existing| existing.username == record.username) {
            return Err(StoreError::Conflict("username"));
        }
        if users.contains_key(&record.id) {
            return Err(StoreError::Conflict("user_id"));
        }
        info!(user_id = %record.id, username = %record.username, "account created");
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<CredentialRecord>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<CredentialRecord>> {
        let users = self.users.read().await;
        Ok(users.values().find(|record| record.username == username).cloned())
    }

    async fn update(&self, id: Uuid, update: CredentialUpdate) -> StoreResult<Option<CredentialRecord>> {
        let mut users = self.users.write().await;
        if let Some(username) = &update.username {
            let taken = users
                .values()
                .any(|existing| existing.id != id && &existing.username == username);
            if taken {
                return Err(StoreError::Conflict("username"));
            }
        }
        let Some(record) = users.get_mut(&id) else {
            return Ok(None);
        };
        update.apply_to(record);
        Ok(Some(record.clone()))
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let removed = self.users.write().await.remove(&id).is_some();
        if removed {
            self.carts.write().await.retain(|(owner, _), _| *owner != id);
            info!(user_id = %id, "account deleted");
        }
        Ok(removed)
    }
}

#[async_trait]
impl ProductCatalog for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Product>> {
        let mut products: Vec<Product> = self.products.read().await.values().cloned().collect();
        products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(products)
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn get(&self, owner_id: Uuid, slot: CartSlot) -> StoreResult<Option<Cart>> {
        Ok(self.carts.read().await.get(&(owner_id, slot)).cloned())
    }

    async fn upsert_item(
        &self,
        owner_id: Uuid,
        slot: CartSlot,
        product_id: Uuid,
        delta: i64,
        cap: u32,
    ) -> StoreResult<Cart> {
        let mut carts = self.carts.write().await;
        let cart = carts
            .entry((owner_id, slot))
            .or_insert_with(|| Cart::empty(owner_id, slot));
        cart.apply_delta(product_id, delta, cap)?;
        Ok(cart.clone())
    }

    async fn clear_if_version(&self, owner_id: Uuid, slot: CartSlot, version: i64) -> StoreResult<bool> {
        let mut carts = self.carts.write().await;
        Ok(carts
            .get_mut(&(owner_id, slot))
            .map(|cart| cart.clear_if_version(version))
            .unwrap_or(false))
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create(&self, order: Order) -> StoreResult<Order> {
        let mut table = self.orders.write().await;
        if table.purchase_ids.contains(&order.purchase_id) {
            return Err(StoreError::Conflict("purchase_id"));
        }
        if table.claims.contains(&order.source_cart) {
            return Err(StoreError::Conflict("source_cart"));
        }
        table.purchase_ids.insert(order.purchase_id.clone());
        table.claims.insert(order.source_cart);
        table.by_id.insert(order.id, order.clone());
        Ok(order)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.orders.read().await.by_id.get(&id).cloned())
    }

    async fn find_by_purchase_id(&self, purchase_id: &str) -> StoreResult<Option<Order>> {
        let table = self.orders.read().await;
        Ok(table
            .by_id
            .values()
            .find(|order| order.purchase_id == purchase_id)
            .cloned())
    }

    async fn find_by_source_cart(&self, claim: &CartClaim) -> StoreResult<Option<Order>> {
        let table = self.orders.read().await;
        Ok(table
            .by_id
            .values()
            .find(|order| &order.source_cart == claim)
            .cloned())
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> StoreResult<Vec<Order>> {
        let table = self.orders.read().await;
        let mut orders: Vec<Order> = table
            .by_id
            .values()
            .filter(|order| order.owner_id == owner_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn list_all(&self) -> StoreResult<Vec<Order>> {
        let mut orders: Vec<Order> = self.orders.read().await.by_id.values().cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_status(&self, id: Uuid, expected: OrderStatus, next: OrderStatus) -> StoreResult<Option<Order>> {
        let mut table = self.orders.write().await;
        let Some(order) = table.by_id.get_mut(&id) else {
            return Ok(None);
        };
        if order.status != expected {
            return Err(StoreError::Stale);
        }
        order.status = next;
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn update_payment_status(&self, id: Uuid, status: PaymentStatus) -> StoreResult<Option<Order>> {
        let mut table = self.orders.write().await;
        Ok(table.by_id.get_mut(&id).map(|order| {
            order.payment_status = status;
            order.updated_at = Utc::now();
            order.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let mut table = self.orders.write().await;
        let Some(order) = table.by_id.remove(&id) else {
            return Ok(false);
        };
        table.purchase_ids.remove(&order.purchase_id);
        table.claims.remove(&order.source_cart);
        Ok(true)
    }
}
