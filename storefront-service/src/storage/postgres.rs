//! PostgreSQL backend.
//!
//! Uniqueness is delegated to constraints (`users_username_key`,
//! `orders_purchase_id_key`, `orders_source_cart_key`); cart mutations run in
//! a transaction holding the cart row lock.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use common_auth::Role;
use common_money::Money;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use super::{CartStore, CredentialStore, OrderStore, ProductCatalog, StoreError, StoreResult};
use crate::models::{
    BuyerSnapshot, Cart, CartClaim, CartItem, CartSlot, CredentialRecord, CredentialUpdate, Order, OrderLine,
    OrderStatus, PaymentStatus, Product, Profile,
};

const USER_COLUMNS: &str = "id, username, password_hash, role, first_name, last_name, address, phone1, phone2, \
     email, created_at, last_login_at";
const ORDER_COLUMNS: &str = "id, purchase_id, owner_id, cart_slot, cart_version, lines, total_price, status, \
     payment_status, buyer, created_at, updated_at";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return StoreError::Conflict(match db_err.constraint() {
                    Some("users_username_key") => "username",
                    Some("orders_purchase_id_key") => "purchase_id",
                    Some("orders_source_cart_key") => "source_cart",
                    _ => "unique",
                });
            }
        }
        StoreError::Unavailable(err.to_string())
    }
}

fn corrupt(what: &str, value: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("corrupt {what} in database: {value}"))
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        info!("connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        info!("storefront migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn upsert_product(&self, product: &Product) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO products (id, name, price, description) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, price = EXCLUDED.price, \
             description = EXCLUDED.description",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(product.price.to_decimal())
        .bind(&product.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    password_hash: String,
    role: String,
    first_name: String,
    last_name: String,
    address: String,
    phone1: String,
    phone2: String,
    email: String,
    created_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserRow> for CredentialRecord {
    type Error = StoreError;

    fn try_from(row: UserRow) -> StoreResult<Self> {
        let role = row.role.parse::<Role>().map_err(|_| corrupt("role", &row.role))?;
        Ok(Self {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
            role,
            profile: Profile {
                first_name: row.first_name,
                last_name: row.last_name,
                address: row.address,
                phone1: row.phone1,
                phone2: row.phone2,
                email: row.email,
            },
            created_at: row.created_at,
            last_login_at: row.last_login_at,
        })
    }
}

async fn fetch_user(conn: &mut PgConnection, id: Uuid, lock: bool) -> StoreResult<Option<CredentialRecord>> {
    let suffix = if lock { " FOR UPDATE" } else { "" };
    let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1{suffix}"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(CredentialRecord::try_from).transpose()
}

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn create(&self, record: CredentialRecord) -> StoreResult<CredentialRecord> {
        sqlx::query(&format!(
            "INSERT INTO users ({USER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(record.id)
        .bind(&record.username)
        .bind(&record.password_hash)
        .bind(record.role.as_str())
        .bind(&record.profile.first_name)
        .bind(&record.profile.last_name)
        .bind(&record.profile.address)
        .bind(&record.profile.phone1)
        .bind(&record.profile.phone2)
        .bind(&record.profile.email)
        .bind(record.created_at)
        .bind(record.last_login_at)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<CredentialRecord>> {
        let mut conn = self.pool.acquire().await?;
        fetch_user(&mut conn, id, false).await
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<CredentialRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.map(CredentialRecord::try_from).transpose()
    }

    async fn update(&self, id: Uuid, update: CredentialUpdate) -> StoreResult<Option<CredentialRecord>> {
        let mut tx = self.pool.begin().await?;
        let Some(mut record) = fetch_user(&mut tx, id, true).await? else {
            return Ok(None);
        };
        update.apply_to(&mut record);
        sqlx::query(
            "UPDATE users SET username = $2, password_hash = $3, role = $4, first_name = $5, last_name = $6, \
             address = $7, phone1 = $8, phone2 = $9, email = $10, last_login_at = $11 WHERE id = $1",
        )
        .bind(record.id)
        .bind(&record.username)
        .bind(&record.password_hash)
        .bind(record.role.as_str())
        .bind(&record.profile.first_name)
        .bind(&record.profile.last_name)
        .bind(&record.profile.address)
        .bind(&record.profile.phone1)
        .bind(&record.profile.phone2)
        .bind(&record.profile.email)
        .bind(record.last_login_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(record))
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    price: BigDecimal,
    description: String,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> StoreResult<Self> {
        let price = Money::from_decimal(&row.price).map_err(|err| corrupt("price", err))?;
        Ok(Self {
            id: row.id,
            name: row.name,
            price,
            description: row.description,
        })
    }
}

#[async_trait]
impl ProductCatalog for PostgresStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT id, name, price, description FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Product::try_from).transpose()
    }

    async fn list(&self) -> StoreResult<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>("SELECT id, name, price, description FROM products ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Product::try_from).collect()
    }
}

/// One row per cart line, or a single row with null item columns for an
/// empty cart. The version and the items come from the same statement, so they
/// always describe one committed cart state.
#[derive(FromRow)]
struct CartLineRow {
    version: i64,
    updated_at: DateTime<Utc>,
    product_id: Option<Uuid>,
    quantity: Option<i32>,
}

async fn fetch_cart(
    conn: &mut PgConnection,
    owner_id: Uuid,
    slot: CartSlot,
    lock: bool,
) -> StoreResult<Option<Cart>> {
    if lock {
        // Lock first; the join below is a new statement and sees the previous holder's commit.
        sqlx::query("SELECT 1 FROM carts WHERE owner_id = $1 AND slot = $2 FOR UPDATE")
            .bind(owner_id)
            .bind(i16::from(slot.get()))
            .fetch_optional(&mut *conn)
            .await?;
    }
    let rows = sqlx::query_as::<_, CartLineRow>(
        "SELECT c.version, c.updated_at, i.product_id, i.quantity \
         FROM carts c \
         LEFT JOIN cart_items i ON i.owner_id = c.owner_id AND i.slot = c.slot \
         WHERE c.owner_id = $1 AND c.slot = $2 \
         ORDER BY i.position",
    )
    .bind(owner_id)
    .bind(i16::from(slot.get()))
    .fetch_all(&mut *conn)
    .await?;

    let Some(first) = rows.first() else {
        return Ok(None);
    };
    let (version, updated_at) = (first.version, first.updated_at);

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let (Some(product_id), Some(quantity)) = (row.product_id, row.quantity) else {
            continue;
        };
        let quantity = u32::try_from(quantity).map_err(|_| corrupt("cart quantity", quantity))?;
        items.push(CartItem { product_id, quantity });
    }

    Ok(Some(Cart {
        owner_id,
        slot,
        version,
        items,
        updated_at,
    }))
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn get(&self, owner_id: Uuid, slot: CartSlot) -> StoreResult<Option<Cart>> {
        let mut conn = self.pool.acquire().await?;
        fetch_cart(&mut conn, owner_id, slot, false).await
    }

    async fn upsert_item(
        &self,
        owner_id: Uuid,
        slot: CartSlot,
        product_id: Uuid,
        delta: i64,
        cap: u32,
    ) -> StoreResult<Cart> {
        let slot_value = i16::from(slot.get());
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO carts (owner_id, slot, version, updated_at) VALUES ($1, $2, 0, NOW()) \
             ON CONFLICT (owner_id, slot) DO NOTHING",
        )
        .bind(owner_id)
        .bind(slot_value)
        .execute(&mut *tx)
        .await?;

        let mut cart = fetch_cart(&mut tx, owner_id, slot, true)
            .await?
            .unwrap_or_else(|| Cart::empty(owner_id, slot));
        let before = cart.version;
        cart.apply_delta(product_id, delta, cap)?;
        if cart.version == before {
            tx.commit().await?;
            return Ok(cart);
        }

        sqlx::query("DELETE FROM cart_items WHERE owner_id = $1 AND slot = $2")
            .bind(owner_id)
            .bind(slot_value)
            .execute(&mut *tx)
            .await?;
        for (position, item) in cart.items.iter().enumerate() {
            let quantity = i32::try_from(item.quantity).map_err(|_| corrupt("cart quantity", item.quantity))?;
            sqlx::query(
                "INSERT INTO cart_items (owner_id, slot, position, product_id, quantity) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(owner_id)
            .bind(slot_value)
            .bind(position as i32)
            .bind(item.product_id)
            .bind(quantity)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("UPDATE carts SET version = $3, updated_at = $4 WHERE owner_id = $1 AND slot = $2")
            .bind(owner_id)
            .bind(slot_value)
            .bind(cart.version)
            .bind(cart.updated_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(cart)
    }

    async fn clear_if_version(&self, owner_id: Uuid, slot: CartSlot, version: i64) -> StoreResult<bool> {
        let slot_value = i16::from(slot.get());
        let mut tx = self.pool.begin().await?;
        let bumped = sqlx::query(
            "UPDATE carts SET version = version + 1, updated_at = NOW() \
             WHERE owner_id = $1 AND slot = $2 AND version = $3",
        )
        .bind(owner_id)
        .bind(slot_value)
        .bind(version)
        .execute(&mut *tx)
        .await?;
        if bumped.rows_affected() == 0 {
            return Ok(false);
        }
        sqlx::query("DELETE FROM cart_items WHERE owner_id = $1 AND slot = $2")
            .bind(owner_id)
            .bind(slot_value)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    purchase_id: String,
    owner_id: Uuid,
    cart_slot: i16,
    cart_version: i64,
    lines: Json<Vec<OrderLine>>,
    total_price: BigDecimal,
    status: String,
    payment_status: String,
    buyer: Json<BuyerSnapshot>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> StoreResult<Self> {
        let slot = u8::try_from(row.cart_slot)
            .ok()
            .and_then(|value| CartSlot::try_from(value).ok())
            .ok_or_else(|| corrupt("cart slot", row.cart_slot))?;
        let status = row.status.parse::<OrderStatus>().map_err(|err| corrupt("status", err))?;
        let payment_status = row
            .payment_status
            .parse::<PaymentStatus>()
            .map_err(|err| corrupt("payment status", err))?;
        let total_price = Money::from_decimal(&row.total_price).map_err(|err| corrupt("total", err))?;
        Ok(Self {
            id: row.id,
            purchase_id: row.purchase_id,
            owner_id: row.owner_id,
            source_cart: CartClaim {
                owner_id: row.owner_id,
                slot,
                version: row.cart_version,
            },
            lines: row.lines.0,
            total_price,
            status,
            payment_status,
            buyer: row.buyer.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn create(&self, order: Order) -> StoreResult<Order> {
        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(order.id)
        .bind(&order.purchase_id)
        .bind(order.owner_id)
        .bind(i16::from(order.source_cart.slot.get()))
        .bind(order.source_cart.version)
        .bind(Json(&order.lines))
        .bind(order.total_price.to_decimal())
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(Json(&order.buyer))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(order)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn find_by_purchase_id(&self, purchase_id: &str) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE purchase_id = $1"))
            .bind(purchase_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn find_by_source_cart(&self, claim: &CartClaim) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE owner_id = $1 AND cart_slot = $2 AND cart_version = $3"
        ))
        .bind(claim.owner_id)
        .bind(i16::from(claim.slot.get()))
        .bind(claim.version)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE owner_id = $1 ORDER BY created_at DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn list_all(&self) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC"))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn update_status(&self, id: Uuid, expected: OrderStatus, next: OrderStatus) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2 RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = row {
            return Order::try_from(row).map(Some);
        }

        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Err(StoreError::Stale)
        } else {
            Ok(None)
        }
    }

    async fn update_payment_status(&self, id: Uuid, status: PaymentStatus) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET payment_status = $2, updated_at = NOW() WHERE id = $1 RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
