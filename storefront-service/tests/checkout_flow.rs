use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use common_auth::Role;
use common_money::Money;
use storefront_service::models::{Cart, CartClaim, CartSlot, Order, OrderStatus, PaymentStatus, Product, Profile};
use storefront_service::storage::{CartStore, MemoryStore, OrderStore, StoreError, StoreResult};
use tokio::sync::Barrier;
use uuid::Uuid;

mod support;
use support::{request, TestApp};

#[tokio::test]
async fn checkout_turns_the_cart_into_a_pending_order() {
    let app = TestApp::new();
    let user = app.seed_shopper("ada").await;
    let token = app.token_for(&user);
    let beans = app.seed_product("Beans", 20).await;

    let resp = app.add_item(&token, 1, beans.id, 3).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["items"][0]["quantity"], 3);

    let resp = app.checkout(&token, 1, None).await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let purchase_id = resp.body["purchaseId"].as_str().expect("purchase id").to_string();
    assert!(purchase_id.starts_with("ORD-"));
    let order_id = resp.body["orderId"].as_str().expect("order id").to_string();

    let resp = app.send(request("GET", &format!("/orders/{order_id}"), Some(&token), None)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["purchaseId"], purchase_id.as_str());
    assert_eq!(resp.body["totalPrice"], 60);
    assert_eq!(resp.body["status"], "pending");
    assert_eq!(resp.body["paymentStatus"], "unpaid");
    assert_eq!(resp.body["lines"][0]["productName"], "Beans");
    assert_eq!(resp.body["lines"][0]["priceAtPurchase"], 20);
    assert_eq!(resp.body["buyer"]["address"], "1 Market Street");

    let resp = app.send(request("GET", "/cart/1", Some(&token), None)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["items"].as_array().map(Vec::len), Some(0));

    let resp = app.send(request("GET", "/orders/mine", Some(&token), None)).await;
    assert_eq!(resp.body.as_array().map(Vec::len), Some(1));
    assert_eq!(app.state.metrics.checkout_count("created"), 1);
}

#[tokio::test]
async fn slots_check_out_independently() {
    let app = TestApp::new();
    let user = app.seed_shopper("ada").await;
    let token = app.token_for(&user);
    let beans = app.seed_product("Beans", 20).await;
    let kettle = app.seed_product("Kettle", 450).await;

    app.add_item(&token, 1, beans.id, 1).await;
    app.add_item(&token, 2, kettle.id, 2).await;

    let resp = app.checkout(&token, 2, None).await;
    assert_eq!(resp.status, StatusCode::CREATED);

    let first = app.send(request("GET", "/cart/1", Some(&token), None)).await;
    assert_eq!(first.body["items"][0]["quantity"], 1);
    let second = app.send(request("GET", "/cart/2", Some(&token), None)).await;
    assert_eq!(second.body["items"].as_array().map(Vec::len), Some(0));

    let resp = app.send(request("GET", "/cart/3", Some(&token), None)).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_code(), Some("invalid_slot"));
}

#[tokio::test]
async fn orders_keep_the_price_paid() {
    let app = TestApp::new();
    let user = app.seed_shopper("ada").await;
    let token = app.token_for(&user);
    let mut beans = app.seed_product("Beans", 20).await;

    app.add_item(&token, 1, beans.id, 2).await;
    let resp = app.checkout(&token, 1, None).await;
    let order_id = resp.body["orderId"].as_str().expect("order id").to_string();

    beans.price = Money::from_minor(99);
    app.memory.upsert_product(beans).await;

    let resp = app.send(request("GET", &format!("/orders/{order_id}"), Some(&token), None)).await;
    assert_eq!(resp.body["totalPrice"], 40);
    assert_eq!(resp.body["lines"][0]["priceAtPurchase"], 20);
}

#[tokio::test]
async fn totals_sum_every_line() {
    let app = TestApp::new();
    let user = app.seed_shopper("ada").await;
    let token = app.token_for(&user);
    let kettle = app.seed_product("Kettle", 10).await;
    let filters = app.seed_product("Filters", 5).await;

    app.add_item(&token, 1, kettle.id, 2).await;
    app.add_item(&token, 1, filters.id, 1).await;
    let resp = app.checkout(&token, 1, None).await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let order_id = resp.body["orderId"].as_str().expect("order id").to_string();

    let resp = app.send(request("GET", &format!("/orders/{order_id}"), Some(&token), None)).await;
    assert_eq!(resp.body["totalPrice"], 25);
    let lines = resp.body["lines"].as_array().expect("lines");
    assert_eq!(lines.len(), 2);
    let price_of = |id: Uuid| {
        lines
            .iter()
            .find(|line| line["productId"] == id.to_string())
            .map(|line| (line["priceAtPurchase"].clone(), line["quantity"].clone()))
            .expect("line")
    };
    assert_eq!(price_of(kettle.id), (serde_json::json!(10), serde_json::json!(2)));
    assert_eq!(price_of(filters.id), (serde_json::json!(5), serde_json::json!(1)));
}

#[tokio::test]
async fn empty_or_untouched_carts_cannot_check_out() {
    let app = TestApp::new();
    let user = app.seed_shopper("ada").await;
    let token = app.token_for(&user);
    let beans = app.seed_product("Beans", 20).await;

    let resp = app.checkout(&token, 1, None).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_code(), Some("empty_cart"));

    app.add_item(&token, 1, beans.id, 2).await;
    app.add_item(&token, 1, beans.id, -2).await;
    let resp = app.checkout(&token, 1, None).await;
    assert_eq!(resp.error_code(), Some("empty_cart"));
    assert_eq!(app.state.metrics.checkout_count("empty_cart"), 2);
}

#[tokio::test]
async fn checkout_requires_address_and_phone() {
    let app = TestApp::new();
    let user = app
        .seed_user(
            "ada",
            Role::User,
            Profile {
                address: "1 Market Street".into(),
                ..Profile::default()
            },
        )
        .await;
    let token = app.token_for(&user);
    let beans = app.seed_product("Beans", 20).await;
    app.add_item(&token, 1, beans.id, 1).await;

    let resp = app.checkout(&token, 1, None).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_code(), Some("incomplete_profile"));

    let cart = CartStore::get(app.memory.as_ref(), user.id, CartSlot::FIRST)
        .await
        .expect("get")
        .expect("cart");
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
async fn owners_do_not_shop() {
    let app = TestApp::new();
    let owner = app.seed_user("root", Role::Owner, support::shipping_profile()).await;
    let resp = app.checkout(&app.token_for(&owner), 1, None).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_code(), Some("missing_role"));
}

#[tokio::test]
async fn withdrawn_products_block_checkout() {
    let app = TestApp::new();
    let user = app.seed_shopper("ada").await;
    let token = app.token_for(&user);
    let beans = app.seed_product("Beans", 20).await;
    app.add_item(&token, 1, beans.id, 1).await;
    assert!(app.memory.remove_product(beans.id).await);

    let resp = app.checkout(&token, 1, None).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.error_code(), Some("product_unavailable"));
    assert!(OrderStore::list_all(app.memory.as_ref()).await.expect("list").is_empty());

    let resp = app.add_item(&token, 1, Uuid::new_v4(), 1).await;
    assert_eq!(resp.error_code(), Some("product_not_found"));
}

#[tokio::test]
async fn line_quantities_are_capped() {
    let app = TestApp::new();
    let user = app.seed_shopper("ada").await;
    let token = app.token_for(&user);
    let beans = app.seed_product("Beans", 20).await;

    let resp = app.add_item(&token, 1, beans.id, 101).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_code(), Some("invalid_quantity"));

    let resp = app.add_item(&token, 1, beans.id, 0).await;
    assert_eq!(resp.error_code(), Some("invalid_quantity"));
}

#[tokio::test]
async fn replaying_an_idempotency_key_places_one_order() {
    let app = TestApp::new();
    let user = app.seed_shopper("ada").await;
    let token = app.token_for(&user);
    let beans = app.seed_product("Beans", 20).await;
    app.add_item(&token, 1, beans.id, 1).await;

    let first = app.checkout(&token, 1, Some("basket-42")).await;
    assert_eq!(first.status, StatusCode::CREATED);

    app.add_item(&token, 1, beans.id, 1).await;
    let replay = app.checkout(&token, 1, Some("basket-42")).await;
    assert_eq!(replay.status, StatusCode::CONFLICT);
    assert_eq!(replay.error_code(), Some("duplicate_purchase"));

    let orders = OrderStore::find_by_owner(app.memory.as_ref(), user.id).await.expect("orders");
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].purchase_id, first.body["purchaseId"].as_str().unwrap_or_default());

    let fresh = app.checkout(&token, 1, Some("basket-43")).await;
    assert_eq!(fresh.status, StatusCode::CREATED);
}

/// Holds every `get` until two readers have arrived, so both checkouts see
/// the same cart version.
struct RendezvousCarts {
    inner: Arc<MemoryStore>,
    barrier: Barrier,
}

#[async_trait]
impl CartStore for RendezvousCarts {
    async fn get(&self, owner_id: Uuid, slot: CartSlot) -> StoreResult<Option<Cart>> {
        let cart = CartStore::get(self.inner.as_ref(), owner_id, slot).await;
        self.barrier.wait().await;
        cart
    }

    async fn upsert_item(
        &self,
        owner_id: Uuid,
        slot: CartSlot,
        product_id: Uuid,
        delta: i64,
        cap: u32,
    ) -> StoreResult<Cart> {
        CartStore::upsert_item(self.inner.as_ref(), owner_id, slot, product_id, delta, cap).await
    }

    async fn clear_if_version(&self, owner_id: Uuid, slot: CartSlot, version: i64) -> StoreResult<bool> {
        CartStore::clear_if_version(self.inner.as_ref(), owner_id, slot, version).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_checkouts_of_one_cart_create_one_order() {
    let app = TestApp::with_stores(|memory, mut stores| {
        stores.carts = Arc::new(RendezvousCarts {
            inner: memory,
            barrier: Barrier::new(2),
        });
        stores
    });
    let user = app.seed_shopper("ada").await;
    let token = app.token_for(&user);
    let beans = app.seed_product("Beans", 20).await;
    CartStore::upsert_item(app.memory.as_ref(), user.id, CartSlot::FIRST, beans.id, 2, 100)
        .await
        .expect("seed cart");

    let (a, b) = tokio::join!(app.checkout(&token, 1, None), app.checkout(&token, 1, None));
    let mut statuses = [a.status, b.status];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::CREATED, StatusCode::CONFLICT]);
    let (winner, loser) = if a.status == StatusCode::CONFLICT { (&b, &a) } else { (&a, &b) };
    assert_eq!(loser.error_code(), Some("duplicate_purchase"));
    let winning_purchase = winner.body["purchaseId"].as_str().expect("purchase id");
    assert!(loser.body["message"].as_str().expect("message").contains(winning_purchase));

    let orders = OrderStore::find_by_owner(app.memory.as_ref(), user.id).await.expect("orders");
    assert_eq!(orders.len(), 1);
    let cart = CartStore::get(app.memory.as_ref(), user.id, CartSlot::FIRST)
        .await
        .expect("get")
        .expect("cart");
    assert!(cart.items.is_empty());
}

enum OrderFault {
    Unavailable,
    Hang,
}

struct FaultyOrders {
    inner: Arc<MemoryStore>,
    fault: OrderFault,
}

#[async_trait]
impl OrderStore for FaultyOrders {
    async fn create(&self, order: Order) -> StoreResult<Order> {
        match self.fault {
            OrderFault::Unavailable => Err(StoreError::Unavailable("connection refused".into())),
            OrderFault::Hang => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                OrderStore::create(self.inner.as_ref(), order).await
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Order>> {
        OrderStore::find_by_id(self.inner.as_ref(), id).await
    }

    async fn find_by_purchase_id(&self, purchase_id: &str) -> StoreResult<Option<Order>> {
        OrderStore::find_by_purchase_id(self.inner.as_ref(), purchase_id).await
    }

    async fn find_by_source_cart(&self, claim: &CartClaim) -> StoreResult<Option<Order>> {
        OrderStore::find_by_source_cart(self.inner.as_ref(), claim).await
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> StoreResult<Vec<Order>> {
        OrderStore::find_by_owner(self.inner.as_ref(), owner_id).await
    }

    async fn list_all(&self) -> StoreResult<Vec<Order>> {
        OrderStore::list_all(self.inner.as_ref()).await
    }

    async fn update_status(&self, id: Uuid, expected: OrderStatus, next: OrderStatus) -> StoreResult<Option<Order>> {
        OrderStore::update_status(self.inner.as_ref(), id, expected, next).await
    }

    async fn update_payment_status(&self, id: Uuid, status: PaymentStatus) -> StoreResult<Option<Order>> {
        OrderStore::update_payment_status(self.inner.as_ref(), id, status).await
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        OrderStore::delete(self.inner.as_ref(), id).await
    }
}

async fn faulty_app(fault: OrderFault) -> (TestApp, String, Product, Uuid) {
    let app = TestApp::with_stores(|memory, mut stores| {
        stores.orders = Arc::new(FaultyOrders { inner: memory, fault });
        stores
    });
    let user = app.seed_shopper("ada").await;
    let token = app.token_for(&user);
    let beans = app.seed_product("Beans", 20).await;
    app.add_item(&token, 1, beans.id, 2).await;
    (app, token, beans, user.id)
}

#[tokio::test]
async fn failed_order_writes_leave_the_cart_alone() {
    let (app, token, beans, user_id) = faulty_app(OrderFault::Unavailable).await;

    let resp = app.checkout(&token, 1, None).await;
    assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.error_code(), Some("persistence_error"));

    let cart = CartStore::get(app.memory.as_ref(), user_id, CartSlot::FIRST)
        .await
        .expect("get")
        .expect("cart");
    assert_eq!(cart.items[0].product_id, beans.id);
    assert_eq!(cart.items[0].quantity, 2);
}

#[tokio::test]
async fn timed_out_order_writes_are_not_retryable() {
    let (app, token, _, user_id) = faulty_app(OrderFault::Hang).await;

    let resp = app.checkout(&token, 1, None).await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.error_code(), Some("persistence_error"));
    assert!(resp.headers.get("retry-after").is_none());

    let cart = CartStore::get(app.memory.as_ref(), user_id, CartSlot::FIRST)
        .await
        .expect("get")
        .expect("cart");
    assert_eq!(cart.items.len(), 1);
    assert_eq!(app.state.metrics.checkout_count("persistence_error"), 1);
}

enum ClearFault {
    Unavailable,
    /// Another request adds to the cart between the order write and the clear.
    ConcurrentAdd(Uuid),
}

struct FaultyClears {
    inner: Arc<MemoryStore>,
    fault: ClearFault,
}

#[async_trait]
impl CartStore for FaultyClears {
    async fn get(&self, owner_id: Uuid, slot: CartSlot) -> StoreResult<Option<Cart>> {
        CartStore::get(self.inner.as_ref(), owner_id, slot).await
    }

    async fn upsert_item(
        &self,
        owner_id: Uuid,
        slot: CartSlot,
        product_id: Uuid,
        delta: i64,
        cap: u32,
    ) -> StoreResult<Cart> {
        CartStore::upsert_item(self.inner.as_ref(), owner_id, slot, product_id, delta, cap).await
    }

    async fn clear_if_version(&self, owner_id: Uuid, slot: CartSlot, version: i64) -> StoreResult<bool> {
        match self.fault {
            ClearFault::Unavailable => Err(StoreError::Unavailable("connection reset".into())),
            ClearFault::ConcurrentAdd(product_id) => {
                CartStore::upsert_item(self.inner.as_ref(), owner_id, slot, product_id, 1, 100).await?;
                CartStore::clear_if_version(self.inner.as_ref(), owner_id, slot, version).await
            }
        }
    }
}

#[tokio::test]
async fn clear_failures_do_not_undo_the_order() {
    let app = TestApp::with_stores(|memory, mut stores| {
        stores.carts = Arc::new(FaultyClears {
            inner: memory,
            fault: ClearFault::Unavailable,
        });
        stores
    });
    let user = app.seed_shopper("ada").await;
    let token = app.token_for(&user);
    let beans = app.seed_product("Beans", 20).await;
    app.add_item(&token, 1, beans.id, 1).await;

    let resp = app.checkout(&token, 1, None).await;
    assert_eq!(resp.status, StatusCode::CREATED);
    assert_eq!(app.state.metrics.cart_clear_inconsistency_count(), 1);
    let placed = resp.body["purchaseId"].as_str().expect("purchase id").to_string();

    let orders = OrderStore::find_by_owner(app.memory.as_ref(), user.id).await.expect("orders");
    assert_eq!(orders.len(), 1);

    // The stale cart is still claimed by the order, so it cannot be bought twice.
    let resp = app.checkout(&token, 1, None).await;
    assert_eq!(resp.status, StatusCode::CONFLICT);
    assert_eq!(resp.error_code(), Some("duplicate_purchase"));
    assert!(resp.body["message"].as_str().expect("message").contains(&placed));
}

#[tokio::test]
async fn additions_during_checkout_survive_for_the_next_order() {
    let extra = Product::new("Filters", Money::from_minor(5));
    let extra_id = extra.id;
    let app = TestApp::with_stores(|memory, mut stores| {
        stores.carts = Arc::new(FaultyClears {
            inner: memory,
            fault: ClearFault::ConcurrentAdd(extra_id),
        });
        stores
    });
    app.memory.upsert_product(extra).await;
    let user = app.seed_shopper("ada").await;
    let token = app.token_for(&user);
    let beans = app.seed_product("Beans", 20).await;
    app.add_item(&token, 1, beans.id, 1).await;

    let resp = app.checkout(&token, 1, None).await;
    assert_eq!(resp.status, StatusCode::CREATED);
    assert_eq!(app.state.metrics.cart_clear_inconsistency_count(), 1);

    let cart = CartStore::get(app.memory.as_ref(), user.id, CartSlot::FIRST)
        .await
        .expect("get")
        .expect("cart");
    assert_eq!(cart.items.len(), 2);

    let orders = OrderStore::find_by_owner(app.memory.as_ref(), user.id).await.expect("orders");
    assert_eq!(orders[0].total_price, Money::from_minor(20));
}
