#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set,
};
use serde_json::Value;
use storefront_checkout::{
    app_router,
    auth::AuthService,
    config::AppConfig,
    db,
    entities::{address, cart_item, product, user, CartItem, Order, OrderItem, Payment},
    events::{self, EventSender},
    handlers::AppServices,
    services::shipping::{RateProvider, ShippingError, ShippingQuoteRequest},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Rate provider double with a fixed behaviour and a call counter
pub struct StubRateProvider {
    behaviour: StubRate,
    calls: AtomicUsize,
}

#[derive(Clone)]
pub enum StubRate {
    Fixed(Decimal),
    NetworkError,
    MissingRate,
}

impl StubRateProvider {
    pub fn new(behaviour: StubRate) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateProvider for StubRateProvider {
    async fn fetch_rate(&self, _request: &ShippingQuoteRequest) -> Result<Decimal, ShippingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            StubRate::Fixed(rate) => Ok(*rate),
            StubRate::NetworkError => Err(ShippingError::Transport("connection refused".into())),
            StubRate::MissingRate => Err(ShippingError::MissingRate),
        }
    }
}

/// Application harness backed by a private in-memory SQLite database
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub rates: Arc<StubRateProvider>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_rate(StubRate::Fixed(Decimal::from(300))).await
    }

    pub async fn with_rate(rate: StubRate) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "test".to_string(),
        );
        // one connection keeps every query on the same in-memory database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_task = tokio::spawn(events::process_events(event_rx));
        let event_sender = Arc::new(EventSender::new(event_tx));

        let rates = StubRateProvider::new(rate);
        let services = AppServices::new(db.clone(), event_sender, &cfg, rates.clone());

        let state = AppState {
            db,
            config: cfg,
            auth: Arc::new(AuthService::new(JWT_SECRET)),
            services,
        };

        Self {
            router: app_router(state.clone()),
            state,
            rates,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        self.state
            .auth
            .issue_token(user_id)
            .expect("failed to issue test token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("failed to build request"))
            .await
            .expect("router error during test request");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };

        (status, json)
    }

    pub async fn seed_user(&self) -> Uuid {
        let id = Uuid::new_v4();
        user::ActiveModel {
            id: Set(id),
            name: Set("Test Customer".into()),
            email: Set(format!("{}@example.com", id)),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed user");
        id
    }

    pub async fn seed_product(&self, price: Decimal, weight: Option<Decimal>) -> Uuid {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            name: Set(format!("Product {}", &id.to_string()[..8])),
            price: Set(price),
            weight: Set(weight),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed product");
        id
    }

    pub async fn set_price(&self, product_id: Uuid, price: Decimal) {
        product::ActiveModel {
            id: Set(product_id),
            price: Set(price),
            ..Default::default()
        }
        .update(self.db())
        .await
        .expect("update product price");
    }

    pub async fn seed_address(&self, user_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        address::ActiveModel {
            id: Set(id),
            user_id: Set(user_id),
            country: Set("KE".into()),
            state: Set("Nairobi".into()),
            city: Set("Nairobi".into()),
            street_address: Set("Moi Avenue 12".into()),
            zip_code: Set("00100".into()),
            address_type: Set(address::AddressType::Shipping),
        }
        .insert(self.db())
        .await
        .expect("seed address");
        id
    }

    pub async fn add_to_cart(&self, user_id: Uuid, product_id: Uuid, quantity: i32) {
        let position = self.cart_len(user_id).await as i64;
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            added_at: Set(Utc::now() + ChronoDuration::milliseconds(position)),
        }
        .insert(self.db())
        .await
        .expect("seed cart item");
    }

    /// Customer with an address and the two-line reference cart:
    /// 1 x 45.99 (2 kg) and 2 x 22.99 (1 kg)
    pub async fn seed_checkout_ready_user(&self) -> (Uuid, Uuid, Vec<Uuid>) {
        let user_id = self.seed_user().await;
        let address_id = self.seed_address(user_id).await;
        let jacket = self
            .seed_product(Decimal::new(4599, 2), Some(Decimal::from(2)))
            .await;
        let mug = self
            .seed_product(Decimal::new(2299, 2), Some(Decimal::from(1)))
            .await;
        self.add_to_cart(user_id, jacket, 1).await;
        self.add_to_cart(user_id, mug, 2).await;
        (user_id, address_id, vec![jacket, mug])
    }

    pub async fn cart_len(&self, user_id: Uuid) -> u64 {
        CartItem::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .count(self.db())
            .await
            .expect("count cart items")
    }

    pub async fn cart_quantities(&self, user_id: Uuid) -> Vec<(Uuid, i32)> {
        let mut rows: Vec<_> = CartItem::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .all(self.db())
            .await
            .expect("load cart")
            .into_iter()
            .map(|item| (item.product_id, item.quantity))
            .collect();
        rows.sort();
        rows
    }

    /// Row counts for orders, order lines and payments
    pub async fn order_graph_counts(&self) -> (u64, u64, u64) {
        let orders = Order::find().count(self.db()).await.expect("count orders");
        let lines = OrderItem::find().count(self.db()).await.expect("count lines");
        let payments = Payment::find().count(self.db()).await.expect("count payments");
        (orders, lines, payments)
    }

    /// Makes every insert into `table` abort
    pub async fn fail_inserts_into(&self, table: &str) {
        self.db()
            .execute_unprepared(&format!(
                "CREATE TRIGGER fail_{table} BEFORE INSERT ON {table} \
                 BEGIN SELECT RAISE(ABORT, 'injected failure'); END;"
            ))
            .await
            .expect("create failure trigger");
    }

    /// Makes every delete from `table` abort
    pub async fn fail_deletes_from(&self, table: &str) {
        self.db()
            .execute_unprepared(&format!(
                "CREATE TRIGGER fail_delete_{table} BEFORE DELETE ON {table} \
                 BEGIN SELECT RAISE(ABORT, 'injected failure'); END;"
            ))
            .await
            .expect("create failure trigger");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}
