#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thriftease_session::api::{
    AuthResponse, HealthStatus, OrderDraft, OrderReceipt, Product, ProductDraft, RemoteApi,
    SignUpRequest,
};
use thriftease_session::model::UserProfile;
use thriftease_session::{ApiError, CartItem, ClientConfig, ClientSessionStore, MemoryStore};

pub type Client = ClientSessionStore<MemoryStore, FakeApi>;

pub const EMAIL: &str = "ann@example.com";
pub const PASSWORD: &str = "hunter2";

/// How a fake call fails
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Timeout,
    Offline,
    Unauthorized,
}

impl Failure {
    fn error(self) -> ApiError {
        match self {
            Failure::Timeout => ApiError::Timeout,
            Failure::Offline => ApiError::Network("connection refused".to_string()),
            Failure::Unauthorized => ApiError::Unauthorized,
        }
    }
}

#[derive(Default)]
struct FakeState {
    users: HashMap<String, (String, String)>,
    bags: HashMap<String, Vec<CartItem>>,
    saved: Vec<(String, Vec<CartItem>)>,
    products: Vec<Product>,
    orders: Vec<OrderDraft>,
    calls: usize,
    fail_all: Option<Failure>,
    fail_fetch: Option<Failure>,
    fail_save: Option<Failure>,
    signup_tokens: bool,
}

/// In-memory stand-in for the storefront API
#[derive(Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default().with_user(EMAIL, PASSWORD, "ann")
    }

    pub fn with_user(self, email: &str, password: &str, username: &str) -> Self {
        self.state
            .lock()
            .users
            .insert(email.to_string(), (password.to_string(), username.to_string()));
        self
    }

    /// Make sign-up return a token, signing the new user straight in
    pub fn issue_signup_tokens(&self) {
        self.state.lock().signup_tokens = true;
    }

    pub fn set_server_bag(&self, email: &str, items: Vec<CartItem>) {
        self.state.lock().bags.insert(email.to_string(), items);
    }

    pub fn server_bag(&self, email: &str) -> Vec<CartItem> {
        self.state.lock().bags.get(email).cloned().unwrap_or_default()
    }

    /// Every payload received by `POST /api/bag/:email`, in order
    pub fn saved_bags(&self) -> Vec<Vec<CartItem>> {
        self.state.lock().saved.iter().map(|(_, items)| items.clone()).collect()
    }

    pub fn set_products(&self, products: Vec<Product>) {
        self.state.lock().products = products;
    }

    pub fn orders(&self) -> Vec<OrderDraft> {
        self.state.lock().orders.clone()
    }

    /// Number of requests attempted, failed ones included
    pub fn calls(&self) -> usize {
        self.state.lock().calls
    }

    pub fn fail_all(&self, failure: Failure) {
        self.state.lock().fail_all = Some(failure);
    }

    pub fn fail_fetch(&self, failure: Failure) {
        self.state.lock().fail_fetch = Some(failure);
    }

    pub fn fail_save(&self, failure: Failure) {
        self.state.lock().fail_save = Some(failure);
    }

    pub fn recover(&self) {
        let mut state = self.state.lock();
        state.fail_all = None;
        state.fail_fetch = None;
        state.fail_save = None;
    }

    fn begin(&self) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        state.calls += 1;
        match state.fail_all {
            Some(failure) => Err(failure.error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        self.begin()?;
        let state = self.state.lock();
        match state.users.get(email) {
            None => Err(ApiError::NotFound("User not found".to_string())),
            Some((expected, _)) if expected != password => Err(ApiError::Unauthorized),
            Some((_, username)) => Ok(AuthResponse {
                token: Some(format!("token_{}", email)),
                user: Some(UserProfile {
                    email: email.to_string(),
                    username: Some(username.clone()),
                }),
                message: Some("Sign-in successful".to_string()),
            }),
        }
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<AuthResponse, ApiError> {
        self.begin()?;
        let mut state = self.state.lock();
        if state.users.contains_key(&request.email) {
            return Err(ApiError::Http {
                status: 409,
                message: "User already exists".to_string(),
            });
        }
        state.users.insert(
            request.email.clone(),
            (request.password.clone(), request.username.clone()),
        );
        let token = state
            .signup_tokens
            .then(|| format!("token_{}", request.email));
        Ok(AuthResponse {
            token,
            user: Some(UserProfile {
                email: request.email.clone(),
                username: Some(request.username.clone()),
            }),
            message: Some("User created successfully".to_string()),
        })
    }

    async fn fetch_cart(&self, email: &str, _token: &str) -> Result<Vec<CartItem>, ApiError> {
        self.begin()?;
        let state = self.state.lock();
        if let Some(failure) = state.fail_fetch {
            return Err(failure.error());
        }
        Ok(state.bags.get(email).cloned().unwrap_or_default())
    }

    async fn save_cart(&self, email: &str, _token: &str, items: &[CartItem]) -> Result<(), ApiError> {
        self.begin()?;
        let mut state = self.state.lock();
        if let Some(failure) = state.fail_save {
            return Err(failure.error());
        }
        state.bags.insert(email.to_string(), items.to_vec());
        state.saved.push((email.to_string(), items.to_vec()));
        Ok(())
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, ApiError> {
        self.begin()?;
        Ok(self.state.lock().products.clone())
    }

    async fn add_product(&self, draft: &ProductDraft) -> Result<Product, ApiError> {
        self.begin()?;
        let mut state = self.state.lock();
        let product = Product {
            id: (state.products.len() as i64 + 1).into(),
            name: draft.name.clone(),
            price: draft.price,
            category: draft.category.clone(),
            extra: draft.extra.clone(),
        };
        state.products.push(product.clone());
        Ok(product)
    }

    async fn submit_order(&self, _token: &str, order: &OrderDraft) -> Result<OrderReceipt, ApiError> {
        self.begin()?;
        let mut state = self.state.lock();
        state.orders.push(order.clone());
        Ok(OrderReceipt {
            order_id: format!("ORD-{:06}", state.orders.len()),
            message: Some("Order submitted successfully".to_string()),
        })
    }

    async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.begin()?;
        Ok(HealthStatus {
            status: "healthy".to_string(),
        })
    }
}

pub fn config() -> ClientConfig {
    ClientConfig::new("http://storefront.test")
        .with_key_prefix("test:")
        .with_request_timeout(Duration::from_secs(5))
}

pub fn shirt() -> CartItem {
    CartItem::new(1, "Shirt", Decimal::from(10)).with_size("M")
}

pub fn hat() -> CartItem {
    CartItem::new("hat-7", "Hat", Decimal::new(450, 2))
}

pub async fn signed_in(store: MemoryStore, api: FakeApi, config: ClientConfig) -> Client {
    let client = ClientSessionStore::open(store, api, config)
        .await
        .expect("open client");
    client.sign_in(EMAIL, PASSWORD).await.expect("sign in");
    client
}

/// Let spawned background saves run to completion
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
