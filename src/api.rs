//! Storefront API client
//!
//! The remote contract, consumed as a black box:
//!
//! | Method | Path                 | Body              | Response            |
//! |--------|----------------------|-------------------|---------------------|
//! | POST   | `/api/auth/signin`   | `{email,password}`| `{token, user}`     |
//! | POST   | `/api/auth/signup`   | `SignUpRequest`   | `{token?, user?}`   |
//! | GET    | `/api/bag/:email`    |                   | `CartItem[]`        |
//! | POST   | `/api/bag/:email`    | `CartItem[]`      | `{message}`         |
//! | GET    | `/api/products`      |                   | `Product[]`         |
//! | POST   | `/api/products`      | `ProductDraft`    | `{product}`         |
//! | POST   | `/api/orders`        | `OrderDraft`      | `{orderId}`         |
//! | GET    | `/api/health`        |                   | `{status}`          |

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::model::{Cart, CartItem, ProductId, UserProfile};

/// Response of the sign-in and sign-up endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// New account details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Catalog entry. Fields the client does not interpret are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(default)]
    pub category: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Product submitted by the admin upload form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDraft {
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub category: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CreatedProduct {
    Wrapped { product: Product },
    Bare(Product),
}

/// Checkout payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub shipping_details: serde_json::Value,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
}

impl OrderDraft {
    /// Build an order for everything in `cart`
    pub fn from_cart(cart: &Cart, shipping_details: serde_json::Value) -> Self {
        Self {
            items: cart.items().to_vec(),
            shipping_details,
            total: cart.total(),
        }
    }
}

/// Confirmation of a submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Readiness probe result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// The remote storefront API
///
/// `HttpApi` is the production implementation; tests substitute an in-memory
/// fake so the session store can be exercised without a server.
#[async_trait]
pub trait RemoteApi: Send + Sync + 'static {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError>;

    async fn sign_up(&self, request: &SignUpRequest) -> Result<AuthResponse, ApiError>;

    /// `GET /api/bag/:email`
    async fn fetch_cart(&self, email: &str, token: &str) -> Result<Vec<CartItem>, ApiError>;

    /// `POST /api/bag/:email`, replacing the server copy
    async fn save_cart(&self, email: &str, token: &str, items: &[CartItem]) -> Result<(), ApiError>;

    async fn fetch_products(&self) -> Result<Vec<Product>, ApiError>;

    async fn add_product(&self, draft: &ProductDraft) -> Result<Product, ApiError>;

    async fn submit_order(&self, token: &str, order: &OrderDraft) -> Result<OrderReceipt, ApiError>;

    async fn health(&self) -> Result<HealthStatus, ApiError>;
}

/// reqwest-backed implementation of [`RemoteApi`]
#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    /// Build a client using the configured base URL and request timeout
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bag_url(&self, email: &str) -> String {
        self.url(&format!("/api/bag/{}", urlencoding::encode(email)))
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, token: Option<&str>) -> Result<T, ApiError> {
        tracing::debug!(url, "GET");
        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        Self::handle_response(response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync + ?Sized>(
        &self,
        url: &str,
        token: Option<&str>,
        body: &B,
    ) -> Result<T, ApiError> {
        tracing::debug!(url, "POST");
        let mut request = self.client.post(url).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        if response.status().is_success() {
            return response
                .json()
                .await
                .map_err(|e| ApiError::Parse(format!("Failed to parse response: {}", e)));
        }
        Err(Self::parse_error(response).await)
    }

    async fn parse_error(response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.error.or(body.message))
            .unwrap_or_else(|| {
                if text.is_empty() {
                    format!("Server error ({})", status)
                } else {
                    text
                }
            });

        match status {
            401 | 403 => ApiError::Unauthorized,
            404 => ApiError::NotFound(message),
            _ => ApiError::Http { status, message },
        }
    }
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let url = self.url("/api/auth/signin");
        self.post(&url, None, &Credentials { email, password }).await
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<AuthResponse, ApiError> {
        let url = self.url("/api/auth/signup");
        self.post(&url, None, request).await
    }

    async fn fetch_cart(&self, email: &str, token: &str) -> Result<Vec<CartItem>, ApiError> {
        self.get(&self.bag_url(email), Some(token)).await
    }

    async fn save_cart(&self, email: &str, token: &str, items: &[CartItem]) -> Result<(), ApiError> {
        let _: serde_json::Value = self.post(&self.bag_url(email), Some(token), items).await?;
        Ok(())
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, ApiError> {
        self.get(&self.url("/api/products"), None).await
    }

    async fn add_product(&self, draft: &ProductDraft) -> Result<Product, ApiError> {
        let created: CreatedProduct = self.post(&self.url("/api/products"), None, draft).await?;
        Ok(match created {
            CreatedProduct::Wrapped { product } => product,
            CreatedProduct::Bare(product) => product,
        })
    }

    async fn submit_order(&self, token: &str, order: &OrderDraft) -> Result<OrderReceipt, ApiError> {
        self.post(&self.url("/api/orders"), Some(token), order).await
    }

    async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.get(&self.url("/api/health"), None).await
    }
}
