//! Session, cart and wishlist data structures
//!
//! Wire names follow the storefront API (`id`, `price`, `image`, ...) so a
//! cart serializes to exactly what `POST /api/bag/:email` expects.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Product identifier; the API uses numbers, older clients used strings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProductId {
    Number(i64),
    Text(String),
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductId::Number(n) => write!(f, "{}", n),
            ProductId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ProductId {
    fn from(id: i64) -> Self {
        ProductId::Number(id)
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        ProductId::Text(id.to_string())
    }
}

impl From<String> for ProductId {
    fn from(id: String) -> Self {
        ProductId::Text(id)
    }
}

/// User profile as returned by the auth endpoints and persisted under `session.user`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Authenticated identity held by the client
#[derive(Clone, PartialEq)]
pub struct UserIdentity {
    /// Unique key of the user
    pub email: String,
    pub display_name: String,
    /// Opaque bearer token
    pub token: String,
}

impl UserIdentity {
    /// Combine a server profile with its token
    pub fn from_profile(profile: UserProfile, token: String) -> Self {
        let display_name = profile
            .username
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| profile.email.clone());
        Self {
            email: profile.email,
            display_name,
            token,
        }
    }

    /// Profile half of the identity, without the token
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            email: self.email.clone(),
            username: Some(self.display_name.clone()),
        }
    }
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserIdentity")
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// Snapshot of the session state
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    pub user: Option<UserIdentity>,
    pub is_authenticated: bool,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(user: UserIdentity) -> Self {
        Self {
            user: Some(user),
            is_authenticated: true,
        }
    }

    /// Email of the signed-in user, if any
    pub fn email(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.email.as_str())
    }
}

fn default_quantity() -> u32 {
    1
}

/// One line of the shopping bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    #[serde(rename = "id")]
    pub product_id: ProductId,

    pub name: String,

    #[serde(rename = "price", with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,

    #[serde(rename = "image", default)]
    pub image_ref: String,

    #[serde(default)]
    pub size: Option<String>,

    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

impl CartItem {
    /// Create an item with quantity 1, no size and no image
    pub fn new<I: Into<ProductId>, S: Into<String>>(product_id: I, name: S, unit_price: Decimal) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            unit_price,
            image_ref: String::new(),
            size: None,
            quantity: 1,
        }
    }

    pub fn with_size<S: Into<String>>(mut self, size: S) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn with_image<S: Into<String>>(mut self, image: S) -> Self {
        self.image_ref = image.into();
        self
    }

    /// Whether this line has the given `(product_id, size)` key
    pub fn matches(&self, product_id: &ProductId, size: Option<&str>) -> bool {
        &self.product_id == product_id && self.size.as_deref() == size
    }

    fn same_key(&self, other: &CartItem) -> bool {
        self.matches(&other.product_id, other.size.as_deref())
    }

    /// Price of the whole line
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Ordered shopping bag.
///
/// Every item has `quantity >= 1` and each `(product_id, size)` key appears once.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cart from untrusted items (storage, server), restoring the invariants
    pub fn from_items(items: Vec<CartItem>) -> Self {
        let mut cart = Self { items };
        cart.normalize();
        cart
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<CartItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, product_id: &ProductId, size: Option<&str>) -> Option<&CartItem> {
        self.items.iter().find(|i| i.matches(product_id, size))
    }

    /// Add `qty` of `item`, merging with an existing line of the same key.
    /// A zero quantity is a no-op.
    pub fn add(&mut self, item: CartItem, qty: u32) {
        if qty == 0 {
            return;
        }
        match self.items.iter_mut().find(|i| i.same_key(&item)) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(qty),
            None => self.items.push(CartItem { quantity: qty, ..item }),
        }
    }

    /// Remove the line with the given key; returns whether anything was removed
    pub fn remove(&mut self, product_id: &ProductId, size: Option<&str>) -> bool {
        let before = self.items.len();
        self.items.retain(|i| !i.matches(product_id, size));
        self.items.len() != before
    }

    /// Set the quantity of an existing line; `qty <= 0` removes it.
    /// Returns whether the cart changed.
    pub fn set_quantity(&mut self, product_id: &ProductId, size: Option<&str>, qty: i64) -> bool {
        if qty <= 0 {
            return self.remove(product_id, size);
        }
        let qty = u32::try_from(qty).unwrap_or(u32::MAX);
        match self.items.iter_mut().find(|i| i.matches(product_id, size)) {
            Some(item) if item.quantity != qty => {
                item.quantity = qty;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Sign-in merge: server lines are kept as-is, local lines whose key the
    /// server lacks are appended in their local order.
    pub fn merge_server_wins(server: Cart, local: &Cart) -> Cart {
        let mut merged = server;
        for item in &local.items {
            if !merged.items.iter().any(|s| s.same_key(item)) {
                merged.items.push(item.clone());
            }
        }
        merged
    }

    /// Sum of all line totals
    pub fn total(&self) -> Decimal {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Number of units across all lines
    pub fn item_count(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }

    /// Drop zero-quantity lines and fold duplicate keys into the first occurrence
    pub fn normalize(&mut self) {
        let mut folded: Vec<CartItem> = Vec::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if item.quantity == 0 {
                continue;
            }
            match folded.iter_mut().find(|f| f.same_key(&item)) {
                Some(first) => first.quantity = first.quantity.saturating_add(item.quantity),
                None => folded.push(item),
            }
        }
        self.items = folded;
    }
}

/// Kind of deferred server write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PendingKind {
    SaveCart,
}

/// A server write waiting for connectivity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub kind: PendingKind,
    /// Owner of the cart at enqueue time
    pub email: String,
    pub payload: Cart,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingOperation {
    pub fn save_cart(email: &str, payload: Cart, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            kind: PendingKind::SaveCart,
            email: email.to_string(),
            payload,
            enqueued_at,
        }
    }
}

/// Product reference kept in the wishlist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WishlistEntry {
    #[serde(rename = "id")]
    pub product_id: ProductId,
    #[serde(default)]
    pub name: String,
}

impl WishlistEntry {
    pub fn new<I: Into<ProductId>, S: Into<String>>(product_id: I, name: S) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
        }
    }
}

/// Set of saved products, no quantities
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wishlist {
    entries: Vec<WishlistEntry>,
}

impl Wishlist {
    pub fn entries(&self) -> &[WishlistEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, product_id: &ProductId) -> bool {
        self.entries.iter().any(|e| &e.product_id == product_id)
    }

    /// Add the entry if absent, remove it if present. Returns whether it is now saved.
    pub fn toggle(&mut self, entry: WishlistEntry) -> bool {
        if self.contains(&entry.product_id) {
            self.entries.retain(|e| e.product_id != entry.product_id);
            false
        } else {
            self.entries.push(entry);
            true
        }
    }
}
