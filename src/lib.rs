//! # thriftease-session
//!
//! Client-side session, bag and offline sync store for the ThriftEase
//! storefront API.
//!
//! One [`ClientSessionStore`] per client ("tab") owns the signed-in user,
//! their shopping bag, their wishlist and a queue of server writes that are
//! still waiting for connectivity. State is persisted in a shared
//! [`StateStore`] and mirrored between tabs through its change feed.
//!
//! ## Features
//!
//! - **Optimistic cart updates**: mutations apply locally at once; the server
//!   save runs in the background and is queued when offline
//! - **Sign-in merge**: the server bag wins on conflicts, local-only lines are kept
//! - **Background reconciliation**: a periodic task adopts the server bag when it differs
//! - **Cross-tab propagation**: tabs sharing a store see each other's changes
//!   without a network round trip
//! - **Pluggable storage backends**: in-memory, Redis, or custom stores
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use thriftease_session::{
//!     CartItem, ClientConfig, ClientSessionStore, EventType, HttpApi, MemoryStore, StoreEvent,
//! };
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::from_env();
//!     let api = HttpApi::new(&config)?;
//!     let client = ClientSessionStore::open(MemoryStore::new(), api, config).await?;
//!
//!     client.on_change(EventType::CartUpdate, |event| {
//!         if let StoreEvent::CartUpdate(cart) = event {
//!             println!("bag now has {} items", cart.item_count());
//!         }
//!     });
//!     let _sync = client.start_background_sync();
//!     let _tabs = client.watch_storage();
//!
//!     client.sign_in("ann@example.com", "secret").await?;
//!     client
//!         .add_item(CartItem::new(1, "Shirt", Decimal::from(10)).with_size("M"), 1)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod store;
pub mod sync;

pub use api::{HttpApi, RemoteApi};
pub use client::ClientSessionStore;
pub use config::ClientConfig;
pub use error::{ApiError, AuthError, CartError, StoreError, SyncError};
pub use events::{EventType, StoreEvent, SubscriptionId};
pub use model::{Cart, CartItem, ProductId, Session, UserIdentity, Wishlist, WishlistEntry};
pub use store::{MemoryStore, StateStore, StorageEvent};
pub use sync::{StorageWatcher, SyncWorker};

#[cfg(feature = "redis-store")]
pub use store::RedisStore;
