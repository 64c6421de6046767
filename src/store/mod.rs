//! State store implementations

mod memory;
mod traits;

pub use memory::MemoryStore;
pub use traits::{StateStore, StorageEvent, StorageEvents};

#[cfg(feature = "redis-store")]
mod redis_store;

#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;

/// Persisted key names, relative to the configured key prefix
pub mod keys {
    pub const SESSION_USER: &str = "session.user";
    pub const SESSION_TOKEN: &str = "session.token";
    pub const CART_ITEMS: &str = "cart.items";
    /// Email of the account the persisted bag belongs to
    pub const CART_OWNER: &str = "cart.owner";
    pub const PENDING_QUEUE: &str = "sync.pendingQueue";
    pub const WISHLIST_ITEMS: &str = "wishlist.items";
    /// Not user-scoped; survives sign-out
    pub const CATALOG_PRODUCTS: &str = "catalog.products";

    /// Keys cleared on sign-out
    pub const USER_SCOPED: [&str; 6] = [
        SESSION_USER,
        SESSION_TOKEN,
        CART_ITEMS,
        CART_OWNER,
        PENDING_QUEUE,
        WISHLIST_ITEMS,
    ];
}
