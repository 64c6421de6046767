//! Client session store
//!
//! [`ClientSessionStore`] is the single source of truth for the signed-in
//! user, their bag and the queue of server writes that could not be sent
//! yet. Every mutation follows the same path:
//!
//! ```text
//! Idle -> Mutating -> Persisted -> online?  SyncPending -> SyncOk
//!                                                       -> SyncFailed -> QueuedOffline
//!                                  offline? QueuedOffline
//! ```
//!
//! Queued writes are retried on the next background tick or the next
//! offline-to-online transition.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::api::{OrderDraft, OrderReceipt, Product, ProductDraft, RemoteApi, SignUpRequest};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{ApiError, AuthError, CartError, StoreError, SyncError};
use crate::events::{EventType, StoreEvent, SubscriptionId, Subscribers};
use crate::model::{
    Cart, CartItem, PendingOperation, ProductId, Session, UserIdentity, UserProfile, Wishlist,
    WishlistEntry,
};
use crate::store::{keys, StateStore, StorageEvent};
use crate::sync::{StorageWatcher, SyncWorker};

#[derive(Default)]
struct State {
    user: Option<UserIdentity>,
    cart: Cart,
    pending: Vec<PendingOperation>,
    wishlist: Wishlist,
    /// Account the bag belongs to; survives token expiry with the bag
    cart_owner: Option<String>,
    /// Bumped on every local cart change; a server copy fetched before a
    /// bump is stale and must not replace the local cart.
    revision: u64,
    /// Last revision the server is known to hold
    synced_revision: u64,
}

struct Inner<S, A> {
    store: S,
    api: A,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<State>,
    subscribers: Subscribers,
    online: AtomicBool,
    /// Serializes server writes so they land in call order
    sync_gate: tokio::sync::Mutex<()>,
}

/// Session, bag and offline queue for one client ("tab")
///
/// Cheap to clone; clones share state. Construct one per tab at startup
/// with [`open`](Self::open) and hand it to whatever needs it.
pub struct ClientSessionStore<S: StateStore, A: RemoteApi> {
    inner: Arc<Inner<S, A>>,
}

impl<S: StateStore, A: RemoteApi> Clone for ClientSessionStore<S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: StateStore, A: RemoteApi> ClientSessionStore<S, A> {
    /// Create a store with empty in-memory state. Use [`open`](Self::open)
    /// to restore persisted state as well.
    pub fn new(store: S, api: A, config: ClientConfig) -> Self {
        Self::with_clock(store, api, config, SystemClock)
    }

    /// Like [`new`](Self::new) with a custom clock for queue timestamps
    pub fn with_clock<C: Clock>(store: S, api: A, config: ClientConfig, clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                api,
                config,
                clock: Arc::new(clock),
                state: RwLock::new(State::default()),
                subscribers: Subscribers::default(),
                online: AtomicBool::new(true),
                sync_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Create a store and restore session, bag, queue and wishlist from the
    /// persisted store (a page load)
    pub async fn open(store: S, api: A, config: ClientConfig) -> Result<Self, StoreError> {
        let client = Self::new(store, api, config);
        client.restore().await?;
        Ok(client)
    }

    /// Reload all user-scoped state from the persisted store.
    ///
    /// Corrupt entries are treated as empty and overwritten.
    pub async fn restore(&self) -> Result<(), StoreError> {
        let user = self.load_user().await?;
        if user.is_none() {
            self.remove_keys(&[keys::SESSION_USER, keys::SESSION_TOKEN]).await;
        }
        let items: Vec<CartItem> = self.load_or_reset(keys::CART_ITEMS).await?;
        let pending: Vec<PendingOperation> = self.load_or_reset(keys::PENDING_QUEUE).await?;
        let wishlist: Wishlist = self.load_or_reset(keys::WISHLIST_ITEMS).await?;
        let owner = self
            .inner
            .store
            .get(&self.key(keys::CART_OWNER))
            .await?
            .filter(|owner| !owner.is_empty());

        match &user {
            Some(user) => tracing::info!("User session restored: {}", user.email),
            None => tracing::debug!("No stored session"),
        }

        let mut state = self.inner.state.write();
        state.user = user;
        state.cart = Cart::from_items(items);
        state.pending = pending;
        state.wishlist = wishlist;
        state.cart_owner = owner;
        // Unsent writes from the last run are in the queue
        state.revision += 1;
        state.synced_revision = state.revision;
        Ok(())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current session snapshot
    pub fn session(&self) -> Session {
        match self.current_user() {
            Some(user) => Session::authenticated(user),
            None => Session::anonymous(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.read().user.is_some()
    }

    /// Current bag; always empty without a session
    pub fn cart(&self) -> Cart {
        let state = self.inner.state.read();
        if state.user.is_some() {
            state.cart.clone()
        } else {
            Cart::new()
        }
    }

    /// Server writes waiting to be replayed, oldest first
    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        self.inner.state.read().pending.clone()
    }

    pub fn wishlist(&self) -> Wishlist {
        self.inner.state.read().wishlist.clone()
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    // ---------------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------------

    /// Register a callback for one kind of change. Callbacks run synchronously
    /// on the task that made the change.
    pub fn on_change<F>(&self, event_type: EventType, callback: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(event_type, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.unsubscribe(id)
    }

    /// Drop every subscriber. Background tasks stop when their handles drop.
    pub fn dispose(&self) {
        self.inner.subscribers.clear();
    }

    fn emit(&self, event: StoreEvent) {
        tracing::trace!(event_type = ?event.event_type(), "notifying subscribers");
        self.inner.subscribers.emit(&event);
    }

    // ---------------------------------------------------------------------
    // Authentication
    // ---------------------------------------------------------------------

    /// Sign in, then load the server bag and merge it with the local one
    /// (server wins on conflict, union on distinct keys).
    ///
    /// A failed bag load does not fail the sign-in.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials(
                "email and password are required".to_string(),
            ));
        }

        tracing::debug!(email, "Attempting sign-in");
        let response = self.inner.api.sign_in(email, password).await.map_err(|e| {
            tracing::warn!("Sign-in failed: {}", e);
            AuthError::from(e)
        })?;

        let (token, profile) = match (response.token, response.user) {
            (Some(token), Some(user)) if !token.is_empty() => (token, user),
            _ => {
                return Err(AuthError::ServerUnavailable(
                    "invalid response from server".to_string(),
                ))
            }
        };

        let user = UserIdentity::from_profile(profile, token);
        self.establish_session(user).await
    }

    /// Create an account. When the server also returns a token the new user
    /// is signed in as by [`sign_in`](Self::sign_in).
    pub async fn sign_up(&self, request: &SignUpRequest) -> Result<Option<Session>, AuthError> {
        if request.username.trim().is_empty()
            || request.email.trim().is_empty()
            || request.password.is_empty()
        {
            return Err(AuthError::Rejected {
                status: 400,
                message: "username, email, and password required".to_string(),
            });
        }

        let response = self.inner.api.sign_up(request).await.map_err(|e| {
            tracing::warn!("Sign-up failed: {}", e);
            AuthError::from(e)
        })?;

        match (response.token, response.user) {
            (Some(token), Some(profile)) if !token.is_empty() => {
                let user = UserIdentity::from_profile(profile, token);
                self.establish_session(user).await.map(Some)
            }
            _ => {
                tracing::info!("Account created for {}", request.email);
                Ok(None)
            }
        }
    }

    async fn establish_session(&self, user: UserIdentity) -> Result<Session, AuthError> {
        if let Some(current) = self.current_user() {
            if current.email != user.email {
                tracing::info!("Switching account from {}", current.email);
                self.sign_out().await;
            }
        }
        self.claim_cart(&user.email).await;

        self.write_json(keys::SESSION_USER, &user.profile()).await?;
        self.inner
            .store
            .set(&self.key(keys::SESSION_TOKEN), &user.token)
            .await?;

        self.inner.state.write().user = Some(user.clone());
        self.emit(StoreEvent::UserUpdate(Some(user.clone())));

        match self.inner.api.fetch_cart(&user.email, &user.token).await {
            Ok(items) => {
                let server = Cart::from_items(items);
                let (merged, revision) = {
                    let mut state = self.inner.state.write();
                    state.cart = Cart::merge_server_wins(server.clone(), &state.cart);
                    state.revision += 1;
                    (state.cart.clone(), state.revision)
                };
                self.persist_cart(&merged).await;
                self.emit(StoreEvent::CartUpdate(merged.clone()));
                if merged != server {
                    self.schedule_save(&user.email, merged).await;
                } else {
                    self.mark_synced(revision);
                }
                tracing::debug!("User bag loaded and merged");
            }
            Err(e) => {
                tracing::warn!("Could not load bag from server: {}", e);
            }
        }

        tracing::info!("Welcome back, {}!", user.display_name);
        Ok(Session::authenticated(user))
    }

    /// Drop a kept bag that belongs to another account, then record `email`
    /// as the owner of whatever bag remains
    async fn claim_cart(&self, email: &str) {
        let (foreign, pending_changed, cart, pending) = {
            let mut state = self.inner.state.write();
            let foreign = state
                .cart_owner
                .as_deref()
                .is_some_and(|owner| owner != email);
            if foreign {
                state.cart.clear();
                state.revision += 1;
                state.synced_revision = state.revision;
            }
            let before = state.pending.len();
            state.pending.retain(|op| op.email == email);
            state.cart_owner = Some(email.to_string());
            (
                foreign,
                state.pending.len() != before,
                state.cart.clone(),
                state.pending.clone(),
            )
        };

        if foreign {
            tracing::info!("Discarding bag kept for another account");
            self.persist_cart(&cart).await;
            self.emit(StoreEvent::CartUpdate(cart));
        }
        if pending_changed {
            self.persist_pending(&pending).await;
        }
        if let Err(e) = self.inner.store.set(&self.key(keys::CART_OWNER), email).await {
            tracing::warn!("Failed to persist bag owner: {}", e);
        }
    }

    /// Sign out. Unsent bag changes get one best-effort flush bounded by the
    /// request timeout; whatever happens, all user-scoped state is cleared.
    pub async fn sign_out(&self) {
        let user = self.current_user();
        if let Some(user) = &user {
            if self.is_online() && self.has_unsynced_changes() {
                let flush = self.flush_before_sign_out(user);
                match tokio::time::timeout(self.inner.config.request_timeout, flush).await {
                    Ok(Ok(())) => tracing::debug!("Bag flushed before sign-out"),
                    Ok(Err(e)) => tracing::warn!("Bag flush failed during sign-out: {}", e),
                    Err(_) => tracing::warn!("Bag flush timed out during sign-out"),
                }
            }
        }

        {
            let mut state = self.inner.state.write();
            state.user = None;
            state.cart.clear();
            state.pending.clear();
            state.wishlist = Wishlist::default();
            state.cart_owner = None;
            state.revision += 1;
            state.synced_revision = state.revision;
        }
        self.remove_keys(&keys::USER_SCOPED).await;

        self.emit(StoreEvent::SignOut);
        self.emit(StoreEvent::UserUpdate(None));
        self.emit(StoreEvent::CartUpdate(Cart::new()));
        if user.is_some() {
            tracing::info!("Signed out successfully");
        }
    }

    /// Push the current bag unless a background save already delivered it
    async fn flush_before_sign_out(&self, user: &UserIdentity) -> Result<(), ApiError> {
        let _gate = self.inner.sync_gate.lock().await;
        if !self.has_unsynced_changes() {
            return Ok(());
        }
        let (cart, revision) = {
            let state = self.inner.state.read();
            (state.cart.clone(), state.revision)
        };
        self.inner
            .api
            .save_cart(&user.email, &user.token, cart.items())
            .await?;
        self.mark_synced(revision);
        Ok(())
    }

    fn has_unsynced_changes(&self) -> bool {
        let state = self.inner.state.read();
        !state.pending.is_empty() || state.revision != state.synced_revision
    }

    /// Record that the server holds the bag as of `revision`
    fn mark_synced(&self, revision: u64) {
        let mut state = self.inner.state.write();
        if revision > state.synced_revision {
            state.synced_revision = revision;
        }
    }

    /// End a session the server no longer accepts. Unlike sign-out, the bag
    /// and queue are kept so they merge back on the next sign-in.
    async fn expire_session(&self) {
        let expired = self.inner.state.write().user.take();
        if let Some(user) = expired {
            tracing::warn!("Session for {} expired", user.email);
            self.remove_keys(&[keys::SESSION_USER, keys::SESSION_TOKEN]).await;
            self.emit(StoreEvent::SignOut);
            self.emit(StoreEvent::UserUpdate(None));
        }
    }

    // ---------------------------------------------------------------------
    // Cart mutations
    // ---------------------------------------------------------------------

    /// Add `qty` units of `item`, merging with an existing line of the same
    /// `(product_id, size)`
    pub async fn add_item(&self, item: CartItem, qty: u32) -> Result<Cart, CartError> {
        let name = item.name.clone();
        let cart = self.mutate_cart(|cart| {
            cart.add(item, qty);
            qty > 0
        })
        .await?;
        tracing::info!("{} added to bag", name);
        Ok(cart)
    }

    pub async fn remove_item(
        &self,
        product_id: &ProductId,
        size: Option<&str>,
    ) -> Result<Cart, CartError> {
        self.mutate_cart(|cart| cart.remove(product_id, size)).await
    }

    /// Set the quantity of a line; `qty <= 0` removes it
    pub async fn set_quantity(
        &self,
        product_id: &ProductId,
        size: Option<&str>,
        qty: i64,
    ) -> Result<Cart, CartError> {
        self.mutate_cart(|cart| cart.set_quantity(product_id, size, qty))
            .await
    }

    pub async fn clear_cart(&self) -> Result<Cart, CartError> {
        self.mutate_cart(|cart| {
            let changed = !cart.is_empty();
            cart.clear();
            changed
        })
        .await
    }

    /// Apply `f` optimistically, persist, notify, then hand the server write
    /// off without waiting for it. `f` reports whether it changed anything.
    async fn mutate_cart<F>(&self, f: F) -> Result<Cart, CartError>
    where
        F: FnOnce(&mut Cart) -> bool,
    {
        let (email, cart, changed) = {
            let mut state = self.inner.state.write();
            let email = match &state.user {
                Some(user) => user.email.clone(),
                None => return Err(CartError::NotAuthenticated),
            };
            let changed = f(&mut state.cart);
            if changed {
                state.revision += 1;
            }
            (email, state.cart.clone(), changed)
        };

        if changed {
            // Memory stays authoritative when the store rejects the write
            self.persist_cart(&cart).await;
            self.emit(StoreEvent::CartUpdate(cart.clone()));
            self.schedule_save(&email, cart.clone()).await;
        }
        Ok(cart)
    }

    /// Send the bag to the server in the background, or queue it when offline
    async fn schedule_save(&self, email: &str, cart: Cart) {
        if !self.is_online() {
            tracing::debug!("Offline, bag save queued");
            self.enqueue(email, cart).await;
            return;
        }
        if !self.inner.config.sync_on_mutation {
            tracing::debug!("Immediate sync disabled, bag save queued for next tick");
            self.enqueue(email, cart).await;
            return;
        }
        let this = self.clone();
        let email = email.to_string();
        tokio::spawn(async move {
            this.push_latest(email).await;
        });
    }

    /// Replay anything queued, then push the current bag. On failure the
    /// current bag joins the queue.
    async fn push_latest(&self, email: String) {
        let _gate = self.inner.sync_gate.lock().await;
        let (token, cart, revision) = {
            let state = self.inner.state.read();
            match &state.user {
                Some(user) if user.email == email => {
                    (user.token.clone(), state.cart.clone(), state.revision)
                }
                _ => {
                    tracing::debug!("Session changed, skipping bag save");
                    return;
                }
            }
        };

        let result = match self.replay_locked().await {
            Ok(_) => self.inner.api.save_cart(&email, &token, cart.items()).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.mark_synced(revision);
                tracing::debug!("Bag synced to server");
            }
            Err(ApiError::Unauthorized) => self.expire_session().await,
            Err(e) => {
                tracing::warn!("Bag sync failed, queued for retry: {}", e);
                self.enqueue(&email, cart).await;
            }
        }
    }

    async fn enqueue(&self, email: &str, cart: Cart) {
        let op = PendingOperation::save_cart(email, cart, self.inner.clock.now());
        let snapshot = {
            let mut state = self.inner.state.write();
            state.pending.push(op);
            state.pending.clone()
        };
        self.persist_pending(&snapshot).await;
    }

    /// Replay queued writes in FIFO order. Stops at the first failure, leaving
    /// that write at the head of the queue. Caller holds the sync gate.
    async fn replay_locked(&self) -> Result<usize, ApiError> {
        let mut replayed = 0;
        loop {
            let next = {
                let state = self.inner.state.read();
                state
                    .pending
                    .first()
                    .cloned()
                    .map(|op| (op, state.user.clone()))
            };
            let (op, user) = match next {
                Some(next) => next,
                None => break,
            };
            let token = match user {
                Some(user) if user.email == op.email => user.token,
                Some(_) => {
                    tracing::warn!("Dropping queued bag save for {}", op.email);
                    self.drop_pending_head(&op).await;
                    continue;
                }
                None => break,
            };

            self.inner
                .api
                .save_cart(&op.email, &token, op.payload.items())
                .await?;
            self.drop_pending_head(&op).await;
            replayed += 1;
        }
        if replayed > 0 {
            tracing::info!("Replayed {} queued bag saves", replayed);
        }
        Ok(replayed)
    }

    async fn drop_pending_head(&self, op: &PendingOperation) {
        let snapshot = {
            let mut state = self.inner.state.write();
            if state.pending.first() == Some(op) {
                state.pending.remove(0);
            }
            state.pending.clone()
        };
        self.persist_pending(&snapshot).await;
    }

    // ---------------------------------------------------------------------
    // Synchronization
    // ---------------------------------------------------------------------

    /// Record a connectivity change. Coming back online replays the queue.
    pub async fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            tracing::info!("Back online");
            if self.is_authenticated() {
                let _gate = self.inner.sync_gate.lock().await;
                match self.replay_locked().await {
                    Ok(_) => {}
                    Err(ApiError::Unauthorized) => self.expire_session().await,
                    Err(e) => tracing::warn!("Queue replay failed, will retry: {}", e),
                }
            }
        } else if !online && was_online {
            tracing::info!("Working offline");
        }
    }

    /// Probe `/api/health` and update the online flag from the result
    pub async fn probe_connectivity(&self) -> bool {
        let online = match self.inner.api.health().await {
            Ok(health) => {
                tracing::debug!(status = %health.status, "Backend connection successful");
                true
            }
            Err(e) => {
                tracing::warn!("Backend not available: {}", e);
                false
            }
        };
        self.set_online(online).await;
        online
    }

    /// Manual sync: push the local bag, then adopt the server copy if it differs
    pub async fn sync_now(&self) -> Result<Cart, SyncError> {
        let user = self.current_user().ok_or(SyncError::NotAuthenticated)?;
        let _gate = self.inner.sync_gate.lock().await;

        let (cart, revision) = {
            let state = self.inner.state.read();
            (state.cart.clone(), state.revision)
        };
        if let Err(e) = self
            .inner
            .api
            .save_cart(&user.email, &user.token, cart.items())
            .await
        {
            if matches!(e, ApiError::Unauthorized) {
                self.expire_session().await;
            }
            return Err(SyncError::Network(e));
        }
        self.mark_synced(revision);

        // The full push supersedes everything queued for this user
        let snapshot = {
            let mut state = self.inner.state.write();
            state.pending.retain(|op| op.email != user.email);
            state.pending.clone()
        };
        self.persist_pending(&snapshot).await;

        self.pull_server_cart(&user).await?;
        tracing::info!("Manual sync completed");
        Ok(self.cart())
    }

    /// One tick of the background loop: replay the queue, then adopt the
    /// server bag if it differs (last fetch wins). Errors are logged only.
    pub async fn reconcile(&self) {
        if !self.is_online() {
            return;
        }
        let user = match self.current_user() {
            Some(user) => user,
            None => return,
        };
        let _gate = self.inner.sync_gate.lock().await;

        let result = match self.replay_locked().await {
            Ok(_) => self.pull_server_cart(&user).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {}
            Err(ApiError::Unauthorized) => self.expire_session().await,
            Err(e) => tracing::debug!("Sync check failed: {}", e),
        }
    }

    /// Fetch the server bag and replace the local one if their serialized
    /// forms differ and every local change has reached the server. Returns
    /// whether the local bag was replaced.
    async fn pull_server_cart(&self, user: &UserIdentity) -> Result<bool, ApiError> {
        let revision = self.inner.state.read().revision;
        let items = self.inner.api.fetch_cart(&user.email, &user.token).await?;
        let server = Cart::from_items(items);
        let server_json = serde_json::to_string(&server).map_err(|e| ApiError::Parse(e.to_string()))?;

        let adopted = {
            let mut state = self.inner.state.write();
            let same_user = state.user.as_ref().map(|u| u.email.as_str()) == Some(user.email.as_str());
            let local_json = serde_json::to_string(&state.cart).unwrap_or_default();
            if !same_user || state.revision != revision {
                false
            } else if local_json == server_json {
                state.synced_revision = state.revision;
                false
            } else if state.synced_revision == state.revision {
                state.cart = server.clone();
                state.revision += 1;
                state.synced_revision = state.revision;
                true
            } else {
                // A local change is still on its way to the server
                false
            }
        };

        if adopted {
            tracing::info!("Server bag updated, synced locally");
            if let Err(e) = self
                .inner
                .store
                .set(&self.key(keys::CART_ITEMS), &server_json)
                .await
            {
                tracing::warn!("Failed to persist synced bag: {}", e);
            }
            self.emit(StoreEvent::CartUpdate(server));
        }
        Ok(adopted)
    }

    /// Start the background reconciliation loop at the configured cadence
    pub fn start_background_sync(&self) -> SyncWorker {
        let this = self.clone();
        let period = self.inner.config.sync_interval;
        SyncWorker::spawn(period, move || {
            let this = this.clone();
            async move { this.reconcile().await }
        })
    }

    // ---------------------------------------------------------------------
    // Cross-tab propagation
    // ---------------------------------------------------------------------

    /// Listen for changes other tabs make to the shared store and apply them
    pub fn watch_storage(&self) -> StorageWatcher {
        let mut events = self.inner.store.subscribe();
        let this = self.clone();
        StorageWatcher::spawn(async move {
            while let Some(event) = events.recv().await {
                this.apply_storage_event(event).await;
            }
        })
    }

    /// Mirror one foreign storage change into memory and notify subscribers.
    /// No network calls are made.
    pub async fn apply_storage_event(&self, event: StorageEvent) {
        let name = match event.key.strip_prefix(&self.inner.config.key_prefix) {
            Some(name) => name,
            None => return,
        };
        tracing::debug!(key = name, "storage changed in another tab");

        match name {
            keys::SESSION_USER | keys::SESSION_TOKEN => self.reload_session_from_storage().await,
            keys::CART_ITEMS => {
                let cart = match event.new_value.as_deref() {
                    Some(raw) => match serde_json::from_str::<Vec<CartItem>>(raw) {
                        Ok(items) => Cart::from_items(items),
                        Err(e) => {
                            tracing::warn!("Ignoring corrupt bag from another tab: {}", e);
                            Cart::new()
                        }
                    },
                    None => Cart::new(),
                };
                {
                    // The writing tab owns the server save
                    let mut state = self.inner.state.write();
                    state.cart = cart;
                    state.revision += 1;
                    state.synced_revision = state.revision;
                }
                self.emit(StoreEvent::CartUpdate(self.cart()));
            }
            keys::CART_OWNER => {
                self.inner.state.write().cart_owner =
                    event.new_value.filter(|owner| !owner.is_empty());
            }
            keys::WISHLIST_ITEMS => {
                let wishlist = event
                    .new_value
                    .as_deref()
                    .and_then(|raw| serde_json::from_str::<Wishlist>(raw).ok())
                    .unwrap_or_default();
                self.inner.state.write().wishlist = wishlist;
            }
            _ => {}
        }
    }

    async fn reload_session_from_storage(&self) {
        let stored = match self.load_user().await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!("Failed to read session from storage: {}", e);
                return;
            }
        };
        let previous = {
            let mut state = self.inner.state.write();
            if state.user == stored {
                return;
            }
            let previous = std::mem::replace(&mut state.user, stored.clone());
            if stored.is_none() {
                state.cart.clear();
                state.pending.clear();
                state.wishlist = Wishlist::default();
                state.cart_owner = None;
                state.revision += 1;
                state.synced_revision = state.revision;
            }
            previous
        };

        match stored {
            Some(user) => self.emit(StoreEvent::UserUpdate(Some(user))),
            None => {
                if previous.is_some() {
                    self.emit(StoreEvent::SignOut);
                }
                self.emit(StoreEvent::UserUpdate(None));
                self.emit(StoreEvent::CartUpdate(Cart::new()));
            }
        }
    }

    // ---------------------------------------------------------------------
    // Wishlist, catalog and orders
    // ---------------------------------------------------------------------

    /// Save or unsave a product. Returns whether it is now in the wishlist.
    pub async fn toggle_wishlist(&self, entry: WishlistEntry) -> Result<bool, StoreError> {
        let (saved, wishlist) = {
            let mut state = self.inner.state.write();
            let saved = state.wishlist.toggle(entry);
            (saved, state.wishlist.clone())
        };
        self.write_json(keys::WISHLIST_ITEMS, &wishlist).await?;
        Ok(saved)
    }

    /// Fetch the catalog, caching it locally; falls back to the cache when
    /// the server is unreachable
    pub async fn fetch_products(&self) -> Result<Vec<Product>, ApiError> {
        match self.inner.api.fetch_products().await {
            Ok(products) => {
                tracing::debug!("Products loaded from backend: {}", products.len());
                if let Err(e) = self.write_json(keys::CATALOG_PRODUCTS, &products).await {
                    tracing::warn!("Failed to cache products: {}", e);
                }
                Ok(products)
            }
            Err(e) => {
                tracing::warn!("Failed to load products from backend: {}", e);
                let raw = self
                    .inner
                    .store
                    .get(&self.key(keys::CATALOG_PRODUCTS))
                    .await
                    .ok()
                    .flatten();
                match raw.and_then(|raw| serde_json::from_str::<Vec<Product>>(&raw).ok()) {
                    Some(cached) => {
                        tracing::info!("Using cached products: {}", cached.len());
                        Ok(cached)
                    }
                    None => Err(e),
                }
            }
        }
    }

    pub async fn add_product(&self, draft: &ProductDraft) -> Result<Product, ApiError> {
        let product = self.inner.api.add_product(draft).await?;
        tracing::info!("Product {} added", product.id);
        Ok(product)
    }

    /// Check out the current bag. The bag is cleared once the server accepts
    /// the order.
    pub async fn submit_order(
        &self,
        shipping_details: serde_json::Value,
    ) -> Result<OrderReceipt, CartError> {
        let (token, order) = {
            let state = self.inner.state.read();
            let user = state.user.as_ref().ok_or(CartError::NotAuthenticated)?;
            (user.token.clone(), OrderDraft::from_cart(&state.cart, shipping_details))
        };

        let receipt = self.inner.api.submit_order(&token, &order).await?;
        tracing::info!("Order {} submitted", receipt.order_id);
        self.clear_cart().await?;
        Ok(receipt)
    }

    // ---------------------------------------------------------------------
    // Persistence helpers
    // ---------------------------------------------------------------------

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.inner.config.key_prefix, name)
    }

    fn current_user(&self) -> Option<UserIdentity> {
        self.inner.state.read().user.clone()
    }

    async fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.inner.store.set(&self.key(name), &raw).await
    }

    /// Read a JSON value; a missing key yields the default, a corrupt one is
    /// logged, overwritten with the default and yields the default
    async fn load_or_reset<T>(&self, name: &str) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let raw = match self.inner.store.get(&self.key(name)).await? {
            Some(raw) => raw,
            None => return Ok(T::default()),
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(key = name, "Resetting corrupt persisted state: {}", e);
                let value = T::default();
                self.write_json(name, &value).await?;
                Ok(value)
            }
        }
    }

    /// Session from storage: needs both a parseable user and a token
    async fn load_user(&self) -> Result<Option<UserIdentity>, StoreError> {
        let raw_user = self.inner.store.get(&self.key(keys::SESSION_USER)).await?;
        let token = self.inner.store.get(&self.key(keys::SESSION_TOKEN)).await?;
        let (raw_user, token) = match (raw_user, token) {
            (Some(raw_user), Some(token)) if !token.is_empty() => (raw_user, token),
            _ => return Ok(None),
        };
        match serde_json::from_str::<UserProfile>(&raw_user) {
            Ok(profile) => Ok(Some(UserIdentity::from_profile(profile, token))),
            Err(e) => {
                tracing::warn!("Discarding corrupt stored user: {}", e);
                Ok(None)
            }
        }
    }

    async fn persist_cart(&self, cart: &Cart) {
        if let Err(e) = self.write_json(keys::CART_ITEMS, cart).await {
            tracing::warn!("Failed to persist bag: {}", e);
        }
    }

    async fn persist_pending(&self, pending: &[PendingOperation]) {
        if let Err(e) = self.write_json(keys::PENDING_QUEUE, pending).await {
            tracing::warn!("Failed to persist sync queue: {}", e);
        }
    }

    async fn remove_keys(&self, names: &[&str]) {
        for name in names {
            if let Err(e) = self.inner.store.remove(&self.key(name)).await {
                tracing::warn!(key = *name, "Failed to clear persisted state: {}", e);
            }
        }
    }
}

impl<S: StateStore, A: RemoteApi> std::fmt::Debug for ClientSessionStore<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("ClientSessionStore")
            .field("user", &state.user)
            .field("cart_lines", &state.cart.len())
            .field("pending", &state.pending.len())
            .field("online", &self.is_online())
            .finish()
    }
}
