mod common;

use chrono::{TimeZone, Utc};
use common::*;
use thriftease_session::clock::ManualClock;
use thriftease_session::model::PendingKind;
use thriftease_session::{ClientSessionStore, MemoryStore, StateStore};

#[tokio::test]
async fn reload_reconstructs_identical_cart() {
    let store = MemoryStore::new();
    let api = FakeApi::new();
    let client = signed_in(store.clone(), api.clone(), config()).await;
    client.add_item(shirt().with_image("/img/shirt.jpg"), 3).await.unwrap();
    client.add_item(hat(), 1).await.unwrap();
    let before = client.cart();
    settle().await;
    drop(client);

    // Page refresh: same storage, fresh client, server unreachable
    api.fail_all(Failure::Offline);
    let reloaded = ClientSessionStore::open(store, api, config()).await.unwrap();

    assert!(reloaded.session().is_authenticated);
    assert_eq!(reloaded.session().email(), Some(EMAIL));
    assert_eq!(reloaded.cart(), before);
}

#[tokio::test]
async fn corrupt_cart_blob_loads_as_empty_and_is_overwritten() {
    let store = MemoryStore::new();
    let client = signed_in(store.clone(), FakeApi::new(), config()).await;
    drop(client);

    store.insert_raw("test:cart.items", "{\"id\": oops");
    let reloaded = ClientSessionStore::open(store.clone(), FakeApi::new(), config())
        .await
        .unwrap();

    assert!(reloaded.session().is_authenticated);
    assert!(reloaded.cart().is_empty());
    assert_eq!(store.get("test:cart.items").await.unwrap().as_deref(), Some("[]"));
}

#[tokio::test]
async fn corrupt_user_blob_means_signed_out() {
    let store = MemoryStore::new();
    store.insert_raw("test:session.user", "not json");
    store.insert_raw("test:session.token", "token_x");

    let client = ClientSessionStore::open(store.clone(), FakeApi::new(), config())
        .await
        .unwrap();

    assert!(!client.session().is_authenticated);
    assert!(store.get("test:session.token").await.unwrap().is_none());
}

#[tokio::test]
async fn pending_queue_survives_reload_with_timestamps() {
    let store = MemoryStore::new();
    let api = FakeApi::new();
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let clock = ManualClock::new(start);

    let client = ClientSessionStore::with_clock(store.clone(), api.clone(), config(), clock.clone());
    client.sign_in(EMAIL, PASSWORD).await.unwrap();
    client.set_online(false).await;
    client.add_item(shirt(), 1).await.unwrap();
    clock.advance(chrono::Duration::seconds(30));
    client.add_item(hat(), 1).await.unwrap();
    drop(client);

    let reloaded = ClientSessionStore::open(store, api.clone(), config()).await.unwrap();
    let pending = reloaded.pending_operations();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].kind, PendingKind::SaveCart);
    assert_eq!(pending[0].email, EMAIL);
    assert_eq!(pending[0].enqueued_at, start);
    assert_eq!(pending[1].enqueued_at, start + chrono::Duration::seconds(30));
    assert_eq!(pending[1].payload.len(), 2);

    reloaded.reconcile().await;
    assert!(reloaded.pending_operations().is_empty());
    assert_eq!(api.server_bag(EMAIL).len(), 2);
}
