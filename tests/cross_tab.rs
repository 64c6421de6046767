mod common;

use common::*;
use std::time::Duration;
use thriftease_session::store::StorageEvent;
use thriftease_session::{Cart, ClientSessionStore, EventType, MemoryStore, StoreEvent};
use tokio::sync::mpsc;

async fn two_tabs(api: FakeApi) -> (Client, Client) {
    let config = config().with_sync_on_mutation(false);
    let store_a = MemoryStore::new();
    let store_b = store_a.open_tab();
    let tab_a = signed_in(store_a, api.clone(), config.clone()).await;
    let tab_b = ClientSessionStore::open(store_b, api, config).await.unwrap();
    (tab_a, tab_b)
}

#[tokio::test]
async fn cart_change_in_one_tab_reaches_the_other_without_network() {
    let api = FakeApi::new();
    let (tab_a, tab_b) = two_tabs(api.clone()).await;
    assert!(tab_b.session().is_authenticated);

    let (tx, mut rx) = mpsc::unbounded_channel::<Cart>();
    tab_b.on_change(EventType::CartUpdate, move |event| {
        if let StoreEvent::CartUpdate(cart) = event {
            let _ = tx.send(cart.clone());
        }
    });
    let _watcher = tab_b.watch_storage();

    let calls_before = api.calls();
    let cart = tab_a.add_item(shirt(), 2).await.unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("tab B notified")
        .expect("channel open");
    assert_eq!(seen, cart);
    assert_eq!(tab_b.cart(), cart);
    assert_eq!(api.calls(), calls_before);
}

#[tokio::test]
async fn sign_out_in_one_tab_signs_out_the_other() {
    let (tab_a, tab_b) = two_tabs(FakeApi::new()).await;
    tab_a.add_item(shirt(), 1).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    tab_b.on_change(EventType::SignOut, move |_| {
        let _ = tx.send(());
    });
    let _watcher = tab_b.watch_storage();

    tab_a.sign_out().await;

    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("tab B signed out")
        .expect("channel open");
    assert!(!tab_b.session().is_authenticated);
    assert!(tab_b.cart().is_empty());
}

#[tokio::test]
async fn sign_in_in_one_tab_is_picked_up_by_the_other() {
    let store_a = MemoryStore::new();
    let store_b = store_a.open_tab();
    let api = FakeApi::new();
    let tab_b = ClientSessionStore::open(store_b, api.clone(), config()).await.unwrap();
    let tab_a = ClientSessionStore::open(store_a, api, config()).await.unwrap();
    assert!(!tab_b.session().is_authenticated);

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tab_b.on_change(EventType::UserUpdate, move |event| {
        if let StoreEvent::UserUpdate(Some(user)) = event {
            let _ = tx.send(user.email.clone());
        }
    });
    let _watcher = tab_b.watch_storage();

    tab_a.sign_in(EMAIL, PASSWORD).await.unwrap();

    let email = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("tab B notified")
        .expect("channel open");
    assert_eq!(email, EMAIL);
    assert!(tab_b.session().is_authenticated);
}

#[tokio::test]
async fn corrupt_foreign_cart_reads_as_empty() {
    let (_tab_a, tab_b) = two_tabs(FakeApi::new()).await;

    tab_b
        .apply_storage_event(StorageEvent {
            key: "test:cart.items".to_string(),
            new_value: Some("[{broken".to_string()),
        })
        .await;
    assert!(tab_b.cart().is_empty());

    // Keys outside the namespace are ignored
    tab_b
        .apply_storage_event(StorageEvent {
            key: "other:session.token".to_string(),
            new_value: None,
        })
        .await;
    assert!(tab_b.session().is_authenticated);
}
