mod common;

use common::*;
use rust_decimal::Decimal;
use serde_json::json;
use thriftease_session::api::{Product, ProductDraft};
use thriftease_session::{
    ApiError, CartError, ClientSessionStore, MemoryStore, ProductId, StateStore, WishlistEntry,
};

fn product(id: i64, name: &str, price: Decimal) -> Product {
    Product {
        id: id.into(),
        name: name.to_string(),
        price,
        category: "tops".to_string(),
        extra: Default::default(),
    }
}

#[tokio::test]
async fn products_are_cached_and_served_when_offline() {
    let store = MemoryStore::new();
    let api = FakeApi::new();
    let catalog = vec![
        product(1, "Shirt", Decimal::from(10)),
        product(2, "Jacket", Decimal::from(45)),
    ];
    api.set_products(catalog.clone());
    let client = ClientSessionStore::open(store.clone(), api.clone(), config())
        .await
        .unwrap();

    assert_eq!(client.fetch_products().await.unwrap(), catalog);
    assert!(store.get("test:catalog.products").await.unwrap().is_some());

    api.fail_all(Failure::Offline);
    assert_eq!(client.fetch_products().await.unwrap(), catalog);
}

#[tokio::test]
async fn products_fail_without_cache() {
    let api = FakeApi::new();
    api.fail_all(Failure::Timeout);
    let client = ClientSessionStore::open(MemoryStore::new(), api, config())
        .await
        .unwrap();

    assert!(matches!(client.fetch_products().await, Err(ApiError::Timeout)));
}

#[tokio::test]
async fn added_product_shows_up_in_catalog() {
    let api = FakeApi::new();
    let client = ClientSessionStore::open(MemoryStore::new(), api, config())
        .await
        .unwrap();

    let draft = ProductDraft {
        name: "Scarf".to_string(),
        price: Decimal::new(1250, 2),
        category: "accessories".to_string(),
        extra: Default::default(),
    };
    let created = client.add_product(&draft).await.unwrap();
    assert_eq!(created.name, "Scarf");

    let catalog = client.fetch_products().await.unwrap();
    assert_eq!(catalog, vec![created]);
}

#[tokio::test]
async fn order_submits_bag_and_clears_it() {
    let api = FakeApi::new();
    let client = signed_in(MemoryStore::new(), api.clone(), config()).await;
    client.add_item(shirt(), 2).await.unwrap();
    client.add_item(hat(), 1).await.unwrap();

    let receipt = client
        .submit_order(json!({"name": "Ann", "city": "Leeds"}))
        .await
        .unwrap();
    assert_eq!(receipt.order_id, "ORD-000001");

    let orders = api.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].items.len(), 2);
    assert_eq!(orders[0].total, Decimal::new(2450, 2));
    assert_eq!(orders[0].shipping_details["city"], "Leeds");

    assert!(client.cart().is_empty());
    settle().await;
    assert!(api.server_bag(EMAIL).is_empty());
}

#[tokio::test]
async fn order_requires_session() {
    let api = FakeApi::new();
    let client = ClientSessionStore::open(MemoryStore::new(), api.clone(), config())
        .await
        .unwrap();

    assert!(matches!(
        client.submit_order(json!({})).await,
        Err(CartError::NotAuthenticated)
    ));
    assert!(api.orders().is_empty());
}

#[tokio::test]
async fn wishlist_persists_and_clears_on_sign_out() {
    let store = MemoryStore::new();
    let client = signed_in(store.clone(), FakeApi::new(), config()).await;

    assert!(client.toggle_wishlist(WishlistEntry::new(1, "Shirt")).await.unwrap());
    assert!(client.toggle_wishlist(WishlistEntry::new("hat-7", "Hat")).await.unwrap());
    assert!(!client.toggle_wishlist(WishlistEntry::new(1, "Shirt")).await.unwrap());

    let wishlist = client.wishlist();
    assert_eq!(wishlist.len(), 1);
    assert!(wishlist.contains(&ProductId::from("hat-7")));

    let reloaded = ClientSessionStore::open(store.clone(), FakeApi::new(), config())
        .await
        .unwrap();
    assert_eq!(reloaded.wishlist(), wishlist);

    client.sign_out().await;
    assert!(client.wishlist().is_empty());
    assert!(store.get("test:wishlist.items").await.unwrap().is_none());
}

#[tokio::test]
async fn connectivity_probe_drives_online_flag() {
    let api = FakeApi::new();
    let client = signed_in(MemoryStore::new(), api.clone(), config()).await;

    api.fail_all(Failure::Offline);
    assert!(!client.probe_connectivity().await);
    assert!(!client.is_online());

    client.add_item(shirt(), 1).await.unwrap();
    assert_eq!(client.pending_operations().len(), 1);

    api.recover();
    assert!(client.probe_connectivity().await);
    assert!(client.is_online());
    assert!(client.pending_operations().is_empty());
    assert_eq!(api.server_bag(EMAIL), vec![shirt()]);
}
