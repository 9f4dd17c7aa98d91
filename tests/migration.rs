//! Guest-to-user migration and swap protocol scenarios.

use std::sync::Arc;

use trolley::{
    BroadcastSink, CartConfig, CartEvent, CartItem, CartManager, CartStorage, MemoryStorage,
};

fn manager_with(config: CartConfig) -> CartManager {
    init_tracing();
    CartManager::new(Arc::new(MemoryStorage::new()), config)
}

/// Run with `RUST_LOG=trolley=debug` to see engine logs in test output.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn seed(manager: &CartManager, identifier: &str, lines: &[(&str, u32)]) {
    let cart = manager.cart(identifier);
    for (id, qty) in lines {
        cart.add(CartItem::new(*id, id.to_uppercase(), 1000, *qty).unwrap())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn add_quantities_merges_matching_lines() -> anyhow::Result<()> {
    let manager = manager_with(CartConfig::default());
    seed(&manager, "guest", &[("sku-1", 2)]).await;
    seed(&manager, "user", &[("sku-1", 3)]).await;

    assert!(manager.migration().migrate("guest", "user", "default").await?);

    let user = manager.cart("user");
    let line = user.get_item("sku-1").await?.unwrap();
    assert_eq!(line.quantity(), 5);
    assert!(!manager.cart("guest").exists().await?);
    Ok(())
}

#[tokio::test]
async fn empty_source_never_overwrites() -> anyhow::Result<()> {
    let manager = manager_with(CartConfig::default());
    seed(&manager, "user", &[("sku-1", 3)]).await;

    // no guest record at all
    assert!(!manager.migration().migrate("guest", "user", "default").await?);

    // a guest record that exists but holds nothing
    let storage = MemoryStorage::new();
    storage.put_items("guest", "default", vec![], None).await?;
    let manager2 = CartManager::new(Arc::new(storage), CartConfig::default());
    seed(&manager2, "user", &[("sku-1", 3)]).await;
    assert!(!manager2.migration().migrate("guest", "user", "default").await?);

    let line = manager2.cart("user").get_item("sku-1").await?.unwrap();
    assert_eq!(line.quantity(), 3);
    Ok(())
}

#[tokio::test]
async fn merge_strategies_differ_on_conflicts() -> anyhow::Result<()> {
    for (strategy, expected) in [
        ("add_quantities", 5),
        ("keep_highest_quantity", 3),
        ("keep_user_cart", 3),
        ("replace_with_guest", 2),
    ] {
        let config = CartConfig {
            merge_strategy: strategy.to_string(),
            ..CartConfig::default()
        };
        let manager = manager_with(config);
        seed(&manager, "guest", &[("sku-1", 2), ("sku-2", 1)]).await;
        seed(&manager, "user", &[("sku-1", 3)]).await;

        assert!(manager.migration().migrate("guest", "user", "default").await?);

        let user = manager.cart("user");
        let line = user.get_item("sku-1").await?.unwrap();
        assert_eq!(line.quantity(), expected, "strategy {strategy}");
        // non-matching source items are always carried over
        assert!(user.get_item("sku-2").await?.is_some(), "strategy {strategy}");
    }
    Ok(())
}

#[tokio::test]
async fn unrecognized_strategy_falls_back_to_add_quantities() -> anyhow::Result<()> {
    let config = CartConfig {
        merge_strategy: "take_the_best".to_string(),
        ..CartConfig::default()
    };
    let manager = manager_with(config);
    seed(&manager, "guest", &[("sku-1", 2)]).await;
    seed(&manager, "user", &[("sku-1", 3)]).await;

    assert!(manager.migration().migrate("guest", "user", "default").await?);
    let line = manager.cart("user").get_item("sku-1").await?.unwrap();
    assert_eq!(line.quantity(), 5);
    Ok(())
}

#[tokio::test]
async fn swap_transfers_even_empty_source() -> anyhow::Result<()> {
    let storage = Arc::new(MemoryStorage::new());
    // a record with zero items, distinct from "no record"
    storage.put_items("guest", "default", vec![], None).await?;
    let manager = CartManager::new(storage, CartConfig::default());

    assert!(manager.migration().swap("guest", "user", "default").await?);
    assert!(manager.cart("user").exists().await?);
    assert!(!manager.cart("guest").exists().await?);
    Ok(())
}

#[tokio::test]
async fn swap_returns_false_only_for_missing_source() -> anyhow::Result<()> {
    let manager = manager_with(CartConfig::default());
    assert!(!manager.migration().swap("ghost", "user", "default").await?);
    Ok(())
}

#[tokio::test]
async fn failed_swap_never_destroys_target() -> anyhow::Result<()> {
    // the guest record is gone by the time swap runs, as when a second
    // device's login already migrated it; the user cart must survive
    let manager = manager_with(CartConfig::default());
    seed(&manager, "user", &[("sku-1", 3)]).await;

    assert!(!manager.migration().swap("guest", "user", "default").await?);

    let line = manager.cart("user").get_item("sku-1").await?.unwrap();
    assert_eq!(line.quantity(), 3);
    Ok(())
}

#[tokio::test]
async fn swap_discards_target_content() -> anyhow::Result<()> {
    let manager = manager_with(CartConfig::default());
    seed(&manager, "guest", &[("sku-9", 1)]).await;
    seed(&manager, "user", &[("sku-1", 3)]).await;

    assert!(manager.migration().swap("guest", "user", "default").await?);

    let user = manager.cart("user");
    assert!(user.get_item("sku-1").await?.is_none());
    assert_eq!(user.get_item("sku-9").await?.unwrap().quantity(), 1);
    Ok(())
}

#[tokio::test]
async fn swap_guest_cart_to_user_formats_identifier() -> anyhow::Result<()> {
    let manager = manager_with(CartConfig::default());
    seed(&manager, "session-abc", &[("sku-1", 1)]).await;

    assert!(
        manager
            .migration()
            .swap_guest_cart_to_user("42", "default", "session-abc")
            .await?
    );
    assert!(manager.cart("user-42").exists().await?);
    Ok(())
}

#[tokio::test]
async fn handle_login_honors_auto_migrate_flag() -> anyhow::Result<()> {
    let manager = manager_with(CartConfig {
        auto_migrate_on_login: false,
        ..CartConfig::default()
    });
    seed(&manager, "session-abc", &[("sku-1", 1)]).await;
    assert!(!manager.migration().handle_login("session-abc", "42").await?);
    assert!(manager.cart("session-abc").exists().await?);

    let manager = manager_with(CartConfig::default());
    seed(&manager, "session-abc", &[("sku-1", 1)]).await;
    assert!(manager.migration().handle_login("session-abc", "42").await?);
    assert!(manager.cart("user-42").exists().await?);
    assert!(!manager.cart("session-abc").exists().await?);
    Ok(())
}

#[tokio::test]
async fn merged_event_carries_counts() -> anyhow::Result<()> {
    let sink = Arc::new(BroadcastSink::new(64));
    let mut rx = sink.subscribe();
    let manager = CartManager::new(Arc::new(MemoryStorage::new()), CartConfig::default())
        .with_events(sink);
    seed(&manager, "guest", &[("sku-1", 2), ("sku-2", 1)]).await;
    seed(&manager, "user", &[("sku-1", 3)]).await;

    manager.migration().migrate("guest", "user", "default").await?;

    let mut merged = None;
    while let Ok(event) = rx.try_recv() {
        if let CartEvent::Merged {
            items_merged,
            conditions_merged,
            source,
            target,
            ..
        } = event
        {
            merged = Some((items_merged, conditions_merged, source, target));
        }
    }
    let (items_merged, conditions_merged, source, target) = merged.expect("no Merged event");
    assert_eq!(items_merged, 2);
    assert_eq!(conditions_merged, 0);
    assert_eq!(source, "guest");
    assert_eq!(target, "user");
    Ok(())
}
