//! Backend contract tests: the same observable semantics must hold for
//! every storage implementation, so the suite runs against each in turn.

use std::sync::Arc;

use trolley::{
    CacheStorage, CartError, CartItem, CartStorage, LocalCache, MemoryStorage,
};

fn backends() -> Vec<(&'static str, Arc<dyn CartStorage>)> {
    vec![
        ("memory", Arc::new(MemoryStorage::new())),
        ("cache", Arc::new(CacheStorage::new(LocalCache::new()))),
    ]
}

fn item(id: &str, qty: u32) -> CartItem {
    CartItem::new(id, id.to_uppercase(), 1000, qty).unwrap()
}

#[tokio::test]
async fn version_advances_per_write() -> anyhow::Result<()> {
    for (name, storage) in backends() {
        let v1 = storage.put_items("u1", "default", vec![item("a", 1)], None).await?;
        assert_eq!(v1, 1, "{name}");
        let v2 = storage
            .put_conditions("u1", "default", vec![], Some(v1))
            .await?;
        assert_eq!(v2, 2, "{name}");
        assert_eq!(storage.get_version("u1", "default").await?, Some(2), "{name}");
        assert_eq!(storage.get_version("u1", "wishlist").await?, None, "{name}");
    }
    Ok(())
}

#[tokio::test]
async fn stale_writer_gets_conflict() -> anyhow::Result<()> {
    for (name, storage) in backends() {
        let v1 = storage.put_items("u1", "default", vec![item("a", 1)], None).await?;
        // a second writer moves the record forward
        storage
            .put_items("u1", "default", vec![item("a", 2)], Some(v1))
            .await?;
        // the first writer retries with its stale version
        let err = storage
            .put_items("u1", "default", vec![item("a", 9)], Some(v1))
            .await
            .unwrap_err();
        assert!(
            matches!(err, CartError::ConcurrencyConflict { .. }),
            "{name}: {err}"
        );
        assert!(err.is_retryable(), "{name}");
        // the losing write must not have landed
        let items = storage.get_items("u1", "default").await?;
        assert_eq!(items[0].quantity(), 2, "{name}");
    }
    Ok(())
}

#[tokio::test]
async fn create_races_conflict_too() -> anyhow::Result<()> {
    for (name, storage) in backends() {
        storage.put_items("u1", "default", vec![], None).await?;
        let err = storage
            .put_items("u1", "default", vec![], None)
            .await
            .unwrap_err();
        assert!(
            matches!(err, CartError::ConcurrencyConflict { .. }),
            "{name}: {err}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn put_both_replaces_items_and_conditions_together() -> anyhow::Result<()> {
    use trolley::{Condition, ConditionType, Target};
    for (name, storage) in backends() {
        let v1 = storage.put_items("u1", "default", vec![item("a", 1)], None).await?;
        let vat = Condition::new("vat", ConditionType::Tax, Target::Total, "6%", 1).unwrap();
        storage
            .put_both("u1", "default", vec![item("b", 2)], vec![vat.clone()], Some(v1))
            .await?;
        let record = storage.load("u1", "default").await?.unwrap();
        assert_eq!(record.state.items()[0].id(), "b", "{name}");
        assert_eq!(record.state.conditions(), &[vat], "{name}");
    }
    Ok(())
}

#[tokio::test]
async fn metadata_writes() -> anyhow::Result<()> {
    for (name, storage) in backends() {
        let v1 = storage
            .put_metadata("u1", "default", "vip", serde_json::Value::Bool(true), None)
            .await?;
        let v2 = storage
            .put_metadata(
                "u1",
                "default",
                "note",
                serde_json::Value::String("gift".into()),
                Some(v1),
            )
            .await?;
        let metadata = storage.get_metadata("u1", "default").await?;
        assert_eq!(metadata.len(), 2, "{name}");

        // batch write replaces the whole document
        storage
            .put_metadata_batch("u1", "default", Default::default(), Some(v2))
            .await?;
        assert!(storage.get_metadata("u1", "default").await?.is_empty(), "{name}");
    }
    Ok(())
}

#[tokio::test]
async fn forget_and_instances() -> anyhow::Result<()> {
    for (name, storage) in backends() {
        storage.put_items("u1", "default", vec![], None).await?;
        storage.put_items("u1", "wishlist", vec![], None).await?;
        storage.put_items("u2", "default", vec![], None).await?;

        assert_eq!(
            storage.get_instances("u1").await?,
            vec!["default".to_string(), "wishlist".to_string()],
            "{name}"
        );

        assert!(storage.forget("u1", "wishlist").await?, "{name}");
        assert!(!storage.forget("u1", "wishlist").await?, "{name}");
        assert_eq!(storage.forget_identifier("u1").await?, 1, "{name}");
        assert!(storage.get_instances("u1").await?.is_empty(), "{name}");
        assert!(storage.has("u2", "default").await?, "{name}");
    }
    Ok(())
}

#[tokio::test]
async fn swap_identifier_contract() -> anyhow::Result<()> {
    for (name, storage) in backends() {
        // missing source
        assert!(!storage.swap_identifier("ghost", "user", "default").await?, "{name}");

        // plain relabel
        storage.put_items("guest", "default", vec![item("a", 1)], None).await?;
        assert!(storage.swap_identifier("guest", "user", "default").await?, "{name}");
        assert!(!storage.has("guest", "default").await?, "{name}");
        let record = storage.load("user", "default").await?.unwrap();
        assert_eq!(record.identifier, "user", "{name}");

        // occupied destination is replaced outright
        storage.put_items("guest2", "default", vec![item("b", 9)], None).await?;
        assert!(
            storage.swap_identifier("guest2", "user", "default").await?,
            "{name}"
        );
        assert!(!storage.has("guest2", "default").await?, "{name}");
        let record = storage.load("user", "default").await?.unwrap();
        assert_eq!(record.state.items()[0].id(), "b", "{name}");

        // missing source must not disturb the destination
        assert!(!storage.swap_identifier("ghost", "user", "default").await?, "{name}");
        assert!(storage.has("user", "default").await?, "{name}");
    }
    Ok(())
}

/// Cache client that is down: every call times out.
struct UnreachableCache;

#[async_trait::async_trait]
impl trolley::CacheBackend for UnreachableCache {
    async fn get(&self, _key: &str) -> trolley::Result<Option<(Vec<u8>, u64)>> {
        Err(CartError::StorageUnavailable("cache timed out".into()))
    }

    async fn compare_and_put(
        &self,
        _key: &str,
        _payload: Vec<u8>,
        _expected: Option<u64>,
    ) -> trolley::Result<Option<u64>> {
        Err(CartError::StorageUnavailable("cache timed out".into()))
    }

    async fn delete(&self, _key: &str) -> trolley::Result<bool> {
        Err(CartError::StorageUnavailable("cache timed out".into()))
    }

    async fn scan_prefix(&self, _prefix: &str) -> trolley::Result<Vec<String>> {
        Err(CartError::StorageUnavailable("cache timed out".into()))
    }
}

#[tokio::test]
async fn backend_outage_surfaces_as_storage_unavailable() {
    let storage = CacheStorage::new(UnreachableCache);

    let err = storage.load("u1", "default").await.unwrap_err();
    assert!(matches!(err, CartError::StorageUnavailable(_)));
    assert!(err.is_retryable());

    // distinguishable from a version conflict on the write path too
    let err = storage
        .put_items("u1", "default", vec![item("a", 1)], None)
        .await
        .unwrap_err();
    assert!(matches!(err, CartError::StorageUnavailable(_)));
    assert!(!matches!(err, CartError::ConcurrencyConflict { .. }));
}

#[tokio::test]
async fn other_instances_survive_swap() -> anyhow::Result<()> {
    for (name, storage) in backends() {
        storage.put_items("guest", "default", vec![item("a", 1)], None).await?;
        storage.put_items("guest", "wishlist", vec![item("b", 1)], None).await?;
        assert!(storage.swap_identifier("guest", "user", "default").await?, "{name}");
        // swap is per-instance; the wishlist stays behind
        assert!(storage.has("guest", "wishlist").await?, "{name}");
        assert!(!storage.has("user", "wishlist").await?, "{name}");
    }
    Ok(())
}
