/// Cache tests
///
/// Read-through caching and tag invalidation, immediate or deferred to commit.
/// Run with: cargo test --test cache_tests
mod common;

use std::sync::Arc;

use common::{Service, service, setup};
use docdelta::cache::{CacheConfig, CachedRepository, LruResourceCache};

async fn cached_setup(config: CacheConfig) -> (Arc<LruResourceCache>, CachedRepository<Service>) {
    let (_, repo) = setup().await;
    let cache = Arc::new(LruResourceCache::new(config.capacity));
    let cached = CachedRepository::new(repo, cache.clone(), config);
    (cache, cached)
}

fn id_key(entity: &Service) -> String {
    format!("Service:{}", entity.id)
}

#[tokio::test]
async fn test_find_by_id_reads_through() {
    let (cache, repo) = cached_setup(CacheConfig::default()).await;
    let entity = repo.create(&service("whatsapp")).await.unwrap();

    let first = repo.find_by_id(entity.id).await.unwrap();
    assert!(cache.contains(&id_key(&entity)).unwrap());
    let second = repo.find_by_id(entity.id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(cache.misses(), 1);
    assert_eq!(cache.hits(), 1);
}

#[tokio::test]
async fn test_write_without_transaction_invalidates_immediately() {
    let (cache, repo) = cached_setup(CacheConfig::default()).await;
    let mut entity = repo.create(&service("whatsapp")).await.unwrap();
    repo.find_by_id(entity.id).await.unwrap();

    repo.update_in_place(&mut entity, |s| s.priority = 7)
        .await
        .unwrap();
    assert!(!cache.contains(&id_key(&entity)).unwrap());
    assert_eq!(repo.find_by_id(entity.id).await.unwrap().priority, 7);
}

#[tokio::test]
async fn test_uncached_write_leaves_stale_entry() {
    let (_, repo) = cached_setup(CacheConfig::default()).await;
    let mut entity = repo.create(&service("whatsapp")).await.unwrap();
    repo.find_by_id(entity.id).await.unwrap();

    repo.repository()
        .update_in_place(&mut entity, |s| s.priority = 7)
        .await
        .unwrap();
    assert_eq!(repo.find_by_id(entity.id).await.unwrap().priority, 1);
}

#[tokio::test]
async fn test_invalidation_waits_for_commit() {
    let (cache, repo) = cached_setup(CacheConfig::default()).await;
    let entity = repo.create(&service("whatsapp")).await.unwrap();
    repo.find_by_id(entity.id).await.unwrap();

    let tx = repo.begin_transaction().await.unwrap();
    let tx_repo = repo.with_tx(&tx);
    let mut loaded = tx_repo.find_by_id(entity.id).await.unwrap();
    tx_repo
        .update_by_id_in_place(entity.id, &mut loaded, |s| s.name = "telegram".into())
        .await
        .unwrap();

    assert_eq!(tx.pending_deferred(), 1);
    assert!(cache.contains(&id_key(&entity)).unwrap());

    tx.commit().await.unwrap();
    assert!(!cache.contains(&id_key(&entity)).unwrap());
    assert_eq!(repo.find_by_id(entity.id).await.unwrap().name, "telegram");
}

#[tokio::test]
async fn test_rollback_keeps_cache_entries() {
    let (cache, repo) = cached_setup(CacheConfig::default()).await;
    let entity = repo.create(&service("whatsapp")).await.unwrap();
    repo.find_by_id(entity.id).await.unwrap();

    let tx = repo.begin_transaction().await.unwrap();
    repo.with_tx(&tx).delete_by_id(entity.id).await.unwrap();
    tx.rollback().await.unwrap();

    assert!(cache.contains(&id_key(&entity)).unwrap());
    assert!(repo.find_by_id(entity.id).await.is_ok());
}

#[tokio::test]
async fn test_reads_inside_transaction_bypass_cache() {
    let (cache, repo) = cached_setup(CacheConfig::default()).await;
    let entity = repo.create(&service("whatsapp")).await.unwrap();

    let tx = repo.begin_transaction().await.unwrap();
    repo.with_tx(&tx).find_by_id(entity.id).await.unwrap();

    assert!(cache.is_empty().unwrap());
    assert_eq!(tx.baseline().len(), 1);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_list_is_invalidated_by_create() {
    let (cache, repo) = cached_setup(CacheConfig::default()).await;
    repo.create(&service("a")).await.unwrap();

    assert_eq!(repo.find_all().await.unwrap().len(), 1);
    assert!(cache.contains("Service:list").unwrap());

    repo.create(&service("b")).await.unwrap();
    assert!(!cache.contains("Service:list").unwrap());
    assert_eq!(repo.find_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_entity_write_drops_cached_list() {
    let (cache, repo) = cached_setup(CacheConfig::default()).await;
    let entity = repo.create(&service("a")).await.unwrap();
    repo.find_all().await.unwrap();

    repo.delete_by_id(entity.id).await.unwrap();
    assert!(!cache.contains("Service:list").unwrap());
    assert!(repo.find_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_prefix_and_disabled_cache() {
    let (cache, repo) = cached_setup(CacheConfig::new().resource_prefix("v2")).await;
    let entity = repo.create(&service("whatsapp")).await.unwrap();
    repo.find_by_id(entity.id).await.unwrap();
    assert!(cache.contains(&format!("v2:{}", id_key(&entity))).unwrap());
    assert_eq!(repo.tag("list"), "v2:Service:list");

    let (cache, repo) = cached_setup(CacheConfig::new().enabled(false)).await;
    let entity = repo.create(&service("whatsapp")).await.unwrap();
    repo.find_by_id(entity.id).await.unwrap();
    assert!(cache.is_empty().unwrap());
}
