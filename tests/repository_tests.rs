/// Repository tests
///
/// CRUD through `Repository<T>` over the memory store, with baseline capture
/// and leaf-level document updates.
/// Run with: cargo test --test repository_tests
mod common;

use std::collections::BTreeMap;

use common::{AuditEntry, Service, service, setup, setup_with, status};
use docdelta::core::{DbError, EntityId, Value};
use docdelta::transaction::EntityKey;
use docdelta::RepositoryConfig;
use serde_json::json;
use uuid::Uuid;

fn key(entity: &Service) -> EntityKey {
    EntityKey::new("Service", EntityId::from(entity.id))
}

#[tokio::test]
async fn test_create_and_find_by_id() {
    let (_, repo) = setup().await;
    let entity = service("whatsapp");

    let created = repo.create(&entity).await.unwrap();
    assert_eq!(created, entity);

    let found = repo.find_by_id(entity.id).await.unwrap();
    assert_eq!(found, entity);

    let missing = repo.find_by_id(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(missing, DbError::NotFound(name, _) if name == "Service"));
}

#[tokio::test]
async fn test_duplicate_create_is_rejected() {
    let (_, repo) = setup().await;
    let entity = service("whatsapp");
    repo.create(&entity).await.unwrap();
    assert!(matches!(repo.create(&entity).await, Err(DbError::Store(_))));
}

#[tokio::test]
async fn test_update_inside_transaction_touches_only_changed_leaf() {
    let (store, repo) = setup().await;
    let entity = repo.create(&service("whatsapp")).await.unwrap();

    let tx = repo.begin_transaction().await.unwrap();
    let tx_repo = repo.with_tx(&tx);
    let mut loaded = tx_repo.find_by_id(entity.id).await.unwrap();
    if let Some(data) = loaded.data.as_mut() {
        data.status = Some(status("CONNECTED", "NORMAL", true));
    }
    tx_repo.update_by_id(entity.id, &mut loaded).await.unwrap();
    tx.commit().await.unwrap();

    let statements = store.take_statements();
    assert_eq!(statements.len(), 1);
    assert_eq!(
        statements[0].sql,
        "UPDATE \"services\" SET \"data\" = jsonb_set(COALESCE(\"data\"::jsonb, '{}'::jsonb), \
         '{status,mode}', $1::jsonb, true) WHERE \"id\" = $2 RETURNING *"
    );

    let stored = repo.find_by_id(entity.id).await.unwrap();
    assert_eq!(
        stored.data.map(|data| (data.phone_number, data.status, data.tags)),
        Some((
            Some("5511999999999".to_string()),
            Some(status("CONNECTED", "NORMAL", true)),
            vec!["whatsapp".to_string()],
        ))
    );
}

#[tokio::test]
async fn test_unchanged_entity_makes_no_store_call() {
    let (store, repo) = setup().await;
    let entity = repo.create(&service("whatsapp")).await.unwrap();

    let tx = repo.begin_transaction().await.unwrap();
    let tx_repo = repo.with_tx(&tx);
    let mut loaded = tx_repo.find_by_id(entity.id).await.unwrap();
    tx_repo.update_by_id(entity.id, &mut loaded).await.unwrap();
    tx_repo
        .update_by_id_in_place(entity.id, &mut loaded, |_| {})
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(store.update_calls(), 0);
    assert!(store.take_statements().is_empty());
}

#[tokio::test]
async fn test_second_update_still_diffs_against_first_read() {
    let (store, repo) = setup().await;
    let entity = repo.create(&service("whatsapp")).await.unwrap();

    let tx = repo.begin_transaction().await.unwrap();
    let tx_repo = repo.with_tx(&tx);
    let mut loaded = tx_repo.find_by_id(entity.id).await.unwrap();

    loaded.name = "telegram".into();
    tx_repo.update_by_id(entity.id, &mut loaded).await.unwrap();
    loaded.priority = 5;
    tx_repo.update_by_id(entity.id, &mut loaded).await.unwrap();
    tx.commit().await.unwrap();

    let statements = store.take_statements();
    assert_eq!(
        statements[0].sql,
        "UPDATE \"services\" SET \"name\" = $1 WHERE \"id\" = $2 RETURNING *"
    );
    assert_eq!(
        statements[1].sql,
        "UPDATE \"services\" SET \"name\" = $1, \"priority\" = $2 WHERE \"id\" = $3 RETURNING *"
    );

    let stored = repo.find_by_id(entity.id).await.unwrap();
    assert_eq!((stored.name.as_str(), stored.priority), ("telegram", 5));
}

#[tokio::test]
async fn test_first_read_wins_within_a_transaction() {
    let (_, repo) = setup().await;
    let entity = repo.create(&service("whatsapp")).await.unwrap();

    let tx = repo.begin_transaction().await.unwrap();
    let tx_repo = repo.with_tx(&tx);
    let mut loaded = tx_repo.find_by_id(entity.id).await.unwrap();
    tx_repo
        .update_by_id_in_place(entity.id, &mut loaded, |s| s.priority = 9)
        .await
        .unwrap();
    let reread = tx_repo.find_by_id(entity.id).await.unwrap();
    assert_eq!(reread.priority, 9);

    let baseline = tx.baseline().get_or_nil::<Service>(&key(&entity)).unwrap();
    assert_eq!(baseline.priority, 1);
    tx.rollback().await.unwrap();

    assert_eq!(repo.find_by_id(entity.id).await.unwrap().priority, 1);
}

#[tokio::test]
async fn test_update_without_baseline_sends_every_set_field() {
    let (store, repo) = setup().await;
    let entity = repo.create(&service("whatsapp")).await.unwrap();

    let mut changed = entity.clone();
    changed.priority = 3;
    repo.update_by_id(entity.id, &mut changed).await.unwrap();

    let statements = store.take_statements();
    let sql = &statements[0].sql;
    assert!(sql.contains("\"data\" = COALESCE(\"data\"::jsonb, '{}'::jsonb) || $"));
    assert!(sql.contains("\"name\" = $"));
    assert!(sql.contains("\"priority\" = $"));
    assert!(!sql.contains("\"settings\""));
    assert_eq!(changed, Service { priority: 3, ..entity });
}

#[tokio::test]
async fn test_update_in_place_uses_entity_identity() {
    let (store, repo) = setup().await;
    let mut entity = repo.create(&service("whatsapp")).await.unwrap();

    repo.update_in_place(&mut entity, |s| {
        s.settings = Some(json!({"retries": 3}));
    })
    .await
    .unwrap();

    let statements = store.take_statements();
    assert_eq!(
        statements[0].sql,
        "UPDATE \"services\" SET \"settings\" = (COALESCE(\"settings\"::jsonb, '{}'::jsonb) || $1::jsonb)::json \
         WHERE \"id\" = $2 RETURNING *"
    );
    assert_eq!(
        repo.find_by_id(entity.id).await.unwrap().settings,
        Some(json!({"retries": 3}))
    );
}

#[tokio::test]
async fn test_update_in_place_requires_identity() {
    let (store, repo) = setup().await;
    let audit = repo.sibling::<AuditEntry>();
    let mut entry = audit
        .create(&AuditEntry {
            message: "started".into(),
            level: 1,
        })
        .await
        .unwrap();

    let err = audit
        .update_in_place(&mut entry, |e| e.level = 2)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::UnsupportedEntity(_, _)));
    assert_eq!(store.update_calls(), 0);
    assert_eq!(audit.find_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_with_map_sets_dotted_paths() {
    let (_, repo) = setup().await;
    let entity = repo.create(&service("whatsapp")).await.unwrap();

    let mut values = BTreeMap::new();
    values.insert("data.status.mode".to_string(), Value::Text("CONNECTED".into()));
    values.insert("priority".to_string(), Value::Integer(4));
    let updated = repo.update_by_id_with_map(entity.id, values).await.unwrap();

    assert_eq!(updated.id, entity.id);
    assert_eq!(updated.priority, 4);
    let data = updated.data.unwrap();
    assert_eq!(data.status, Some(status("CONNECTED", "NORMAL", true)));
    assert_eq!(data.phone_number.as_deref(), Some("5511999999999"));
}

#[tokio::test]
async fn test_update_with_map_rejects_bad_input() {
    let (store, repo) = setup().await;
    let entity = repo.create(&service("whatsapp")).await.unwrap();

    let mut mixed = BTreeMap::new();
    mixed.insert("data".to_string(), Value::Json(json!({})));
    mixed.insert("data.status.mode".to_string(), Value::Text("QR".into()));
    assert!(matches!(
        repo.update_by_id_with_map(entity.id, mixed).await,
        Err(DbError::InvalidChangeSet(_))
    ));
    assert!(matches!(
        repo.update_by_id_with_map(entity.id, BTreeMap::new()).await,
        Err(DbError::InvalidChangeSet(_))
    ));
    assert_eq!(store.update_calls(), 0);
}

#[tokio::test]
async fn test_update_of_missing_row_is_not_found() {
    let (_, repo) = setup().await;
    let mut ghost = service("ghost");
    let err = repo
        .update_in_place(&mut ghost, |s| s.priority = 2)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound(_, _)));
}

#[tokio::test]
async fn test_store_failure_is_returned_verbatim() {
    let (store, repo) = setup().await;
    let mut entity = repo.create(&service("whatsapp")).await.unwrap();

    store.fail_next_update("deadlock detected");
    let err = repo
        .update_in_place(&mut entity, |s| s.priority = 2)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Store(message) if message == "deadlock detected"));
    assert_eq!(repo.find_by_id(entity.id).await.unwrap().priority, 1);
}

#[tokio::test]
async fn test_failed_schema_lookup_still_updates() {
    let (store, repo) = setup().await;
    let mut entity = repo.create(&service("whatsapp")).await.unwrap();
    store.fail_schema_lookups(true);

    repo.update_in_place(&mut entity, |s| {
        if let Some(data) = s.data.as_mut() {
            data.tags.push("vip".into());
        }
    })
    .await
    .unwrap();

    let stored = repo.find_by_id(entity.id).await.unwrap();
    assert_eq!(stored.data.map(|d| d.tags.len()), Some(2));
    assert_eq!(repo.resolver().cached("services", "data"), None);
}

#[tokio::test]
async fn test_find_one_and_find_many() {
    let (_, repo) = setup().await;
    for (name, priority) in [("a", 1), ("b", 2), ("c", 3)] {
        let mut entity = service(name);
        entity.priority = priority;
        repo.create(&entity).await.unwrap();
    }

    let high = repo.find_many(|s| s.priority >= 2).await.unwrap();
    assert_eq!(high.len(), 2);

    let found = repo.find_one(|s| s.name == "c").await.unwrap();
    assert_eq!(found.map(|s| s.priority), Some(3));
    assert!(repo.find_one(|s| s.name == "z").await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_capture_follows_config() {
    let (_, repo) = setup_with(RepositoryConfig::new().capture_on_list(false)).await;
    let entity = repo.create(&service("whatsapp")).await.unwrap();

    let tx = repo.begin_transaction().await.unwrap();
    let tx_repo = repo.with_tx(&tx);
    tx_repo.find_all().await.unwrap();
    assert!(tx.baseline().is_empty());

    tx_repo.find_one(|s| s.id == entity.id).await.unwrap();
    assert!(tx.baseline().contains(&key(&entity)));
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_create_in_transaction_captures_baseline() {
    let (store, repo) = setup().await;
    let tx = repo.begin_transaction().await.unwrap();
    let tx_repo = repo.with_tx(&tx);

    let mut created = tx_repo.create(&service("whatsapp")).await.unwrap();
    assert!(tx.baseline().contains(&key(&created)));

    created.priority = 8;
    tx_repo.update_by_id(created.id, &mut created).await.unwrap();
    tx.commit().await.unwrap();

    let statements = store.take_statements();
    assert_eq!(
        statements[0].sql,
        "UPDATE \"services\" SET \"priority\" = $1 WHERE \"id\" = $2 RETURNING *"
    );
}

#[tokio::test]
async fn test_find_paginated() {
    let (_, repo) = setup().await;
    for idx in 0..5 {
        repo.create(&service(&format!("svc-{}", idx))).await.unwrap();
    }

    let page = repo.find_paginated(2, 2).await.unwrap();
    assert_eq!(page.data.len(), 2);
    assert_eq!(page.total, 5);
    assert_eq!(page.offset, 2);
    assert_eq!(page.current_page, 2);
    assert_eq!(page.last_page, 3);

    assert!(repo.find_paginated(4, 2).await.unwrap().data.is_empty());
    assert!(repo.find_paginated(0, 2).await.is_err());
}

#[tokio::test]
async fn test_save_and_delete() {
    let (_, repo) = setup().await;
    let mut entity = service("whatsapp");
    repo.save(&entity).await.unwrap();

    entity.name = "renamed".into();
    repo.save(&entity).await.unwrap();
    assert_eq!(repo.find_all().await.unwrap().len(), 1);
    assert_eq!(repo.find_by_id(entity.id).await.unwrap().name, "renamed");

    assert!(repo.delete_by_id(entity.id).await.unwrap());
    assert!(!repo.delete_by_id(entity.id).await.unwrap());
}

#[tokio::test]
async fn test_reshaped_document_replaces_stored_value() {
    let (_, repo) = setup().await;
    let mut entity = service("whatsapp");
    entity.settings = Some(json!(["legacy"]));
    repo.create(&entity).await.unwrap();

    let tx = repo.begin_transaction().await.unwrap();
    let tx_repo = repo.with_tx(&tx);
    let mut loaded = tx_repo.find_by_id(entity.id).await.unwrap();
    loaded.settings = Some(json!({"theme": "dark"}));
    tx_repo.update_by_id(entity.id, &mut loaded).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(
        repo.find_by_id(entity.id).await.unwrap().settings,
        Some(json!({"theme": "dark"}))
    );
}
