/// Patch tests
///
/// Compilation of change-sets into column patches, their SQL rendering and
/// their in-memory evaluation.
/// Run with: cargo test --test patch_tests
mod common;

use common::{Service, memory_store, service, status};
use docdelta::core::{DocumentSubtype, Value};
use docdelta::diff::{Diffable, Entity};
use docdelta::patch::{
    ColumnTypeResolver, PatchCompiler, PatchDialect, PatchOp, PostgresDialect, apply_patches,
};
use serde_json::json;

async fn compiler() -> (std::sync::Arc<docdelta::storage::MemoryStore>, PatchCompiler) {
    let store = memory_store().await;
    let resolver = ColumnTypeResolver::new(store.clone());
    (store, PatchCompiler::new(resolver))
}

#[tokio::test]
async fn test_leaf_patch_preserves_sibling_data() {
    let (_, compiler) = compiler().await;
    let old = service("whatsapp");
    let mut new = old.clone();
    if let Some(data) = new.data.as_mut() {
        data.status = Some(status("CONNECTED", "NORMAL", true));
    }

    let patches = compiler
        .compile(Service::table_name(), Service::columns(), &new.diff(&old))
        .await
        .unwrap();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].column, "data");

    let mut row = old.to_row().unwrap();
    apply_patches(&mut row, &patches).unwrap();
    assert_eq!(
        row["data"].as_json().cloned(),
        Some(json!({
            "phoneNumber": "5511999999999",
            "status": {"mode": "CONNECTED", "state": "NORMAL", "started": true},
            "tags": ["whatsapp"]
        }))
    );
}

#[tokio::test]
async fn test_whole_document_merges_over_empty_column() {
    let (_, compiler) = compiler().await;
    let mut old = service("whatsapp");
    old.settings = None;
    let mut new = old.clone();
    new.settings = Some(json!({"a": 1, "b": 2}));

    let patches = compiler
        .compile(Service::table_name(), Service::columns(), &new.diff(&old))
        .await
        .unwrap();
    assert_eq!(
        patches[0].op,
        PatchOp::Merge {
            subtype: DocumentSubtype::Json,
            document: json!({"a": 1, "b": 2}),
        }
    );

    let mut row = old.to_row().unwrap();
    apply_patches(&mut row, &patches).unwrap();
    assert_eq!(row["settings"], Value::Json(json!({"a": 1, "b": 2})));
}

#[tokio::test]
async fn test_cleared_document_becomes_null() {
    let (_, compiler) = compiler().await;
    let old = service("whatsapp");
    let mut new = old.clone();
    new.data = None;

    let patches = compiler
        .compile(Service::table_name(), Service::columns(), &new.diff(&old))
        .await
        .unwrap();
    assert_eq!(patches[0].op, PatchOp::Clear);

    let mut args = Vec::new();
    assert_eq!(
        PostgresDialect.render_assignment(&patches[0], &mut args),
        "\"data\" = NULL"
    );
    assert!(args.is_empty());
}

#[tokio::test]
async fn test_rendered_sql_for_json_and_jsonb_columns() {
    let (_, compiler) = compiler().await;
    let mut old = service("whatsapp");
    old.settings = Some(json!({"webhook": {"url": "a"}}));
    let mut new = old.clone();
    new.settings = Some(json!({"webhook": {"url": "b"}}));
    if let Some(data) = new.data.as_mut() {
        data.status = Some(status("CONNECTED", "NORMAL", true));
    }

    let patches = compiler
        .compile(Service::table_name(), Service::columns(), &new.diff(&old))
        .await
        .unwrap();
    let fragment = PostgresDialect.render_update("services", "id", &Value::Uuid(old.id), &patches);

    assert_eq!(
        fragment.sql,
        "UPDATE \"services\" SET \
         \"data\" = jsonb_set(COALESCE(\"data\"::jsonb, '{}'::jsonb), '{status,mode}', $1::jsonb, true), \
         \"settings\" = (jsonb_set(COALESCE(\"settings\"::jsonb, '{}'::jsonb), '{webhook,url}', $2::jsonb, true))::json \
         WHERE \"id\" = $3 RETURNING *"
    );
    assert_eq!(
        fragment.args,
        vec![
            Value::Json(json!("CONNECTED")),
            Value::Json(json!("b")),
            Value::Uuid(old.id),
        ]
    );
}

#[tokio::test]
async fn test_column_types_are_looked_up_once() {
    let (store, compiler) = compiler().await;
    let old = service("whatsapp");
    let mut new = old.clone();
    if let Some(data) = new.data.as_mut() {
        data.tags.push("vip".into());
    }
    let changes = new.diff(&old);

    for _ in 0..3 {
        compiler
            .compile(Service::table_name(), Service::columns(), &changes)
            .await
            .unwrap();
    }
    assert_eq!(store.schema_lookups(), 1);
    assert_eq!(
        compiler.resolver().cached("services", "data"),
        Some(DocumentSubtype::Jsonb)
    );
}

#[tokio::test]
async fn test_failed_schema_lookup_falls_back_without_caching() {
    let (store, compiler) = compiler().await;
    store.fail_schema_lookups(true);

    let mut old = service("whatsapp");
    old.settings = Some(json!({"retries": 1}));
    let mut new = old.clone();
    new.settings = Some(json!({"retries": 2}));
    let changes = new.diff(&old);

    let patches = compiler
        .compile(Service::table_name(), Service::columns(), &changes)
        .await
        .unwrap();
    assert_eq!(patches[0].op.subtype(), Some(DocumentSubtype::Jsonb));
    assert_eq!(compiler.resolver().cached("services", "settings"), None);

    store.fail_schema_lookups(false);
    let patches = compiler
        .compile(Service::table_name(), Service::columns(), &changes)
        .await
        .unwrap();
    assert_eq!(patches[0].op.subtype(), Some(DocumentSubtype::Json));
    assert_eq!(store.schema_lookups(), 2);
}
