#![allow(dead_code)]

use std::sync::Arc;

use docdelta::core::{Column, DataType, DocumentSubtype};
use docdelta::storage::{MemoryStore, TableSchema};
use docdelta::{Diffable, Document, Repository, RepositoryConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Document)]
pub struct ServiceStatus {
    pub mode: String,
    pub state: String,
    pub started: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Document)]
#[serde(rename_all = "camelCase")]
pub struct ServiceData {
    pub phone_number: Option<String>,
    #[diff(nested)]
    pub status: Option<ServiceStatus>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Diffable)]
#[diff(table = "services")]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub account_id: String,
    pub priority: i64,
    #[diff(document)]
    pub data: Option<ServiceData>,
    #[diff(document)]
    pub settings: Option<JsonValue>,
}

/// A record without an identity column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Diffable)]
#[diff(table = "audit_entries")]
pub struct AuditEntry {
    pub message: String,
    pub level: i64,
}

pub fn status(mode: &str, state: &str, started: bool) -> ServiceStatus {
    ServiceStatus {
        mode: mode.to_string(),
        state: state.to_string(),
        started,
    }
}

pub fn service(name: &str) -> Service {
    Service {
        id: Uuid::new_v4(),
        name: name.to_string(),
        account_id: "acc-1".to_string(),
        priority: 1,
        data: Some(ServiceData {
            phone_number: Some("5511999999999".to_string()),
            status: Some(status("QR", "NORMAL", true)),
            tags: vec!["whatsapp".to_string()],
        }),
        settings: None,
    }
}

pub async fn memory_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store
        .create_table(
            TableSchema::new(
                "services",
                vec![
                    Column::new("id", DataType::Uuid).not_null(),
                    Column::new("name", DataType::Text).not_null(),
                    Column::new("account_id", DataType::Text),
                    Column::new("priority", DataType::Integer),
                    Column::new("data", DataType::Document(DocumentSubtype::Jsonb)),
                    Column::new("settings", DataType::Document(DocumentSubtype::Json)),
                ],
            )
            .with_key("id"),
        )
        .await
        .unwrap();
    store
        .create_table(TableSchema::new(
            "audit_entries",
            vec![
                Column::new("message", DataType::Text),
                Column::new("level", DataType::Integer),
            ],
        ))
        .await
        .unwrap();
    Arc::new(store)
}

pub async fn setup() -> (Arc<MemoryStore>, Repository<Service>) {
    setup_with(RepositoryConfig::default()).await
}

pub async fn setup_with(config: RepositoryConfig) -> (Arc<MemoryStore>, Repository<Service>) {
    let store = memory_store().await;
    let repo = Repository::from_store(store.clone(), config);
    (store, repo)
}
