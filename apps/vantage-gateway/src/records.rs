//! Document store backing desk and project records.
//!
//! The surface mirrors the handful of collection operations the rest of the
//! gateway needs. The in-memory implementation covers deployments that seed
//! records from a file; a database-backed store can slot in behind the same
//! trait.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Field-equality filter over JSON documents. An empty filter matches all.
#[derive(Debug, Clone, Default)]
pub struct Filter(Vec<(String, Value)>);

impl Filter {
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.0
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value))
    }
}

#[allow(dead_code)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find(&self, collection: &str, filter: &Filter) -> anyhow::Result<Vec<Value>>;
    async fn insert(&self, collection: &str, doc: Value) -> anyhow::Result<String>;
    async fn update_by_id(&self, collection: &str, id: &str, patch: Value)
        -> anyhow::Result<bool>;
    async fn update(&self, collection: &str, filter: &Filter, patch: Value)
        -> anyhow::Result<u64>;
    async fn remove_by_id(&self, collection: &str, id: &str) -> anyhow::Result<bool>;
    async fn count(&self, collection: &str, filter: &Filter) -> anyhow::Result<u64>;
}

pub type SharedRecordStore = Arc<dyn RecordStore>;

/// In-memory store, optionally seeded from a JSON file at startup.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `{"<collection>": [doc, ...], ...}` from disk. Documents
    /// without an `_id` get one assigned.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read records file {}", path.display()))?;
        let seed: HashMap<String, Vec<Value>> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse records file {}", path.display()))?;
        let collections = seed
            .into_iter()
            .map(|(name, docs)| (name, docs.into_iter().map(with_id).collect()))
            .collect();
        Ok(Self {
            collections: RwLock::new(collections),
        })
    }
}

fn with_id(mut doc: Value) -> Value {
    if let Value::Object(map) = &mut doc {
        map.entry("_id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    }
    doc
}

fn doc_id(doc: &Value) -> Option<&str> {
    doc.get("_id").and_then(Value::as_str)
}

fn apply_patch(doc: &mut Value, patch: &Value) {
    // A `$set` wrapper merges its fields flat; a bare object behaves the same.
    let fields = patch.get("$set").unwrap_or(patch);
    if let (Value::Object(target), Value::Object(fields)) = (doc, fields) {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find(&self, collection: &str, filter: &Filter) -> anyhow::Result<Vec<Value>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, collection: &str, doc: Value) -> anyhow::Result<String> {
        let doc = with_id(doc);
        let id = doc_id(&doc)
            .map(str::to_string)
            .context("record is not a JSON object")?;
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        Ok(id)
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: &str,
        patch: Value,
    ) -> anyhow::Result<bool> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        for doc in docs.iter_mut() {
            if doc_id(doc) == Some(id) {
                apply_patch(doc, &patch);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Filter,
        patch: Value,
    ) -> anyhow::Result<u64> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut modified = 0;
        for doc in docs.iter_mut() {
            if filter.matches(doc) {
                apply_patch(doc, &patch);
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn remove_by_id(&self, collection: &str, id: &str) -> anyhow::Result<bool> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|doc| doc_id(doc) != Some(id));
        Ok(docs.len() != before)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> anyhow::Result<u64> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).count() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_assigns_id_and_find_filters_by_field() {
        let store = MemoryStore::new();
        let id = store
            .insert("desk", json!({"deskId": "desk-42", "height": 71}))
            .await
            .unwrap();
        store
            .insert("desk", json!({"deskId": "desk-7"}))
            .await
            .unwrap();

        let all = store.find("desk", &Filter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let hits = store
            .find("desk", &Filter::default().eq("deskId", "desk-42"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["_id"], json!(id));
        assert_eq!(hits[0]["height"], json!(71));
    }

    #[tokio::test]
    async fn update_by_id_merges_set_fields_flat() {
        let store = MemoryStore::new();
        let id = store
            .insert("desk", json!({"deskId": "desk-42", "height": 71}))
            .await
            .unwrap();

        let changed = store
            .update_by_id("desk", &id, json!({"$set": {"height": 110, "mode": "standing"}}))
            .await
            .unwrap();
        assert!(changed);

        let doc = &store.find("desk", &Filter::default()).await.unwrap()[0];
        assert_eq!(doc["deskId"], json!("desk-42"));
        assert_eq!(doc["height"], json!(110));
        assert_eq!(doc["mode"], json!("standing"));

        let missing = store
            .update_by_id("desk", "no-such-id", json!({"$set": {"height": 1}}))
            .await
            .unwrap();
        assert!(!missing);
    }

    #[tokio::test]
    async fn update_by_filter_reports_modified_count() {
        let store = MemoryStore::new();
        store
            .insert("project", json!({"projectId": "p-1", "phase": "build"}))
            .await
            .unwrap();
        store
            .insert("project", json!({"projectId": "p-2", "phase": "build"}))
            .await
            .unwrap();
        store
            .insert("project", json!({"projectId": "p-3", "phase": "done"}))
            .await
            .unwrap();

        let modified = store
            .update(
                "project",
                &Filter::default().eq("phase", "build"),
                json!({"$set": {"phase": "review"}}),
            )
            .await
            .unwrap();
        assert_eq!(modified, 2);
        assert_eq!(
            store
                .count("project", &Filter::default().eq("phase", "review"))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn remove_by_id_and_count() {
        let store = MemoryStore::new();
        let id = store
            .insert("desk", json!({"deskId": "desk-42"}))
            .await
            .unwrap();
        assert_eq!(store.count("desk", &Filter::default()).await.unwrap(), 1);
        assert!(store.remove_by_id("desk", &id).await.unwrap());
        assert!(!store.remove_by_id("desk", &id).await.unwrap());
        assert_eq!(store.count("desk", &Filter::default()).await.unwrap(), 0);
        assert_eq!(store.count("ghost", &Filter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn load_seeds_collections_from_json_file() {
        let path = std::env::temp_dir().join(format!("vantage-records-{}.json", Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"{"desk": [{"deskId": "desk-42"}], "project": [{"projectId": "p-1", "_id": "fixed"}]}"#,
        )
        .unwrap();

        let store = MemoryStore::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let desks = store.find("desk", &Filter::default()).await.unwrap();
        assert_eq!(desks.len(), 1);
        assert!(desks[0]["_id"].is_string());

        let projects = store
            .find("project", &Filter::default().eq("projectId", "p-1"))
            .await
            .unwrap();
        assert_eq!(projects[0]["_id"], json!("fixed"));

        assert!(MemoryStore::load("/no/such/file.json").is_err());
    }
}
