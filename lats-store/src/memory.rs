//! In-memory backing store.
//!
//! Holds rows per collection and evaluates filters, ordering, and ranges the
//! way the hosted store would. Every call is recorded so tests can assert on
//! exactly which network requests were made.

use crate::query::{Direction, Filter, Query, RowRange};
use crate::store::BackingStore;
use async_trait::async_trait;
use chrono::Utc;
use lats_core::{LatsResult, RawRow, RemoteError};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};
use uuid::Uuid;

/// One recorded call against a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreRequest {
    Count { collection: String },
    Select { collection: String, range: Option<RowRange> },
    Insert { collection: String },
    Update { collection: String, filter: Filter },
    Delete { collection: String, filter: Filter },
}

impl StoreRequest {
    pub fn collection(&self) -> &str {
        match self {
            StoreRequest::Count { collection }
            | StoreRequest::Select { collection, .. }
            | StoreRequest::Insert { collection }
            | StoreRequest::Update { collection, .. }
            | StoreRequest::Delete { collection, .. } => collection,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<String, Vec<RawRow>>>,
    requests: Mutex<Vec<StoreRequest>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection, replacing anything already there.
    pub fn with_rows(self, collection: &str, rows: Vec<RawRow>) -> Self {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(collection.to_string(), rows);
        self
    }

    pub fn requests(&self) -> Vec<StoreRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn select_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| matches!(r, StoreRequest::Select { .. }))
            .count()
    }

    pub fn rows(&self, collection: &str) -> Vec<RawRow> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, request: StoreRequest) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
    }

    fn matching(&self, query: &Query) -> Vec<RawRow> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let mut matched: Vec<RawRow> = rows
            .get(&query.collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| matches_filter(row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            // stable sort keeps insertion order among equal keys
            matched.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }
        matched
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn count(&self, query: &Query) -> LatsResult<u64> {
        self.record(StoreRequest::Count {
            collection: query.collection.clone(),
        });
        Ok(self.matching(query).len() as u64)
    }

    async fn select(&self, query: &Query) -> LatsResult<Vec<RawRow>> {
        self.record(StoreRequest::Select {
            collection: query.collection.clone(),
            range: query.range,
        });
        let matched = self.matching(query);
        let rows = match query.range {
            Some(range) if range.is_empty() => Vec::new(),
            Some(range) => matched
                .into_iter()
                .skip(range.from as usize)
                .take(range.len() as usize)
                .collect(),
            None => matched,
        };
        Ok(rows)
    }

    async fn insert(&self, collection: &str, mut row: RawRow) -> LatsResult<RawRow> {
        self.record(StoreRequest::Insert {
            collection: collection.to_string(),
        });
        // column defaults the hosted store would fill in
        row.entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        row.entry("created_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        rows.entry(collection.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(&self, collection: &str, filter: &Filter, patch: RawRow) -> LatsResult<RawRow> {
        self.record(StoreRequest::Update {
            collection: collection.to_string(),
            filter: filter.clone(),
        });
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let row = rows
            .get_mut(collection)
            .and_then(|rows| rows.iter_mut().find(|row| matches_filter(row, filter)))
            .ok_or_else(|| RemoteError::NotFound {
                collection: collection.to_string(),
                id: filter.value_text(),
            })?;
        for (key, value) in patch {
            row.insert(key, value);
        }
        Ok(row.clone())
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> LatsResult<u64> {
        self.record(StoreRequest::Delete {
            collection: collection.to_string(),
            filter: filter.clone(),
        });
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let Some(rows) = rows.get_mut(collection) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !matches_filter(row, filter));
        Ok((before - rows.len()) as u64)
    }
}

fn matches_filter(row: &RawRow, filter: &Filter) -> bool {
    row.get(&filter.column) == Some(&filter.value)
}

/// Nulls sort last in ascending order, like postgres.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: u64, created_at: &str) -> RawRow {
        match json!({ "id": id, "created_at": created_at }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn seeded() -> MemoryStore {
        MemoryStore::new().with_rows(
            "customers",
            vec![
                row(1, "2024-01-01T00:00:00Z"),
                row(2, "2024-03-01T00:00:00Z"),
                row(3, "2024-02-01T00:00:00Z"),
            ],
        )
    }

    #[tokio::test]
    async fn test_select_orders_and_ranges() {
        let store = seeded();
        let query = Query::table("customers")
            .order("created_at", Direction::Desc)
            .range(0, 1);
        let rows = store.select(&query).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(2), json!(3)]);

        let tail = store
            .select(&Query::table("customers").order("created_at", Direction::Desc).range(2, 3))
            .await
            .unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(store.select_count(), 2);
    }

    #[tokio::test]
    async fn test_count_honours_filters() {
        let store = seeded();
        assert_eq!(store.count(&Query::table("customers")).await.unwrap(), 3);
        assert_eq!(store.count(&Query::table("customers").eq("id", 2)).await.unwrap(), 1);
        assert_eq!(store.count(&Query::table("devices")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_merges_patch_and_reports_missing() {
        let store = seeded();
        let mut patch = RawRow::new();
        patch.insert("name".to_string(), json!("Mona"));
        let updated = store
            .update("customers", &Filter::eq("id", 3), patch.clone())
            .await
            .unwrap();
        assert_eq!(updated["name"], json!("Mona"));
        assert_eq!(updated["created_at"], json!("2024-02-01T00:00:00Z"));

        let err = store
            .update("customers", &Filter::eq("id", 99), patch)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            lats_core::LatsError::Remote(RemoteError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_insert_and_delete() {
        let store = MemoryStore::new();
        store.insert("customers", row(7, "2024-01-01T00:00:00Z")).await.unwrap();
        assert_eq!(store.rows("customers").len(), 1);

        let generated = store.insert("devices", RawRow::new()).await.unwrap();
        assert!(generated["id"].is_string());
        assert!(generated.contains_key("created_at"));
        assert_eq!(store.delete("devices", &Filter::eq("id", generated["id"].clone())).await.unwrap(), 1);
        assert_eq!(store.delete("customers", &Filter::eq("id", 7)).await.unwrap(), 1);
        assert_eq!(store.delete("customers", &Filter::eq("id", 7)).await.unwrap(), 0);
        assert_eq!(store.request_count(), 5);
    }

    #[test]
    fn test_nulls_sort_last() {
        let n = json!(null);
        let one = json!(1);
        assert_eq!(compare_values(Some(&n), Some(&one)), Ordering::Greater);
        assert_eq!(compare_values(None, Some(&one)), Ordering::Greater);
        assert_eq!(compare_values(Some(&one), Some(&json!(2))), Ordering::Less);
    }
}
