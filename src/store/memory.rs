//! In-process `RemoteStore` for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::error::RemoteError;
use crate::store::traits::{RemoteStore, Table};

/// Rows held in memory, with optional injected failures and latency.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<Table, Vec<Value>>>,
    failing_keys: RwLock<HashSet<String>>,
    fail_inserts: RwLock<HashSet<Table>>,
    delay: RwLock<Option<Duration>>,
    next_id: AtomicUsize,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call that touches `key` fails.
    pub async fn fail_key(&self, key: &str) {
        self.failing_keys.write().await.insert(key.to_string());
    }

    /// Every insert into `table` fails.
    pub async fn fail_inserts(&self, table: Table) {
        self.fail_inserts.write().await.insert(table);
    }

    /// Sleep before answering each call.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    pub async fn rows(&self, table: Table) -> Vec<Value> {
        self.rows.read().await.get(&table).cloned().unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self, table: Table, key: Option<&str>) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(key) = key
            && self.failing_keys.read().await.contains(key)
        {
            return Err(RemoteError::Status {
                table: table.name().to_string(),
                status: 500,
                body: format!("injected failure for {key}"),
            });
        }
        Ok(())
    }
}

fn row_key<'a>(table: Table, row: &'a Value) -> Option<&'a str> {
    table.key_column().and_then(|col| row.get(col)).and_then(Value::as_str)
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn select(&self, table: Table, key: &str) -> Result<Option<Value>, RemoteError> {
        table.require_key()?;
        self.enter(table, Some(key)).await?;
        let rows = self.rows.read().await;
        Ok(rows
            .get(&table)
            .and_then(|rows| rows.iter().find(|row| row_key(table, row) == Some(key)))
            .map(|row| json!({ "id": row["id"] })))
    }

    async fn insert(&self, table: Table, row: &Value) -> Result<(), RemoteError> {
        self.enter(table, row_key(table, row)).await?;
        if self.fail_inserts.read().await.contains(&table) {
            return Err(RemoteError::Request {
                table: table.name().to_string(),
                reason: "injected insert failure".to_string(),
            });
        }

        let mut stored = row.clone();
        if let Value::Object(obj) = &mut stored {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            obj.insert("id".to_string(), json!(id));
        }
        self.rows.write().await.entry(table).or_default().push(stored);
        Ok(())
    }

    async fn update(&self, table: Table, key: &str, patch: &Value) -> Result<(), RemoteError> {
        table.require_key()?;
        self.enter(table, Some(key)).await?;

        let Value::Object(fields) = patch else {
            return Err(RemoteError::Request {
                table: table.name().to_string(),
                reason: "patch must be an object".to_string(),
            });
        };

        let mut rows = self.rows.write().await;
        for row in rows.entry(table).or_default().iter_mut() {
            if row_key(table, row) != Some(key) {
                continue;
            }
            if let Value::Object(obj) = row {
                for (k, v) in fields {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(())
    }
}
