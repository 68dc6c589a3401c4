use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use super::KvKey;
use crate::db::BotDb;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("db error: {0}")]
    Db(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[derive(Debug, Clone)]
pub struct KvEntry {
    pub key: KvKey,
    pub value: Value,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &KvKey) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &KvKey, value: Value) -> Result<(), StoreError>;

    async fn delete(&self, key: &KvKey) -> Result<(), StoreError>;

    /// Entries strictly below `prefix`, ordered by key.
    async fn list(&self, prefix: &KvKey) -> Result<Vec<KvEntry>, StoreError>;
}

pub fn memory() -> Arc<dyn KvStore> {
    Arc::new(MemoryKvStore::default())
}

pub fn postgres(db: Arc<BotDb>) -> Arc<dyn KvStore> {
    Arc::new(PostgresKvStore { db })
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &KvKey,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|error| StoreError::Codec(format!("{key}: {error}"))),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize>(
    store: &dyn KvStore,
    key: &KvKey,
    value: &T,
) -> Result<(), StoreError> {
    let value =
        serde_json::to_value(value).map_err(|error| StoreError::Codec(format!("{key}: {error}")))?;
    store.set(key, value).await
}

pub async fn list_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    prefix: &KvKey,
) -> Result<Vec<(KvKey, T)>, StoreError> {
    store
        .list(prefix)
        .await?
        .into_iter()
        .map(|entry| {
            let value = serde_json::from_value(entry.value)
                .map_err(|error| StoreError::Codec(format!("{}: {error}", entry.key)))?;
            Ok((entry.key, value))
        })
        .collect()
}

#[derive(Default)]
struct MemoryKvStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &KvKey) -> Result<Option<Value>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(&key.encode()).cloned())
    }

    async fn set(&self, key: &KvKey, value: Value) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.encode(), value);
        Ok(())
    }

    async fn delete(&self, key: &KvKey) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.remove(&key.encode());
        Ok(())
    }

    async fn list(&self, prefix: &KvKey) -> Result<Vec<KvEntry>, StoreError> {
        let prefix = prefix.encode_prefix();
        let entries = self.entries.lock().await;
        entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, value)| {
                Ok(KvEntry {
                    key: KvKey::decode(key)?,
                    value: value.clone(),
                })
            })
            .collect()
    }
}

struct PostgresKvStore {
    db: Arc<BotDb>,
}

#[async_trait]
impl KvStore for PostgresKvStore {
    async fn get(&self, key: &KvKey) -> Result<Option<Value>, StoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_opt("SELECT value FROM kv_entries WHERE key = $1", &[&key.encode()])
            .await
            .map_err(|error| StoreError::Db(error.to_string()))?;
        Ok(row.map(|row| row.get::<_, Value>("value")))
    }

    async fn set(&self, key: &KvKey, value: Value) -> Result<(), StoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        client
            .execute(
                r#"
                INSERT INTO kv_entries (key, value, updated_at)
                VALUES ($1, $2, now())
                ON CONFLICT (key)
                DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
                "#,
                &[&key.encode(), &value],
            )
            .await
            .map_err(|error| StoreError::Db(error.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &KvKey) -> Result<(), StoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        client
            .execute("DELETE FROM kv_entries WHERE key = $1", &[&key.encode()])
            .await
            .map_err(|error| StoreError::Db(error.to_string()))?;
        Ok(())
    }

    async fn list(&self, prefix: &KvKey) -> Result<Vec<KvEntry>, StoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let rows = client
            .query(
                r#"
                SELECT key, value
                  FROM kv_entries
                 WHERE starts_with(key, $1)
                 ORDER BY key
                "#,
                &[&prefix.encode_prefix()],
            )
            .await
            .map_err(|error| StoreError::Db(error.to_string()))?;
        rows.iter()
            .map(|row| {
                let key: String = row.get("key");
                Ok(KvEntry {
                    key: KvKey::decode(&key)?,
                    value: row.get("value"),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use super::memory;
    use crate::kv::KvKey;

    #[tokio::test]
    async fn list_returns_only_entries_under_prefix_in_key_order() -> Result<()> {
        let store = memory();
        store
            .set(&KvKey::new("donations").int(7).int(300), json!(3))
            .await?;
        store
            .set(&KvKey::new("donations").int(7).int(100), json!(1))
            .await?;
        store
            .set(&KvKey::new("donations").int(70).int(200), json!(2))
            .await?;
        store.set(&KvKey::new("users").int(7), json!("x")).await?;

        let entries = store.list(&KvKey::new("donations").int(7)).await?;
        let values: Vec<_> = entries.iter().map(|entry| entry.value.clone()).collect();
        assert_eq!(values, vec![json!(1), json!(3)]);
        assert_eq!(entries[0].key.last_int(), Some(100));
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_single_key() -> Result<()> {
        let store = memory();
        let key = KvKey::new("user_keys").str("ABCD1234");
        store.set(&key, json!(1)).await?;
        store.delete(&key).await?;
        assert!(store.get(&key).await?.is_none());
        store.delete(&key).await?;
        Ok(())
    }
}
