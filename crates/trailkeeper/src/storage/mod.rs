//! Storage layer for trailkeeper.
//!
//! Persistence is split in two levels:
//! - [`KeyValueStore`]: the durable string store capability, implemented by
//!   [`SqliteStore`] for real use and [`MemoryStore`] for tests.
//! - [`CollectionStore`]: a typed collection of records kept as one JSON
//!   array under a single key, with upsert and remove by record id.
//!
//! Collection writes rewrite the whole array. Two in-flight upserts against
//! the same key can therefore lose one update (last writer wins); callers
//! are expected to run on a single device with cooperative access.

pub mod migrations;
pub mod schema;
mod sqlite;

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub use sqlite::SqliteStore;

/// Key holding the breadcrumb trail collection.
pub const TRAILS_KEY: &str = "breadcrumb_trails";

/// Key holding the recorded GPX track collection.
pub const TRACKS_KEY: &str = "gpx_tracks";

/// Key holding the location sharing session collection.
pub const SESSIONS_KEY: &str = "location_sharing_sessions";

/// Key holding the published shared locations.
pub const SHARED_LOCATIONS_KEY: &str = "shared_locations";

/// Durable string storage, atomic per key.
#[async_trait]
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    async fn set(&self, key: &str, value: String) -> Result<()>;
}

/// In-process [`KeyValueStore`] backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| Error::internal("memory store lock poisoned"))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }
}

/// A record that can live in a [`CollectionStore`].
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The identifier records are matched on.
    fn record_id(&self) -> &str;
}

/// A named, typed collection persisted as a JSON array.
pub struct CollectionStore<T> {
    store: Arc<dyn KeyValueStore>,
    key: &'static str,
    _records: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for CollectionStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionStore")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<T> Clone for CollectionStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            key: self.key,
            _records: PhantomData,
        }
    }
}

impl<T: Record> CollectionStore<T> {
    /// Create a collection stored under `key`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, key: &'static str) -> Self {
        Self {
            store,
            key,
            _records: PhantomData,
        }
    }

    /// Load every record in the collection.
    ///
    /// Missing, unreadable or unparsable data yields an empty collection;
    /// the failure is logged rather than returned.
    pub async fn load_all(&self) -> Vec<T> {
        let raw = match self.store.get(self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key = self.key, error = %e, "Failed to read collection");
                return Vec::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(key = self.key, error = %e, "Discarding unparsable collection");
                Vec::new()
            }
        }
    }

    /// Find a record by id.
    pub async fn find(&self, id: &str) -> Option<T> {
        self.load_all()
            .await
            .into_iter()
            .find(|record| record.record_id() == id)
    }

    /// Replace the record with the same id, or append it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be serialized or written.
    pub async fn upsert(&self, record: &T) -> Result<()> {
        let mut records = self.load_all().await;
        match records
            .iter_mut()
            .find(|existing| existing.record_id() == record.record_id())
        {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        debug!(key = self.key, id = record.record_id(), "Upserting record");
        self.save_all(&records).await
    }

    /// Remove the record with the given id.
    ///
    /// Returns `true` if a record was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be serialized or written.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut records = self.load_all().await;
        let before = records.len();
        records.retain(|record| record.record_id() != id);
        if records.len() == before {
            return Ok(false);
        }
        self.save_all(&records).await?;
        Ok(true)
    }

    /// Overwrite the whole collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be serialized or written.
    pub async fn save_all(&self, records: &[T]) -> Result<()> {
        let raw = serde_json::to_string(records)?;
        self.store.set(self.key, raw).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: String,
        value: i32,
    }

    impl Record for Item {
        fn record_id(&self) -> &str {
            &self.id
        }
    }

    fn item(id: &str, value: i32) -> Item {
        Item {
            id: id.to_string(),
            value,
        }
    }

    /// A store whose writes always fail.
    #[derive(Debug, Default)]
    pub(crate) struct ReadOnlyStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, _key: &str, _value: String) -> Result<()> {
            Err(Error::internal("store is read-only"))
        }
    }

    fn collection() -> (Arc<MemoryStore>, CollectionStore<Item>) {
        let store = Arc::new(MemoryStore::new());
        let items = CollectionStore::new(store.clone() as Arc<dyn KeyValueStore>, "items");
        (store, items)
    }

    #[tokio::test]
    async fn test_memory_store_get_set() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);

        store.set("k", "v1".to_string()).await.unwrap();
        store.set("k", "v2".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_load_all_empty_when_absent() {
        let (_, items) = collection();
        assert!(items.load_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_all_empty_on_malformed_json() {
        let (store, items) = collection();
        store.set("items", "{not json".to_string()).await.unwrap();
        assert!(items.load_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_appends_then_replaces() {
        let (_, items) = collection();
        items.upsert(&item("a", 1)).await.unwrap();
        items.upsert(&item("b", 2)).await.unwrap();
        items.upsert(&item("a", 10)).await.unwrap();

        let all = items.load_all().await;
        assert_eq!(all, vec![item("a", 10), item("b", 2)]);
    }

    #[tokio::test]
    async fn test_remove() {
        let (_, items) = collection();
        items.upsert(&item("a", 1)).await.unwrap();
        items.upsert(&item("b", 2)).await.unwrap();

        assert!(items.remove("a").await.unwrap());
        assert!(!items.remove("a").await.unwrap());
        assert_eq!(items.load_all().await, vec![item("b", 2)]);
    }

    #[tokio::test]
    async fn test_find() {
        let (_, items) = collection();
        items.upsert(&item("a", 1)).await.unwrap();
        assert_eq!(items.find("a").await, Some(item("a", 1)));
        assert_eq!(items.find("zzz").await, None);
    }

    #[tokio::test]
    async fn test_upsert_surfaces_write_failure() {
        let store = Arc::new(ReadOnlyStore::default());
        let items: CollectionStore<Item> = CollectionStore::new(store, "items");
        assert!(items.upsert(&item("a", 1)).await.is_err());
    }
}
