//! Where shared locations are published.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::SharedLocation;
use crate::error::Result;
use crate::storage::{CollectionStore, KeyValueStore, SHARED_LOCATIONS_KEY};

/// A store of published locations other users can read.
///
/// A backend keeps at most one location per user.
#[async_trait]
pub trait SharedLocationBackend: Send + Sync + fmt::Debug {
    /// Publish `location`, replacing the user's previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the location cannot be published.
    async fn publish(&self, location: &SharedLocation) -> Result<()>;

    /// Every published location, oldest publication first.
    ///
    /// # Errors
    ///
    /// Returns an error if the locations cannot be read.
    async fn fetch_all(&self) -> Result<Vec<SharedLocation>>;
}

/// Shared locations kept in the local key-value store.
///
/// Only the `capacity` most recent publications are retained.
#[derive(Debug, Clone)]
pub struct LocalSharedLocations {
    locations: CollectionStore<SharedLocation>,
    capacity: usize,
}

impl LocalSharedLocations {
    /// Create a backend over `store` retaining at most `capacity` entries.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self {
            locations: CollectionStore::new(store, SHARED_LOCATIONS_KEY),
            capacity,
        }
    }
}

#[async_trait]
impl SharedLocationBackend for LocalSharedLocations {
    async fn publish(&self, location: &SharedLocation) -> Result<()> {
        let mut all = self.locations.load_all().await;
        all.retain(|existing| existing.user_id != location.user_id);
        all.push(location.clone());
        if all.len() > self.capacity {
            let excess = all.len() - self.capacity;
            all.drain(..excess);
        }
        trace!(user_id = %location.user_id, retained = all.len(), "Published shared location");
        self.locations.save_all(&all).await
    }

    async fn fetch_all(&self) -> Result<Vec<SharedLocation>> {
        Ok(self.locations.load_all().await)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::live::SharingStatus;
    use crate::storage::MemoryStore;

    fn location(user: &str, lat: f64) -> SharedLocation {
        SharedLocation {
            user_id: user.to_string(),
            user_name: user.to_uppercase(),
            latitude: lat,
            longitude: 0.0,
            altitude: None,
            speed: None,
            heading: None,
            timestamp: Utc::now(),
            accuracy: None,
            battery_level: None,
            status: SharingStatus::Active,
            adventure_id: None,
        }
    }

    #[tokio::test]
    async fn test_publish_replaces_by_user() {
        let backend = LocalSharedLocations::new(Arc::new(MemoryStore::new()), 100);
        backend.publish(&location("ann", 1.0)).await.unwrap();
        backend.publish(&location("bob", 2.0)).await.unwrap();
        backend.publish(&location("ann", 3.0)).await.unwrap();

        let all = backend.fetch_all().await.unwrap();
        let users: Vec<&str> = all.iter().map(|l| l.user_id.as_str()).collect();
        assert_eq!(users, vec!["bob", "ann"]);
        assert!((all[1].latitude - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_publish_keeps_most_recent_entries() {
        let backend = LocalSharedLocations::new(Arc::new(MemoryStore::new()), 100);
        for i in 0..150 {
            backend.publish(&location(&format!("user-{i}"), 0.0)).await.unwrap();
        }

        let all = backend.fetch_all().await.unwrap();
        assert_eq!(all.len(), 100);
        assert_eq!(all[0].user_id, "user-50");
        assert_eq!(all[99].user_id, "user-149");
    }
}
