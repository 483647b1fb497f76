//! The application's service context.
//!
//! [`Services`] is built once at startup and passed by reference to whatever
//! drives the managers. Each manager is created exactly once here, so there
//! is one active trail, track and sharing session per context.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::live::{LiveLocationSharingManager, LocalSharedLocations, SharedLocationBackend};
use crate::location::{LocationProvider, Locator};
use crate::share::{DirectoryShareTarget, ShareTarget};
use crate::storage::{KeyValueStore, SqliteStore};
use crate::trail::BreadcrumbTrailManager;
use crate::track::GpxTrackRecorder;

/// Platform capabilities the managers run on.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Device position.
    pub location: Arc<dyn LocationProvider>,
    /// Durable key-value storage.
    pub store: Arc<dyn KeyValueStore>,
    /// File hand-off.
    pub share: Arc<dyn ShareTarget>,
    /// Where live locations are published; the local store when `None`.
    pub shared_locations: Option<Arc<dyn SharedLocationBackend>>,
}

/// One breadcrumb trail manager, one track recorder and one sharing manager
/// over a common set of capabilities.
#[derive(Debug, Clone)]
pub struct Services {
    config: Config,
    trails: BreadcrumbTrailManager,
    tracks: GpxTrackRecorder,
    sharing: LiveLocationSharingManager,
}

impl Services {
    /// Build the managers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`](crate::Error::ConfigValidation)
    /// if the configuration is invalid.
    pub fn new(config: Config, capabilities: Capabilities) -> Result<Self> {
        config.validate()?;

        let Capabilities {
            location,
            store,
            share,
            shared_locations,
        } = capabilities;

        let locator = Locator::new(location, config.request_timeout());
        let backend: Arc<dyn SharedLocationBackend> = match shared_locations {
            Some(backend) => backend,
            None => Arc::new(LocalSharedLocations::new(
                Arc::clone(&store),
                config.sharing.max_shared_locations,
            )),
        };

        Ok(Self {
            trails: BreadcrumbTrailManager::new(locator.clone(), Arc::clone(&store), &config),
            tracks: GpxTrackRecorder::new(locator.clone(), Arc::clone(&store), share, &config),
            sharing: LiveLocationSharingManager::new(locator, store, backend, &config),
            config,
        })
    }

    /// Build the managers over the `SQLite` store at the configured path,
    /// sharing files into the configured outbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened.
    pub fn open(config: Config, location: Arc<dyn LocationProvider>) -> Result<Self> {
        config.validate()?;
        let store = SqliteStore::open(config.database_path())?;
        info!(database = %store.path().display(), "Services opened");

        let share = Arc::new(DirectoryShareTarget::new(config.outbox_dir()));
        Self::new(
            config,
            Capabilities {
                location,
                store: Arc::new(store),
                share,
                shared_locations: None,
            },
        )
    }

    /// The breadcrumb trail manager.
    #[must_use]
    pub fn trails(&self) -> &BreadcrumbTrailManager {
        &self.trails
    }

    /// The GPX track recorder.
    #[must_use]
    pub fn tracks(&self) -> &GpxTrackRecorder {
        &self.tracks
    }

    /// The live location sharing manager.
    #[must_use]
    pub fn sharing(&self) -> &LiveLocationSharingManager {
        &self.sharing
    }

    /// The configuration the managers were built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}
