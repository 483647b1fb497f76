//! Live location sharing.
//!
//! While a [`LocationSharingSession`] is active the manager watches the device
//! position and publishes each update to a [`SharedLocationBackend`]. Readers
//! query the backend for recent locations: nearby, by friend, or all of them.
//! Published locations older than `sharing.stale_after_secs` are never
//! returned.

mod backend;

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::geo::{self, Coordinate, METERS_PER_MILE};
use crate::ids::new_id;
use crate::location::{Accuracy, Locator, PositionSample, WatchOptions};
use crate::storage::{CollectionStore, KeyValueStore, Record, SESSIONS_KEY};
use crate::task::TaskHandle;

pub use backend::{LocalSharedLocations, SharedLocationBackend};

/// Status carried by a published location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingStatus {
    /// Updates are flowing.
    Active,
    /// The user paused sharing; this is their last position.
    Paused,
    /// The user stopped sharing; this is their last position.
    Stopped,
}

/// A position published for other users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedLocation {
    /// Publishing user.
    pub user_id: String,
    /// Display name of the publishing user.
    pub user_name: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Speed in meters per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Heading in degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// When the position was taken.
    pub timestamp: DateTime<Utc>,
    /// Horizontal accuracy in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Device battery level between 0 and 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
    /// Sharing status at publication.
    pub status: SharingStatus,
    /// Adventure the user is on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adventure_id: Option<String>,
}

impl SharedLocation {
    /// The location's coordinates.
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

impl Record for SharedLocation {
    fn record_id(&self) -> &str {
        &self.user_id
    }
}

/// One period of sharing by the local user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSharingSession {
    /// Unique session id.
    pub id: String,
    /// Sharing user.
    pub user_id: String,
    /// Display name of the sharing user.
    pub user_name: String,
    /// When sharing started.
    pub start_time: DateTime<Utc>,
    /// When sharing stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Users explicitly shared with.
    pub share_with_user_ids: Vec<String>,
    /// Whether all friends can see the location.
    pub share_with_friends: bool,
    /// Whether anyone can see the location.
    pub share_with_public: bool,
    /// Time between published updates in milliseconds.
    pub update_interval: u64,
    /// Whether the session is running.
    pub is_active: bool,
    /// Adventure the session belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adventure_id: Option<String>,
    /// Most recently published location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_location: Option<SharedLocation>,
}

impl Record for LocationSharingSession {
    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Parameters for [`LiveLocationSharingManager::start_sharing`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SharingOptions {
    /// Display name to publish.
    pub user_name: String,
    /// Users to share with.
    pub share_with_user_ids: Vec<String>,
    /// Share with all friends.
    pub share_with_friends: bool,
    /// Share with everyone.
    pub share_with_public: bool,
    /// Time between updates; `sharing.default_update_interval_ms` when unset.
    pub update_interval: Option<Duration>,
    /// Adventure to tag locations with.
    pub adventure_id: Option<String>,
}

impl SharingOptions {
    /// Options publishing as `user_name`.
    #[must_use]
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            ..Self::default()
        }
    }

    /// Share with specific users.
    #[must_use]
    pub fn with_users<I, S>(mut self, user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.share_with_user_ids = user_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Share with all friends.
    #[must_use]
    pub fn with_friends(mut self, enabled: bool) -> Self {
        self.share_with_friends = enabled;
        self
    }

    /// Share with everyone.
    #[must_use]
    pub fn with_public(mut self, enabled: bool) -> Self {
        self.share_with_public = enabled;
        self
    }

    /// Set the update interval.
    #[must_use]
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = Some(interval);
        self
    }

    /// Tag published locations with an adventure.
    #[must_use]
    pub fn with_adventure(mut self, adventure_id: impl Into<String>) -> Self {
        self.adventure_id = Some(adventure_id.into());
        self
    }
}

#[derive(Debug, Default)]
struct SharingState {
    session: Option<LocationSharingSession>,
    paused: bool,
    watch: Option<TaskHandle>,
}

impl SharingState {
    fn cancel_watch(&mut self) {
        if let Some(mut watch) = self.watch.take() {
            watch.cancel();
        }
    }
}

#[derive(Debug)]
struct Inner {
    locator: Locator,
    sessions: CollectionStore<LocationSharingSession>,
    backend: Arc<dyn SharedLocationBackend>,
    config: Config,
    state: Mutex<SharingState>,
}

/// Shares the device position with other users. Cheap to clone; clones
/// share state.
#[derive(Debug, Clone)]
pub struct LiveLocationSharingManager {
    inner: Arc<Inner>,
}

impl LiveLocationSharingManager {
    /// Create a manager storing sessions in `store` and publishing to
    /// `backend`.
    #[must_use]
    pub fn new(
        locator: Locator,
        store: Arc<dyn KeyValueStore>,
        backend: Arc<dyn SharedLocationBackend>,
        config: &Config,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                locator,
                sessions: CollectionStore::new(store, SESSIONS_KEY),
                backend,
                config: config.clone(),
                state: Mutex::new(SharingState::default()),
            }),
        }
    }

    /// Start a sharing session, stopping any running one first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] without location permission, or
    /// an error if the position watch cannot be started.
    pub async fn start_sharing(&self, options: SharingOptions) -> Result<LocationSharingSession> {
        self.inner.locator.ensure_permission().await?;

        if let Some(previous) = self.stop_sharing().await {
            info!(session_id = %previous.id, "Stopped previous sharing session");
        }

        let interval = options
            .update_interval
            .unwrap_or_else(|| self.inner.config.sharing_interval());
        let session = LocationSharingSession {
            id: new_id("share"),
            user_id: self.inner.config.sharing.user_id.clone(),
            user_name: options.user_name,
            start_time: Utc::now(),
            end_time: None,
            share_with_user_ids: options.share_with_user_ids,
            share_with_friends: options.share_with_friends,
            share_with_public: options.share_with_public,
            update_interval: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            is_active: true,
            adventure_id: options.adventure_id,
            last_location: None,
        };

        let watch = self.open_watch(interval).await?;
        {
            let mut state = self.inner.state.lock().await;
            state.cancel_watch();
            state.session = Some(session.clone());
            state.paused = false;
            state.watch = Some(watch);
        }

        self.persist(&session).await;
        info!(
            session_id = %session.id,
            interval_ms = session.update_interval,
            "Location sharing started"
        );
        Ok(session)
    }

    /// Publish a position update for the active session.
    ///
    /// Returns `None` when nothing is being shared or sharing is paused.
    pub async fn publish_position(&self, sample: PositionSample) -> Option<SharedLocation> {
        let mut state = self.inner.state.lock().await;
        if state.paused {
            return None;
        }
        let session = state.session.as_mut()?;

        let location = SharedLocation {
            user_id: session.user_id.clone(),
            user_name: session.user_name.clone(),
            latitude: sample.latitude,
            longitude: sample.longitude,
            altitude: sample.altitude,
            speed: sample.speed,
            heading: sample.heading,
            timestamp: sample.timestamp,
            accuracy: sample.accuracy,
            battery_level: None,
            status: SharingStatus::Active,
            adventure_id: session.adventure_id.clone(),
        };
        session.last_location = Some(location.clone());
        let snapshot = session.clone();
        drop(state);

        self.persist(&snapshot).await;
        self.publish(&location).await;
        Some(location)
    }

    /// Stop publishing updates, republishing the last location as paused.
    ///
    /// Returns `false` when nothing is being shared or it is already paused.
    pub async fn pause_sharing(&self) -> bool {
        let last = {
            let mut state = self.inner.state.lock().await;
            if state.paused {
                return false;
            }
            let Some(session) = state.session.as_ref() else {
                return false;
            };
            let last = session.last_location.clone();
            state.cancel_watch();
            state.paused = true;
            last
        };

        if let Some(mut last) = last {
            last.status = SharingStatus::Paused;
            self.publish(&last).await;
        }
        info!("Location sharing paused");
        true
    }

    /// Restart updates for a paused session, optionally switching adventure.
    ///
    /// Returns `false` when there is no paused session.
    ///
    /// # Errors
    ///
    /// Returns an error if the position watch cannot be started.
    pub async fn resume_sharing(&self, adventure_id: Option<String>) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        let interval = match &state.session {
            Some(session) if state.paused => Duration::from_millis(session.update_interval),
            _ => return Ok(false),
        };

        state.watch = Some(self.open_watch(interval).await?);
        state.paused = false;
        let Some(session) = state.session.as_mut() else {
            return Ok(false);
        };
        if adventure_id.is_some() {
            session.adventure_id = adventure_id;
        }
        let snapshot = session.clone();
        drop(state);

        self.persist(&snapshot).await;
        info!(session_id = %snapshot.id, "Location sharing resumed");
        Ok(true)
    }

    /// End the active session.
    ///
    /// The last published location is republished as stopped.
    pub async fn stop_sharing(&self) -> Option<LocationSharingSession> {
        let mut session = {
            let mut state = self.inner.state.lock().await;
            state.cancel_watch();
            state.paused = false;
            state.session.take()?
        };

        session.is_active = false;
        session.end_time = Some(Utc::now());
        self.persist(&session).await;

        if let Some(mut last) = session.last_location.clone() {
            last.status = SharingStatus::Stopped;
            self.publish(&last).await;
        }
        info!(session_id = %session.id, "Location sharing stopped");
        Some(session)
    }

    /// Published locations that are not stale.
    pub async fn shared_locations(&self) -> Vec<SharedLocation> {
        let all = match self.inner.backend.fetch_all().await {
            Ok(all) => all,
            Err(e) => {
                warn!(error = %e, "Failed to read shared locations");
                return Vec::new();
            }
        };

        let cutoff = Utc::now() - self.inner.config.stale_after();
        all.into_iter()
            .filter(|location| location.timestamp >= cutoff)
            .collect()
    }

    /// Fresh locations within `radius_miles` of `point`.
    ///
    /// The radius defaults to `sharing.default_radius_miles`.
    pub async fn locations_nearby(
        &self,
        point: Coordinate,
        radius_miles: Option<f64>,
    ) -> Vec<SharedLocation> {
        let radius = radius_miles.unwrap_or(self.inner.config.sharing.default_radius_miles);
        let radius_m = geo::miles_to_meters(radius);
        self.shared_locations()
            .await
            .into_iter()
            .filter(|location| location.coordinate().distance_to(&point) <= radius_m)
            .collect()
    }

    /// Fresh locations published by any of `friend_ids`.
    pub async fn friends_locations<S: AsRef<str>>(&self, friend_ids: &[S]) -> Vec<SharedLocation> {
        self.shared_locations()
            .await
            .into_iter()
            .filter(|location| friend_ids.iter().any(|id| id.as_ref() == location.user_id))
            .collect()
    }

    /// Add a user to the active session's audience.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveSession`] when nothing is being shared.
    pub async fn share_location_with_friend(&self, friend_id: &str) -> Result<()> {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            let session = state.session.as_mut().ok_or(Error::NoActiveSession {
                what: "location sharing session",
            })?;
            if session.share_with_user_ids.iter().any(|id| id == friend_id) {
                return Ok(());
            }
            session.share_with_user_ids.push(friend_id.to_string());
            session.clone()
        };

        debug!(session_id = %snapshot.id, friend_id, "Sharing with friend");
        self.persist(&snapshot).await;
        Ok(())
    }

    /// Remove a user from the active session's audience.
    ///
    /// Returns `true` if the user was removed.
    pub async fn stop_sharing_with_friend(&self, friend_id: &str) -> bool {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            let Some(session) = state.session.as_mut() else {
                return false;
            };
            let before = session.share_with_user_ids.len();
            session.share_with_user_ids.retain(|id| id != friend_id);
            if session.share_with_user_ids.len() == before {
                return false;
            }
            session.clone()
        };

        debug!(session_id = %snapshot.id, friend_id, "Stopped sharing with friend");
        self.persist(&snapshot).await;
        true
    }

    /// Straight-line arrival estimate at `destination` from the last
    /// published position.
    ///
    /// The speed defaults to `sharing.default_eta_speed_mph`. Returns `None`
    /// without an active session, a published position, or a positive speed,
    /// and when the estimate falls outside the representable time range.
    pub async fn estimated_arrival_time(
        &self,
        destination: Coordinate,
        average_speed_mph: Option<f64>,
    ) -> Option<DateTime<Utc>> {
        let from = {
            let state = self.inner.state.lock().await;
            state.session.as_ref()?.last_location.as_ref()?.coordinate()
        };

        let mph = average_speed_mph.unwrap_or(self.inner.config.sharing.default_eta_speed_mph);
        if !(mph.is_finite() && mph > 0.0) {
            return None;
        }
        let meters_per_sec = mph * METERS_PER_MILE / 3600.0;
        let seconds = from.distance_to(&destination) / meters_per_sec;

        #[allow(clippy::cast_possible_truncation)]
        let millis = (seconds * 1000.0).round() as i64;
        let travel = chrono::Duration::try_milliseconds(millis)?;
        Utc::now().checked_add_signed(travel)
    }

    /// A snapshot of the active session.
    pub async fn active_session(&self) -> Option<LocationSharingSession> {
        self.inner.state.lock().await.session.clone()
    }

    /// Check if a session is active and not paused.
    pub async fn is_sharing(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.session.is_some() && !state.paused
    }

    /// Check if the active session is paused.
    pub async fn is_paused(&self) -> bool {
        self.inner.state.lock().await.paused
    }

    async fn open_watch(&self, interval: Duration) -> Result<TaskHandle> {
        let watch = self
            .inner
            .locator
            .watch(WatchOptions {
                accuracy: Accuracy::High,
                min_interval: interval,
                min_distance_m: self.inner.config.sharing.min_distance_m,
            })
            .await?;

        let weak = Arc::downgrade(&self.inner);
        Ok(TaskHandle::consume("location-sharing", watch, move |sample| {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                LiveLocationSharingManager { inner }
                    .publish_position(sample)
                    .await;
                ControlFlow::Continue(())
            }
        }))
    }

    async fn publish(&self, location: &SharedLocation) {
        if let Err(e) = self.inner.backend.publish(location).await {
            warn!(user_id = %location.user_id, error = %e, "Failed to publish location");
        }
    }

    async fn persist(&self, session: &LocationSharingSession) {
        if let Err(e) = self.inner.sessions.upsert(session).await {
            warn!(session_id = %session.id, error = %e, "Failed to persist sharing session");
        }
    }
}
