//! Breadcrumb trails for finding the way back.
//!
//! A [`BreadcrumbTrailManager`] keeps at most one active trail. While a trail
//! is active a timer reads the device position every
//! `trail.auto_drop_interval_ms` and drops an automatic breadcrumb whenever
//! the device has moved at least `trail.min_auto_drop_distance_m` since the
//! previous automatic one. Callers add manual breadcrumbs and named waypoints
//! in between.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::geo::Coordinate;
use crate::gpx::{self, GpxDocument, GpxPoint};
use crate::ids::new_id;
use crate::location::{Accuracy, Locator, PositionSample};
use crate::storage::{CollectionStore, KeyValueStore, Record, TRAILS_KEY};
use crate::task::TaskHandle;

/// How a breadcrumb was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreadcrumbType {
    /// Dropped by the trail timer.
    Auto,
    /// Dropped by the user.
    #[default]
    Manual,
    /// A named point of interest.
    Waypoint,
}

impl fmt::Display for BreadcrumbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Manual => write!(f, "manual"),
            Self::Waypoint => write!(f, "waypoint"),
        }
    }
}

/// A single point on a trail. Never changed after it is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
    /// Unique breadcrumb id.
    pub id: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// When the breadcrumb was dropped.
    pub timestamp: DateTime<Utc>,
    /// Altitude in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Free-form note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// How the breadcrumb was dropped.
    #[serde(rename = "type")]
    pub kind: BreadcrumbType,
    /// Display icon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl Breadcrumb {
    /// The breadcrumb's coordinates.
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// What the caller supplies when dropping a breadcrumb.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BreadcrumbInput {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters.
    pub altitude: Option<f64>,
    /// Free-form note.
    pub note: Option<String>,
    /// Kind of breadcrumb; manual when unset.
    pub kind: Option<BreadcrumbType>,
    /// Display icon.
    pub icon: Option<String>,
}

impl BreadcrumbInput {
    /// A breadcrumb at the given coordinates.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            ..Self::default()
        }
    }

    /// A breadcrumb at a sampled position, carrying its altitude.
    #[must_use]
    pub fn from_sample(sample: &PositionSample) -> Self {
        Self {
            altitude: sample.altitude,
            ..Self::new(sample.latitude, sample.longitude)
        }
    }

    /// Set the altitude.
    #[must_use]
    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    /// Attach a note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Set the kind.
    #[must_use]
    pub fn with_kind(mut self, kind: BreadcrumbType) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Set the icon.
    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    fn into_breadcrumb(self) -> Breadcrumb {
        Breadcrumb {
            id: new_id("crumb"),
            latitude: self.latitude,
            longitude: self.longitude,
            timestamp: Utc::now(),
            altitude: self.altitude,
            note: self.note,
            kind: self.kind.unwrap_or_default(),
            icon: self.icon,
        }
    }
}

/// An ordered list of breadcrumbs for one adventure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreadcrumbTrail {
    /// Unique trail id.
    pub id: String,
    /// The adventure this trail belongs to.
    pub adventure_id: String,
    /// Breadcrumbs in the order they were dropped.
    pub breadcrumbs: Vec<Breadcrumb>,
    /// When the trail was started.
    pub start_time: DateTime<Utc>,
    /// When the trail last changed.
    pub last_update: DateTime<Utc>,
    /// Whether the trail is still recording.
    pub is_active: bool,
}

impl BreadcrumbTrail {
    fn new(adventure_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("trail"),
            adventure_id,
            breadcrumbs: Vec::new(),
            start_time: now,
            last_update: now,
            is_active: true,
        }
    }

    /// Render the trail as a GPX document with one track of breadcrumbs.
    #[must_use]
    pub fn to_gpx_document(&self) -> GpxDocument {
        let name = format!("Breadcrumb Trail {}", self.adventure_id);
        GpxDocument {
            name: Some(name.clone()),
            description: None,
            time: Some(self.start_time),
            waypoints: Vec::new(),
            track_name: Some(name),
            track_description: None,
            track_points: self
                .breadcrumbs
                .iter()
                .map(|crumb| GpxPoint {
                    elevation: crumb.altitude,
                    time: Some(crumb.timestamp),
                    name: crumb.note.clone(),
                    symbol: crumb.icon.clone(),
                    ..GpxPoint::new(crumb.latitude, crumb.longitude)
                })
                .collect(),
        }
    }
}

impl Record for BreadcrumbTrail {
    fn record_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Default)]
struct TrailState {
    active: Option<BreadcrumbTrail>,
    /// Position of the last automatic breadcrumb.
    last_auto: Option<Coordinate>,
    timer: Option<TaskHandle>,
}

impl TrailState {
    fn clear(&mut self) -> Option<BreadcrumbTrail> {
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
        self.last_auto = None;
        self.active.take()
    }
}

#[derive(Debug)]
struct Inner {
    locator: Locator,
    trails: CollectionStore<BreadcrumbTrail>,
    config: Config,
    state: Mutex<TrailState>,
}

/// Records breadcrumb trails. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct BreadcrumbTrailManager {
    inner: Arc<Inner>,
}

impl BreadcrumbTrailManager {
    /// Create a manager persisting into `store`.
    #[must_use]
    pub fn new(locator: Locator, store: Arc<dyn KeyValueStore>, config: &Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                locator,
                trails: CollectionStore::new(store, TRAILS_KEY),
                config: config.clone(),
                state: Mutex::new(TrailState::default()),
            }),
        }
    }

    /// Start a new trail for `adventure_id` and begin automatic drops.
    ///
    /// Starting while another trail is active replaces it in memory and
    /// cancels its timer. The replaced trail is not stopped: its stored
    /// record keeps `is_active` set until it is deleted.
    pub async fn start_trail(&self, adventure_id: impl Into<String>) -> BreadcrumbTrail {
        let trail = BreadcrumbTrail::new(adventure_id.into());

        {
            let mut state = self.inner.state.lock().await;
            if let Some(previous) = state.clear() {
                info!(
                    previous = %previous.id,
                    replacement = %trail.id,
                    "Replacing active trail without stopping it"
                );
            }
            state.active = Some(trail.clone());
            state.timer = Some(self.spawn_auto_drop(trail.id.clone()));
        }

        self.persist(&trail).await;
        info!(trail_id = %trail.id, adventure_id = %trail.adventure_id, "Trail started");
        trail
    }

    /// Stop the active trail, returning it finalized.
    pub async fn stop_trail(&self) -> Option<BreadcrumbTrail> {
        let mut trail = self.inner.state.lock().await.clear()?;
        trail.is_active = false;
        trail.last_update = Utc::now();
        self.persist(&trail).await;
        info!(
            trail_id = %trail.id,
            breadcrumbs = trail.breadcrumbs.len(),
            "Trail stopped"
        );
        Some(trail)
    }

    /// Append a breadcrumb to the active trail.
    ///
    /// Returns `None` when no trail is active.
    pub async fn drop_breadcrumb(&self, input: BreadcrumbInput) -> Option<Breadcrumb> {
        let mut state = self.inner.state.lock().await;
        let (crumb, snapshot) = Self::append(&mut state, input)?;
        drop(state);

        self.persist(&snapshot).await;
        Some(crumb)
    }

    /// Read the current position and drop an automatic breadcrumb if the
    /// device moved far enough since the last one.
    ///
    /// This is what the trail timer runs on every tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the position cannot be read.
    pub async fn auto_drop_tick(&self) -> Result<Option<Breadcrumb>> {
        self.auto_drop(None).await
    }

    async fn auto_drop(&self, trail_id: Option<&str>) -> Result<Option<Breadcrumb>> {
        let sample = self.inner.locator.current_position(Accuracy::High).await?;
        let position = sample.coordinate();

        let mut state = self.inner.state.lock().await;
        match (&state.active, trail_id) {
            (None, _) => return Ok(None),
            (Some(active), Some(expected)) if active.id != expected => return Ok(None),
            _ => {}
        }

        if let Some(last) = state.last_auto {
            let moved = last.distance_to(&position);
            if moved < self.inner.config.trail.min_auto_drop_distance_m {
                trace!(moved_m = moved, "Too close to last automatic breadcrumb");
                return Ok(None);
            }
        }

        let input = BreadcrumbInput::from_sample(&sample).with_kind(BreadcrumbType::Auto);
        let Some((crumb, snapshot)) = Self::append(&mut state, input) else {
            return Ok(None);
        };
        state.last_auto = Some(position);
        drop(state);

        self.persist(&snapshot).await;
        Ok(Some(crumb))
    }

    /// Breadcrumbs of the active trail, newest first.
    pub async fn backtrack_route(&self) -> Vec<Breadcrumb> {
        let state = self.inner.state.lock().await;
        state
            .active
            .as_ref()
            .map(|trail| trail.breadcrumbs.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Distance in meters from the current position to the first breadcrumb.
    ///
    /// Returns `None` when no trail is active or it has no breadcrumbs.
    ///
    /// # Errors
    ///
    /// Returns an error if the position cannot be read.
    pub async fn distance_to_start(&self) -> Result<Option<f64>> {
        let start = {
            let state = self.inner.state.lock().await;
            match state.active.as_ref().and_then(|t| t.breadcrumbs.first()) {
                Some(first) => first.coordinate(),
                None => return Ok(None),
            }
        };

        let here = self.inner.locator.current_position(Accuracy::High).await?;
        Ok(Some(here.coordinate().distance_to(&start)))
    }

    /// Render a trail as GPX.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no trail has this id.
    pub async fn export_to_gpx(&self, trail_id: &str) -> Result<String> {
        let trail = self
            .trail(trail_id)
            .await
            .ok_or_else(|| Error::not_found("trail", trail_id))?;
        debug!(trail_id, breadcrumbs = trail.breadcrumbs.len(), "Exporting trail");
        Ok(gpx::write_gpx(&trail.to_gpx_document()))
    }

    /// All stored trails.
    pub async fn trails(&self) -> Vec<BreadcrumbTrail> {
        self.inner.trails.load_all().await
    }

    /// A trail by id, preferring the in-memory active copy.
    pub async fn trail(&self, trail_id: &str) -> Option<BreadcrumbTrail> {
        if let Some(active) = self.active_trail().await {
            if active.id == trail_id {
                return Some(active);
            }
        }
        self.inner.trails.find(trail_id).await
    }

    /// Delete a trail. Deleting the active trail stops it first.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be written.
    pub async fn delete_trail(&self, trail_id: &str) -> Result<bool> {
        {
            let mut state = self.inner.state.lock().await;
            if state.active.as_ref().is_some_and(|t| t.id == trail_id) {
                state.clear();
            }
        }
        let removed = self.inner.trails.remove(trail_id).await?;
        if removed {
            info!(trail_id, "Trail deleted");
        }
        Ok(removed)
    }

    /// A snapshot of the active trail.
    pub async fn active_trail(&self) -> Option<BreadcrumbTrail> {
        self.inner.state.lock().await.active.clone()
    }

    fn append(
        state: &mut TrailState,
        input: BreadcrumbInput,
    ) -> Option<(Breadcrumb, BreadcrumbTrail)> {
        let Some(trail) = state.active.as_mut() else {
            warn!("No active trail, breadcrumb not dropped");
            return None;
        };

        let crumb = input.into_breadcrumb();
        trail.last_update = crumb.timestamp;
        trail.breadcrumbs.push(crumb.clone());
        debug!(
            trail_id = %trail.id,
            kind = %crumb.kind,
            count = trail.breadcrumbs.len(),
            "Breadcrumb dropped"
        );
        Some((crumb, trail.clone()))
    }

    fn spawn_auto_drop(&self, trail_id: String) -> TaskHandle {
        let weak = Arc::downgrade(&self.inner);
        TaskHandle::every(
            "breadcrumb-auto-drop",
            self.inner.config.auto_drop_interval(),
            move || {
                let weak = weak.clone();
                let trail_id = trail_id.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return ControlFlow::Break(());
                    };
                    let manager = BreadcrumbTrailManager { inner };
                    if let Err(e) = manager.auto_drop(Some(&trail_id)).await {
                        warn!(trail_id = %trail_id, error = %e, "Automatic breadcrumb failed");
                    }
                    ControlFlow::Continue(())
                }
            },
        )
    }

    async fn persist(&self, trail: &BreadcrumbTrail) {
        if let Err(e) = self.inner.trails.upsert(trail).await {
            warn!(trail_id = %trail.id, error = %e, "Failed to persist trail");
        }
    }
}
