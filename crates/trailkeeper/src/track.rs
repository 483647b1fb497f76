//! Continuous GPX track recording.
//!
//! [`GpxTrackRecorder`] subscribes to the device position while a track is
//! active and folds each update into the track's running statistics. Finished
//! tracks are stored, exported as GPX files and handed to a [`ShareTarget`].

use std::fmt;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::geo;
use crate::gpx::{self, GpxDocument, GpxPoint};
use crate::ids::new_id;
use crate::location::{Accuracy, Locator, PositionSample, WatchOptions};
use crate::share::{ShareOptions, ShareTarget};
use crate::storage::{CollectionStore, KeyValueStore, Record, TRACKS_KEY};
use crate::task::TaskHandle;

/// A recorded position on a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Elevation in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    /// Time of the fix. GPX files carry it to the millisecond.
    pub timestamp: DateTime<Utc>,
    /// Speed in meters per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Heading in degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

impl From<&PositionSample> for TrackPoint {
    fn from(sample: &PositionSample) -> Self {
        Self {
            latitude: sample.latitude,
            longitude: sample.longitude,
            elevation: sample.altitude,
            timestamp: sample.timestamp,
            speed: sample.speed,
            heading: sample.heading,
        }
    }
}

/// A named point of interest on a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Elevation in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    /// Waypoint name.
    pub name: String,
    /// Longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the waypoint was marked.
    pub timestamp: DateTime<Utc>,
    /// Display symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

/// A recorded track with its running statistics.
///
/// `total_distance` is the sum of the legs between consecutive points.
/// The elevation bounds stay `None` until a point carrying elevation arrives.
///
/// Timestamps survive a GPX export and import only to millisecond precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpxTrack {
    /// Unique track id.
    pub id: String,
    /// Track name.
    pub name: String,
    /// Longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When recording started.
    pub start_time: DateTime<Utc>,
    /// When recording stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Recorded points in order.
    pub track_points: Vec<TrackPoint>,
    /// Marked waypoints in order.
    pub waypoints: Vec<Waypoint>,
    /// Distance travelled in meters.
    pub total_distance: f64,
    /// Time from start to stop in milliseconds.
    pub total_duration_ms: i64,
    /// Highest point speed in meters per second.
    pub max_speed: f64,
    /// Highest elevation seen, in meters.
    #[serde(default)]
    pub max_elevation: Option<f64>,
    /// Lowest elevation seen, in meters.
    #[serde(default)]
    pub min_elevation: Option<f64>,
    /// Mean point speed in meters per second, set when recording stops.
    pub average_speed: f64,
}

impl GpxTrack {
    /// Create an empty track starting now.
    #[must_use]
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: new_id("track"),
            name: name.into(),
            description,
            start_time: Utc::now(),
            end_time: None,
            track_points: Vec::new(),
            waypoints: Vec::new(),
            total_distance: 0.0,
            total_duration_ms: 0,
            max_speed: 0.0,
            max_elevation: None,
            min_elevation: None,
            average_speed: 0.0,
        }
    }

    /// Append a point and update distance, speed and elevation bounds.
    pub fn record_point(&mut self, point: TrackPoint) {
        if let Some(previous) = self.track_points.last() {
            self.total_distance += geo::distance_meters(
                previous.latitude,
                previous.longitude,
                point.latitude,
                point.longitude,
            );
        }
        if let Some(speed) = point.speed {
            self.max_speed = self.max_speed.max(speed);
        }
        if let Some(ele) = point.elevation {
            self.max_elevation = Some(self.max_elevation.map_or(ele, |max| max.max(ele)));
            self.min_elevation = Some(self.min_elevation.map_or(ele, |min| min.min(ele)));
        }
        self.track_points.push(point);
    }

    /// Close the track at `end_time` and compute its duration and mean speed.
    pub fn finalize(&mut self, end_time: DateTime<Utc>) {
        self.end_time = Some(end_time);
        self.total_duration_ms = (end_time - self.start_time).num_milliseconds();
        self.average_speed = self.mean_point_speed();
    }

    /// Mean of all point speeds. Points without a speed count as zero.
    #[must_use]
    pub fn mean_point_speed(&self) -> f64 {
        if self.track_points.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .track_points
            .iter()
            .map(|p| p.speed.unwrap_or(0.0))
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let count = self.track_points.len() as f64;
        sum / count
    }

    /// Summary statistics.
    #[must_use]
    pub fn stats(&self) -> TrackStats {
        TrackStats {
            points: self.track_points.len(),
            waypoints: self.waypoints.len(),
            distance_m: self.total_distance,
            duration: chrono::Duration::milliseconds(self.total_duration_ms),
            max_speed: self.max_speed,
            average_speed: self.average_speed,
            max_elevation: self.max_elevation,
            min_elevation: self.min_elevation,
        }
    }

    /// The track as a GPX document.
    #[must_use]
    pub fn to_gpx_document(&self) -> GpxDocument {
        GpxDocument {
            name: Some(self.name.clone()),
            description: self.description.clone(),
            time: Some(self.start_time),
            waypoints: self
                .waypoints
                .iter()
                .map(|wp| GpxPoint {
                    elevation: wp.elevation,
                    time: Some(wp.timestamp),
                    name: Some(wp.name.clone()),
                    description: wp.description.clone(),
                    symbol: wp.symbol.clone(),
                    ..GpxPoint::new(wp.latitude, wp.longitude)
                })
                .collect(),
            track_name: Some(self.name.clone()),
            track_description: self.description.clone(),
            track_points: self
                .track_points
                .iter()
                .map(|p| GpxPoint {
                    elevation: p.elevation,
                    time: Some(p.timestamp),
                    speed: p.speed,
                    course: p.heading,
                    ..GpxPoint::new(p.latitude, p.longitude)
                })
                .collect(),
        }
    }

    /// Build a finished track from a parsed GPX document.
    ///
    /// Statistics are recomputed from the points. Points without a time take
    /// the document time, or the import time when the document has none.
    #[must_use]
    pub fn from_gpx_document(doc: &GpxDocument) -> Self {
        let fallback_time = doc.time.unwrap_or_else(Utc::now);
        let name = doc
            .name
            .clone()
            .or_else(|| doc.track_name.clone())
            .unwrap_or_else(|| "Imported Track".to_string());
        let description = doc
            .description
            .clone()
            .or_else(|| doc.track_description.clone());

        let mut track = Self::new(name, description);
        track.start_time = doc
            .track_points
            .first()
            .and_then(|p| p.time)
            .unwrap_or(fallback_time);

        for point in &doc.track_points {
            track.record_point(TrackPoint {
                latitude: point.latitude,
                longitude: point.longitude,
                elevation: point.elevation,
                timestamp: point.time.unwrap_or(fallback_time),
                speed: point.speed,
                heading: point.course,
            });
        }

        track.waypoints = doc
            .waypoints
            .iter()
            .map(|wp| Waypoint {
                latitude: wp.latitude,
                longitude: wp.longitude,
                elevation: wp.elevation,
                name: wp.name.clone().unwrap_or_default(),
                description: wp.description.clone(),
                timestamp: wp.time.unwrap_or(fallback_time),
                symbol: wp.symbol.clone(),
            })
            .collect();

        let end_time = track
            .track_points
            .last()
            .map_or(track.start_time, |p| p.timestamp);
        track.finalize(end_time);
        track
    }
}

impl Record for GpxTrack {
    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Summary of a track for display.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackStats {
    /// Number of track points.
    pub points: usize,
    /// Number of waypoints.
    pub waypoints: usize,
    /// Distance in meters.
    pub distance_m: f64,
    /// Recording duration.
    pub duration: chrono::Duration,
    /// Highest speed in meters per second.
    pub max_speed: f64,
    /// Mean speed in meters per second.
    pub average_speed: f64,
    /// Highest elevation in meters.
    pub max_elevation: Option<f64>,
    /// Lowest elevation in meters.
    pub min_elevation: Option<f64>,
}

impl TrackStats {
    /// Distance in kilometers.
    #[must_use]
    pub fn distance_km(&self) -> f64 {
        self.distance_m / 1000.0
    }

    /// Duration as `HH:MM:SS`.
    #[must_use]
    pub fn formatted_duration(&self) -> String {
        let total = self.duration.num_seconds().max(0);
        format!(
            "{:02}:{:02}:{:02}",
            total / 3600,
            (total % 3600) / 60,
            total % 60
        )
    }
}

impl fmt::Display for TrackStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} points, {} waypoints, {:.2} km in {}, max {:.1} m/s, avg {:.1} m/s",
            self.points,
            self.waypoints,
            self.distance_km(),
            self.formatted_duration(),
            self.max_speed,
            self.average_speed
        )?;
        if let (Some(min), Some(max)) = (self.min_elevation, self.max_elevation) {
            write!(f, ", elevation {min:.0}-{max:.0} m")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RecorderState {
    active: Option<GpxTrack>,
    paused: bool,
    watch: Option<TaskHandle>,
}

impl RecorderState {
    fn clear(&mut self) -> Option<GpxTrack> {
        if let Some(mut watch) = self.watch.take() {
            watch.cancel();
        }
        self.paused = false;
        self.active.take()
    }
}

#[derive(Debug)]
struct Inner {
    locator: Locator,
    tracks: CollectionStore<GpxTrack>,
    share: Arc<dyn ShareTarget>,
    config: Config,
    state: Mutex<RecorderState>,
}

/// Records GPX tracks. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct GpxTrackRecorder {
    inner: Arc<Inner>,
}

impl GpxTrackRecorder {
    /// Create a recorder persisting into `store` and sharing through `share`.
    #[must_use]
    pub fn new(
        locator: Locator,
        store: Arc<dyn KeyValueStore>,
        share: Arc<dyn ShareTarget>,
        config: &Config,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                locator,
                tracks: CollectionStore::new(store, TRACKS_KEY),
                share,
                config: config.clone(),
                state: Mutex::new(RecorderState::default()),
            }),
        }
    }

    /// Start recording a new track.
    ///
    /// A track already being recorded is stopped and stored first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] without location permission, or
    /// an error if the position watch cannot be started. The recorder is
    /// left idle on error.
    pub async fn start_recording(
        &self,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Result<GpxTrack> {
        self.inner.locator.ensure_permission().await?;

        if let Some(previous) = self.stop_recording().await {
            info!(track_id = %previous.id, "Stopped previous track before starting a new one");
        }

        let track = GpxTrack::new(name, description);
        let watch = self.open_watch(&track.id).await?;

        let mut state = self.inner.state.lock().await;
        state.clear();
        state.active = Some(track.clone());
        state.watch = Some(watch);
        drop(state);

        info!(track_id = %track.id, name = %track.name, "Recording started");
        Ok(track)
    }

    /// Fold a position update into the active track.
    ///
    /// Returns `false` when nothing is recording or recording is paused.
    pub async fn record_position(&self, sample: PositionSample) -> bool {
        let mut state = self.inner.state.lock().await;
        if state.paused {
            return false;
        }
        let Some(track) = state.active.as_mut() else {
            return false;
        };
        track.record_point(TrackPoint::from(&sample));
        debug!(
            track_id = %track.id,
            points = track.track_points.len(),
            distance_m = track.total_distance,
            "Track point recorded"
        );
        true
    }

    /// Stop the position watch, keeping the active track and its statistics.
    ///
    /// Returns `false` when nothing is recording or it is already paused.
    pub async fn pause_recording(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        if state.active.is_none() || state.paused {
            return false;
        }
        if let Some(mut watch) = state.watch.take() {
            watch.cancel();
        }
        state.paused = true;
        info!("Recording paused");
        true
    }

    /// Restart the position watch for a paused track.
    ///
    /// Returns `false` when there is no paused track.
    ///
    /// # Errors
    ///
    /// Returns an error if the position watch cannot be started.
    pub async fn resume_recording(&self) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        let track_id = match &state.active {
            Some(track) if state.paused => track.id.clone(),
            _ => return Ok(false),
        };

        state.watch = Some(self.open_watch(&track_id).await?);
        state.paused = false;
        info!(track_id = %track_id, "Recording resumed");
        Ok(true)
    }

    /// Stop recording and store the finished track.
    pub async fn stop_recording(&self) -> Option<GpxTrack> {
        let mut track = self.inner.state.lock().await.clear()?;
        track.finalize(Utc::now());
        self.persist(&track).await;
        info!(
            track_id = %track.id,
            points = track.track_points.len(),
            distance_m = track.total_distance,
            "Recording stopped"
        );
        Some(track)
    }

    /// Mark a waypoint at the current position on the active track.
    ///
    /// The waypoint is stored with the track when it stops or is saved.
    /// Returns `None` when nothing is recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the position cannot be read.
    pub async fn add_waypoint(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        symbol: Option<String>,
    ) -> Result<Option<Waypoint>> {
        if self.inner.state.lock().await.active.is_none() {
            return Ok(None);
        }

        let here = self.inner.locator.current_position(Accuracy::High).await?;
        let waypoint = Waypoint {
            latitude: here.latitude,
            longitude: here.longitude,
            elevation: here.altitude,
            name: name.into(),
            description,
            timestamp: here.timestamp,
            symbol,
        };

        let mut state = self.inner.state.lock().await;
        let Some(track) = state.active.as_mut() else {
            return Ok(None);
        };
        track.waypoints.push(waypoint.clone());
        debug!(track_id = %track.id, name = %waypoint.name, "Waypoint added");
        Ok(Some(waypoint))
    }

    /// Store the active track as it is, without stopping it.
    ///
    /// # Errors
    ///
    /// Returns an error if the track cannot be written.
    pub async fn save_active_track(&self) -> Result<Option<GpxTrack>> {
        let Some(track) = self.active_track().await else {
            return Ok(None);
        };
        self.inner.tracks.upsert(&track).await?;
        Ok(Some(track))
    }

    /// Render a track as GPX.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no track has this id.
    pub async fn export_to_gpx(&self, track_id: &str) -> Result<String> {
        let track = self.require(track_id).await?;
        Ok(gpx::write_gpx(&track.to_gpx_document()))
    }

    /// Write a track as a GPX file in the export directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id, or an I/O error.
    pub async fn save_gpx_file(&self, track_id: &str) -> Result<PathBuf> {
        let track = self.require(track_id).await?;
        self.write_file(&track).await
    }

    /// Write a track as a GPX file and hand it to the share target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SharingUnavailable`] if the target is unavailable,
    /// [`Error::NotFound`] for an unknown id, or the hand-off failure.
    pub async fn share_gpx(&self, track_id: &str) -> Result<PathBuf> {
        if !self.inner.share.is_available().await {
            return Err(Error::SharingUnavailable);
        }

        let track = self.require(track_id).await?;
        let path = self.write_file(&track).await?;
        self.inner
            .share
            .share(&path, &ShareOptions::gpx(format!("Share {}", track.name)))
            .await?;
        info!(track_id, file = %path.display(), "Track shared");
        Ok(path)
    }

    /// Parse a GPX document and store it as a new track.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid GPX.
    pub async fn import_gpx(&self, xml: &str) -> Result<GpxTrack> {
        let doc = gpx::parse_gpx(xml)?;
        let track = GpxTrack::from_gpx_document(&doc);
        self.persist(&track).await;
        info!(
            track_id = %track.id,
            points = track.track_points.len(),
            waypoints = track.waypoints.len(),
            "Track imported"
        );
        Ok(track)
    }

    /// All stored tracks.
    pub async fn tracks(&self) -> Vec<GpxTrack> {
        self.inner.tracks.load_all().await
    }

    /// A track by id, preferring the in-memory active copy.
    pub async fn track(&self, track_id: &str) -> Option<GpxTrack> {
        if let Some(active) = self.active_track().await {
            if active.id == track_id {
                return Some(active);
            }
        }
        self.inner.tracks.find(track_id).await
    }

    /// Delete a track. Deleting the active track discards the recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be written.
    pub async fn delete_track(&self, track_id: &str) -> Result<bool> {
        {
            let mut state = self.inner.state.lock().await;
            if state.active.as_ref().is_some_and(|t| t.id == track_id) {
                state.clear();
            }
        }
        self.inner.tracks.remove(track_id).await
    }

    /// Check if a track is recording and not paused.
    pub async fn is_recording(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.active.is_some() && !state.paused
    }

    /// Check if the active track is paused.
    pub async fn is_paused(&self) -> bool {
        self.inner.state.lock().await.paused
    }

    /// A snapshot of the active track.
    pub async fn active_track(&self) -> Option<GpxTrack> {
        self.inner.state.lock().await.active.clone()
    }

    async fn require(&self, track_id: &str) -> Result<GpxTrack> {
        self.track(track_id)
            .await
            .ok_or_else(|| Error::not_found("track", track_id))
    }

    async fn write_file(&self, track: &GpxTrack) -> Result<PathBuf> {
        let dir = self.inner.config.export_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| Error::DirectoryCreate {
                path: dir.clone(),
                source,
            })?;

        let path = dir.join(gpx_file_name(&track.name, Utc::now()));
        tokio::fs::write(&path, gpx::write_gpx(&track.to_gpx_document())).await?;
        debug!(track_id = %track.id, file = %path.display(), "GPX file written");
        Ok(path)
    }

    async fn open_watch(&self, track_id: &str) -> Result<TaskHandle> {
        let watch = self
            .inner
            .locator
            .watch(WatchOptions {
                accuracy: Accuracy::BestForNavigation,
                min_interval: self.inner.config.track_interval(),
                min_distance_m: self.inner.config.track.min_distance_m,
            })
            .await?;

        let weak = Arc::downgrade(&self.inner);
        let track_id = track_id.to_string();
        Ok(TaskHandle::consume("track-recorder", watch, move |sample| {
            let weak = weak.clone();
            let track_id = track_id.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                let recorder = GpxTrackRecorder { inner };
                if !recorder.record_position(sample).await {
                    debug!(track_id = %track_id, "Position update ignored");
                }
                ControlFlow::Continue(())
            }
        }))
    }

    async fn persist(&self, track: &GpxTrack) {
        if let Err(e) = self.inner.tracks.upsert(track).await {
            warn!(track_id = %track.id, error = %e, "Failed to persist track");
        }
    }
}

/// File name for an exported track: the name with every character other
/// than ASCII letters and digits replaced by `_`, then the export time.
fn gpx_file_name(name: &str, at: DateTime<Utc>) -> String {
    let safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{safe}_{}.gpx", at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{SubsecRound, TimeZone};

    use super::*;
    use crate::location::{PermissionStatus, SimulatedLocationProvider};
    use crate::share::UnavailableShareTarget;
    use crate::storage::MemoryStore;

    #[derive(Debug, Default)]
    struct RecordingShareTarget {
        shared: StdMutex<Vec<(PathBuf, ShareOptions)>>,
    }

    #[async_trait]
    impl ShareTarget for RecordingShareTarget {
        async fn is_available(&self) -> bool {
            true
        }

        async fn share(&self, path: &Path, options: &ShareOptions) -> Result<()> {
            self.shared
                .lock()
                .unwrap()
                .push((path.to_path_buf(), options.clone()));
            Ok(())
        }
    }

    struct Fixture {
        recorder: GpxTrackRecorder,
        provider: Arc<SimulatedLocationProvider>,
        share: Arc<RecordingShareTarget>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.export_dir = Some(dir.path().join("gpx"));

        let provider = Arc::new(SimulatedLocationProvider::new());
        let share = Arc::new(RecordingShareTarget::default());
        let recorder = GpxTrackRecorder::new(
            Locator::new(provider.clone(), None),
            Arc::new(MemoryStore::new()),
            share.clone(),
            &config,
        );
        Fixture {
            recorder,
            provider,
            share,
            _dir: dir,
        }
    }

    fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn point(lat: f64, lon: f64) -> TrackPoint {
        TrackPoint {
            latitude: lat,
            longitude: lon,
            elevation: None,
            timestamp: Utc::now(),
            speed: None,
            heading: None,
        }
    }

    #[test]
    fn test_distance_is_sum_of_legs() {
        let mut track = GpxTrack::new("legs", None);
        track.record_point(point(0.0, 0.0));
        track.record_point(point(0.0, 0.001));
        track.record_point(point(0.0, 0.002));

        let legs = geo::distance_meters(0.0, 0.0, 0.0, 0.001)
            + geo::distance_meters(0.0, 0.001, 0.0, 0.002);
        assert!((track.total_distance - legs).abs() < 1e-9);
    }

    #[test]
    fn test_distance_counts_every_leg_of_a_return_trip() {
        let mut track = GpxTrack::new("out and back", None);
        track.record_point(point(0.0, 0.0));
        track.record_point(point(0.0, 0.01));
        track.record_point(point(0.0, 0.0));

        let leg = geo::distance_meters(0.0, 0.0, 0.0, 0.01);
        assert!((track.total_distance - 2.0 * leg).abs() < 1e-6);
    }

    #[test]
    fn test_elevation_bounds() {
        let mut track = GpxTrack::new("hills", None);
        track.record_point(point(0.0, 0.0));
        assert_eq!(track.max_elevation, None);
        assert_eq!(track.min_elevation, None);

        for ele in [120.0, 80.0, 150.0] {
            track.record_point(TrackPoint {
                elevation: Some(ele),
                ..point(0.0, 0.0)
            });
        }
        assert_eq!(track.max_elevation, Some(150.0));
        assert_eq!(track.min_elevation, Some(80.0));
    }

    #[test]
    fn test_average_speed_counts_missing_speed_as_zero() {
        let mut track = GpxTrack::new("speeds", None);
        for speed in [Some(2.0), None, Some(4.0)] {
            track.record_point(TrackPoint {
                speed,
                ..point(0.0, 0.0)
            });
        }
        assert!((track.max_speed - 4.0).abs() < f64::EPSILON);

        track.finalize(track.start_time + chrono::Duration::seconds(90));
        assert!((track.average_speed - 2.0).abs() < f64::EPSILON);
        assert_eq!(track.total_duration_ms, 90_000);
    }

    #[tokio::test]
    async fn test_live_timestamps_round_trip_to_the_millisecond() {
        let f = fixture();
        f.recorder.start_recording("Live", None).await.unwrap();
        for lon in [0.0, 0.001, 0.002] {
            f.recorder.record_position(PositionSample::new(1.0, lon)).await;
        }
        let original = f.recorder.stop_recording().await.unwrap();

        let xml = f.recorder.export_to_gpx(&original.id).await.unwrap();
        let imported = f.recorder.import_gpx(&xml).await.unwrap();

        assert_eq!(imported.track_points.len(), original.track_points.len());
        for (a, b) in imported.track_points.iter().zip(&original.track_points) {
            assert_eq!(a.timestamp, b.timestamp.trunc_subsecs(3));
        }
    }

    #[test]
    fn test_empty_track_finalizes_to_zero_speed() {
        let mut track = GpxTrack::new("empty", None);
        track.finalize(track.start_time);
        assert!(track.average_speed.abs() < f64::EPSILON);
        assert_eq!(track.total_duration_ms, 0);
    }

    #[test]
    fn test_gpx_round_trip_preserves_points_and_waypoints() {
        let mut track = GpxTrack::new("Ridge Loop", Some("Clockwise".to_string()));
        track.start_time = at_ms(1_717_228_800_000);
        for (i, lon) in [0.0, 0.001, 0.002].into_iter().enumerate() {
            let i = i64::try_from(i).unwrap();
            track.record_point(TrackPoint {
                latitude: 45.123_456_7,
                longitude: lon,
                elevation: Some(100.5 + lon),
                timestamp: at_ms(1_717_228_800_000 + i * 1_250),
                speed: Some(3.25),
                heading: Some(87.5),
            });
        }
        track.waypoints.push(Waypoint {
            latitude: 45.2,
            longitude: -0.5,
            elevation: Some(98.0),
            name: "A & B <test>".to_string(),
            description: Some("Water source".to_string()),
            timestamp: at_ms(1_717_228_801_000),
            symbol: Some("Drinking Water".to_string()),
        });

        let xml = gpx::write_gpx(&track.to_gpx_document());
        assert!(xml.contains("A &amp; B &lt;test&gt;"));

        let imported = GpxTrack::from_gpx_document(&gpx::parse_gpx(&xml).unwrap());
        assert_eq!(imported.name, "Ridge Loop");
        assert_eq!(imported.description.as_deref(), Some("Clockwise"));
        assert_eq!(imported.track_points, track.track_points);
        assert_eq!(imported.waypoints, track.waypoints);
        assert!((imported.total_distance - track.total_distance).abs() < 1e-6);
    }

    #[test]
    fn test_import_recomputes_statistics() {
        let xml = r#"<gpx version="1.1">
  <trk><name>Imported</name><trkseg>
    <trkpt lat="0" lon="0"><ele>10</ele><time>2024-01-01T00:00:00Z</time><speed>2</speed></trkpt>
    <trkpt lat="0" lon="0.001"><ele>30</ele><time>2024-01-01T00:01:00Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;
        let track = GpxTrack::from_gpx_document(&gpx::parse_gpx(xml).unwrap());

        assert_eq!(track.name, "Imported");
        assert_eq!(track.total_duration_ms, 60_000);
        assert_eq!(track.max_elevation, Some(30.0));
        assert_eq!(track.min_elevation, Some(10.0));
        assert!((track.max_speed - 2.0).abs() < f64::EPSILON);
        assert!((track.average_speed - 1.0).abs() < f64::EPSILON);
        assert!((track.total_distance - geo::distance_meters(0.0, 0.0, 0.0, 0.001)).abs() < 1e-9);
    }

    #[test]
    fn test_stats_formatting() {
        let stats = TrackStats {
            points: 12,
            waypoints: 1,
            distance_m: 1_234.0,
            duration: chrono::Duration::seconds(3_725),
            max_speed: 5.0,
            average_speed: 2.5,
            max_elevation: Some(200.0),
            min_elevation: Some(150.0),
        };
        assert_eq!(stats.formatted_duration(), "01:02:05");
        assert!((stats.distance_km() - 1.234).abs() < 1e-12);
        let text = stats.to_string();
        assert!(text.contains("1.23 km"));
        assert!(text.contains("elevation 150-200 m"));
    }

    #[test]
    fn test_gpx_file_name_is_sanitized() {
        let name = gpx_file_name("Morning ride: café/loop", at_ms(1_700_000_000_000));
        assert_eq!(name, "Morning_ride__caf__loop_1700000000000.gpx");
    }

    async fn wait_for_points(recorder: &GpxTrackRecorder, expected: usize) {
        for _ in 0..200 {
            let count = recorder.active_track().await.map(|t| t.track_points.len());
            if count == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("track never reached {expected} points");
    }

    #[tokio::test]
    async fn test_recording_follows_position_watch() {
        let f = fixture();
        let track = f.recorder.start_recording("Commute", None).await.unwrap();
        assert!(f.recorder.is_recording().await);

        let options = f.provider.last_watch_options().unwrap();
        assert_eq!(options.accuracy, Accuracy::BestForNavigation);
        assert_eq!(options.min_interval, Duration::from_secs(1));
        assert!((options.min_distance_m - 5.0).abs() < f64::EPSILON);

        f.provider.push(PositionSample::new(0.0, 0.0).with_speed(1.0)).await;
        f.provider.push(PositionSample::new(0.0, 0.001).with_speed(3.0)).await;
        wait_for_points(&f.recorder, 2).await;

        let stopped = f.recorder.stop_recording().await.unwrap();
        assert_eq!(stopped.id, track.id);
        assert!(stopped.end_time.is_some());
        assert!((stopped.average_speed - 2.0).abs() < f64::EPSILON);
        assert!(!f.recorder.is_recording().await);
        assert_eq!(f.provider.active_watches(), 0);

        let stored = f.recorder.tracks().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].track_points.len(), 2);
    }

    #[tokio::test]
    async fn test_permission_denied_leaves_recorder_idle() {
        let f = fixture();
        f.provider.set_permission(PermissionStatus::Denied);

        let err = f.recorder.start_recording("Nope", None).await.unwrap_err();
        assert!(err.is_permission_error());
        assert!(f.recorder.active_track().await.is_none());
        assert_eq!(f.provider.active_watches(), 0);
    }

    #[tokio::test]
    async fn test_pause_and_resume_keep_statistics() {
        let f = fixture();
        f.recorder.start_recording("Hike", None).await.unwrap();
        assert!(f.recorder.record_position(PositionSample::new(0.0, 0.0)).await);
        assert!(f.recorder.record_position(PositionSample::new(0.0, 0.001)).await);
        let distance = f.recorder.active_track().await.unwrap().total_distance;

        assert!(f.recorder.pause_recording().await);
        assert!(!f.recorder.pause_recording().await);
        assert!(f.recorder.is_paused().await);
        assert!(!f.recorder.is_recording().await);
        assert_eq!(f.provider.active_watches(), 0);
        assert!(!f.recorder.record_position(PositionSample::new(1.0, 1.0)).await);

        let paused = f.recorder.active_track().await.unwrap();
        assert_eq!(paused.track_points.len(), 2);
        assert!((paused.total_distance - distance).abs() < f64::EPSILON);

        assert!(f.recorder.resume_recording().await.unwrap());
        assert!(!f.recorder.resume_recording().await.unwrap());
        assert!(f.recorder.is_recording().await);
        assert_eq!(f.provider.active_watches(), 1);
    }

    #[tokio::test]
    async fn test_stop_without_recording() {
        let f = fixture();
        assert!(f.recorder.stop_recording().await.is_none());
        assert!(!f.recorder.pause_recording().await);
        assert!(!f.recorder.resume_recording().await.unwrap());
    }

    #[tokio::test]
    async fn test_start_while_recording_stores_previous_track() {
        let f = fixture();
        let first = f.recorder.start_recording("First", None).await.unwrap();
        let second = f.recorder.start_recording("Second", None).await.unwrap();

        assert_eq!(f.recorder.active_track().await.unwrap().id, second.id);
        assert_eq!(f.provider.active_watches(), 1);
        let stored = f.recorder.tracks().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, first.id);
        assert!(stored[0].end_time.is_some());
    }

    #[tokio::test]
    async fn test_add_waypoint() {
        let f = fixture();
        assert!(f.recorder.add_waypoint("Early", None, None).await.unwrap().is_none());

        f.recorder.start_recording("Walk", None).await.unwrap();
        f.provider.set_position(PositionSample::new(12.0, 34.0).with_altitude(5.0));
        let waypoint = f
            .recorder
            .add_waypoint("Lookout", Some("Great view".to_string()), Some("Scenic".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(waypoint.elevation, Some(5.0));

        // Not stored until saved
        assert!(f.recorder.tracks().await.is_empty());
        let saved = f.recorder.save_active_track().await.unwrap().unwrap();
        assert_eq!(saved.waypoints, vec![waypoint]);
        assert_eq!(f.recorder.tracks().await.len(), 1);
        assert!(f.recorder.is_recording().await);
    }

    #[tokio::test]
    async fn test_export_unknown_track_not_found() {
        let f = fixture();
        assert!(f.recorder.export_to_gpx("track_missing").await.unwrap_err().is_not_found());
        assert!(f.recorder.save_gpx_file("track_missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_save_and_share_gpx_file() {
        let f = fixture();
        f.recorder.start_recording("Lake Loop", None).await.unwrap();
        f.recorder.record_position(PositionSample::new(1.0, 1.0)).await;
        let track = f.recorder.stop_recording().await.unwrap();

        let path = f.recorder.save_gpx_file(&track.id).await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("Lake_Loop_"));
        assert!(name.ends_with(".gpx"));
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(gpx::parse_gpx(&written).unwrap().track_points.len(), 1);

        let shared_path = f.recorder.share_gpx(&track.id).await.unwrap();
        let shared = f.share.shared.lock().unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].0, shared_path);
        assert_eq!(shared[0].1.mime_type, "application/gpx+xml");
        assert_eq!(shared[0].1.dialog_title.as_deref(), Some("Share Lake Loop"));
    }

    #[tokio::test]
    async fn test_share_fails_when_unavailable() {
        let recorder = GpxTrackRecorder::new(
            Locator::new(Arc::new(SimulatedLocationProvider::new()), None),
            Arc::new(MemoryStore::new()),
            Arc::new(UnavailableShareTarget),
            &Config::default(),
        );
        let err = recorder.share_gpx("anything").await.unwrap_err();
        assert!(matches!(err, Error::SharingUnavailable));
    }

    #[tokio::test]
    async fn test_import_stores_new_track() {
        let f = fixture();
        let xml = r#"<gpx><trk><trkseg><trkpt lat="1" lon="1"/><trkpt lat="1" lon="1.01"/></trkseg></trk></gpx>"#;
        let first = f.recorder.import_gpx(xml).await.unwrap();
        let second = f.recorder.import_gpx(xml).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.name, "Imported Track");
        assert_eq!(f.recorder.tracks().await.len(), 2);
        assert!(f.recorder.import_gpx("<kml/>").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_track() {
        let f = fixture();
        f.recorder.start_recording("Gone", None).await.unwrap();
        let track = f.recorder.stop_recording().await.unwrap();

        assert!(f.recorder.delete_track(&track.id).await.unwrap());
        assert!(f.recorder.track(&track.id).await.is_none());
    }
}
