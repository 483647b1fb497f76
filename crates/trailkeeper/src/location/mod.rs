//! Device position capability.
//!
//! The managers never talk to GPS hardware directly. They consume a
//! [`LocationProvider`], which offers one-shot reads and continuing watches,
//! through a [`Locator`] that adds permission handling and an optional
//! request timeout.

mod simulated;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::geo::Coordinate;

pub use simulated::SimulatedLocationProvider;

/// A single position fix reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude above sea level in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Ground speed in meters per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Heading in degrees from true north.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Horizontal accuracy radius in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// When the fix was taken.
    pub timestamp: DateTime<Utc>,
}

impl PositionSample {
    /// Create a sample at the given coordinates, timestamped now.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            speed: None,
            heading: None,
            accuracy: None,
            timestamp: Utc::now(),
        }
    }

    /// Set the altitude.
    #[must_use]
    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    /// Set the ground speed.
    #[must_use]
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Set the heading.
    #[must_use]
    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    /// Set the accuracy radius.
    #[must_use]
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The sample's coordinates.
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Requested accuracy of position fixes, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    /// Accurate to roughly three kilometers.
    Lowest,
    /// Accurate to roughly one kilometer.
    Low,
    /// Accurate to roughly a hundred meters.
    Balanced,
    /// Accurate to roughly ten meters.
    High,
    /// The best the device offers.
    Highest,
    /// Highest accuracy plus sensor fusion for navigation.
    BestForNavigation,
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lowest => write!(f, "lowest"),
            Self::Low => write!(f, "low"),
            Self::Balanced => write!(f, "balanced"),
            Self::High => write!(f, "high"),
            Self::Highest => write!(f, "highest"),
            Self::BestForNavigation => write!(f, "best_for_navigation"),
        }
    }
}

/// Outcome of a foreground location permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    /// Permission granted.
    Granted,
    /// Permission refused.
    Denied,
    /// The user has not answered yet.
    Undetermined,
}

/// Filters for a continuing position watch.
///
/// The provider emits an update when either threshold is crossed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    /// Requested accuracy.
    pub accuracy: Accuracy,
    /// Minimum time between updates.
    pub min_interval: Duration,
    /// Minimum movement in meters between updates.
    pub min_distance_m: f64,
}

/// A removable handle to a position watch.
///
/// Cloning shares the same removal flag, so the provider and the consumer
/// both observe [`WatchHandle::remove`].
#[derive(Debug, Clone)]
pub struct WatchHandle {
    id: u64,
    removed: Arc<AtomicBool>,
}

impl WatchHandle {
    /// Create a live handle with the given watch id.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            removed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The provider-assigned watch id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop delivering updates for this watch. Idempotent.
    pub fn remove(&self) {
        if !self.removed.swap(true, Ordering::SeqCst) {
            debug!(watch_id = self.id, "Position watch removed");
        }
    }

    /// Check if the watch has been removed.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

/// A running position watch: the update channel plus its handle.
#[derive(Debug)]
pub struct PositionWatch {
    /// Receives position updates in delivery order.
    pub receiver: mpsc::Receiver<PositionSample>,
    /// Removes the watch.
    pub handle: WatchHandle,
}

/// A device position provider.
#[async_trait]
pub trait LocationProvider: Send + Sync + fmt::Debug {
    /// Ask for foreground location permission.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform prompt itself fails.
    async fn request_permission(&self) -> Result<PermissionStatus>;

    /// Read the current position once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] without permission, or
    /// [`Error::LocationUnavailable`] when the device has no fix.
    async fn current_position(&self, accuracy: Accuracy) -> Result<PositionSample>;

    /// Start a continuing watch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] without permission.
    async fn watch_position(&self, options: WatchOptions) -> Result<PositionWatch>;
}

/// Permission-aware access to a [`LocationProvider`].
#[derive(Debug, Clone)]
pub struct Locator {
    provider: Arc<dyn LocationProvider>,
    timeout: Option<Duration>,
}

impl Locator {
    /// Wrap a provider. `timeout` bounds one-shot reads and permission prompts.
    #[must_use]
    pub fn new(provider: Arc<dyn LocationProvider>, timeout: Option<Duration>) -> Self {
        Self { provider, timeout }
    }

    /// Request foreground permission, failing unless it is granted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] when not granted, or
    /// [`Error::Timeout`] if the prompt outlives the configured timeout.
    pub async fn ensure_permission(&self) -> Result<()> {
        let status = self
            .bounded("location permission request", self.provider.request_permission())
            .await?;
        match status {
            PermissionStatus::Granted => Ok(()),
            PermissionStatus::Denied | PermissionStatus::Undetermined => {
                Err(Error::permission_denied("foreground location"))
            }
        }
    }

    /// Read the current position once.
    ///
    /// # Errors
    ///
    /// Propagates provider failures, or [`Error::Timeout`].
    pub async fn current_position(&self, accuracy: Accuracy) -> Result<PositionSample> {
        self.bounded("current position", self.provider.current_position(accuracy))
            .await
    }

    /// Start a continuing watch.
    ///
    /// # Errors
    ///
    /// Propagates provider failures.
    pub async fn watch(&self, options: WatchOptions) -> Result<PositionWatch> {
        debug!(
            accuracy = %options.accuracy,
            interval_ms = options.min_interval.as_millis(),
            distance_m = options.min_distance_m,
            "Starting position watch"
        );
        self.provider.watch_position(options).await
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        request: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| Error::Timeout {
                    operation: operation.to_string(),
                })?,
            None => request.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_builders() {
        let sample = PositionSample::new(1.0, 2.0)
            .with_altitude(100.0)
            .with_speed(3.5)
            .with_heading(90.0)
            .with_accuracy(4.0);

        assert_eq!(sample.altitude, Some(100.0));
        assert_eq!(sample.speed, Some(3.5));
        assert_eq!(sample.heading, Some(90.0));
        assert_eq!(sample.accuracy, Some(4.0));
        assert_eq!(sample.coordinate(), Coordinate::new(1.0, 2.0));
    }

    #[test]
    fn test_sample_serialization_skips_missing_fields() {
        let sample = PositionSample::new(1.0, 2.0);
        let json = serde_json::to_string(&sample).unwrap();
        assert!(!json.contains("altitude"));

        let parsed: PositionSample = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample);
    }

    #[test]
    fn test_accuracy_display() {
        assert_eq!(Accuracy::High.to_string(), "high");
        assert_eq!(Accuracy::BestForNavigation.to_string(), "best_for_navigation");
    }

    #[test]
    fn test_watch_handle_remove_shared_between_clones() {
        let handle = WatchHandle::new(7);
        let other = handle.clone();
        assert!(!other.is_removed());

        handle.remove();
        handle.remove();
        assert!(other.is_removed());
        assert_eq!(other.id(), 7);
    }

    #[tokio::test]
    async fn test_locator_denied_permission() {
        let provider = Arc::new(SimulatedLocationProvider::new());
        provider.set_permission(PermissionStatus::Denied);
        let locator = Locator::new(provider, None);

        let err = locator.ensure_permission().await.unwrap_err();
        assert!(err.is_permission_error());
    }

    #[tokio::test]
    async fn test_locator_reads_current_position() {
        let provider = Arc::new(SimulatedLocationProvider::new());
        provider.set_position(PositionSample::new(10.0, 20.0));
        let locator = Locator::new(provider, Some(Duration::from_secs(1)));

        let sample = locator.current_position(Accuracy::High).await.unwrap();
        assert_eq!(sample.coordinate(), Coordinate::new(10.0, 20.0));
    }

    #[derive(Debug)]
    struct StalledProvider;

    #[async_trait]
    impl LocationProvider for StalledProvider {
        async fn request_permission(&self) -> Result<PermissionStatus> {
            std::future::pending().await
        }

        async fn current_position(&self, _accuracy: Accuracy) -> Result<PositionSample> {
            std::future::pending().await
        }

        async fn watch_position(&self, _options: WatchOptions) -> Result<PositionWatch> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_locator_times_out_stalled_requests() {
        let locator = Locator::new(Arc::new(StalledProvider), Some(Duration::from_secs(5)));

        let err = locator.current_position(Accuracy::High).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));

        let err = locator.ensure_permission().await.unwrap_err();
        assert!(err.to_string().contains("permission"));
    }
}
