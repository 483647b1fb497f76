//! GPX 1.1 interchange format.
//!
//! [`GpxDocument`] is the format-level view shared by trails and tracks: a
//! metadata block, free-standing waypoints, and a single track made of one
//! segment. [`write_gpx`] renders it and [`parse_gpx`] reads it back.

mod parser;
mod writer;

use chrono::{DateTime, SecondsFormat, Utc};

pub use parser::parse_gpx;
pub use writer::write_gpx;

/// GPX 1.1 namespace.
pub const GPX_NAMESPACE: &str = "http://www.topografix.com/GPX/1/1";

/// Value of the `creator` attribute on written documents.
pub const GPX_CREATOR: &str = "trailkeeper";

/// A `<wpt>` or `<trkpt>` element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpxPoint {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Elevation in meters.
    pub elevation: Option<f64>,
    /// Time of the fix.
    pub time: Option<DateTime<Utc>>,
    /// Speed in meters per second.
    pub speed: Option<f64>,
    /// Course over ground in degrees.
    pub course: Option<f64>,
    /// Point name.
    pub name: Option<String>,
    /// Point description.
    pub description: Option<String>,
    /// Display symbol.
    pub symbol: Option<String>,
}

impl GpxPoint {
    /// A point with only coordinates set.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            ..Self::default()
        }
    }
}

/// A whole GPX file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpxDocument {
    /// Metadata name.
    pub name: Option<String>,
    /// Metadata description.
    pub description: Option<String>,
    /// Metadata time.
    pub time: Option<DateTime<Utc>>,
    /// Free-standing waypoints.
    pub waypoints: Vec<GpxPoint>,
    /// Name of the track.
    pub track_name: Option<String>,
    /// Description of the track.
    pub track_description: Option<String>,
    /// Points of the track, across all segments.
    pub track_points: Vec<GpxPoint>,
}

/// Format a timestamp the way GPX files carry it.
pub(crate) fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a GPX timestamp.
pub(crate) fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|time| time.with_timezone(&Utc))
}
