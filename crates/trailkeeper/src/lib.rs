//! `trailkeeper` - Breadcrumb trails, GPX tracks and live location sharing
//!
//! This library provides three managers that each keep one active session
//! and follow the device position:
//! - [`BreadcrumbTrailManager`] drops breadcrumbs for finding the way back.
//! - [`GpxTrackRecorder`] records full GPX tracks with running statistics.
//! - [`LiveLocationSharingManager`] publishes the position for other users.
//!
//! They are built together by [`Services`] over a [`LocationProvider`], a
//! [`KeyValueStore`] and a [`ShareTarget`].

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod geo;
pub mod gpx;
pub mod ids;
pub mod live;
pub mod location;
pub mod logging;
pub mod services;
pub mod share;
pub mod storage;
pub mod task;
pub mod track;
pub mod trail;

pub use config::Config;
pub use error::{Error, Result};
pub use geo::Coordinate;
pub use live::{
    LiveLocationSharingManager, LocationSharingSession, SharedLocation, SharingOptions,
    SharingStatus,
};
pub use location::{
    Accuracy, LocationProvider, Locator, PermissionStatus, PositionSample,
    SimulatedLocationProvider,
};
pub use logging::init_logging;
pub use services::{Capabilities, Services};
pub use share::{DirectoryShareTarget, ShareOptions, ShareTarget};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};
pub use track::{GpxTrack, GpxTrackRecorder, TrackPoint, TrackStats, Waypoint};
pub use trail::{Breadcrumb, BreadcrumbInput, BreadcrumbTrail, BreadcrumbTrailManager, BreadcrumbType};
