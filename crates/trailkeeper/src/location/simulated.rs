//! A scripted [`LocationProvider`] for replays and tests.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{
    Accuracy, LocationProvider, PermissionStatus, PositionSample, PositionWatch, WatchHandle,
    WatchOptions,
};
use crate::error::{Error, Result};

/// Capacity of each watch channel.
const WATCH_CHANNEL_CAPACITY: usize = 64;

/// A provider whose position is set by the caller.
///
/// One-shot reads return the last position set or pushed. Samples passed to
/// [`SimulatedLocationProvider::push`] are delivered to every live watch
/// without applying the watch's time or distance filters.
#[derive(Debug)]
pub struct SimulatedLocationProvider {
    state: Mutex<SimulatedState>,
}

#[derive(Debug)]
struct SimulatedState {
    permission: PermissionStatus,
    current: Option<PositionSample>,
    watchers: Vec<Watcher>,
    next_watch_id: u64,
    last_options: Option<WatchOptions>,
}

#[derive(Debug)]
struct Watcher {
    handle: WatchHandle,
    sender: mpsc::Sender<PositionSample>,
}

impl Default for SimulatedLocationProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLocationProvider {
    /// Create a provider with permission granted and no fix.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimulatedState {
                permission: PermissionStatus::Granted,
                current: None,
                watchers: Vec::new(),
                next_watch_id: 1,
                last_options: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        // A poisoned lock only means a test panicked mid-update; the state is still usable.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Set the answer to permission requests.
    pub fn set_permission(&self, permission: PermissionStatus) {
        self.lock().permission = permission;
    }

    /// Set the position returned by one-shot reads.
    pub fn set_position(&self, sample: PositionSample) {
        self.lock().current = Some(sample);
    }

    /// Clear the current fix so one-shot reads fail.
    pub fn clear_position(&self) {
        self.lock().current = None;
    }

    /// Number of watches that have not been removed.
    #[must_use]
    pub fn active_watches(&self) -> usize {
        let mut state = self.lock();
        state.watchers.retain(|w| !w.handle.is_removed());
        state.watchers.len()
    }

    /// Options passed to the most recent watch.
    #[must_use]
    pub fn last_watch_options(&self) -> Option<WatchOptions> {
        self.lock().last_options
    }

    /// Make `sample` the current position and deliver it to every live watch.
    ///
    /// Returns the number of watches the sample was delivered to.
    pub async fn push(&self, sample: PositionSample) -> usize {
        let targets: Vec<(WatchHandle, mpsc::Sender<PositionSample>)> = {
            let mut state = self.lock();
            state.current = Some(sample);
            state
                .watchers
                .retain(|w| !w.handle.is_removed() && !w.sender.is_closed());
            state
                .watchers
                .iter()
                .map(|w| (w.handle.clone(), w.sender.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (handle, sender) in targets {
            if handle.is_removed() {
                continue;
            }
            if sender.send(sample).await.is_ok() {
                delivered += 1;
            } else {
                trace!(watch_id = handle.id(), "Watch receiver dropped");
            }
        }
        delivered
    }
}

#[async_trait]
impl LocationProvider for SimulatedLocationProvider {
    async fn request_permission(&self) -> Result<PermissionStatus> {
        Ok(self.lock().permission)
    }

    async fn current_position(&self, _accuracy: Accuracy) -> Result<PositionSample> {
        let state = self.lock();
        if state.permission != PermissionStatus::Granted {
            return Err(Error::permission_denied("foreground location"));
        }
        state
            .current
            .ok_or_else(|| Error::location_unavailable("no position fix"))
    }

    async fn watch_position(&self, options: WatchOptions) -> Result<PositionWatch> {
        let mut state = self.lock();
        if state.permission != PermissionStatus::Granted {
            return Err(Error::permission_denied("foreground location"));
        }

        let handle = WatchHandle::new(state.next_watch_id);
        state.next_watch_id += 1;
        state.last_options = Some(options);

        let (sender, receiver) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        state.watchers.push(Watcher {
            handle: handle.clone(),
            sender,
        });
        debug!(watch_id = handle.id(), "Simulated watch started");

        Ok(PositionWatch { receiver, handle })
    }
}
