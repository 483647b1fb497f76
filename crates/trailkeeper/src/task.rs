//! Owned background work: recurring timers and position watch consumers.
//!
//! Every manager keeps its timer or watch in a [`TaskHandle`] inside its
//! state. Cancelling the handle, or dropping it, aborts the spawned task and
//! removes the position watch it consumes.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::location::{PositionSample, PositionWatch, WatchHandle};

/// Shortest period [`TaskHandle::every`] will tick at.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a cancellable background task.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    join: Option<JoinHandle<()>>,
    watch: Option<WatchHandle>,
}

impl TaskHandle {
    /// Spawn `future` on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "Spawning background task");
        Self {
            name,
            join: Some(tokio::spawn(future)),
            watch: None,
        }
    }

    /// Run `tick` every `period`, first firing one period from now.
    ///
    /// The loop ends when `tick` returns [`ControlFlow::Break`]. A zero
    /// period is raised to one millisecond.
    #[must_use]
    pub fn every<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        Self::spawn(name, async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                trace!(task = name, "Timer tick");
                if tick().await.is_break() {
                    break;
                }
            }
            debug!(task = name, "Timer loop finished");
        })
    }

    /// Feed every sample from `watch` to `on_sample`, one at a time.
    ///
    /// The returned handle also owns the watch, so cancelling it removes the
    /// subscription at the provider.
    #[must_use]
    pub fn consume<F, Fut>(name: &'static str, watch: PositionWatch, mut on_sample: F) -> Self
    where
        F: FnMut(PositionSample) -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let PositionWatch {
            mut receiver,
            handle,
        } = watch;
        let mut task = Self::spawn(name, async move {
            while let Some(sample) = receiver.recv().await {
                if on_sample(sample).await.is_break() {
                    break;
                }
            }
            debug!(task = name, "Position stream finished");
        });
        task.watch = Some(handle);
        task
    }

    /// The task's name, for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Check if the task is still running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Abort the task and remove its watch. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.remove();
        }
        if let Some(join) = self.join.take() {
            join.abort();
            debug!(task = self.name, "Background task cancelled");
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
