//! Periodic and event-driven sync triggers.
//!
//! Handlers are registered with [`Scheduler::on_tick`] and
//! [`Scheduler::on_connectivity_restored`]. They run when the timer loop
//! started by [`Scheduler::start`] fires, or when a caller invokes
//! [`Scheduler::tick`] / [`Scheduler::connectivity_restored`] directly.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::connectivity::ConnectivityEvent;

pub type TriggerHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct Handlers {
    tick: Vec<TriggerHandler>,
    restored: Vec<TriggerHandler>,
}

struct Timer {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Scheduler {
    handlers: Mutex<Handlers>,
    timer: Mutex<Option<Timer>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn boxed<F, Fut>(handler: F) -> TriggerHandler
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || handler().boxed())
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for timer ticks and foreground signals.
    pub fn on_tick<F, Fut>(&self, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        lock(&self.handlers).tick.push(boxed(handler));
    }

    /// Registers a handler for offline-to-online transitions.
    pub fn on_connectivity_restored<F, Fut>(&self, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        lock(&self.handlers).restored.push(boxed(handler));
    }

    /// Runs every tick handler, one after another.
    pub async fn tick(&self) {
        let handlers = lock(&self.handlers).tick.clone();
        for handler in handlers {
            handler().await;
        }
    }

    /// Runs every connectivity-restored handler, one after another.
    pub async fn connectivity_restored(&self) {
        let handlers = lock(&self.handlers).restored.clone();
        for handler in handlers {
            handler().await;
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.timer)
            .as_ref()
            .is_some_and(|timer| !timer.handle.is_finished())
    }

    /// Starts the timer loop on the current tokio runtime.
    ///
    /// The first tick fires one `period` after start. Connectivity events
    /// from `events` are dispatched as they arrive, independent of the
    /// timer phase. Returns false if the loop was already running.
    pub fn start(
        self: &Arc<Self>,
        period: Duration,
        mut events: broadcast::Receiver<ConnectivityEvent>,
    ) -> bool {
        let mut timer = lock(&self.timer);
        if timer.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let scheduler = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut events_open = true;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {
                        let Some(scheduler) = scheduler.upgrade() else { break };
                        scheduler.tick().await;
                    }
                    event = events.recv(), if events_open => {
                        let Some(scheduler) = scheduler.upgrade() else { break };
                        match event {
                            Ok(ConnectivityEvent::Online) => scheduler.connectivity_restored().await,
                            Ok(ConnectivityEvent::Foreground) => scheduler.tick().await,
                            Ok(ConnectivityEvent::Offline) => {}
                            Err(RecvError::Lagged(skipped)) => {
                                tracing::warn!("Scheduler missed {} connectivity event(s)", skipped);
                            }
                            Err(RecvError::Closed) => events_open = false,
                        }
                    }
                }
            }

            tracing::info!("Sync scheduler stopped");
        });

        tracing::info!(period_ms = period.as_millis() as u64, "Sync scheduler started");
        *timer = Some(Timer { shutdown, handle });
        true
    }

    /// Stops the timer loop. Returns false if it was not running.
    ///
    /// A trigger already in progress is allowed to finish.
    pub fn stop(&self) -> bool {
        match lock(&self.timer).take() {
            Some(timer) => {
                let _ = timer.shutdown.send(());
                !timer.handle.is_finished()
            }
            None => false,
        }
    }
}
