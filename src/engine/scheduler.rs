//! Poll scheduling
//!
//! [`PollScheduler`] runs a cycle, waits the configured gap measured from the
//! end of that cycle, and repeats until shutdown. Scheduled cycles therefore
//! never overlap. [`Debouncer`] runs one extra cycle a short delay after the
//! last of a burst of triggers; that cycle may overlap a scheduled one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::QuoteEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next cycle
    Idle,
    /// Fetch and reconcile in progress
    Running,
    Stopped,
}

pub struct PollScheduler {
    engine: Arc<QuoteEngine>,
    interval: Duration,
    state: watch::Sender<SchedulerState>,
}

impl PollScheduler {
    pub fn new(engine: Arc<QuoteEngine>, interval: Duration) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            engine,
            interval,
            state,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Poll until `shutdown` flips to true or its sender is dropped. The
    /// first cycle starts immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Poll scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.state.send_replace(SchedulerState::Running);
            self.engine.run_cycle_logged("scheduled").await;
            self.state.send_replace(SchedulerState::Idle);

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.state.send_replace(SchedulerState::Stopped);
        info!("Poll scheduler stopped");
    }
}

/// Coalesces bursts of triggers into a single delayed cycle
pub struct Debouncer {
    engine: Arc<QuoteEngine>,
    delay: Duration,
    generation: Arc<AtomicU64>,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(engine: Arc<QuoteEngine>, delay: Duration) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            engine,
            delay,
            generation: Arc::new(AtomicU64::new(0)),
            stop,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// (Re)arm the delayed cycle. Only the task armed by the latest trigger
    /// runs; a cycle that already started is never interrupted. No-op after
    /// [`Debouncer::shutdown`].
    pub fn trigger(&self) {
        if *self.stop.borrow() {
            debug!("Debouncer stopped, ignoring trigger");
            return;
        }

        let armed = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.generation.clone();
        let engine = self.engine.clone();
        let delay = self.delay;
        let mut stop = self.stop.subscribe();

        debug!(delay_ms = delay.as_millis() as u64, "Debounced fetch armed");

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.changed() => return,
            }
            if generation.load(Ordering::SeqCst) != armed {
                return;
            }
            engine.run_cycle_logged("debounced").await;
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Drop any pending delayed cycle
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Stop for good: pending delays are dropped and a cycle already running
    /// is awaited, so nothing publishes after this returns.
    pub async fn shutdown(&self) {
        self.cancel();
        self.stop.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "Debounced task ended abnormally");
            }
        }
        info!("Debouncer stopped");
    }
}
