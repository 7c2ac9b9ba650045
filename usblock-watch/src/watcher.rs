//! The device watch loop.
//!
//! Each attach event is handled by its own task:
//!
//! ```text
//! Idle -> Debouncing -> Resolving -> Checking -> Idle
//! ```
//!
//! Tasks run concurrently up to `max_concurrent_checks`; further events wait
//! for a free slot. A stop request unsubscribes from the event source and
//! lets in-flight checks finish. The loop ends in `Stopped`.

use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::WatchConfig;
use crate::device::{AttachEvent, AttachEventSource, VolumeId};
use crate::gate::{CheckOutcome, LicenseGate, RejectReason};

/// Where an attach event currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchState {
    /// No event pending.
    Idle,
    /// Waiting for the attached filesystem to settle.
    Debouncing,
    /// Looking up the physical serial.
    Resolving,
    /// Loading and verifying the license.
    Checking,
    /// The loop has shut down.
    Stopped,
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Debouncing => "debouncing",
            Self::Resolving => "resolving",
            Self::Checking => "checking",
            Self::Stopped => "stopped",
        })
    }
}

/// Outcome of one attach event, as delivered to a report channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachReport {
    pub volume: VolumeId,
    pub outcome: CheckOutcome,
}

/// Totals over the lifetime of a loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub processed: u64,
    pub accepted: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &CheckOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if outcome.is_accepted() {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> WatchSummary {
        WatchSummary {
            processed: self.processed.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// State shared by every attach task.
struct Shared {
    gate: LicenseGate,
    settle_delay: Duration,
    reports: Option<mpsc::Sender<AttachReport>>,
    counters: Counters,
}

impl Shared {
    async fn handle(self: Arc<Self>, event: AttachEvent) {
        let volume = event.volume.clone();
        let outcome = self.process(&event).await;
        transition(&volume, WatchState::Idle);

        self.counters.record(&outcome);
        match &outcome {
            CheckOutcome::Accepted { serial, .. } => {
                info!(volume = %volume, serial = %serial, "{outcome}");
            }
            CheckOutcome::Rejected(_) => warn!(volume = %volume, "{outcome}"),
        }

        if let Some(reports) = &self.reports {
            if let Err(e) = reports.try_send(AttachReport { volume, outcome }) {
                debug!("attach report dropped: {e}");
            }
        }
    }

    async fn process(&self, event: &AttachEvent) -> CheckOutcome {
        let volume = &event.volume;
        if volume.is_empty() {
            return CheckOutcome::Rejected(RejectReason::EmptyVolume);
        }
        info!(volume = %volume, "removable volume attached");

        transition(volume, WatchState::Debouncing);
        tokio::time::sleep(self.settle_delay).await;

        transition(volume, WatchState::Resolving);
        let serial = match self.gate.resolve(volume).await {
            Ok(serial) => serial,
            Err(reason) => return CheckOutcome::Rejected(reason),
        };
        info!(volume = %volume, serial = %serial, "device serial resolved");

        transition(volume, WatchState::Checking);
        self.gate.inspect(volume, &serial, Utc::now()).await
    }
}

fn transition(volume: &VolumeId, state: WatchState) {
    debug!(volume = %volume, %state, "attach state");
}

/// Long-running loop reacting to device-attach events.
pub struct WatchLoop {
    shared: Arc<Shared>,
    max_concurrent: usize,
}

impl WatchLoop {
    /// Creates a loop using the delay and concurrency limits from `config`.
    pub fn new(gate: LicenseGate, config: &WatchConfig) -> Self {
        Self::with_limits(gate, config.settle_delay(), config.max_concurrent_checks)
    }

    /// Creates a loop with explicit limits. `max_concurrent` is clamped to 1.
    pub fn with_limits(gate: LicenseGate, settle_delay: Duration, max_concurrent: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                gate,
                settle_delay,
                reports: None,
                counters: Counters::default(),
            }),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Sends an [`AttachReport`] for every processed event to `reports`.
    /// Reports that find the channel full are dropped rather than holding a
    /// check slot.
    ///
    /// Must be called before the loop starts.
    pub fn with_reports(mut self, reports: mpsc::Sender<AttachReport>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.reports = Some(reports);
        } else {
            warn!("report channel attached after the loop started; ignoring");
        }
        self
    }

    /// Totals so far.
    pub fn summary(&self) -> WatchSummary {
        self.shared.counters.snapshot()
    }

    /// Processes attach events until the source ends or `shutdown` turns
    /// `true`, then waits for in-flight checks and returns the totals.
    ///
    /// Dropping the shutdown sender without signalling does not stop the
    /// loop.
    pub async fn run<S>(&self, source: &mut S, mut shutdown: watch::Receiver<bool>) -> WatchSummary
    where
        S: AttachEventSource + ?Sized,
    {
        let slots = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        info!(max_concurrent = self.max_concurrent, "watching for attach events");

        loop {
            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }

            let event = tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => break,
                event = source.next_attach() => match event {
                    Some(event) => event,
                    None => {
                        info!("attach subscription ended");
                        break;
                    }
                },
            };

            let permit = tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let shared = Arc::clone(&self.shared);
            tasks.spawn(async move {
                let _permit = permit;
                shared.handle(event).await;
            });
        }

        if let Err(e) = source.unsubscribe().await {
            warn!("failed to unsubscribe from attach events: {e}");
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(in_flight, "waiting for in-flight checks");
        }
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }

        debug!(state = %WatchState::Stopped, "watch loop finished");
        self.summary()
    }
}

async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let signalled = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("attach task panicked: {e}");
        } else {
            debug!("attach task cancelled: {e}");
        }
    }
}
