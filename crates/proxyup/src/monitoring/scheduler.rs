use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::executor::BatchRunner;
use crate::models::CheckKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
}

/// Non-blocking single-holder lock guarding one check kind
#[derive(Debug, Default)]
struct RunGate {
    running: AtomicBool,
}

impl RunGate {
    fn try_acquire(self: &Arc<Self>) -> Option<RunPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit { gate: self.clone() })
    }
}

/// Held for the lifetime of a batch; dropping it returns the gate to idle.
struct RunPermit {
    gate: Arc<RunGate>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.gate.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct Counters {
    started: AtomicU64,
    skipped: AtomicU64,
    completed: AtomicU64,
}

/// Periodic trigger for one [`CheckKind`].
///
/// At most one batch per scheduler is in flight. A tick that finds the
/// previous batch still running is skipped, never queued. Each batch gets a
/// cancellation deadline of one period.
#[derive(Clone)]
pub struct CheckScheduler {
    kind: CheckKind,
    period: Duration,
    runner: Arc<dyn BatchRunner>,
    gate: Arc<RunGate>,
    counters: Arc<Counters>,
}

impl CheckScheduler {
    pub fn new(kind: CheckKind, period: Duration, runner: Arc<dyn BatchRunner>) -> Self {
        Self {
            kind,
            period,
            runner,
            gate: Arc::new(RunGate::default()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// `None` when `minutes <= 0`, which disables the check kind.
    pub fn from_minutes(kind: CheckKind, minutes: i64, runner: Arc<dyn BatchRunner>) -> Option<Self> {
        let minutes = u64::try_from(minutes).ok().filter(|m| *m > 0)?;
        Some(Self::new(kind, Duration::from_secs(minutes * 60), runner))
    }

    pub fn kind(&self) -> CheckKind {
        self.kind
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn state(&self) -> RunState {
        if self.gate.running.load(Ordering::Acquire) { RunState::Running } else { RunState::Idle }
    }

    pub fn batches_started(&self) -> u64 {
        self.counters.started.load(Ordering::Relaxed)
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.counters.skipped.load(Ordering::Relaxed)
    }

    pub fn batches_completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Relaxed)
    }

    /// Start the timer loop. The first tick fires one period from now.
    ///
    /// The loop ends when `shutdown` is cancelled. Batches are spawned on
    /// `tracker` so the caller can wait for them separately.
    pub fn spawn(&self, shutdown: CancellationToken, tracker: TaskTracker) -> JoinHandle<()> {
        let scheduler = self.clone();

        tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + scheduler.period, scheduler.period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(kind = %scheduler.kind, period_secs = scheduler.period.as_secs(), "Scheduler started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = timer.tick() => {
                        scheduler.tick(&shutdown, &tracker);
                    }
                }
            }

            info!(kind = %scheduler.kind, "Scheduler stopped");
        })
    }

    /// Try to start a batch. Returns `false` if one is already running.
    pub fn tick(&self, shutdown: &CancellationToken, tracker: &TaskTracker) -> bool {
        let Some(permit) = self.gate.try_acquire() else {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            warn!(kind = %self.kind, "Previous batch still running, skipping tick");
            return false;
        };
        self.counters.started.fetch_add(1, Ordering::Relaxed);

        let kind = self.kind;
        let period = self.period;
        let runner = self.runner.clone();
        let counters = self.counters.clone();
        let token = shutdown.child_token();

        tracker.spawn(async move {
            let _permit = permit;

            let batch = runner.run_batch(kind, token.clone());
            tokio::pin!(batch);
            let result = tokio::select! {
                result = &mut batch => result,
                _ = tokio::time::sleep(period) => {
                    warn!(%kind, "Batch overran its interval, cancelling remaining checks");
                    token.cancel();
                    batch.await
                }
            };

            counters.completed.fetch_add(1, Ordering::Relaxed);
            if let Err(err) = result {
                error!(%kind, "Check batch failed: {err:#}");
            }
        });

        true
    }
}
