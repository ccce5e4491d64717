//! Periodic cycle driver.
//!
//! Ticks on a fixed interval and starts one cycle per tick. A tick that fires
//! while the previous cycle is still running is dropped with a warning, never
//! queued. Stopping waits for the in-flight cycle to finish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::domain::CycleStats;

/// Anything the scheduler can run once per tick
#[async_trait]
pub trait CycleRunner: Send + Sync + 'static {
    async fn run_cycle(&self) -> CycleStats;
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler interval must be greater than zero")]
    ZeroInterval,
}

/// What the scheduler did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    pub cycles_started: usize,
    pub cycles_completed: usize,
    /// Cycles whose task panicked
    pub cycles_failed: usize,
    /// Ticks skipped because a cycle was still running
    pub ticks_dropped: usize,
}

/// Non-overlapping periodic scheduler
pub struct Scheduler {
    runner: Arc<dyn CycleRunner>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn CycleRunner>, interval: Duration) -> Result<Self, SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::ZeroInterval);
        }
        Ok(Self { runner, interval })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until `shutdown` becomes `true` or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> SchedulerReport {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut report = SchedulerReport::default();
        let mut in_flight: Option<JoinHandle<CycleStats>> = None;

        info!(interval_secs = self.interval.as_secs_f64(), "Scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if in_flight.as_ref().is_some_and(|cycle| !cycle.is_finished()) {
                        warn!("Previous cycle still running, dropping this tick");
                        report.ticks_dropped += 1;
                        continue;
                    }
                    if let Some(cycle) = in_flight.take() {
                        settle(cycle.await, &mut report);
                    }

                    let runner = self.runner.clone();
                    report.cycles_started += 1;
                    debug!(cycle = report.cycles_started, "Starting cycle");
                    in_flight = Some(tokio::spawn(async move { runner.run_cycle().await }));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if let Some(cycle) = in_flight.take() {
            info!("Waiting for in-flight cycle to finish");
            settle(cycle.await, &mut report);
        }

        info!(
            started = report.cycles_started,
            dropped = report.ticks_dropped,
            "Scheduler stopped"
        );
        report
    }

    /// Run on a background task
    pub fn spawn(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));
        SchedulerHandle { stop_tx, task }
    }
}

fn settle(result: Result<CycleStats, JoinError>, report: &mut SchedulerReport) {
    match result {
        Ok(stats) => {
            report.cycles_completed += 1;
            debug!(summary = %stats.summary(), "Cycle finished");
        }
        Err(e) => {
            report.cycles_failed += 1;
            error!(error = %e, "Cycle task failed");
        }
    }
}

/// Handle to a spawned scheduler
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<SchedulerReport>,
}

impl SchedulerHandle {
    /// Stop ticking and wait for the in-flight cycle
    pub async fn stop(self) -> Result<SchedulerReport, JoinError> {
        let _ = self.stop_tx.send(true);
        self.task.await
    }
}
