use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::AppError;
use crate::models::SyncReport;
use crate::sync::SyncService;
use crate::traits::{Fetcher, Notifier, RelevanceOracle, SnapshotStore};

/// Events emitted by the scheduler for monitoring/logging.
#[derive(Debug, Clone)]
pub enum SchedulerEvent<'a> {
    Started { interval_secs: u64 },
    StateReset,
    RunStarted { run: u64 },
    RunCompleted { run: u64, report: &'a SyncReport },
    RunFailed { run: u64, error: &'a AppError },
    RunCancelled { run: u64 },
    Stopped { runs: u64 },
}

/// Trait for receiving scheduler events (decoupled logging).
pub trait SchedulerReporter: Send + Sync {
    fn report(&self, event: SchedulerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSchedulerReporter;

impl SchedulerReporter for TracingSchedulerReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        match event {
            SchedulerEvent::Started { interval_secs } => {
                tracing::info!(%interval_secs, "Scheduler started");
            }
            SchedulerEvent::StateReset => {
                tracing::info!("Persisted snapshot discarded on start");
            }
            SchedulerEvent::RunStarted { run } => {
                tracing::info!(%run, "Sync run started");
            }
            SchedulerEvent::RunCompleted { run, report } => {
                tracing::info!(
                    %run,
                    run_id = %report.run_id,
                    new = report.new,
                    forwarded = report.forwarded,
                    "Sync run completed"
                );
            }
            SchedulerEvent::RunFailed { run, error } => {
                tracing::error!(
                    %run,
                    %error,
                    transport = error.is_transport(),
                    retryable = error.is_retryable(),
                    "Sync run failed"
                );
            }
            SchedulerEvent::RunCancelled { run } => {
                tracing::warn!(%run, "Sync run cancelled");
            }
            SchedulerEvent::Stopped { runs } => {
                tracing::info!(%runs, "Scheduler stopped");
            }
        }
    }
}

/// Periodic trigger around a [`SyncService`].
///
/// Runs never overlap: the next tick is awaited only after the current run
/// has finished.
pub struct Scheduler<F, O, N, S>
where
    F: Fetcher,
    O: RelevanceOracle,
    N: Notifier,
    S: SnapshotStore,
{
    service: SyncService<F, O, N, S>,
    config: SchedulerConfig,
}

impl<F, O, N, S> Scheduler<F, O, N, S>
where
    F: Fetcher,
    O: RelevanceOracle,
    N: Notifier,
    S: SnapshotStore,
{
    pub fn new(service: SyncService<F, O, N, S>, config: SchedulerConfig) -> Self {
        Self { service, config }
    }

    /// Run immediately, then once per interval, until cancellation.
    ///
    /// A failed run is reported and the loop continues. Cancellation during
    /// a run drops it before the snapshot is written.
    pub async fn run<R: SchedulerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &R,
    ) -> Result<(), AppError> {
        reporter.report(SchedulerEvent::Started {
            interval_secs: self.config.interval.as_secs(),
        });

        if self.config.reset_state_on_start && !cancel_token.is_cancelled() {
            self.reset_state().await?;
            reporter.report(SchedulerEvent::StateReset);
        }

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs = 0u64;

        loop {
            tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            runs += 1;
            reporter.report(SchedulerEvent::RunStarted { run: runs });

            tokio::select! {
                biased;
                () = cancel_token.cancelled() => {
                    reporter.report(SchedulerEvent::RunCancelled { run: runs });
                    break;
                }
                result = self.service.sync_once() => match result {
                    Ok(report) => reporter.report(SchedulerEvent::RunCompleted { run: runs, report: &report }),
                    Err(error) => reporter.report(SchedulerEvent::RunFailed { run: runs, error: &error }),
                },
            }
        }

        reporter.report(SchedulerEvent::Stopped { runs });
        Ok(())
    }

    /// Single run, honoring the reset flag. Used for one-shot invocations.
    ///
    /// Cancellation drops the run before the snapshot is written and
    /// returns [`AppError::Cancelled`].
    pub async fn run_once(&self, cancel_token: CancellationToken) -> Result<SyncReport, AppError> {
        if self.config.reset_state_on_start {
            self.reset_state().await?;
        }
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => Err(AppError::Cancelled),
            result = self.service.sync_once() => result,
        }
    }

    async fn reset_state(&self) -> Result<(), AppError> {
        tracing::info!("Reset requested, discarding persisted snapshot");
        self.service.store().save(&[]).await
    }
}
