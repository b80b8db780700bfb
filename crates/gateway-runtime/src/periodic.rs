// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Cancelable periodic maintenance tasks
//!
//! Every component that needs background upkeep (window sweeps, bucket
//! refills, expiry sweeps) owns exactly one [`PeriodicTask`]. The task is
//! stopped by [`PeriodicTask::shutdown`] or when its owner drops it, and a
//! panicking job never ends the loop.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use tokio::{
    runtime::Handle,
    sync::Notify,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{RuntimeError, RuntimeResult};

/// A background task running a synchronous job on a fixed period
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    period: Duration,
    cancellation_token: CancellationToken,
    trigger: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `job` on the current Tokio runtime, first running one `period` from now
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Configuration` for a zero period and
    /// `RuntimeError::NoRuntime` when called outside a Tokio runtime.
    pub fn spawn<F>(name: &'static str, period: Duration, job: F) -> RuntimeResult<Self>
    where
        F: Fn() + Send + 'static,
    {
        if period.is_zero() {
            return Err(RuntimeError::configuration(format!(
                "{name} period must be greater than zero"
            )));
        }

        let runtime = Handle::try_current().map_err(|_| RuntimeError::NoRuntime { component: name })?;
        let cancellation_token = CancellationToken::new();
        let trigger = Arc::new(Notify::new());

        let handle = runtime.spawn(run_periodic(
            name,
            period,
            job,
            cancellation_token.clone(),
            Arc::clone(&trigger),
        ));

        debug!(
            task = name,
            period_ms = period.as_millis(),
            "periodic task started"
        );

        Ok(Self {
            name,
            period,
            cancellation_token,
            trigger,
            handle,
        })
    }

    /// Run the job as soon as possible, independently of the tick schedule
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stop the task; calling this more than once has no further effect
    pub fn shutdown(&self) {
        if !self.cancellation_token.is_cancelled() {
            self.cancellation_token.cancel();
            debug!(task = self.name, "periodic task shutdown requested");
        }
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Whether the underlying Tokio task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Configured period between runs
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

async fn run_periodic<F>(
    name: &'static str,
    period: Duration,
    job: F,
    cancellation_token: CancellationToken,
    trigger: Arc<Notify>,
) where
    F: Fn(),
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancellation_token.cancelled() => break,
            _ = ticker.tick() => {},
            () = trigger.notified() => {},
        }

        if catch_unwind(AssertUnwindSafe(&job)).is_err() {
            error!(task = name, "periodic job panicked, continuing on next tick");
        }
    }

    debug!(task = name, "periodic task stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::sleep;

    use super::*;

    const PERIOD: Duration = Duration::from_secs(10);

    fn counting_job() -> (Arc<AtomicUsize>, impl Fn() + Send + 'static) {
        let runs = Arc::new(AtomicUsize::new(0));
        let job_runs = Arc::clone(&runs);
        (runs, move || {
            job_runs.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn runs_once_per_period() {
        let (runs, job) = counting_job();
        let task = PeriodicTask::spawn("test", PERIOD, job).unwrap();

        sleep(PERIOD / 2).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        sleep(PERIOD * 3).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(task.period(), PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_runs_immediately() {
        let (runs, job) = counting_job();
        let task = PeriodicTask::spawn("test", PERIOD, job).unwrap();

        task.trigger();
        sleep(Duration::from_millis(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_job_keeps_running() {
        let runs = Arc::new(AtomicUsize::new(0));
        let job_runs = Arc::clone(&runs);
        let task = PeriodicTask::spawn("test", PERIOD, move || {
            if job_runs.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first sweep fails");
            }
        })
        .unwrap();

        sleep(PERIOD * 2 + PERIOD / 2).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_idempotent() {
        let (runs, job) = counting_job();
        let task = PeriodicTask::spawn("test", PERIOD, job).unwrap();

        task.shutdown();
        task.shutdown();
        assert!(task.is_shutdown());

        sleep(PERIOD * 3).await;
        assert!(task.is_finished());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_owner_stops_the_task() {
        let (runs, job) = counting_job();
        let task = PeriodicTask::spawn("test", PERIOD, job).unwrap();
        drop(task);

        sleep(PERIOD * 3).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn spawn_requires_runtime() {
        let result = PeriodicTask::spawn("test", PERIOD, || {});
        assert!(matches!(
            result,
            Err(RuntimeError::NoRuntime { component: "test" })
        ));
    }

    #[tokio::test]
    async fn zero_period_is_rejected() {
        let result = PeriodicTask::spawn("test", Duration::ZERO, || {});
        assert!(matches!(result, Err(RuntimeError::Configuration { .. })));
    }
}
