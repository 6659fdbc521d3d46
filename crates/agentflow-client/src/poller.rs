//! Cancellable progress poller.
//!
//! [`Poller::spawn`] follows one job on a background task and hands back a
//! [`PollHandle`]. The handle exposes the latest good snapshot, can stop the
//! task at any time and resolves to a [`PollOutcome`]. Transient failures
//! back off exponentially and never replace the last snapshot, so a flaky
//! network cannot make a running job look failed.

use crate::client::ProgressClient;
use crate::error::ClientError;
use agentflow_core::{Job, JobId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Polling cadence and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between polls while the server answers normally.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Cap for the backoff delay after repeated transient failures.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Hard cap on the whole polling session.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    /// Consecutive `NotFound` answers after which the job is considered gone.
    #[serde(default = "default_max_consecutive_not_found")]
    pub max_consecutive_not_found: u32,
}

fn default_interval_ms() -> u64 {
    2_000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_max_duration_secs() -> u64 {
    1_800
}
fn default_max_consecutive_not_found() -> u32 {
    3
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_duration_secs: default_max_duration_secs(),
            max_consecutive_not_found: default_max_consecutive_not_found(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    /// When a poll started at `start` gives up. Caps too large to represent
    /// fall back to a deadline about thirty years out.
    pub fn deadline_from(&self, start: Instant) -> Instant {
        start
            .checked_add(self.max_duration())
            .unwrap_or_else(|| start + FAR_FUTURE)
    }

    /// Delay before the next poll after `failures` consecutive transient errors.
    ///
    /// `interval * 2^failures`, capped at `backoff_max_ms` (never below the interval).
    pub fn next_delay(&self, failures: u32) -> Duration {
        let delay = self
            .interval_ms
            .saturating_mul(2u64.saturating_pow(failures));
        Duration::from_millis(delay.min(self.backoff_max_ms.max(self.interval_ms)))
    }
}

/// How a polling session ended.
#[derive(Debug)]
pub enum PollOutcome {
    /// The job reached `completed` or `error`.
    Terminal(Job),
    /// [`PollHandle::stop`] was called. Carries the last snapshot seen.
    Cancelled(Option<Job>),
    /// The duration cap elapsed first. Carries the last snapshot seen.
    TimedOut(Option<Job>),
    /// The server kept answering `NotFound`.
    NotFound,
    /// A non-transient error such as a rejected request or a bad document.
    Failed(ClientError),
}

/// Handle to a running poll task.
pub struct PollHandle {
    job_id: JobId,
    updates: watch::Receiver<Option<Job>>,
    cancel: CancellationToken,
    join: JoinHandle<PollOutcome>,
}

impl PollHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Last snapshot successfully fetched, if any.
    pub fn latest(&self) -> Option<Job> {
        self.updates.borrow().clone()
    }

    /// Receiver notified on every new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Option<Job>> {
        self.updates.clone()
    }

    /// Stop polling. Local only; the job keeps running on the server.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(self) -> PollOutcome {
        let latest = self.updates.borrow().clone();
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Poll task ended abnormally");
                PollOutcome::Cancelled(latest)
            }
        }
    }
}

/// Spawns poll tasks.
pub struct Poller;

impl Poller {
    /// Start following `job_id` on a background task.
    pub fn spawn(client: ProgressClient, job_id: JobId, config: PollConfig) -> PollHandle {
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let join = tokio::spawn(poll_loop(client, job_id, config, tx, cancel.clone()));
        PollHandle {
            job_id,
            updates: rx,
            cancel,
            join,
        }
    }
}

async fn poll_loop(
    client: ProgressClient,
    job_id: JobId,
    config: PollConfig,
    tx: watch::Sender<Option<Job>>,
    cancel: CancellationToken,
) -> PollOutcome {
    let deadline = config.deadline_from(Instant::now());
    let mut transient_failures: u32 = 0;
    let mut not_found: u32 = 0;
    let latest = |tx: &watch::Sender<Option<Job>>| tx.borrow().clone();

    info!(job_id = %job_id, interval_ms = config.interval_ms, "Polling started");

    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(job_id = %job_id, "Polling cancelled");
                return PollOutcome::Cancelled(latest(&tx));
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(job_id = %job_id, "Polling gave up: duration cap reached");
                return PollOutcome::TimedOut(latest(&tx));
            }
            fetched = client.progress(job_id) => fetched,
        };

        match fetched {
            Ok(job) => {
                transient_failures = 0;
                not_found = 0;
                debug!(job_id = %job_id, status = %job.status, progress = job.progress, "Poll");
                tx.send_replace(Some(job.clone()));
                if job.is_terminal() {
                    info!(job_id = %job_id, status = %job.status, "Polling finished");
                    return PollOutcome::Terminal(job);
                }
            }
            Err(ClientError::NotFound(_)) => {
                not_found += 1;
                warn!(job_id = %job_id, not_found, "Job not found");
                if not_found >= config.max_consecutive_not_found.max(1) {
                    return PollOutcome::NotFound;
                }
            }
            Err(e) if e.is_transient() => {
                transient_failures = transient_failures.saturating_add(1);
                warn!(
                    job_id = %job_id,
                    failures = transient_failures,
                    error = %e,
                    "Transient poll failure; backing off"
                );
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Polling failed");
                return PollOutcome::Failed(e);
            }
        }

        let delay = config.next_delay(transient_failures);
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(job_id = %job_id, "Polling cancelled");
                return PollOutcome::Cancelled(latest(&tx));
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(job_id = %job_id, "Polling gave up: duration cap reached");
                return PollOutcome::TimedOut(latest(&tx));
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PollConfig::default();
        assert_eq!(config.interval(), Duration::from_secs(2));
        assert_eq!(config.max_duration(), Duration::from_secs(1800));
        assert_eq!(config.max_consecutive_not_found, 3);
    }

    #[test]
    fn test_huge_duration_cap_does_not_overflow() {
        let start = Instant::now();
        let config = PollConfig {
            max_duration_secs: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.deadline_from(start), start + FAR_FUTURE);
        assert_eq!(
            PollConfig::default().deadline_from(start),
            start + Duration::from_secs(1800)
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = PollConfig::default();
        assert_eq!(config.next_delay(0), Duration::from_secs(2));
        assert_eq!(config.next_delay(1), Duration::from_secs(4));
        assert_eq!(config.next_delay(3), Duration::from_secs(16));
        assert_eq!(config.next_delay(4), Duration::from_secs(30));
        assert_eq!(config.next_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_never_below_interval() {
        let config = PollConfig {
            interval_ms: 5_000,
            backoff_max_ms: 1_000,
            ..Default::default()
        };
        assert_eq!(config.next_delay(2), Duration::from_secs(5));
    }
}
