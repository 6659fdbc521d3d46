//! Eviction of finished jobs from the progress store.
//!
//! Terminal jobs are kept for a configurable TTL after they finish so that
//! pollers can observe the final state, then dropped. Live jobs are never
//! evicted.

use crate::store::ProgressStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long finished jobs are kept and how often the store is swept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_minutes() -> u64 {
    60
}
fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl RetentionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Evict everything that finished more than `ttl` ago. Returns the count.
pub async fn sweep(store: &ProgressStore, ttl: Duration) -> usize {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(ttl)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
    store.evict_finished_before(cutoff).await
}

/// Spawn the sweeper loop. Runs until `cancel` is triggered.
pub fn spawn_sweeper(
    store: Arc<ProgressStore>,
    config: RetentionConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            ttl_minutes = config.ttl_minutes,
            interval_secs = config.sweep_interval().as_secs(),
            "Retention sweeper started"
        );
        let mut interval = tokio::time::interval(config.sweep_interval());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Retention sweeper stopping");
                    break;
                }
                _ = interval.tick() => {
                    let evicted = sweep(&store, config.ttl()).await;
                    if evicted > 0 {
                        tracing::info!(evicted, "Retention: evicted finished jobs");
                    } else {
                        tracing::debug!("Retention: nothing to evict");
                    }
                }
            }
        }
    })
}
