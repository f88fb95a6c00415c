use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::payouts::PayoutBatcher;

/// Counters across scheduled batcher runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub runs: u64,
    pub failed_runs: u64,
    pub payouts_created: u64,
    pub payouts_succeeded: u64,
    pub payouts_failed: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Handle to stop and inspect a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl SchedulerHandle {
    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Stop ticking and wait for an in-flight run to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

/// Runs the payout batcher on a fixed interval.
#[derive(Debug)]
pub struct PayoutScheduler;

impl PayoutScheduler {
    /// Spawn on the current tokio runtime. The first run starts immediately.
    pub fn spawn(batcher: Arc<PayoutBatcher>, interval: Duration) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let stats = Arc::new(Mutex::new(SchedulerStats::default()));
        let task_stats = stats.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = interval.as_secs(), "payout scheduler started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        let outcome = batcher.run(now).await;
                        if let Ok(mut s) = task_stats.lock() {
                            s.runs += 1;
                            s.last_run_at = Some(now);
                            match &outcome {
                                Ok(report) => {
                                    s.payouts_created += report.created as u64;
                                    s.payouts_succeeded += report.succeeded as u64;
                                    s.payouts_failed += report.failed as u64;
                                }
                                Err(_) => s.failed_runs += 1,
                            }
                        }
                        if let Err(e) = outcome {
                            error!(error = %e, "scheduled payout run failed");
                        }
                    }
                }
            }

            info!("payout scheduler stopped");
        });

        SchedulerHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
            stats,
        }
    }
}
