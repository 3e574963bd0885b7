//! Hourly trigger for the traffic batch.
//!
//! At `minute_offset` past every hour the previous hour is submitted to the
//! analysis queue, giving ingestion time to finish writing that hour.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::analytics::truncate_to_hour;
use crate::config::ScheduleConfig;
use crate::llm::{AnalysisJob, AnalysisQueue};

/// The first fire time strictly after `now`.
pub fn next_fire_after(now: DateTime<Utc>, minute_offset: u32) -> DateTime<Utc> {
    let offset = Duration::minutes(i64::from(minute_offset.min(59)));
    let candidate = truncate_to_hour(now) + offset;
    if candidate > now {
        candidate
    } else {
        candidate + Duration::hours(1)
    }
}

/// The hour bucket processed by a run firing at `fired_at`.
pub fn target_hour(fired_at: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_hour(fired_at) - Duration::hours(1)
}

pub struct Scheduler {
    config: ScheduleConfig,
    queue: AnalysisQueue,
}

/// Running scheduler. Dropping the handle also stops the task, but without
/// waiting for it; [`shutdown`](SchedulerHandle::shutdown) waits.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(config: ScheduleConfig, queue: AnalysisQueue) -> Self {
        Self { config, queue }
    }

    /// Spawn the timer loop on the current runtime.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(minute_offset = self.config.minute_offset, "Hourly scheduler started");

        loop {
            let now = Utc::now();
            let next = next_fire_after(now, self.config.minute_offset);
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!(next = %next, "Next hourly batch scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let hour_start = target_hour(next);
                    tracing::info!(hour = %hour_start, "Submitting hourly traffic batch");
                    let job = AnalysisJob::HourlyBatch { hour_start, prompt: None };
                    if let Err(e) = self.queue.submit(job) {
                        tracing::error!(error = %e, "Hourly batch not submitted, stopping scheduler");
                        break;
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Hourly scheduler stopped");
    }
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
}
