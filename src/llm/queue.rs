use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::analytics::TrafficPipeline;

/// Background work accepted by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisJob {
    /// Analyze the images of one hour bucket.
    HourlyBatch {
        hour_start: DateTime<Utc>,
        prompt: Option<String>,
    },
    /// Run the recommendation prompt against the newest image, optionally
    /// restricted to one source.
    LatestImage { source_id: Option<String> },
}

#[derive(Debug, Error)]
#[error("analysis queue is closed")]
pub struct QueueClosed;

/// In-process job queue with a single worker. Submitting gives no handle:
/// results are only observable in storage.
#[derive(Clone)]
pub struct AnalysisQueue {
    tx: mpsc::UnboundedSender<AnalysisJob>,
}

impl AnalysisQueue {
    /// Spawn the worker on the current runtime. The worker exits once every
    /// queue clone is dropped and the backlog is drained.
    pub fn start(pipeline: Arc<TrafficPipeline>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(rx, pipeline));
        (Self { tx }, worker)
    }

    pub fn submit(&self, job: AnalysisJob) -> Result<(), QueueClosed> {
        tracing::debug!(?job, "Queued analysis job");
        self.tx.send(job).map_err(|_| QueueClosed)
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<AnalysisJob>, pipeline: Arc<TrafficPipeline>) {
    while let Some(job) = rx.recv().await {
        let pipeline = Arc::clone(&pipeline);
        let label = format!("{:?}", job);

        // Jobs run one at a time; the pipeline blocks on HTTP and SQLite.
        let result = tokio::task::spawn_blocking(move || run_job(&pipeline, job)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(job = %label, error = %e, "Analysis job failed"),
            Err(e) => tracing::error!(job = %label, error = %e, "Analysis job panicked"),
        }
    }
    tracing::info!("Analysis queue closed");
}

fn run_job(pipeline: &TrafficPipeline, job: AnalysisJob) -> anyhow::Result<()> {
    match job {
        AnalysisJob::HourlyBatch { hour_start, prompt } => {
            pipeline.process_hour(hour_start, prompt.as_deref())?;
        }
        AnalysisJob::LatestImage { source_id } => {
            pipeline.analyze_latest(source_id.as_deref())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{FetchError, FetchedImage, ImageSource};
    use crate::db::{Database, NewSample};
    use crate::llm::{LlmProvider, VisionClient};
    use chrono::TimeZone;

    struct OneImage;

    impl ImageSource for OneImage {
        fn fetch(&self, _reference: &str) -> Result<FetchedImage, FetchError> {
            Ok(FetchedImage {
                bytes: vec![1, 2, 3],
                mime_type: "image/jpeg",
            })
        }
    }

    struct Echo;

    impl LlmProvider for Echo {
        fn analyze_image(&self, image: &[u8], mime: &str, _prompt: &str) -> anyhow::Result<String> {
            Ok(format!("{} bytes of {}", image.len(), mime))
        }

        fn provider_name(&self) -> &'static str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_jobs_run_in_background_until_queue_closes() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let hour = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let id = db
            .insert_sample(&NewSample::new(hour, "cam").with_image("http://x/a.jpg"))
            .unwrap();

        let pipeline = TrafficPipeline::new(
            db.clone(),
            Arc::new(OneImage),
            VisionClient::with_provider(Arc::new(Echo)),
        );
        let (queue, worker) = AnalysisQueue::start(Arc::new(pipeline));
        queue
            .submit(AnalysisJob::HourlyBatch {
                hour_start: hour,
                prompt: None,
            })
            .unwrap();
        queue.submit(AnalysisJob::LatestImage { source_id: None }).unwrap();
        drop(queue);
        worker.await.unwrap();

        let sample = db.get_sample(id).unwrap().unwrap();
        assert_eq!(sample.analysis_text.as_deref(), Some("3 bytes of image/jpeg"));
        assert_eq!(db.count_ledger_entries().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_submit_after_worker_stops_fails() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let pipeline = TrafficPipeline::new(
            db,
            Arc::new(OneImage),
            VisionClient::with_provider(Arc::new(Echo)),
        );
        let (queue, worker) = AnalysisQueue::start(Arc::new(pipeline));
        worker.abort();
        let _ = worker.await;
        assert!(queue.submit(AnalysisJob::LatestImage { source_id: None }).is_err());
    }
}
