//! Hourly traffic analysis: locate, fetch, analyze, record.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::fetcher::ImageSource;
use super::locator::{locate, truncate_to_hour};
use crate::db::{Database, TimeSeriesSample};
use crate::llm::VisionClient;

/// Prompt used for hourly batches when no custom prompt is given.
pub const DEFAULT_TRAFFIC_PROMPT: &str = "Analyze this traffic image and provide: \
    1. Count of vehicles visible \
    2. Types of vehicles present (car, truck, bus, etc.) \
    3. Traffic density assessment (light, moderate, heavy) \
    4. Any unusual events or hazards";

/// Prompt used by the on-demand analysis of the latest image. The reply
/// format is what the recommendation parser expects.
pub const RECOMMENDATION_PROMPT: &str = "You are advising a business deciding where to open a \
    new storefront. Study this street camera image. On the first line, write exactly three \
    comma-separated terms that rate this location (for example: busy, affluent, pedestrian-friendly). \
    Then write one short paragraph summarizing foot traffic, vehicle traffic and the likely \
    customer profile. Finish with a bulleted list of concrete recommendations, one per line, \
    each starting with \"- \".";

/// What happened to one sample during a batch.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedSample {
    pub sample_id: i64,
    pub source_id: String,
    pub timestamp: String,
    pub analysis: String,
    pub succeeded: bool,
    pub ledger_id: Option<i64>,
}

pub struct TrafficPipeline {
    db: Database,
    images: Arc<dyn ImageSource>,
    vision: VisionClient,
}

impl TrafficPipeline {
    pub fn new(db: Database, images: Arc<dyn ImageSource>, vision: VisionClient) -> Self {
        Self { db, images, vision }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Analyze the images of one hour bucket, one at a time.
    ///
    /// Per-sample failures are logged and do not stop the batch. Only a
    /// failure to query the hour itself is returned as an error.
    pub fn process_hour(&self, hour_start: DateTime<Utc>, prompt: Option<&str>) -> Result<Vec<ProcessedSample>> {
        let hour_start = truncate_to_hour(hour_start);
        let prompt = prompt
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_TRAFFIC_PROMPT);

        let samples = locate(&self.db, hour_start)?;
        if samples.is_empty() {
            tracing::info!(hour = %hour_start, "No images found for hour");
            return Ok(Vec::new());
        }

        tracing::info!(hour = %hour_start, count = samples.len(), "Processing hourly traffic images");

        let mut processed = Vec::with_capacity(samples.len());
        for sample in &samples {
            processed.push(self.process_sample(sample, prompt));
        }

        let failed = processed.iter().filter(|p| !p.succeeded).count();
        tracing::info!(
            hour = %hour_start,
            processed = processed.len(),
            failed,
            "Hourly traffic analysis complete"
        );
        Ok(processed)
    }

    fn process_sample(&self, sample: &TimeSeriesSample, prompt: &str) -> ProcessedSample {
        let image_ref = sample.image_ref.as_deref().unwrap_or_default();
        tracing::info!(sample_id = sample.id, source_id = %sample.source_id, "Processing image");

        let mut result = ProcessedSample {
            sample_id: sample.id,
            source_id: sample.source_id.clone(),
            timestamp: sample.timestamp.clone(),
            analysis: String::new(),
            succeeded: false,
            ledger_id: None,
        };

        let image = match self.images.fetch(image_ref) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(sample_id = sample.id, error = %e, "Image fetch failed");
                result.analysis = format!("Error fetching image {}: {}", image_ref, e);
                if let Err(e) = self.db.persist_analysis(sample.id, &result.analysis) {
                    tracing::error!(sample_id = sample.id, error = %e, "Failed to store analysis");
                }
                return result;
            }
        };

        let timed = self.vision.analyze_timed(&image.bytes, image.mime_type, prompt);
        result.succeeded = timed.outcome.is_success();
        result.analysis = timed.outcome.into_stored_text();

        match self.db.persist_ledger_entry(
            prompt,
            &result.analysis,
            Some(timed.latency_ms),
            Some(&sample.source_id),
        ) {
            Ok(id) => result.ledger_id = Some(id),
            Err(e) => tracing::error!(sample_id = sample.id, error = %e, "Failed to append ledger entry"),
        }

        if let Err(e) = self.db.persist_analysis(sample.id, &result.analysis) {
            tracing::error!(sample_id = sample.id, error = %e, "Failed to store analysis");
            result.succeeded = false;
        }

        result
    }

    /// Run [`RECOMMENDATION_PROMPT`] against the newest image, of one source
    /// when `source_id` is given, and record the exchange in the ledger under
    /// that image's source. Returns the ledger id, or `None` when there is no
    /// image to analyze.
    pub fn analyze_latest(&self, source_id: Option<&str>) -> Result<Option<i64>> {
        let Some(sample) = self.db.latest_sample_with_image(source_id)? else {
            tracing::info!(source_id = ?source_id, "No images available for analysis");
            return Ok(None);
        };
        let image_ref = sample.image_ref.as_deref().unwrap_or_default();

        let image = match self.images.fetch(image_ref) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(sample_id = sample.id, error = %e, "Image fetch failed");
                return Ok(None);
            }
        };

        let timed = self
            .vision
            .analyze_timed(&image.bytes, image.mime_type, RECOMMENDATION_PROMPT);
        let response = timed.outcome.into_stored_text();
        let id = self.db.persist_ledger_entry(
            RECOMMENDATION_PROMPT,
            &response,
            Some(timed.latency_ms),
            Some(&sample.source_id),
        )?;

        tracing::info!(sample_id = sample.id, ledger_id = id, latency_ms = timed.latency_ms, "Stored latest image analysis");
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::fetcher::{FetchError, FetchedImage};
    use crate::db::NewSample;
    use crate::llm::LlmProvider;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;

    struct StubImages;

    impl ImageSource for StubImages {
        fn fetch(&self, reference: &str) -> Result<FetchedImage, FetchError> {
            if reference.contains("missing") {
                return Err(FetchError::Status {
                    url: reference.to_string(),
                    status: 404,
                });
            }
            Ok(FetchedImage {
                bytes: vec![0x89, 0x50],
                mime_type: "image/png",
            })
        }
    }

    struct RecordingVision {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl LlmProvider for RecordingVision {
        fn analyze_image(&self, _image: &[u8], _mime: &str, prompt: &str) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }

        fn provider_name(&self) -> &'static str {
            "recording"
        }
    }

    fn pipeline(reply: Result<String, String>) -> (TrafficPipeline, Arc<RecordingVision>) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let vision = Arc::new(RecordingVision {
            reply,
            prompts: Mutex::new(Vec::new()),
        });
        let client = VisionClient::with_provider(vision.clone());
        (TrafficPipeline::new(db, Arc::new(StubImages), client), vision)
    }

    fn hour() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_process_hour_stores_analysis_and_ledger() {
        let (pipeline, vision) = pipeline(Ok("count: 3 cars".to_string()));
        let db = pipeline.database().clone();
        let id = db
            .insert_sample(&NewSample::new(hour() + Duration::minutes(30), "cam").with_image("s3://b/a.png"))
            .unwrap();

        let processed = pipeline.process_hour(hour(), None).unwrap();
        assert_eq!(processed.len(), 1);
        assert!(processed[0].succeeded);

        let stored = db.get_sample(id).unwrap().unwrap();
        assert_eq!(stored.analysis_text.as_deref(), Some("count: 3 cars"));

        let ledger = db.recent_ledger_entries(10).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].response, "count: 3 cars");
        assert_eq!(ledger[0].prompt, DEFAULT_TRAFFIC_PROMPT);
        assert_eq!(ledger[0].source_id.as_deref(), Some("cam"));
        assert_eq!(vision.prompts.lock().unwrap().as_slice(), [DEFAULT_TRAFFIC_PROMPT]);
    }

    #[test]
    fn test_custom_prompt_replaces_default() {
        let (pipeline, vision) = pipeline(Ok("ok".to_string()));
        pipeline
            .database()
            .insert_sample(&NewSample::new(hour(), "cam").with_image("http://x/a.jpg"))
            .unwrap();

        pipeline.process_hour(hour(), Some("How many bikes?")).unwrap();
        assert_eq!(vision.prompts.lock().unwrap().as_slice(), ["How many bikes?"]);
    }

    #[test]
    fn test_failures_do_not_abort_batch() {
        let (pipeline, _) = pipeline(Err("model overloaded".to_string()));
        let db = pipeline.database().clone();
        let missing = db
            .insert_sample(&NewSample::new(hour(), "cam").with_image("http://x/missing.png"))
            .unwrap();
        let present = db
            .insert_sample(&NewSample::new(hour() + Duration::minutes(1), "cam").with_image("http://x/b.png"))
            .unwrap();

        let processed = pipeline.process_hour(hour(), None).unwrap();
        assert_eq!(processed.len(), 2);
        assert!(processed.iter().all(|p| !p.succeeded));

        let fetch_failed = db.get_sample(missing).unwrap().unwrap().analysis_text.unwrap();
        assert!(fetch_failed.starts_with("Error fetching image http://x/missing.png"));

        let vision_failed = db.get_sample(present).unwrap().unwrap().analysis_text.unwrap();
        assert_eq!(vision_failed, "Error during vision analysis: model overloaded");

        // Only the sample that reached the model is in the ledger.
        assert_eq!(db.count_ledger_entries().unwrap(), 1);
    }

    /// Deletes one sample the first time the model is called, so storing
    /// that sample's analysis fails after the ledger write.
    struct DeletingVision {
        db: Database,
        victim: i64,
    }

    impl LlmProvider for DeletingVision {
        fn analyze_image(&self, _image: &[u8], _mime: &str, _prompt: &str) -> anyhow::Result<String> {
            let conn = self.db.conn()?;
            conn.execute("DELETE FROM timeseries_analytics WHERE id = ?1", [self.victim])?;
            Ok("count: 2 cars".to_string())
        }

        fn provider_name(&self) -> &'static str {
            "deleting"
        }
    }

    #[test]
    fn test_persist_failure_keeps_siblings_and_ledger() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let victim = db
            .insert_sample(&NewSample::new(hour(), "cam").with_image("http://x/a.png"))
            .unwrap();
        let sibling = db
            .insert_sample(&NewSample::new(hour() + Duration::minutes(20), "cam").with_image("http://x/b.png"))
            .unwrap();

        let vision = VisionClient::with_provider(Arc::new(DeletingVision {
            db: db.clone(),
            victim,
        }));
        let pipeline = TrafficPipeline::new(db.clone(), Arc::new(StubImages), vision);

        let processed = pipeline.process_hour(hour(), None).unwrap();
        assert_eq!(processed.len(), 2);

        let lost = processed.iter().find(|p| p.sample_id == victim).unwrap();
        assert!(!lost.succeeded);
        assert!(lost.ledger_id.is_some());

        let kept = processed.iter().find(|p| p.sample_id == sibling).unwrap();
        assert!(kept.succeeded);
        assert_eq!(
            db.get_sample(sibling).unwrap().unwrap().analysis_text.as_deref(),
            Some("count: 2 cars")
        );

        // The ledger write for the lost sample is not rolled back.
        assert_eq!(db.count_ledger_entries().unwrap(), 2);
        let entry = db.get_ledger_entry(lost.ledger_id.unwrap()).unwrap().unwrap();
        assert_eq!(entry.response, "count: 2 cars");
    }

    #[test]
    fn test_analyze_latest_writes_ledger_only() {
        let (pipeline, vision) = pipeline(Ok("busy, affluent, walkable".to_string()));
        let db = pipeline.database().clone();
        assert_eq!(pipeline.analyze_latest(None).unwrap(), None);

        let id = db
            .insert_sample(&NewSample::new(hour(), "cam").with_image("http://x/a.png"))
            .unwrap();
        let ledger_id = pipeline.analyze_latest(None).unwrap().unwrap();

        let entry = db.get_ledger_entry(ledger_id).unwrap().unwrap();
        assert_eq!(entry.prompt, RECOMMENDATION_PROMPT);
        assert_eq!(entry.response, "busy, affluent, walkable");
        assert_eq!(entry.source_id.as_deref(), Some("cam"));
        assert!(db.get_sample(id).unwrap().unwrap().analysis_text.is_none());
        assert_eq!(vision.prompts.lock().unwrap().len(), 1);

        assert_eq!(pipeline.analyze_latest(Some("elsewhere")).unwrap(), None);
        assert_eq!(vision.prompts.lock().unwrap().len(), 1);
    }
}
