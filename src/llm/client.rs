use std::sync::Arc;
use std::time::Instant;

use super::provider::{create_provider, LlmProvider};
use crate::config::LlmConfig;

/// Result of one vision call, kept tagged until it is written to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisionOutcome {
    Success(String),
    Failure(String),
}

impl VisionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, VisionOutcome::Success(_))
    }

    /// The text persisted for this outcome. Failures become a readable
    /// error message so a string is always stored.
    pub fn into_stored_text(self) -> String {
        match self {
            VisionOutcome::Success(text) => text,
            VisionOutcome::Failure(message) => {
                format!("Error during vision analysis: {}", message)
            }
        }
    }
}

/// A vision outcome with the wall-clock latency of the model call.
#[derive(Debug, Clone)]
pub struct TimedOutcome {
    pub outcome: VisionOutcome,
    pub latency_ms: i64,
}

/// Vision client that wraps a provider implementation
#[derive(Clone)]
pub struct VisionClient {
    provider: Arc<dyn LlmProvider>,
}

impl VisionClient {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            provider: Arc::from(create_provider(config)),
        }
    }

    pub fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    /// Ask the model about one image. Never fails; errors come back as
    /// [`VisionOutcome::Failure`].
    pub fn analyze(&self, image: &[u8], mime_type: &str, prompt: &str) -> VisionOutcome {
        match self.provider.analyze_image(image, mime_type, prompt) {
            Ok(text) => VisionOutcome::Success(text),
            Err(e) => {
                tracing::warn!(provider = self.provider_name(), error = %e, "Vision analysis failed");
                VisionOutcome::Failure(e.to_string())
            }
        }
    }

    /// [`analyze`](Self::analyze), timed around the model call only.
    pub fn analyze_timed(&self, image: &[u8], mime_type: &str, prompt: &str) -> TimedOutcome {
        let started = Instant::now();
        let outcome = self.analyze(image, mime_type, prompt);
        TimedOutcome {
            outcome,
            latency_ms: elapsed_millis(started),
        }
    }
}

/// Milliseconds since `started`, rounded to the nearest integer.
fn elapsed_millis(started: Instant) -> i64 {
    (started.elapsed().as_secs_f64() * 1000.0).round() as i64
}
