pub mod client;
pub mod provider;
pub mod queue;

pub use client::{TimedOutcome, VisionClient, VisionOutcome};
pub use provider::{create_provider, GeminiProvider, LlmProvider, OpenAICompatibleProvider};
pub use queue::{AnalysisJob, AnalysisQueue, QueueClosed};
