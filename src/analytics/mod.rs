pub mod fetcher;
pub mod locator;
pub mod metrics;
pub mod persister;
pub mod pipeline;
pub mod recommendations;

pub use fetcher::{FetchError, FetchedImage, ImageFetcher, ImageSource};
pub use locator::{evenly_spaced, locate, truncate_to_hour, MAX_HOURS_AGO};
pub use metrics::{get_metrics, get_metrics_by_location, MetricsQuery, MetricsReport, TimeAggregation};
pub use pipeline::{ProcessedSample, TrafficPipeline, DEFAULT_TRAFFIC_PROMPT, RECOMMENDATION_PROMPT};
pub use recommendations::Recommendation;
