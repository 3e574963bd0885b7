//! Urban Lens: traffic camera analytics with hourly vision-LLM batches.

pub mod analytics;
pub mod auth;
pub mod config;
pub mod db;
pub mod llm;
pub mod logging;
pub mod schedule;
pub mod server;
