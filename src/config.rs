use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub images: ImageConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Versioned prefix every API router is nested under.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Allowed CORS origins. `http://localhost:3000` is always appended.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Debug mode disables the hourly scheduler.
    #[serde(default)]
    pub debug: bool,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_prefix: default_api_prefix(),
            cors_origins: Vec::new(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("urban-lens")
        .join("urban-lens.db")
}

fn default_pool_size() -> u32 {
    8
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderType {
    #[default]
    Gemini,
    OpenAI,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProviderType,

    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_llm_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderType::default(),
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Whether `s3://` image references may be resolved at all.
    #[serde(default = "default_object_store_enabled")]
    pub object_store_enabled: bool,

    /// Base URL used for anonymous path-style object reads.
    #[serde(default = "default_object_store_endpoint")]
    pub object_store_endpoint: String,
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_object_store_enabled() -> bool {
    true
}

fn default_object_store_endpoint() -> String {
    "https://s3.amazonaws.com".to_string()
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            object_store_enabled: default_object_store_enabled(),
            object_store_endpoint: default_object_store_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,

    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,

    #[serde(default = "default_access_token_expire_minutes")]
    pub access_token_expire_minutes: i64,

    #[serde(default = "default_reset_token_expire_hours")]
    pub reset_token_expire_hours: i64,

    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_access_token_expire_minutes() -> i64 {
    30
}

fn default_reset_token_expire_hours() -> i64 {
    24
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_algorithm: default_jwt_algorithm(),
            access_token_expire_minutes: default_access_token_expire_minutes(),
            reset_token_expire_hours: default_reset_token_expire_hours(),
            frontend_url: default_frontend_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Whether the hourly traffic batch runs at all.
    #[serde(default = "default_schedule_enabled")]
    pub enabled: bool,

    /// Minutes past the hour at which the previous hour is processed,
    /// giving upstream ingestion time to settle.
    #[serde(default = "default_minute_offset")]
    pub minute_offset: u32,
}

fn default_schedule_enabled() -> bool {
    true
}

fn default_minute_offset() -> u32 {
    1
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: default_schedule_enabled(),
            minute_offset: default_minute_offset(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            images: ImageConfig::default(),
            auth: AuthConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("URBAN_LENS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_path());
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `URBAN_LENS_*` overrides using the given variable lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("URBAN_LENS_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Some(path) = lookup("URBAN_LENS_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(key) = lookup("URBAN_LENS_LLM_API_KEY").or_else(|| lookup("GEMINI_API_KEY")) {
            self.llm.api_key = Some(key);
        }
        if let Some(secret) = lookup("URBAN_LENS_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(origins) = lookup("URBAN_LENS_CORS_ORIGINS") {
            self.server.cors_origins = parse_origin_list(&origins);
        }
        if let Some(flag) = lookup("URBAN_LENS_OBJECT_STORE").and_then(|v| parse_bool(&v)) {
            self.images.object_store_enabled = flag;
        }
        if let Some(flag) = lookup("URBAN_LENS_DEBUG").and_then(|v| parse_bool(&v)) {
            self.server.debug = flag;
        }
    }

    /// CORS origins with the local frontend always present.
    pub fn cors_origins(&self) -> Vec<String> {
        let mut origins = self.server.cors_origins.clone();
        let local = "http://localhost:3000".to_string();
        if !origins.contains(&local) {
            origins.push(local);
        }
        origins
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("urban-lens")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// Accepts either `a,b,c` or a JSON-style `["a","b"]` list.
fn parse_origin_list(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
            return list;
        }
    }
    trimmed
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
