//! Resolves image references to bytes.
//!
//! Two reference forms are understood: `s3://bucket/key`, read anonymously
//! through the configured object-store endpoint, and plain `http(s)://` URLs.

use std::io::Read;
use std::time::Duration;

use thiserror::Error;

use crate::config::ImageConfig;

/// Responses larger than this are rejected rather than buffered.
const MAX_IMAGE_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsupported image reference scheme `{scheme}`")]
    UnsupportedScheme { scheme: String },
    #[error("invalid image reference `{reference}`: {reason}")]
    InvalidUrl { reference: String, reason: String },
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("failed to read image body from {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// Raw image bytes with the MIME type inferred from the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

/// Anything that can turn an image reference into bytes.
pub trait ImageSource: Send + Sync {
    fn fetch(&self, reference: &str) -> Result<FetchedImage, FetchError>;
}

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    ObjectStore { bucket: String, key: String },
    Http(String),
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self, FetchError> {
        let reference = reference.trim();
        let (scheme, rest) = reference.split_once("://").ok_or_else(|| FetchError::InvalidUrl {
            reference: reference.to_string(),
            reason: "missing scheme".to_string(),
        })?;

        match scheme.to_ascii_lowercase().as_str() {
            "s3" => {
                let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
                if bucket.is_empty() || key.is_empty() {
                    return Err(FetchError::InvalidUrl {
                        reference: reference.to_string(),
                        reason: "expected s3://bucket/key".to_string(),
                    });
                }
                Ok(ImageRef::ObjectStore {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            "http" | "https" => {
                if rest.is_empty() {
                    return Err(FetchError::InvalidUrl {
                        reference: reference.to_string(),
                        reason: "missing host".to_string(),
                    });
                }
                Ok(ImageRef::Http(reference.to_string()))
            }
            other => Err(FetchError::UnsupportedScheme {
                scheme: other.to_string(),
            }),
        }
    }
}

/// Infer the MIME type from the reference's file extension.
pub fn mime_from_url(reference: &str) -> &'static str {
    let path = reference
        .split(['?', '#'])
        .next()
        .unwrap_or(reference);
    let file = path.rsplit('/').next().unwrap_or(path);
    let ext = match file.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "image/png",
    };

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "image/png",
    }
}

/// Blocking fetcher over `ureq`.
pub struct ImageFetcher {
    agent: ureq::Agent,
    object_store_enabled: bool,
    object_store_endpoint: String,
}

impl ImageFetcher {
    pub fn new(config: &ImageConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build();
        Self {
            agent,
            object_store_enabled: config.object_store_enabled,
            object_store_endpoint: config.object_store_endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// The HTTP URL an object-store reference is read from.
    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.object_store_endpoint, bucket, key)
    }

    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::Status(status, _) => FetchError::Status {
                url: url.to_string(),
                status,
            },
            ureq::Error::Transport(t) => FetchError::Transport {
                url: url.to_string(),
                message: t.to_string(),
            },
        })?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_IMAGE_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|source| FetchError::Io {
                url: url.to_string(),
                source,
            })?;
        Ok(bytes)
    }
}

impl ImageSource for ImageFetcher {
    fn fetch(&self, reference: &str) -> Result<FetchedImage, FetchError> {
        let url = match ImageRef::parse(reference)? {
            ImageRef::ObjectStore { bucket, key } => {
                if !self.object_store_enabled {
                    return Err(FetchError::UnsupportedScheme {
                        scheme: "s3".to_string(),
                    });
                }
                self.object_url(&bucket, &key)
            }
            ImageRef::Http(url) => url,
        };

        let bytes = self.get(&url)?;
        tracing::debug!(reference, size = bytes.len(), "Fetched image");
        Ok(FetchedImage {
            bytes,
            mime_type: mime_from_url(reference),
        })
    }
}
