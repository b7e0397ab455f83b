//! Acoustic fingerprint identification.
//!
//! The identification pipeline is: generate a Chromaprint fingerprint with
//! `fpcalc`, then look it up on the AcoustID web service to get candidate
//! field values with a confidence score. Both halves sit behind the
//! [`FingerprintApi`] trait so the resolver can be tested with fakes.
//!
//! The service is rate-limited: callers go through [`RateLimiter`] before
//! every request, which enforces a minimum interval between lookups.

mod adapter;
mod client;
pub mod dto;
pub mod fpcalc;

pub use client::LookupClient;

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Audio fingerprint for a track
#[derive(Debug, Clone)]
pub struct AudioFingerprint {
    /// The fingerprint string (Chromaprint format)
    pub fingerprint: String,
    /// Duration of the audio in seconds (required by the lookup service)
    pub duration_secs: u32,
}

/// A candidate identification returned by the lookup service.
///
/// These are OUR types - they don't change when the external API changes.
/// All API responses get converted into this via the adapter.
#[derive(Debug, Clone, Default)]
pub struct TrackCandidate {
    /// Confidence score (0.0 to 1.0)
    pub score: f32,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub label: Option<String>,
}

/// Errors that can occur during fingerprint identification
#[derive(Debug, Clone, thiserror::Error)]
pub enum LookupError {
    #[error("Failed to generate fingerprint: {0}")]
    Fingerprint(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("No matches found for fingerprint")]
    NoMatches,

    #[error("Rate limited - try again later")]
    RateLimited,

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

/// Trait for fingerprint-based track identification.
///
/// Implement this trait to create mock implementations for testing.
#[async_trait]
pub trait FingerprintApi: Send + Sync {
    /// Identify a file, returning candidates ordered by the service.
    async fn identify(&self, path: &Path) -> Result<Vec<TrackCandidate>, LookupError>;
}

/// Production identification: fpcalc + AcoustID lookup.
pub struct FingerprintResolver {
    client: LookupClient,
}

impl FingerprintResolver {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: LookupClient::new(api_key),
        }
    }

    /// Check if fingerprinting is available (fpcalc installed)
    pub fn is_available() -> bool {
        fpcalc::is_fpcalc_available()
    }
}

#[async_trait]
impl FingerprintApi for FingerprintResolver {
    async fn identify(&self, path: &Path) -> Result<Vec<TrackCandidate>, LookupError> {
        // fpcalc decodes the whole file; keep it off the async threads
        let owned = path.to_path_buf();
        let fp = tokio::task::spawn_blocking(move || fpcalc::generate_fingerprint(&owned))
            .await
            .map_err(|e| LookupError::Fingerprint(e.to_string()))??;

        self.client.lookup(&fp).await
    }
}

/// Enforces a minimum interval between requests to the lookup service.
///
/// Shared by every operation in a service instance so concurrent batches
/// cannot exceed the service's documented limit (1 request/second).
pub struct RateLimiter {
    interval: Duration,
    last: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: tokio::sync::Mutex::new(None),
        }
    }

    /// Wait until a request is allowed, then claim the slot.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Mock implementations for testing.
#[cfg(test)]
pub mod mocks {
    use super::*;

    /// Mock identification source that returns predefined candidates.
    pub struct MockFingerprint {
        /// Candidates to return from identify
        pub candidates: Vec<TrackCandidate>,
        /// Error to return (takes precedence over candidates)
        pub error: Option<LookupError>,
    }

    impl MockFingerprint {
        /// Create a mock that returns no matches.
        pub fn no_matches() -> Self {
            Self {
                candidates: vec![],
                error: None,
            }
        }

        /// Create a mock that returns a single candidate.
        pub fn single(artist: &str, title: &str, score: f32) -> Self {
            Self {
                candidates: vec![TrackCandidate {
                    score,
                    artist: Some(artist.to_string()),
                    title: Some(title.to_string()),
                    ..Default::default()
                }],
                error: None,
            }
        }

        /// Create a mock that returns an error.
        pub fn with_error(error: LookupError) -> Self {
            Self {
                candidates: vec![],
                error: Some(error),
            }
        }
    }

    #[async_trait]
    impl FingerprintApi for MockFingerprint {
        async fn identify(&self, _path: &Path) -> Result<Vec<TrackCandidate>, LookupError> {
            if let Some(ref err) = self.error {
                return Err(err.clone());
            }
            Ok(self.candidates.clone())
        }
    }
}
