//! Notes-vault persistence, media download and request pacing for AWIN.

use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

pub mod vault;

pub use vault::{JobScope, NotesStore, StoreError, StoredNote, UpsertOutcome, VaultStore};

pub const CRATE_NAME: &str = "awin-storage";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Randomized pause taken after every navigation: the configured minimum plus a
/// jitter of 0.5s up to 0.8x the minimum. A zero minimum disables pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolitenessDelay {
    pub min_delay: Duration,
}

impl PolitenessDelay {
    pub fn new(min_delay: Duration) -> Self {
        Self { min_delay }
    }

    pub fn disabled() -> Self {
        Self {
            min_delay: Duration::ZERO,
        }
    }

    pub fn jitter_bounds(&self) -> (Duration, Duration) {
        let low = Duration::from_millis(500);
        let high = self.min_delay.mul_f64(0.8).max(low);
        (low, high)
    }

    pub fn sample(&self) -> Duration {
        if self.min_delay.is_zero() {
            return Duration::ZERO;
        }
        let (low, high) = self.jitter_bounds();
        let jitter_ms = rand::rng().random_range(low.as_millis() as u64..=high.as_millis() as u64);
        self.min_delay + Duration::from_millis(jitter_ms)
    }

    pub async fn pause(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Responses a CDN may answer differently a moment later: throttling,
/// gateway hiccups and request timeouts. Missing or forbidden assets are final.
pub fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

pub fn retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Pause schedule between attempts at one asset download.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Pause before retry number `retries_done + 1`, or `None` once the failure
    /// is final or the retries are spent. Doubles per retry up to `max_delay`.
    pub fn next_delay(&self, retries_done: usize, retryable: bool) -> Option<Duration> {
        if !retryable || retries_done >= self.max_retries {
            return None;
        }
        let doubling = 2u32.saturating_pow(retries_done.min(31) as u32);
        Some(self.base_delay.saturating_mul(doubling).min(self.max_delay))
    }
}

#[derive(Debug, Clone)]
pub struct MediaFetcherConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for MediaFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Plain HTTP downloader for image assets referenced by scraped campaigns.
#[derive(Debug)]
pub struct MediaFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl MediaFetcher {
    pub fn new(config: MediaFetcherConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(&self, slug: &str, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetch_with_retries(url)
            .instrument(info_span!("media_fetch", slug, url))
            .await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut retries = 0;
        loop {
            let failure = match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp.bytes().await?.to_vec()),
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = retryable_status(status);
                    (
                        FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: resp.url().to_string(),
                        },
                        retryable,
                    )
                }
                Err(err) => {
                    let retryable = retryable_error(&err);
                    (FetchError::Request(err), retryable)
                }
            };
            let (error, retryable) = failure;
            let Some(pause) = self.backoff.next_delay(retries, retryable) else {
                return Err(error);
            };
            warn!(error = %error, retries, "media download failed; retrying");
            tokio::time::sleep(pause).await;
            retries += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn cdn_throttling_is_retried_but_missing_assets_are_not() {
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::REQUEST_TIMEOUT,
        ] {
            assert!(retryable_status(status), "{status} should retry");
        }
        for status in [StatusCode::NOT_FOUND, StatusCode::FORBIDDEN, StatusCode::GONE] {
            assert!(!retryable_status(status), "{status} should not retry");
        }
    }

    #[test]
    fn media_retries_double_then_stop_at_the_configured_count() {
        let policy = BackoffPolicy::default();
        let schedule: Vec<_> = (0..4).map(|n| policy.next_delay(n, true)).collect();
        assert_eq!(
            schedule,
            vec![
                Some(Duration::from_millis(250)),
                Some(Duration::from_millis(500)),
                Some(Duration::from_millis(1000)),
                None,
            ]
        );
        assert_eq!(policy.next_delay(0, false), None);

        let patient = BackoffPolicy {
            max_retries: 40,
            ..BackoffPolicy::default()
        };
        assert_eq!(patient.next_delay(35, true), Some(Duration::from_secs(5)));
    }

    #[test]
    fn politeness_delay_scales_with_minimum() {
        let delay = PolitenessDelay::new(Duration::from_millis(2500));
        assert_eq!(
            delay.jitter_bounds(),
            (Duration::from_millis(500), Duration::from_millis(2000))
        );
        for _ in 0..50 {
            let sample = delay.sample();
            assert!(sample >= Duration::from_millis(3000));
            assert!(sample <= Duration::from_millis(4500));
        }

        let short = PolitenessDelay::new(Duration::from_millis(200));
        assert_eq!(short.jitter_bounds().1, Duration::from_millis(500));
        assert_eq!(PolitenessDelay::disabled().sample(), Duration::ZERO);
    }
}
