//! Voice audio retrieval from the HTTP backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid backend url {url}: {reason}")]
    InvalidBase { url: String, reason: String },

    #[error("no audio for id {0}")]
    Missing(String),

    #[error("audio request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Where voice bytes for an `audio_id` come from.
#[async_trait]
pub trait AudioSource: Send + Sync {
    async fn fetch(&self, audio_id: &str) -> Result<Vec<u8>, FetchError>;
}

/// `GET {backend}/audio/{audio_id}`.
pub struct AudioFetcher {
    client: reqwest::Client,
    base: Url,
}

impl AudioFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let base = Url::parse(base_url).map_err(|e| FetchError::InvalidBase {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(FetchError::InvalidBase {
                url: base_url.to_string(),
                reason: "not a base url".to_string(),
            });
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    /// The id goes in as a single percent-encoded path segment.
    pub fn audio_url(&self, audio_id: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("audio").push(audio_id);
        }
        url
    }
}

#[async_trait]
impl AudioSource for AudioFetcher {
    async fn fetch(&self, audio_id: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.audio_url(audio_id);
        debug!(%url, "fetching voice audio");
        let response = self.client.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::Missing(audio_id.to_string()));
        }
        let bytes = response.error_for_status()?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(base: &str) -> AudioFetcher {
        AudioFetcher::new(base, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn audio_url_encodes_id_as_one_segment() {
        let f = fetcher("http://localhost:8000");
        assert_eq!(
            f.audio_url("abc123").as_str(),
            "http://localhost:8000/audio/abc123"
        );
        assert_eq!(
            f.audio_url("a b/c").as_str(),
            "http://localhost:8000/audio/a%20b%2Fc"
        );
    }

    #[test]
    fn audio_url_keeps_base_path() {
        let f = fetcher("http://studio.local/api/");
        assert_eq!(
            f.audio_url("42").as_str(),
            "http://studio.local/api/audio/42"
        );
    }

    #[test]
    fn rejects_bad_base() {
        assert!(matches!(
            AudioFetcher::new("not a url", Duration::from_secs(1)),
            Err(FetchError::InvalidBase { .. })
        ));
        assert!(matches!(
            AudioFetcher::new("mailto:someone@example.com", Duration::from_secs(1)),
            Err(FetchError::InvalidBase { .. })
        ));
    }
}
