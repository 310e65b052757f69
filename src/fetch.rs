//! HTTP access for sources and detail pages.
//!
//! Everything that talks to the network goes through [`HttpFetch`], so the
//! pipeline can run against canned pages in tests.
//!
//! - [`HttpFetch`]: the seam, one `GET` returning the body text
//! - [`ReqwestFetcher`]: the real client, with a bounded timeout
//!
//! There are no retries. A failed request is a [`FetchError`] that callers
//! log and turn into "no records".

use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

/// Why a request produced no usable body.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// A minimal blocking-in-spirit HTTP client: one `GET`, whole body as text.
///
/// Calls are awaited one at a time; implementors need not be `Send`.
#[allow(async_fn_in_trait)]
pub trait HttpFetch {
    async fn get_text(&self, url: &Url) -> Result<String, FetchError>;
}

/// [`HttpFetch`] backed by a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Build a client with a fixed user agent and a request timeout.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpFetch for ReqwestFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        let t0 = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT_LANGUAGE, "pt-BR,pt;q=0.9")
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Non-success HTTP status");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        debug!(
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched"
        );
        Ok(body)
    }
}

fn classify(url: &Url, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}
