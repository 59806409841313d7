// JSON over HTTP with retry
// Blocking ureq calls run on the blocking pool so async callers never stall


use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};
use url::Url;

use crate::{BidMatchError, Result};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct HttpClient {
    base_url: Url,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff: Duration,
    headers: Vec<(String, String)>,
}

impl HttpClient {
    #[inline]
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        Self {
            base_url,
            agent: build_agent(timeout),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
            headers: Vec::new(),
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry; doubles on each further attempt
    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Header sent with every request
    #[inline]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[inline]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// GET `path` with repeated-key query pairs and decode the JSON body
    #[inline]
    pub async fn get_json<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let mut url = self.endpoint(path)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let client = self.clone();
        let body = run_blocking(move || {
            client.make_request_with_retry(&url, || {
                let mut request = client.agent.get(url.as_str());
                for (name, value) in &client.headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                request
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
        })
        .await?;

        serde_json::from_str(&body).map_err(BidMatchError::from)
    }

    /// POST a JSON body to `path` and decode the JSON response
    #[inline]
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        let url = self.endpoint(path)?;
        let request_json = serde_json::to_string(body)?;

        let client = self.clone();
        let response_text = run_blocking(move || {
            client.make_request_with_retry(&url, || {
                let mut request = client
                    .agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json");
                for (name, value) in &client.headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                request
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
        })
        .await?;

        if response_text.trim().is_empty() {
            return serde_json::from_str("{}").map_err(BidMatchError::from);
        }
        serde_json::from_str(&response_text).map_err(BidMatchError::from)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| {
            BidMatchError::InvalidArgument(format!(
                "invalid endpoint '{}' for {}: {}",
                path, self.base_url, e
            ))
        })
    }

    fn make_request_with_retry<F>(&self, url: &Url, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> std::result::Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!(
                "HTTP request to {} attempt {}/{}",
                url.path(),
                attempt,
                self.retry_attempts
            );

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    match &error {
                        ureq::Error::StatusCode(status) if *status >= 500 || *status == 429 => {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, self.retry_attempts
                            );
                        }
                        ureq::Error::StatusCode(status) => {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(classify_status(*status, url));
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            return Err(BidMatchError::BackendUnavailable(format!(
                                "request to {} failed: {}",
                                url, error
                            )));
                        }
                    }

                    last_error = Some(BidMatchError::BackendUnavailable(format!(
                        "request to {} failed: {}",
                        url, error
                    )));

                    if attempt < self.retry_attempts {
                        let delay = self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", url);

        Err(last_error.unwrap_or_else(|| {
            BidMatchError::BackendUnavailable(format!("request to {} failed after retries", url))
        }))
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

fn classify_status(status: u16, url: &Url) -> BidMatchError {
    match status {
        404 => BidMatchError::NotFound(format!("{} returned HTTP 404", url.path())),
        400..=499 => BidMatchError::InvalidArgument(format!(
            "{} rejected the request with HTTP {}",
            url.path(),
            status
        )),
        _ => BidMatchError::BackendUnavailable(format!("{} returned HTTP {}", url.path(), status)),
    }
}

async fn run_blocking<F>(work: F) -> Result<String>
where
    F: FnOnce() -> Result<String> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BidMatchError::Other(anyhow::anyhow!("HTTP worker task failed: {}", e)))?
}
