//! Bounded retries for requests that fail because of intermittent server issues.

use crate::config::ClientParams;
use crate::error::{ClientError, Result};
use crate::transport::Transport;
use bytes::Bytes;
use rand::Rng;
use reqwest::{Method, Url};
use std::time::{Duration, Instant};

const BACKOFF_FACTOR: f64 = 2.0;
const DEFAULT_MIN_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Final result of a retried exchange.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub status: u16,
    pub body: Bytes,
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// A request body with its content type.
#[derive(Debug, Clone)]
pub struct Payload {
    pub content_type: &'static str,
    pub data: Bytes,
}

impl Payload {
    pub fn json(data: impl Into<Bytes>) -> Self {
        Self {
            content_type: "application/json",
            data: data.into(),
        }
    }
}

/// 500 is an intermittent error, 404 most likely is not.
pub fn should_retry(status: u16) -> bool {
    status >= 500
}

/// Jittered exponential backoff between `min` and `max`. A zero bound falls back to
/// 100ms / 10s so retries never fire back to back.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = if min.is_zero() { DEFAULT_MIN_BACKOFF } else { min };
        let max = if max.is_zero() { DEFAULT_MAX_BACKOFF } else { max };
        Self { min, max, attempt: 0 }
    }

    /// Delay before the next attempt; each call advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.for_attempt(self.attempt, rand::rng().random::<f64>());
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn for_attempt(&self, attempt: u32, jitter: f64) -> Duration {
        if self.min >= self.max {
            return self.max;
        }
        let min = self.min.as_nanos() as f64;
        let ceiling = min * BACKOFF_FACTOR.powi(attempt.min(i32::MAX as u32) as i32);
        let nanos = jitter * (ceiling - min) + min;
        if !nanos.is_finite() || nanos >= self.max.as_nanos() as f64 {
            return self.max;
        }
        Duration::from_nanos(nanos.round() as u64).clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl From<&ClientParams> for RetryPolicy {
    fn from(params: &ClientParams) -> Self {
        Self {
            max_retries: params.max_retries,
            min_backoff: params.min_backoff,
            max_backoff: params.max_backoff,
        }
    }
}

/// Issues requests relative to a fixed base URL and retries 5xx responses.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    base: Url,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(base: Url, policy: RetryPolicy) -> Self {
        Self { base, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Absolute target for `path`, which can never leave the base path.
    pub fn target(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(&join_path(self.base.path(), path));
        url
    }

    /// Run one logical request. A transport error ends the loop immediately; a 5xx
    /// response is retried after a backoff until `max_retries` attempts were made,
    /// then the last response is returned as is.
    pub async fn execute(
        &self,
        transport: &Transport,
        method: Method,
        path: &str,
        payload: Option<Payload>,
    ) -> Result<RequestOutcome> {
        let url = self.target(path);
        let mut backoff = Backoff::new(self.policy.min_backoff, self.policy.max_backoff);
        let max_retries = self.policy.max_retries.max(1);

        let mut attempt = 1;
        loop {
            let started = Instant::now();
            let mut request = transport.http().request(method.clone(), url.clone());
            if let Some(ref payload) = payload {
                request = request
                    .header(reqwest::header::CONTENT_TYPE, payload.content_type)
                    .body(payload.data.clone());
            }

            let response = request.send().await.map_err(ClientError::Transport)?;
            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(ClientError::Transport)?;
            let outcome = RequestOutcome { status, body };

            if !should_retry(status) || attempt >= max_retries {
                return Ok(outcome);
            }

            let sleep = backoff.next_delay();
            tracing::info!(
                method = %method,
                path = %path,
                status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                attempt,
                max_retries,
                retry_in_ms = sleep.as_millis() as u64,
                "Retrying request after server error"
            );
            tokio::time::sleep(sleep).await;
            attempt += 1;
        }
    }
}

/// Join `relative` onto `base`. Leading separators, `.` and `..` in `relative` are
/// resolved against the relative part only.
pub fn join_path(base: &str, relative: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let base = base.trim_end_matches('/');
    format!("{}/{}", base, segments.join("/"))
}

/// Percent-encode a value so it is a single path segment.
pub fn escape_segment(input: &str) -> String {
    urlencoding::encode(input).into_owned()
}
