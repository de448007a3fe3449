//! Backoff for the remote panel fetch.

use std::future::Future;

use anyhow::{anyhow, Result};
use rand::Rng;
use reqwest::StatusCode;
use tokio::time::{sleep, Duration};

use crate::logging::{log, obj, v_num, v_str, Domain, Level};

/// Why one fetch attempt failed.
#[derive(Debug)]
pub enum FetchFailure {
    /// Connection trouble, timeouts, throttling and 5xx.
    Transient(anyhow::Error),
    /// The server answered and another attempt will get the same answer.
    Fatal(anyhow::Error),
}

impl FetchFailure {
    pub fn from_status(url: &str, status: StatusCode) -> Self {
        let err = anyhow!("GET {} returned {}", url, status);
        match status.as_u16() {
            408 | 429 | 500 | 502 | 503 | 504 => FetchFailure::Transient(err),
            _ => FetchFailure::Fatal(err),
        }
    }

    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        FetchFailure::Transient(err.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchFailure::Transient(_))
    }

    fn into_error(self) -> anyhow::Error {
        match self {
            FetchFailure::Transient(e) | FetchFailure::Fatal(e) => e,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Backoff {
    /// Extra attempts after the first.
    pub retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay_ms: 250,
            max_delay_ms: 5000,
            jitter: 0.3,
        }
    }
}

impl Backoff {
    pub fn with_retries(retries: u32) -> Self {
        Self {
            retries,
            ..Default::default()
        }
    }

    /// Doubling delay capped at `max_delay_ms`, then scaled by ±`jitter`.
    pub fn delay(&self, retry: u32) -> Duration {
        let capped = (self.base_delay_ms as f64 * 2f64.powi(retry as i32)).min(self.max_delay_ms as f64);
        let spread = capped * self.jitter;
        let offset = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_millis((capped + offset).max(0.0) as u64)
    }
}

/// Run `attempt` until it succeeds, fails fatally, or the retries run out.
pub async fn fetch_with_backoff<F, Fut, T>(backoff: &Backoff, source: &str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, FetchFailure>>,
{
    let mut retry = 0;
    loop {
        let failure = match attempt().await {
            Ok(body) => return Ok(body),
            Err(failure) => failure,
        };
        if !failure.is_transient() || retry >= backoff.retries {
            return Err(failure.into_error());
        }
        let wait = backoff.delay(retry);
        retry += 1;
        log(
            Level::Warn,
            Domain::Data,
            "fetch_retry",
            obj(&[
                ("source", v_str(source)),
                ("retry", v_num(retry as f64)),
                ("of", v_num(backoff.retries as f64)),
                ("error", v_str(&failure.into_error().to_string())),
                ("wait_ms", v_num(wait.as_millis() as f64)),
            ]),
        );
        sleep(wait).await;
    }
}
