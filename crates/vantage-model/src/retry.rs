// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Time-budgeted retry transport sitting beneath every provider's HTTP fetch.
//!
//! Classifies each response/transport error into a retry class, then retries
//! with either the server-hinted `Retry-After` delay or jittered exponential
//! backoff, bounded by a global wall-clock budget.
//!
//! Cancellation is not threaded through this layer: `send_with_retry` has no
//! handle to a session's cancel signal, and threading one down here would mean
//! changing `ModelProvider::complete`'s signature across every driver. Instead
//! the turn-level caller (`vantage-core`'s agentic loop) races the whole
//! in-flight completion — retries, sleeps and all — against the cancel
//! channel via `tokio::select!`; dropping the losing branch aborts any
//! `tokio::time::sleep` suspended inside this loop for free.

use std::time::Duration;

use anyhow::Context;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use reqwest::StatusCode;
use tracing::warn;

/// How a single response or transport error should be handled by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Ok,
    RateLimited,
    ServerRetryable,
    NetworkRetryable,
    Timeout,
    ClientFatal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorClass::RateLimited
                | ErrorClass::ServerRetryable
                | ErrorClass::NetworkRetryable
                | ErrorClass::Timeout
        )
    }
}

/// Classifies an HTTP status code per the retry taxonomy.
pub fn classify_status(status: StatusCode) -> ErrorClass {
    if status.is_success() {
        ErrorClass::Ok
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ErrorClass::RateLimited
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::CONFLICT {
        ErrorClass::ServerRetryable
    } else if status.is_server_error() {
        ErrorClass::ServerRetryable
    } else {
        ErrorClass::ClientFatal
    }
}

/// Classifies a `reqwest::Error` that occurred before a response was received.
pub fn classify_transport_error(err: &reqwest::Error) -> ErrorClass {
    if err.is_timeout() {
        ErrorClass::Timeout
    } else if err.is_connect() || err.is_request() {
        ErrorClass::NetworkRetryable
    } else {
        ErrorClass::NetworkRetryable
    }
}

/// Tunables for the retry loop, overridable via environment variables at
/// startup (see `RetryPolicy::from_env`).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Starting delay for exponential backoff when no `Retry-After` is present.
    pub initial_delay: Duration,
    /// Ceiling applied to any single computed delay, hinted or backed off.
    pub max_per_retry_delay: Duration,
    /// Floor enforced between retries regardless of hint or backoff curve.
    pub min_interval: Duration,
    /// Wall-clock budget from the first attempt; exceeding it surfaces the
    /// last error instead of retrying again.
    pub global_budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_per_retry_delay: Duration::from_secs(20 * 60),
            min_interval: Duration::from_secs(30),
            global_budget: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl RetryPolicy {
    /// Builds a policy from defaults overridden by environment variables,
    /// each read under its bare name first and falling back to a
    /// `VANTAGE_`-prefixed alias (see spec.md §6's naming convention).
    pub fn from_env() -> Self {
        let mut policy = Self::default();
        if let Some(secs) = read_env_secs("RETRY_TIMEOUT", "VANTAGE_RETRY_TIMEOUT") {
            policy.global_budget = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env_secs("MAX_RETRY_DELAY", "VANTAGE_MAX_RETRY_DELAY") {
            policy.max_per_retry_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env_secs("MIN_RETRY_INTERVAL", "VANTAGE_MIN_RETRY_INTERVAL") {
            policy.min_interval = Duration::from_secs(secs);
        }
        policy
    }

    /// Computes the delay for the next attempt.
    ///
    /// `server_hint` is the parsed `Retry-After` (or `retry-after-ms`) value,
    /// when the response supplied one. `backoff` is the exponential-backoff
    /// generator seeded for this `RetryContext`; advanced once per call.
    pub fn next_delay(&self, server_hint: Option<Duration>, backoff: &mut ExponentialBackoff) -> Duration {
        let raw = match server_hint {
            Some(hint) => hint,
            None => backoff
                .next_backoff()
                .unwrap_or(self.max_per_retry_delay),
        };
        raw.clamp(self.min_interval, self.max_per_retry_delay)
    }

    /// Builds a fresh jittered-exponential generator matching this policy:
    /// factor 2, ±10% jitter, capped at `max_per_retry_delay`, with no
    /// internal elapsed-time cutoff (the caller enforces `global_budget`).
    pub fn new_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.1)
            .with_max_interval(self.max_per_retry_delay)
            .with_max_elapsed_time(None)
            .build()
    }
}

fn read_env_secs(primary: &str, alias: &str) -> Option<u64> {
    std::env::var(primary)
        .ok()
        .or_else(|| std::env::var(alias).ok())
        .and_then(|s| s.parse().ok())
}

/// Parses a `Retry-After` header value (seconds, or an HTTP-date — only the
/// seconds form is supported, matching every provider this crate talks to).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Returns `true` once `elapsed_since_first_attempt + next_delay` would
/// exceed `policy.global_budget` — the caller should stop retrying and
/// surface the last error.
pub fn budget_exhausted(policy: &RetryPolicy, elapsed_since_first_attempt: Duration, next_delay: Duration) -> bool {
    elapsed_since_first_attempt + next_delay > policy.global_budget
}

/// Logs a retry decision at `warn` level — the one place HTTP retry tracing
/// happens, so every provider's wrapper gets consistent log lines for free.
pub fn log_retry(driver: &str, class: ErrorClass, attempt: u32, delay: Duration) {
    warn!(
        driver,
        attempt,
        delay_ms = delay.as_millis() as u64,
        class = ?class,
        "retrying after transient error"
    );
}

/// Sends `req`, retrying on rate-limit/server/network errors per
/// [`RetryPolicy::from_env`]. Server `Retry-After` is honored exactly when
/// present, else a jittered exponential backoff is used; both are bounded by
/// a wall-clock budget. `driver_name` is used only for log lines and error
/// messages. Non-retryable 4xx errors and success responses return
/// immediately on the first attempt. The request body must be cloneable
/// (buffered via `.json(..)`/`.body(..)` with a concrete value) — a
/// streaming body fails on the first retry attempt with a clear error.
pub async fn send_with_retry(
    driver_name: &str,
    req: reqwest::RequestBuilder,
) -> anyhow::Result<reqwest::Response> {
    let policy = RetryPolicy::from_env();
    let mut backoff = policy.new_backoff();
    let first_attempt_at = std::time::Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let attempt_req = req
            .try_clone()
            .context("request body cannot be retried (non-buffered stream body)")?;

        let sent = attempt_req.send().await;
        let (class, retry_after) = match &sent {
            Ok(resp) => {
                let status = resp.status();
                let hint = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                (classify_status(status), hint)
            }
            Err(e) => (classify_transport_error(e), None),
        };

        if !class.is_retryable() {
            return match sent {
                Ok(resp) => {
                    if resp.status().is_success() {
                        Ok(resp)
                    } else {
                        let status = resp.status();
                        let text = resp.text().await.unwrap_or_default();
                        anyhow::bail!("{driver_name} error {status}: {text}");
                    }
                }
                Err(e) => Err(e).with_context(|| format!("{driver_name} request failed")),
            };
        }

        let delay = policy.next_delay(retry_after, &mut backoff);
        if budget_exhausted(&policy, first_attempt_at.elapsed(), delay) {
            return match sent {
                Ok(resp) => {
                    let status = resp.status();
                    anyhow::bail!("{driver_name} retry budget exhausted, last status {status}");
                }
                Err(e) => {
                    Err(e).with_context(|| format!("{driver_name} retry budget exhausted"))
                }
            };
        }

        log_retry(driver_name, class, attempt, delay);
        tokio::time::sleep(delay).await;
    }
}
