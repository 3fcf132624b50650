//! Ordered backend endpoints with per-endpoint circuit breakers.
//!
//! Each call walks the endpoints in configured order, skipping those whose
//! breaker is open. A full round of failures is retried after an
//! exponential backoff from `RetryConfig`.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{CircuitBreakerConfig, RetryConfig};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker state machine for one endpoint
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            open_until: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a call may be attempted now; moves Open to HalfOpen after the cooldown
    pub fn allow(&mut self) -> bool {
        if self.state == CircuitState::Open {
            match self.open_until {
                Some(until) if Instant::now() < until => return false,
                _ => {
                    self.state = CircuitState::HalfOpen;
                    self.consecutive_successes = 0;
                    self.open_until = None;
                }
            }
        }
        true
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        if self.state == CircuitState::HalfOpen && self.consecutive_successes >= self.config.success_threshold {
            self.state = CircuitState::Closed;
        }
    }

    pub fn record_failure(&mut self) {
        self.consecutive_successes = 0;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        // A failed probe reopens immediately
        if self.state == CircuitState::HalfOpen || self.consecutive_failures >= self.config.failure_threshold {
            self.state = CircuitState::Open;
            self.open_until = Some(Instant::now() + Duration::from_secs(self.config.cooldown_secs));
        }
    }

    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.open_until = None;
    }
}

#[derive(Debug)]
struct Endpoint {
    url: String,
    breaker: Mutex<CircuitBreaker>,
}

/// Constructor-injected endpoint list
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
    retry: RetryConfig,
}

impl EndpointPool {
    pub fn new(urls: Vec<String>, breaker: CircuitBreakerConfig, retry: RetryConfig) -> EngineResult<Self> {
        if urls.is_empty() {
            return Err(EngineError::Configuration("endpoint pool needs at least one endpoint".into()));
        }
        let endpoints = urls
            .into_iter()
            .map(|url| Endpoint {
                url: url.trim_end_matches('/').to_string(),
                breaker: Mutex::new(CircuitBreaker::new(breaker.clone())),
            })
            .collect();
        Ok(Self { endpoints, retry })
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(|e| e.url.as_str())
    }

    pub fn state_of(&self, url: &str) -> Option<CircuitState> {
        self.endpoints
            .iter()
            .find(|e| e.url == url)
            .map(|e| e.breaker.lock().state())
    }

    /// Run `op` against the first healthy endpoint
    ///
    /// Only `Network` errors fall through to the next endpoint; anything
    /// else is returned as is.
    pub async fn call<T, F, Fut>(&self, op: F) -> EngineResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.retry.max_retries {
            for endpoint in &self.endpoints {
                if !endpoint.breaker.lock().allow() {
                    debug!(endpoint = %endpoint.url, "Skipping endpoint with open circuit");
                    continue;
                }

                match op(endpoint.url.clone()).await {
                    Ok(value) => {
                        endpoint.breaker.lock().record_success();
                        return Ok(value);
                    }
                    Err(EngineError::Network(message)) => {
                        endpoint.breaker.lock().record_failure();
                        warn!(endpoint = %endpoint.url, attempt, error = %message, "Endpoint call failed");
                        last_error = Some(EngineError::Network(message));
                    }
                    Err(other) => {
                        endpoint.breaker.lock().record_failure();
                        return Err(other);
                    }
                }
            }

            if attempt < self.retry.max_retries {
                let delay = self.retry.delay_for_attempt(attempt);
                debug!(attempt, delay_ms = delay, "All endpoints failed, backing off");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| EngineError::Network("all endpoint circuits are open".into())))
    }
}
