//! HTTP call client with retry/backoff and a circuit breaker.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::{AppError, Result};
use crate::metrics::Metrics;
use crate::retry::BackoffPolicy;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

/// One logical outbound call target.
///
/// A call is attempted under the backoff policy; every *terminal* failure
/// (all retries exhausted) counts against the circuit breaker, and a
/// success closes it. While the breaker is open, calls fail fast without
/// touching the network and without consuming a retry.
pub struct CallClient {
    service: String,
    endpoint: String,
    http: reqwest::Client,
    policy: BackoffPolicy,
    breaker: CircuitBreaker,
    metrics: Metrics,
}

impl CallClient {
    /// Client with the default policies: 3 retries at 500ms base delay,
    /// breaker opening after 5 consecutive failures for 60s.
    pub fn new(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
        metrics: Metrics,
    ) -> Result<Self> {
        Self::with_policies(
            service,
            endpoint,
            timeout,
            metrics,
            BackoffPolicy::default(),
            CircuitBreakerConfig::default(),
        )
    }

    /// Client with explicit retry and breaker policies
    pub fn with_policies(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
        metrics: Metrics,
        policy: BackoffPolicy,
        breaker_config: CircuitBreakerConfig,
    ) -> Result<Self> {
        let service = service.into();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("http client: {}", e)))?;

        Ok(Self {
            breaker: CircuitBreaker::new(service.clone(), breaker_config),
            service,
            endpoint: endpoint.into(),
            http,
            policy,
            metrics,
        })
    }

    /// POST `payload` as JSON and return the parsed JSON response.
    ///
    /// Latency is measured from the first attempt's start to overall
    /// resolution; retries are internal to one observation.
    pub async fn call(&self, payload: &Value) -> Result<Value> {
        if let Err(err) = self.breaker.check() {
            self.metrics.record_rejection(&self.service, &err.outcome());
            return Err(err);
        }

        let start = Instant::now();
        let result = self.policy.run(|| self.attempt(payload)).await;
        let latency = start.elapsed();

        match result {
            Ok(value) => {
                self.breaker.record_success();
                self.metrics.record_request(&self.service, "success", latency);
                debug!(
                    service = %self.service,
                    latency_ms = latency.as_millis() as u64,
                    "outbound call succeeded"
                );
                Ok(value)
            }
            Err(err) => {
                self.breaker.record_failure();
                self.metrics
                    .record_request(&self.service, &err.outcome(), latency);
                Err(err)
            }
        }
    }

    /// Breaker state, exposed for callers that report on it
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn attempt(&self, payload: &Value) -> Result<Value> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| AppError::Call {
                service: self.service.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Status {
                service: self.service.clone(),
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|e| AppError::Call {
            service: self.service.clone(),
            message: format!("invalid JSON response: {}", e),
        })
    }
}
