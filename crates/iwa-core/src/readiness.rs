//! Readiness polling with bounded retries and log-tail diagnostics.
//!
//! A [`ReadinessTarget`] names either an HTTP endpoint or a container whose
//! engine-reported health check must read `healthy`. [`ReadinessPoller`]
//! probes it up to `max_attempts` times, sleeping on an injected [`Clock`]
//! between attempts. Exhaustion always returns
//! [`OrchestrationError::ReadinessTimeout`] with the last observation and the
//! target's recent logs attached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::obs;
use crate::runtime::{ContainerRuntime, HealthStatus};

/// Source of delays between attempts.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Polling budget for one readiness wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total probes before giving up (must be > 0).
    pub max_attempts: u32,
    /// Delay after the first failed probe.
    pub interval: Duration,
    /// Multiplier applied to the delay after each failed probe (1.0 = fixed).
    pub backoff: f64,
    /// Upper bound for any single delay.
    pub max_interval: Duration,
    /// Timeout of a single HTTP probe.
    pub probe_timeout: Duration,
    /// Log lines surfaced on timeout.
    pub log_tail: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(60, Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// Fixed-interval policy.
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: 1.0,
            max_interval: interval,
            probe_timeout: Duration::from_secs(5),
            log_tail: 100,
        }
    }

    /// Policy for sibling web apps reporting container health (120 × 5s).
    pub fn container_health() -> Self {
        Self::fixed(120, Duration::from_secs(5)).with_log_tail(50)
    }

    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.backoff = multiplier;
        self.max_interval = max_interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_log_tail(mut self, lines: usize) -> Self {
        self.log_tail = lines;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based), never
    /// above `max_interval`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let cap = self.max_interval.max(self.interval);
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff.max(1.0).powi(exponent);
        let secs = self.interval.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= cap.as_secs_f64() {
            return cap;
        }
        self.interval.mul_f64(factor)
    }
}

/// What signals readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthSignal {
    /// Any 2xx response to a GET.
    Http { url: String },
    /// Engine-reported health status equals `healthy`.
    Container { name: String },
}

/// A thing to wait for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessTarget {
    /// Display name used in logs and errors.
    pub name: String,
    pub signal: HealthSignal,
    /// Container whose logs are surfaced on timeout.
    pub log_source: Option<String>,
}

impl ReadinessTarget {
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signal: HealthSignal::Http { url: url.into() },
            log_source: None,
        }
    }

    pub fn container(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            signal: HealthSignal::Container { name: name.clone() },
            log_source: Some(name.clone()),
            name,
        }
    }

    pub fn with_log_source(mut self, container: impl Into<String>) -> Self {
        self.log_source = Some(container.into());
        self
    }
}

/// Successful readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    /// Probes performed, including the successful one.
    pub attempts: u32,
    /// Total delay requested between probes.
    pub waited: Duration,
}

/// Polls readiness targets against a runtime, an HTTP client and a clock.
#[derive(Clone)]
pub struct ReadinessPoller {
    runtime: Arc<dyn ContainerRuntime>,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl ReadinessPoller {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, policy: RetryPolicy) -> Self {
        Self {
            runtime,
            http: reqwest::Client::new(),
            clock: Arc::new(TokioClock),
            policy,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Wait for `target`; see [`wait_healthy`].
    pub async fn wait(&self, target: &ReadinessTarget) -> OrchestrationResult<Ready> {
        wait_healthy(self, target).await
    }

    /// Wait for each target in order, stopping at the first timeout.
    pub async fn wait_all(&self, targets: &[ReadinessTarget]) -> OrchestrationResult<Vec<Ready>> {
        let mut readies = Vec::with_capacity(targets.len());
        for target in targets {
            readies.push(self.wait(target).await?);
        }
        Ok(readies)
    }

    /// One probe. `Ok(())` when ready, otherwise a description of what was seen.
    async fn probe(&self, signal: &HealthSignal) -> Result<(), String> {
        match signal {
            HealthSignal::Http { url } => {
                match self
                    .http
                    .get(url)
                    .timeout(self.policy.probe_timeout)
                    .send()
                    .await
                {
                    Ok(resp) if resp.status().is_success() => Ok(()),
                    Ok(resp) => Err(format!("HTTP {}", resp.status())),
                    Err(e) => Err(format!("request error: {e}")),
                }
            }
            HealthSignal::Container { name } => match self.runtime.container_health(name).await {
                Ok(HealthStatus::Healthy) => Ok(()),
                Ok(other) => Err(format!("health={other}")),
                Err(e) => Err(format!("inspect error: {e}")),
            },
        }
    }

    async fn log_tail(&self, target: &ReadinessTarget) -> String {
        match &target.log_source {
            Some(container) => match self.runtime.logs(container, self.policy.log_tail).await {
                Ok(logs) if logs.trim().is_empty() => format!("<{container} produced no output>"),
                Ok(logs) => logs,
                Err(e) => format!("<logs of {container} unavailable: {e}>"),
            },
            None => "<no log source configured>".to_string(),
        }
    }
}

/// Poll `target` until ready or until the policy's attempt budget is spent.
///
/// Returns `Ready` on the first successful probe, which is never later than
/// attempt `max_attempts`. On exhaustion exactly `max_attempts` probes have
/// been made and the error carries the last observation plus a log tail.
pub async fn wait_healthy(
    poller: &ReadinessPoller,
    target: &ReadinessTarget,
) -> OrchestrationResult<Ready> {
    let policy = &poller.policy;
    if policy.max_attempts == 0 {
        return Err(OrchestrationError::Config(format!(
            "readiness policy for {} allows zero attempts",
            target.name
        )));
    }

    let mut waited = Duration::ZERO;
    let mut last_observation = String::new();

    for attempt in 1..=policy.max_attempts {
        match poller.probe(&target.signal).await {
            Ok(()) => {
                obs::emit_service_ready(&target.name, attempt);
                return Ok(Ready {
                    attempts: attempt,
                    waited,
                });
            }
            Err(observation) => {
                debug!(
                    target = %target.name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    observation = %observation,
                    "not ready yet"
                );
                last_observation = observation;
            }
        }

        if attempt < policy.max_attempts {
            let delay = policy.delay_after(attempt);
            poller.clock.sleep(delay).await;
            waited += delay;
        }
    }

    obs::emit_readiness_timeout(&target.name, policy.max_attempts);
    let logs = poller.log_tail(target).await;
    Err(OrchestrationError::ReadinessTimeout {
        target: target.name.clone(),
        attempts: policy.max_attempts,
        log_tail: format!("last observation: {last_observation}\n{logs}"),
    })
}
