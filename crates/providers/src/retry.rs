//! Retrying provider wrapper.
//!
//! Transient failures (throttling, overload, 5xx, timeouts) are retried with
//! capped exponential backoff and random jitter. Anything else is returned
//! immediately.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use taskloop_config::RetrySection;
use taskloop_core::error::ProviderError;
use taskloop_core::provider::*;
use tracing::{info, warn};

/// Bounded retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay randomized in both directions
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySection::default())
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_retries: section.max_retries,
            base_delay: Duration::from_millis(section.base_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            jitter: section.jitter.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Decide whether another attempt should be made after `retries_done` retries.
    pub fn should_retry(&self, err: &ProviderError, retries_done: u32) -> bool {
        retries_done < self.max_retries && err.is_transient()
    }

    /// Delay before retry number `retries_done + 1`.
    pub fn delay_for(&self, retries_done: u32) -> Duration {
        let pow = 2u32.saturating_pow(retries_done);
        let millis = self
            .base_delay
            .as_millis()
            .saturating_mul(pow as u128)
            .min(self.max_delay.as_millis()) as f64;

        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };
        Duration::from_millis((millis * factor) as u64)
    }
}

/// A provider that retries transient failures of an inner provider.
pub struct RetryProvider {
    inner: Arc<dyn taskloop_core::Provider>,
    policy: RetryPolicy,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn taskloop_core::Provider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl taskloop_core::Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let mut retries_done = 0;

        loop {
            match self.inner.complete(request.clone()).await {
                Ok(response) => {
                    if retries_done > 0 {
                        info!(
                            provider = %self.inner.name(),
                            retries = retries_done,
                            "Provider succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Err(e) if self.policy.should_retry(&e, retries_done) => {
                    let delay = self.policy.delay_for(retries_done);
                    retries_done += 1;
                    warn!(
                        provider = %self.inner.name(),
                        error = %e,
                        retry = retries_done,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Transient provider error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
