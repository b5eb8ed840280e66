//! Bounded retry with a per-attempt timeout.
//!
//! Wraps any provider. Transient faults (timeout, network, 5xx, 429) are
//! retried up to `retries` extra times with linear backoff; permanent
//! faults fail fast. Each attempt is bounded by `attempt_timeout`.

use async_trait::async_trait;
use chatrelay_core::error::ProviderError;
use chatrelay_core::provider::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct RetryProvider {
    inner: Arc<dyn CompletionProvider>,
    retries: u32,
    attempt_timeout: Duration,
    backoff: Duration,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn CompletionProvider>) -> Self {
        Self {
            inner,
            retries: 2,
            attempt_timeout: Duration::from_secs(120),
            backoff: Duration::from_millis(500),
        }
    }

    /// Extra attempts after the first one.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Base delay; attempt `n` waits `n * backoff`.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn inner(&self) -> &Arc<dyn CompletionProvider> {
        &self.inner
    }
}

#[async_trait]
impl CompletionProvider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError> {
        let attempts = self.retries + 1;
        let mut attempt = 1;

        loop {
            let result =
                match tokio::time::timeout(self.attempt_timeout, self.inner.complete(request.clone()))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(format!(
                        "Provider '{}' timed out after {}s",
                        self.inner.name(),
                        self.attempt_timeout.as_secs()
                    ))),
                };

            let error = match result {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if !error.is_transient() || attempt >= attempts {
                warn!(
                    provider = %self.inner.name(),
                    attempt,
                    error = %error,
                    "Completion failed"
                );
                return Err(error);
            }

            let delay = match &error {
                ProviderError::RateLimited { retry_after_secs } => {
                    Duration::from_secs(*retry_after_secs).max(self.backoff * attempt)
                }
                _ => self.backoff * attempt,
            };
            info!(
                provider = %self.inner.name(),
                attempt,
                total = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient completion failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        self.inner.list_models().await
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
