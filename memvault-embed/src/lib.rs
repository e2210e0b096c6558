//! Embedder built around a pluggable [`EmbeddingProvider`]. Adds retry with
//! exponential backoff, batch splitting, and a health probe on top of the
//! raw provider call — the provider itself (HTTP client, local model) is out
//! of scope for this workspace.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use memvault_core::errors::EmbeddingError;
use memvault_core::traits::{Embedder, EmbeddingProvider, HealthReport, HealthStatus};
use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub cap: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let backoff_ms = (self.base_delay.as_millis() as u64)
            .saturating_mul((self.multiplier as u64).saturating_pow(exponent))
            .min(self.cap.as_millis() as u64);
        let jitter_ms: u64 = rand::thread_rng().gen_range(0..=250);
        Duration::from_millis(backoff_ms + jitter_ms)
    }
}

/// The outcome of a guarded call: the result itself plus bookkeeping the
/// caller can fold into a provenance row.
pub struct GuardedOutcome<T> {
    pub result: Result<T, EmbeddingError>,
    pub attempts: u32,
    pub latency_ms: u64,
}

/// Runs `call` in a bounded retry loop, classifying each error as
/// retryable or terminal via [`EmbeddingError::is_retryable`], sleeping
/// with exponential backoff plus jitter between attempts. Mirrors the
/// teacher's bounded observe-with-guardrails retry shape: a capped loop
/// returning `(Result, attempt_count, latency_ms)` rather than raw retry
/// recursion.
async fn with_guardrails<T, F, Fut>(config: &RetryConfig, mut call: F) -> GuardedOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, EmbeddingError>>,
{
    let started = Instant::now();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = call().await;
        match outcome {
            Ok(value) => {
                return GuardedOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    latency_ms: started.elapsed().as_millis() as u64,
                }
            }
            Err(err) if err.is_retryable() && attempt < config.max_attempts => {
                tokio::time::sleep(config.delay_for(attempt)).await;
                continue;
            }
            Err(err) => {
                return GuardedOutcome {
                    result: Err(err),
                    attempts: attempt,
                    latency_ms: started.elapsed().as_millis() as u64,
                }
            }
        }
    }
}

pub struct RetryingEmbedder<P: EmbeddingProvider> {
    provider: Arc<P>,
    dimensions: usize,
    retry: RetryConfig,
    health_timeout: Duration,
}

impl<P: EmbeddingProvider> RetryingEmbedder<P> {
    pub fn new(provider: Arc<P>, dimensions: usize) -> Self {
        Self {
            provider,
            dimensions,
            retry: RetryConfig::default(),
            health_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn embed_batch_checked(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let max_batch = self.provider.max_batch_size().max(1);
        let mut output = Vec::with_capacity(texts.len());
        for window in texts.chunks(max_batch) {
            let outcome = with_guardrails(&self.retry, || {
                let provider = Arc::clone(&self.provider);
                let window = window.to_vec();
                async move { provider.embed_raw(&window).await }
            })
            .await;
            let vectors = outcome.result?;
            for vector in &vectors {
                if vector.len() != self.dimensions {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: self.dimensions,
                        actual: vector.len(),
                    });
                }
            }
            output.extend(vectors);
        }
        Ok(output)
    }
}

#[async_trait]
impl<P: EmbeddingProvider> Embedder for RetryingEmbedder<P> {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch_checked(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| EmbeddingError::Unavailable("provider returned no vectors".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_batch_checked(texts).await
    }

    async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let probe = tokio::time::timeout(self.health_timeout, self.provider.embed_raw(&["healthcheck".to_string()])).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match probe {
            Ok(Ok(_)) => HealthReport { status: HealthStatus::Healthy, latency_ms },
            _ => HealthReport { status: HealthStatus::Unhealthy, latency_ms },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        dims: usize,
        fail_times: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(EmbeddingError::Timeout(100));
            }
            Ok(texts.iter().map(|_| vec![0.0_f32; self.dims]).collect())
        }

        fn max_batch_size(&self) -> usize {
            2
        }
    }

    struct TerminalProvider;

    #[async_trait]
    impl EmbeddingProvider for TerminalProvider {
        async fn embed_raw(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Rejected("bad input".to_string()))
        }

        fn max_batch_size(&self) -> usize {
            8
        }
    }

    #[tokio::test]
    async fn retries_on_timeout_then_succeeds() {
        let provider = Arc::new(FlakyProvider { dims: 4, fail_times: AtomicUsize::new(2) });
        let embedder = RetryingEmbedder::new(provider, 4).with_retry_config(RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            multiplier: 2,
            cap: Duration::from_millis(10),
        });
        let result = embedder.embed("hello").await.unwrap();
        assert_eq!(result.len(), 4);
    }

    #[tokio::test]
    async fn does_not_retry_terminal_errors() {
        let provider = Arc::new(TerminalProvider);
        let embedder = RetryingEmbedder::new(provider, 4);
        let result = embedder.embed("hello").await;
        assert!(matches!(result, Err(EmbeddingError::Rejected(_))));
    }

    #[tokio::test]
    async fn batches_are_split_by_provider_max_batch_size() {
        let provider = Arc::new(FlakyProvider { dims: 2, fail_times: AtomicUsize::new(0) });
        let embedder = RetryingEmbedder::new(provider, 2);
        let texts: Vec<String> = (0..5).map(|n| format!("text-{n}")).collect();
        let result = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(result.len(), 5);
    }

    #[tokio::test]
    async fn health_check_reports_healthy_provider() {
        let provider = Arc::new(FlakyProvider { dims: 2, fail_times: AtomicUsize::new(0) });
        let embedder = RetryingEmbedder::new(provider, 2);
        let report = embedder.health_check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
    }
}
