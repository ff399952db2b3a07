// Resilient call executor: per-attempt timeout, failure classification,
// key rotation on quota errors, exponential backoff on transient ones.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{info, warn};

use crate::core::config::RetryConfig;
use crate::core::errors::{classify_failure, FailureKind, ScanError};
use crate::middleware::key_pool::KeyPool;
use crate::utils::metrics::Metrics;

/// Retry behavior for one guarded call.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
    pub rotate_cooldown: Duration,
    pub exhausted_cooldown: Duration,
}

impl From<&RetryConfig> for CallPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: cfg.base_delay,
            attempt_timeout: cfg.attempt_timeout,
            rotate_cooldown: cfg.rotate_cooldown,
            exhausted_cooldown: cfg.exhausted_cooldown,
        }
    }
}

/// Runs fallible remote calls against the key pool until one succeeds or the
/// attempt budget runs out.
pub struct ResilientExecutor {
    pool: Arc<KeyPool>,
    policy: CallPolicy,
    metrics: Metrics,
}

impl ResilientExecutor {
    pub fn new(pool: Arc<KeyPool>, policy: CallPolicy, metrics: Metrics) -> Self {
        Self {
            pool,
            policy,
            metrics,
        }
    }

    pub fn pool(&self) -> &KeyPool {
        &self.pool
    }

    /// Executes `factory(key)` with retries. The factory is called once per
    /// attempt with the key active at that moment.
    ///
    /// Quota failures rotate the key without consuming backoff growth;
    /// transient failures back off exponentially on the same key. Each
    /// attempt is bounded by the per-attempt timeout, and a timeout counts
    /// as transient.
    pub async fn execute<T, F, Fut>(&self, factory: F, label: &str) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut transient_failures: u32 = 0;
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 1..=self.policy.max_retries {
            let (key_index, key) = self.pool.current().ok_or(ScanError::PoolEmpty)?;
            self.pool.record_usage(key_index);

            let started = Instant::now();
            let outcome = match timeout(self.policy.attempt_timeout, factory(key)).await {
                Ok(result) => result,
                Err(_) => Err(ScanError::AttemptTimeout(self.policy.attempt_timeout).into()),
            };

            let err = match outcome {
                Ok(value) => {
                    self.metrics.record_api_call(true, started.elapsed());
                    if attempt > 1 {
                        info!(label, attempt, "Call recovered after retries");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            self.metrics.record_api_call(false, started.elapsed());
            warn!(
                label,
                attempt,
                max = self.policy.max_retries,
                error = %format!("{err:#}"),
                "Attempt failed"
            );

            match classify_failure(&err) {
                FailureKind::Quota => {
                    self.pool.record_error(key_index);
                    self.pool.mark_limited(key_index);
                    self.metrics.record_quota_error();

                    if attempt < self.policy.max_retries {
                        match self.pool.next() {
                            Some(_) => {
                                self.metrics.record_key_rotation();
                                sleep(self.policy.rotate_cooldown).await;
                            }
                            None => {
                                // every key limited: wait out the window,
                                // then start over from a clean pool
                                warn!(
                                    label,
                                    "All keys limited, waiting {:?} before reset",
                                    self.policy.exhausted_cooldown
                                );
                                sleep(self.policy.exhausted_cooldown).await;
                                self.pool.reset_all();
                                self.metrics.record_pool_reset();
                            }
                        }
                    }
                }
                FailureKind::Transient => {
                    transient_failures += 1;
                    if attempt < self.policy.max_retries {
                        let delay = self.policy.base_delay
                            * 2_u32.saturating_pow(transient_failures - 1);
                        sleep(delay).await;
                    }
                }
            }
            last_error = Some(err);
        }

        let last = last_error
            .map(|e| format!("{e:#}"))
            .unwrap_or_else(|| "unknown".to_string());
        Err(ScanError::RetriesExhausted {
            label: label.to_string(),
            attempts: self.policy.max_retries,
            last_error: last,
        }
        .into())
    }
}
