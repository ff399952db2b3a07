// Scan orchestrator: batching, failure collection, multi-round retries.

use std::mem;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::ConfigError;
use crate::core::types::{Extraction, ScanReport, ScanStatus, WorkItem};
use crate::middleware::key_pool::{KeyPool, KeyStats};
use crate::orchestration::executor::{CallPolicy, ResilientExecutor};
use crate::orchestration::progress::{BatchProgress, ScanObserver};
use crate::services::gemini::BatchExtractor;
use crate::services::{aggregate, normalize};
use crate::utils::metrics::Metrics;

/// Drives a full scan run: splits work into batches, pushes each batch
/// through the resilient executor, and re-queues failed batches for bounded
/// retry rounds.
pub struct ScanOrchestrator {
    config: Arc<Config>,
    extractor: Arc<dyn BatchExtractor>,
    executor: ResilientExecutor,
    metrics: Metrics,
}

struct PassOutcome {
    extractions: Vec<Extraction>,
    failed: Vec<WorkItem>,
}

impl ScanOrchestrator {
    pub fn new(
        config: Arc<Config>,
        extractor: Arc<dyn BatchExtractor>,
        metrics: Metrics,
    ) -> Result<Self, ConfigError> {
        if config.api.api_keys.is_empty() {
            return Err(ConfigError::NoApiKeys);
        }

        let pool = Arc::new(KeyPool::new(
            config.api.api_keys.clone(),
            config.api.rotation_policy,
        ));
        let executor = ResilientExecutor::new(
            pool,
            CallPolicy::from(&config.retry),
            metrics.clone(),
        );

        Ok(Self {
            config,
            extractor,
            executor,
            metrics,
        })
    }

    pub fn key_stats(&self) -> Vec<KeyStats> {
        self.executor.pool().stats()
    }

    /// Runs one complete scan over `items`.
    ///
    /// Every input item ends up either in `extractions` or in `failed`,
    /// never both, never dropped. Failures here are batch-level: a batch
    /// whose call budget is exhausted fails as a unit and all of its items
    /// go to the retry queue.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn scan(
        &self,
        items: Vec<WorkItem>,
        prompt_override: Option<&str>,
        observer: &dyn ScanObserver,
    ) -> ScanReport {
        let started = Instant::now();
        let total_items = items.len();
        let prompt = prompt_override
            .unwrap_or(&self.config.api.prompt)
            .to_string();

        self.metrics.record_scan_started();
        self.executor.pool().reset_counters();

        let mut extractions = Vec::with_capacity(total_items);
        let mut outcome = self.run_pass(items, &prompt, 0, 0, observer).await;
        extractions.append(&mut outcome.extractions);
        let mut failed = outcome.failed;

        let mut rounds_used = 0;
        for round in 1..=self.config.batch.retry_rounds {
            if failed.is_empty() {
                break;
            }
            rounds_used = round;
            observer.retry_round_started(round, failed.len());
            self.metrics.record_retry_round();
            info!(round, remaining = failed.len(), "Retrying failed items");
            sleep(self.config.batch.retry_round_cooldown).await;

            let retry_items = mem::take(&mut failed);
            let done = extractions.len();
            let mut outcome = self
                .run_pass(retry_items, &prompt, round, done, observer)
                .await;
            extractions.append(&mut outcome.extractions);
            failed = outcome.failed;
        }

        let status = if failed.is_empty() {
            ScanStatus::Complete
        } else {
            ScanStatus::CompletedWithFailures
        };
        if !failed.is_empty() {
            warn!(failed = failed.len(), "Scan finished with unresolved items");
        }

        ScanReport {
            total_items,
            extractions,
            failed: failed.into_iter().map(|item| item.name).collect(),
            retry_rounds_used: rounds_used,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
            status,
        }
    }

    async fn run_pass(
        &self,
        items: Vec<WorkItem>,
        prompt: &str,
        retry_round: u32,
        already_done: usize,
        observer: &dyn ScanObserver,
    ) -> PassOutcome {
        let total_items = already_done + items.len();
        let batch_size = self.config.batch.batch_size;
        let batches: Vec<Vec<WorkItem>> = items
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let total_batches = batches.len();

        let mut extractions = Vec::new();
        let mut failed = Vec::new();
        let mut processed = already_done;

        for (batch_index, batch) in batches.into_iter().enumerate() {
            let mut progress = BatchProgress {
                batch_index,
                total_batches,
                batch_len: batch.len(),
                processed,
                total_items,
                retry_round,
            };
            observer.batch_started(&progress);

            let label = if retry_round == 0 {
                format!(
                    "batch {}/{} ({} images)",
                    batch_index + 1,
                    total_batches,
                    batch.len()
                )
            } else {
                format!(
                    "batch {}/{} ({} images), retry round {}",
                    batch_index + 1,
                    total_batches,
                    batch.len(),
                    retry_round
                )
            };

            let batch_failed = match self.process_batch(&batch, prompt, &label).await {
                Ok(mut batch_extractions) => {
                    self.metrics.record_batch_processed(batch.len());
                    extractions.append(&mut batch_extractions);
                    false
                }
                Err(err) => {
                    warn!(label = %label, error = %format!("{err:#}"), "Batch failed, queueing items for retry");
                    failed.extend(batch);
                    true
                }
            };

            processed += progress.batch_len;
            progress.processed = processed;
            observer.batch_finished(&progress, batch_failed);

            if batch_index + 1 < total_batches {
                sleep(self.config.batch.inter_batch_delay).await;
            }
        }

        PassOutcome {
            extractions,
            failed,
        }
    }

    async fn process_batch(
        &self,
        batch: &[WorkItem],
        prompt: &str,
        label: &str,
    ) -> anyhow::Result<Vec<Extraction>> {
        let blob = self
            .executor
            .execute(
                |key| {
                    let extractor = Arc::clone(&self.extractor);
                    let items = batch.to_vec();
                    let prompt = prompt.to_string();
                    async move { extractor.extract_batch(&key, &items, &prompt).await }
                },
                label,
            )
            .await?;

        let answers = aggregate::split_answers(&blob, batch.len());
        Ok(batch
            .iter()
            .zip(answers)
            .map(|(item, answer)| Extraction {
                source: item.name.clone(),
                value: normalize::normalize(&answer),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DEFAULT_PROMPT;
    use crate::middleware::key_pool::RotationPolicy;
    use crate::orchestration::progress::NullObserver;
    use crate::services::normalize::NOT_FOUND;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tracing::Level;

    fn test_config(keys: usize) -> Arc<Config> {
        Arc::new(Config {
            server: crate::core::config::ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                log_level: Level::INFO,
            },
            api: crate::core::config::ApiConfig {
                api_keys: (0..keys).map(|i| format!("key{i}")).collect(),
                model: "test-model".to_string(),
                prompt: DEFAULT_PROMPT.to_string(),
                rotation_policy: RotationPolicy::RoundRobin,
            },
            batch: crate::core::config::BatchConfig {
                batch_size: 5,
                inter_batch_delay: Duration::from_millis(10),
                retry_rounds: 3,
                retry_round_cooldown: Duration::from_millis(10),
            },
            retry: crate::core::config::RetryConfig {
                max_retries: 3,
                base_delay: Duration::from_millis(10),
                attempt_timeout: Duration::from_secs(5),
                rotate_cooldown: Duration::from_millis(10),
                exhausted_cooldown: Duration::from_millis(10),
            },
        })
    }

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::new(format!("img{i}.jpg"), "image/jpeg", vec![0u8; 4]))
            .collect()
    }

    /// Answers each batch with one synthetic number per image. The first
    /// `fail_first` calls fail with a quota error.
    struct FakeExtractor {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl FakeExtractor {
        fn new(fail_first: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl BatchExtractor for FakeExtractor {
        async fn extract_batch(
            &self,
            _api_key: &str,
            items: &[WorkItem],
            _prompt: &str,
        ) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(anyhow!("429 quota exceeded"));
            }
            Ok(items
                .iter()
                .enumerate()
                .map(|(i, _)| format!("0812345678{i}"))
                .collect::<Vec<_>>()
                .join("\n"))
        }
    }

    /// Always fails with a transient error.
    struct BrokenExtractor;

    #[async_trait]
    impl BatchExtractor for BrokenExtractor {
        async fn extract_batch(
            &self,
            _api_key: &str,
            _items: &[WorkItem],
            _prompt: &str,
        ) -> anyhow::Result<String> {
            Err(anyhow!("connection reset by peer"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_item_resolves_despite_an_initial_quota_error() {
        let config = test_config(2);
        let extractor = Arc::new(FakeExtractor::new(1));
        let orchestrator =
            ScanOrchestrator::new(config, extractor, Metrics::new()).unwrap();

        let report = orchestrator.scan(items(12), None, &NullObserver).await;

        assert_eq!(report.total_items, 12);
        assert_eq!(report.extractions.len(), 12);
        assert!(report.failed.is_empty());
        assert_eq!(report.status, ScanStatus::Complete);
        assert_eq!(report.retry_rounds_used, 0);
        // items keep their batch-relative order
        assert_eq!(report.extractions[0].source, "img0.jpg");
        assert_eq!(report.extractions[0].value, "628123456780");
        // the quota error rotated off key 0
        let stats = orchestrator.key_stats();
        assert!(stats[0].limited);
        assert!(!stats[1].limited);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_lands_items_in_the_failed_list() {
        let config = test_config(1);
        let orchestrator =
            ScanOrchestrator::new(config, Arc::new(BrokenExtractor), Metrics::new()).unwrap();

        let report = orchestrator.scan(items(7), None, &NullObserver).await;

        assert_eq!(report.total_items, 7);
        assert!(report.extractions.is_empty());
        assert_eq!(report.failed.len(), 7);
        assert_eq!(report.status, ScanStatus::CompletedWithFailures);
        assert_eq!(report.retry_rounds_used, 3);
        // conservation: every item is accounted for exactly once
        assert_eq!(report.extractions.len() + report.failed.len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batches_recover_in_a_retry_round() {
        let config = test_config(1);
        // 12 items = 3 batches; each batch burns 3 attempts, so 9 failing
        // calls cover the whole first pass and the retry round succeeds
        let extractor = Arc::new(FakeExtractor::new(9));
        let orchestrator =
            ScanOrchestrator::new(config, extractor, Metrics::new()).unwrap();

        let report = orchestrator.scan(items(12), None, &NullObserver).await;

        assert_eq!(report.extractions.len(), 12);
        assert!(report.failed.is_empty());
        assert_eq!(report.status, ScanStatus::Complete);
        assert_eq!(report.retry_rounds_used, 1);
    }

    #[tokio::test]
    async fn empty_key_list_is_rejected_at_construction() {
        let config = test_config(0);
        let err = ScanOrchestrator::new(config, Arc::new(BrokenExtractor), Metrics::new())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::NoApiKeys));
    }
}
