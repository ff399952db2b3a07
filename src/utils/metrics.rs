use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global metrics collector for the application.
///
/// Tracks API usage, key rotation behavior, and batch throughput.
/// Thread-safe and can be shared across the application.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // API Metrics
    api_calls_total: AtomicUsize,
    api_calls_success: AtomicUsize,
    api_calls_failed: AtomicUsize,
    api_latency_ms: RwLock<Vec<u64>>,

    // Key pool metrics
    quota_errors: AtomicUsize,
    key_rotations: AtomicUsize,
    pool_resets: AtomicUsize,

    // Batch metrics
    batches_processed: AtomicUsize,
    images_processed: AtomicUsize,
    retry_rounds: AtomicUsize,

    // Scan lifecycle
    scans_started: AtomicUsize,
    scans_rejected: AtomicUsize,

    // Per-endpoint request counters
    endpoint_counters: DashMap<String, AtomicUsize>,

    // Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                api_calls_total: AtomicUsize::new(0),
                api_calls_success: AtomicUsize::new(0),
                api_calls_failed: AtomicUsize::new(0),
                api_latency_ms: RwLock::new(Vec::new()),
                quota_errors: AtomicUsize::new(0),
                key_rotations: AtomicUsize::new(0),
                pool_resets: AtomicUsize::new(0),
                batches_processed: AtomicUsize::new(0),
                images_processed: AtomicUsize::new(0),
                retry_rounds: AtomicUsize::new(0),
                scans_started: AtomicUsize::new(0),
                scans_rejected: AtomicUsize::new(0),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    // API Metrics
    pub fn record_api_call(&self, success: bool, duration: Duration) {
        self.inner.api_calls_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.inner.api_calls_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.api_calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner
            .api_latency_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    // Key pool metrics
    pub fn record_quota_error(&self) {
        self.inner.quota_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_key_rotation(&self) {
        self.inner.key_rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_reset(&self) {
        self.inner.pool_resets.fetch_add(1, Ordering::Relaxed);
    }

    // Batch metrics
    pub fn record_batch_processed(&self, num_images: usize) {
        self.inner.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .images_processed
            .fetch_add(num_images, Ordering::Relaxed);
    }

    pub fn record_retry_round(&self) {
        self.inner.retry_rounds.fetch_add(1, Ordering::Relaxed);
    }

    // Scan lifecycle
    pub fn record_scan_started(&self) {
        self.inner.scans_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan_rejected(&self) {
        self.inner.scans_rejected.fetch_add(1, Ordering::Relaxed);
    }

    // Endpoint Metrics
    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn endpoint_counts(&self) -> BTreeMap<String, usize> {
        self.inner
            .endpoint_counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let api_latency = self.inner.api_latency_ms.read();
        let api_latency_avg = avg(&api_latency);
        let api_latency_p50 = percentile(&api_latency, 0.5);
        let api_latency_p95 = percentile(&api_latency, 0.95);
        let api_latency_p99 = percentile(&api_latency, 0.99);
        drop(api_latency);

        MetricsSnapshot {
            api_calls_total: self.inner.api_calls_total.load(Ordering::Relaxed),
            api_calls_success: self.inner.api_calls_success.load(Ordering::Relaxed),
            api_calls_failed: self.inner.api_calls_failed.load(Ordering::Relaxed),
            api_latency_avg_ms: api_latency_avg,
            api_latency_p50_ms: api_latency_p50,
            api_latency_p95_ms: api_latency_p95,
            api_latency_p99_ms: api_latency_p99,
            quota_errors: self.inner.quota_errors.load(Ordering::Relaxed),
            key_rotations: self.inner.key_rotations.load(Ordering::Relaxed),
            pool_resets: self.inner.pool_resets.load(Ordering::Relaxed),
            batches_processed: self.inner.batches_processed.load(Ordering::Relaxed),
            images_processed: self.inner.images_processed.load(Ordering::Relaxed),
            retry_rounds: self.inner.retry_rounds.load(Ordering::Relaxed),
            scans_started: self.inner.scans_started.load(Ordering::Relaxed),
            scans_rejected: self.inner.scans_rejected.load(Ordering::Relaxed),
            endpoint_requests: self.endpoint_counts(),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = format!(
            r#"# HELP api_calls_total Total number of API calls made
# TYPE api_calls_total counter
api_calls_total {{}} {}

# HELP api_calls_success Number of successful API calls
# TYPE api_calls_success counter
api_calls_success {{}} {}

# HELP api_calls_failed Number of failed API calls
# TYPE api_calls_failed counter
api_calls_failed {{}} {}

# HELP api_latency_avg_ms Average API latency in milliseconds
# TYPE api_latency_avg_ms gauge
api_latency_avg_ms {{}} {}

# HELP quota_errors_total Total quota errors returned by the remote API
# TYPE quota_errors_total counter
quota_errors_total {{}} {}

# HELP key_rotations_total Total API key rotations
# TYPE key_rotations_total counter
key_rotations_total {{}} {}

# HELP pool_resets_total Total full key pool resets after exhaustion
# TYPE pool_resets_total counter
pool_resets_total {{}} {}

# HELP batches_processed_total Total number of batches processed
# TYPE batches_processed_total counter
batches_processed_total {{}} {}

# HELP images_processed_total Total number of images processed
# TYPE images_processed_total counter
images_processed_total {{}} {}

# HELP retry_rounds_total Total retry rounds executed
# TYPE retry_rounds_total counter
retry_rounds_total {{}} {}

# HELP scans_started_total Total scan runs started
# TYPE scans_started_total counter
scans_started_total {{}} {}

# HELP scans_rejected_total Scan requests rejected while another was running
# TYPE scans_rejected_total counter
scans_rejected_total {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            snapshot.api_calls_total,
            snapshot.api_calls_success,
            snapshot.api_calls_failed,
            snapshot.api_latency_avg_ms,
            snapshot.quota_errors,
            snapshot.key_rotations,
            snapshot.pool_resets,
            snapshot.batches_processed,
            snapshot.images_processed,
            snapshot.retry_rounds,
            snapshot.scans_started,
            snapshot.scans_rejected,
            snapshot.uptime_seconds,
        );

        out.push_str(
            "\n# HELP endpoint_requests_total Requests received per endpoint\n\
             # TYPE endpoint_requests_total counter\n",
        );
        for (endpoint, count) in &snapshot.endpoint_requests {
            out.push_str(&format!(
                "endpoint_requests_total {{endpoint=\"{endpoint}\"}} {count}\n"
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub api_calls_total: usize,
    pub api_calls_success: usize,
    pub api_calls_failed: usize,
    pub api_latency_avg_ms: u64,
    pub api_latency_p50_ms: u64,
    pub api_latency_p95_ms: u64,
    pub api_latency_p99_ms: u64,
    pub quota_errors: usize,
    pub key_rotations: usize,
    pub pool_resets: usize,
    pub batches_processed: usize,
    pub images_processed: usize,
    pub retry_rounds: usize,
    pub scans_started: usize,
    pub scans_rejected: usize,
    pub endpoint_requests: BTreeMap<String, usize>,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_api_call(true, Duration::from_millis(100));
        metrics.record_api_call(false, Duration::from_millis(50));
        metrics.record_quota_error();
        metrics.record_key_rotation();
        metrics.record_batch_processed(10);
        metrics.record_retry_round();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.api_calls_total, 2);
        assert_eq!(snapshot.api_calls_success, 1);
        assert_eq!(snapshot.api_calls_failed, 1);
        assert_eq!(snapshot.quota_errors, 1);
        assert_eq!(snapshot.key_rotations, 1);
        assert_eq!(snapshot.batches_processed, 1);
        assert_eq!(snapshot.images_processed, 10);
        assert_eq!(snapshot.retry_rounds, 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_api_call(true, Duration::from_millis(100));
        metrics.record_scan_started();

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("api_calls_total {} 1"));
        assert!(prometheus.contains("scans_started_total {} 1"));
    }

    #[test]
    fn endpoint_counters_appear_in_snapshot_and_prometheus() {
        let metrics = Metrics::new();
        metrics.record_endpoint_request("/scan");
        metrics.record_endpoint_request("/scan");
        metrics.record_endpoint_request("/health");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.endpoint_requests.get("/scan"), Some(&2));
        assert_eq!(snapshot.endpoint_requests.get("/health"), Some(&1));

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("endpoint_requests_total {endpoint=\"/scan\"} 2"));
        assert!(prometheus.contains("endpoint_requests_total {endpoint=\"/health\"} 1"));
    }

    #[test]
    fn latency_percentiles_cover_recorded_values() {
        let metrics = Metrics::new();
        for ms in [10, 20, 30, 40, 1000] {
            metrics.record_api_call(true, Duration::from_millis(ms));
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.api_latency_p50_ms, 30);
        assert_eq!(snapshot.api_latency_p99_ms, 40);
        assert_eq!(snapshot.api_latency_avg_ms, 220);
    }
}
