// Progress reporting hooks for long scan runs

use tracing::info;

#[derive(Debug, Clone)]
pub struct BatchProgress {
    /// Zero-based position of the batch within the current pass.
    pub batch_index: usize,
    pub total_batches: usize,
    pub batch_len: usize,
    /// Items already resolved across the whole run, either way.
    pub processed: usize,
    pub total_items: usize,
    /// 0 for the initial pass.
    pub retry_round: u32,
}

/// Observer notified as a scan run advances. All hooks default to no-ops so
/// implementors override only what they care about.
pub trait ScanObserver: Send + Sync {
    fn batch_started(&self, _progress: &BatchProgress) {}
    fn batch_finished(&self, _progress: &BatchProgress, _failed: bool) {}
    fn retry_round_started(&self, _round: u32, _remaining: usize) {}
}

pub struct NullObserver;

impl ScanObserver for NullObserver {}

/// Emits progress through tracing, for server-side runs with no UI attached.
pub struct LogObserver;

impl ScanObserver for LogObserver {
    fn batch_started(&self, p: &BatchProgress) {
        info!(
            batch = p.batch_index + 1,
            total_batches = p.total_batches,
            images = p.batch_len,
            retry_round = p.retry_round,
            "Processing batch"
        );
    }

    fn batch_finished(&self, p: &BatchProgress, failed: bool) {
        info!(
            batch = p.batch_index + 1,
            total_batches = p.total_batches,
            processed = p.processed,
            total_items = p.total_items,
            failed,
            "Batch finished"
        );
    }

    fn retry_round_started(&self, round: u32, remaining: usize) {
        info!(round, remaining, "Starting retry round");
    }
}
