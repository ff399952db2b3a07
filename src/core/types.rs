// Shared types for the phone scanning workflow

use serde::Serialize;
use std::sync::Arc;

/// One image to be scanned.
///
/// Produced either directly from an uploaded file or by archive expansion.
/// Immutable after creation; the byte buffer is shared so requeueing a failed
/// item never copies image data.
#[derive(Clone)]
pub struct WorkItem {
    pub name: String,
    pub mime_type: String,
    pub bytes: Arc<Vec<u8>>,
}

impl WorkItem {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: Arc::new(bytes),
        }
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Per-item extraction outcome: a canonical `628...` number, the model's raw
/// line when no plausible number was found in it, or the not-found marker.
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    pub source: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Complete,
    CompletedWithFailures,
}

/// Final result of one scan run.
///
/// Invariant: `extractions.len() + failed.len() == total_items`; every item
/// ends up on exactly one side.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub total_items: usize,
    pub extractions: Vec<Extraction>,
    /// Display names of items still failing after the retry-round budget.
    pub failed: Vec<String>,
    pub retry_rounds_used: u32,
    pub elapsed_ms: f64,
    pub status: ScanStatus,
}
