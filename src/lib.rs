// Library exports for the phone number scanning workflow

// Core modules
pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use crate::core::{
    config::Config,
    errors::{ConfigError, FailureKind, ScanError},
    types::{Extraction, ScanReport, ScanStatus, WorkItem},
};

pub use middleware::{KeyPool, KeyStats, RotationPolicy};

pub use orchestration::{
    BatchProgress, CallPolicy, LogObserver, NullObserver, ResilientExecutor, ScanObserver,
    ScanOrchestrator,
};

pub use services::{BatchExtractor, ExportFormat, GeminiClient};

pub use utils::metrics::Metrics;
