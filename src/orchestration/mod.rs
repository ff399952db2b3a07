pub mod executor;
pub mod progress;
pub mod scanner;

pub use executor::{CallPolicy, ResilientExecutor};
pub use progress::{BatchProgress, LogObserver, NullObserver, ScanObserver};
pub use scanner::ScanOrchestrator;
