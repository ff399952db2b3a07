pub mod metrics;
pub mod mime;
