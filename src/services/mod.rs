pub mod aggregate;
pub mod archive;
pub mod export;
pub mod gemini;
pub mod normalize;

pub use export::ExportFormat;
pub use gemini::{BatchExtractor, GeminiClient};
