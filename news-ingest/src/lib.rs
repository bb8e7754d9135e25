pub mod types;
pub mod error;
pub mod retry;
pub mod fetcher;
pub mod store;
pub mod extract;
pub mod analyze;
pub mod progress;
pub mod pipeline;
pub mod orchestrator;
pub mod outcome;
pub mod config;

pub use types::*;
pub use error::user_message;
pub use retry::{retry, RetryPolicy};
pub use fetcher::{fetch_source, FeedReader, HttpFeedReader};
pub use store::{ItemStore, SqliteStore};
pub use extract::{ContentExtractor, ReaderExtractor};
pub use analyze::{Analyzer, GeminiAnalyzer};
pub use progress::{Phase, ProgressEvent, ProgressSink};
pub use pipeline::{Pipeline, RunConfig};
pub use orchestrator::run_concurrently;
pub use outcome::{Outcome, RunSummary, SourceError};
pub use config::IngestConfig;
