//! Remote image migration engine: classify, fetch, rewrite, coordinate.

pub mod classifier;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod model;
pub mod rewriter;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use classifier::UrlClassifier;
pub use coordinator::{CoordinatorSettings, MigrationCoordinator, Stores, TotalPolicy};
pub use error::{FailureReason, FetchError, MigrationError};
pub use fetcher::{FetcherSettings, HttpImageFetcher, ImageFetcher};
pub use model::{BatchReport, FieldMap, FieldValue, JobPhase, MigrationJob, Record, Target};
pub use rewriter::{FieldRewriter, RecordRewrite};
