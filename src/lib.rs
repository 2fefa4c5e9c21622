pub mod builder;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod extractor;
pub mod loader;
mod metrics;
pub mod query;
pub mod ranker;
mod server;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use query::{FaultKind, QueryError, QueryService};
pub use store::EmbeddingStore;
