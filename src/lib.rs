pub mod classify;
pub mod cli;
pub mod config;
pub mod encoder;
pub mod error;
pub mod ingest;
pub mod resolve;
pub mod store;
pub mod tiler;
pub mod utils;

pub use classify::{Classifier, Outcome, Verdict};
pub use config::Opts;
pub use error::{DefectError, Result};
