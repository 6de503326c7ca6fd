#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod pipeline;
pub mod samples;
pub mod types;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use pipeline::Pipeline;
pub use samples::{Metadata, SampleRegistry};
pub use types::{Status, StatusParseError, Step};

/// Failure to read or interpret a pipeline definition or sample list.
///
/// Fatal at startup. On reload the live state is left untouched and the error
/// is surfaced to the caller.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid pipeline json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("{0}")]
    Invalid(String),
}

pub(crate) fn read_source(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
