//! Pipeline bootstrap errors.

use std::io;

use thiserror::Error;

use crate::fetch::FetchError;

/// Errors that can occur while assembling the pipeline.
#[derive(Debug, Error)]
pub enum AppError {
    /// Failed to construct the HTTP client.
    #[error("failed to create HTTP client: {0}")]
    HttpClient(#[from] FetchError),

    /// Failed to spawn the worker pool.
    #[error("failed to spawn worker pool: {0}")]
    PoolSpawn(#[from] io::Error),
}
