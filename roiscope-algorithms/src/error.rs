//! Error types for roiscope-algorithms.

use thiserror::Error;

/// Result type alias for segmentation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while detecting regions.
#[derive(Error, Debug)]
pub enum Error {
    /// Error bubbled up from the core crate.
    #[error(transparent)]
    Core(#[from] roiscope_core::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    InvalidConfig(String),
}
