//! Editor error types.

use roiscope_core::GeometryError;
use thiserror::Error;

/// Result type for editor operations.
pub type Result<T> = std::result::Result<T, EditorError>;

/// Errors raised by editing operations.
///
/// Every error leaves the session unchanged unless stated otherwise.
#[derive(Error, Debug)]
pub enum EditorError {
    /// The draw buffer cannot form a polygon; the buffer is kept.
    #[error("invalid polygon: {0}")]
    InvalidPolygon(#[from] GeometryError),

    /// `commit_polygon` called while not drawing.
    #[error("not drawing a polygon")]
    NotDrawing,

    /// The ROI list is frozen while an extraction runs.
    #[error("ROI list is locked by a running extraction")]
    ExtractionInProgress,

    /// Zoom selection with zero width or height.
    #[error("zoom selection has zero area")]
    EmptyZoomSelection,

    /// `save` called on a session that was not loaded from a file.
    #[error("session has no ROI file, use save_to")]
    NoRoiPath,

    /// File error.
    #[error("I/O error: {0}")]
    Io(#[from] roiscope_io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] roiscope_core::Error),

    /// The extraction worker exited without reporting a result.
    #[error("extraction worker disconnected")]
    WorkerDisconnected,

    /// The extraction worker reported a failure.
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// The extraction was cancelled.
    #[error("extraction aborted")]
    Aborted,
}
