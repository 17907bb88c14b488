//! Error types for roiscope-core.

use thiserror::Error;

/// Result type alias for roiscope operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for roiscope operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A contour could not be turned into a mask.
    #[error("invalid polygon at index {index}: {source}")]
    InvalidPolygon {
        index: usize,
        #[source]
        source: GeometryError,
    },

    /// The frame provider failed to deliver a frame.
    #[error("frame source error: {0}")]
    FrameSource(String),

    /// Requested channel does not exist in the stack.
    #[error("channel {channel} out of range (stack has {channels} channels)")]
    ChannelOutOfRange { channel: usize, channels: usize },

    /// Requested more frames than the stack holds.
    #[error("requested {requested} frames but the stack holds {available}")]
    FrameCountOutOfRange { requested: usize, available: usize },

    /// Extraction over zero frames has no baseline.
    #[error("cannot extract signals from an empty recording")]
    NoFrames,

    /// Extraction was cancelled; partial results were discarded.
    #[error("extraction aborted after {completed} frames")]
    Aborted { completed: usize },

    /// Contrast band with a lower bound above its upper bound.
    #[error("invalid contrast band: min {min} > max {max}")]
    InvalidBand { min: u16, max: u16 },

    /// Configuration error.
    #[error("configuration error: {0}")]
    InvalidConfig(String),
}

/// Polygon rasterization errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryError {
    /// A polygon needs at least three vertices.
    #[error("polygon has {count} points, at least 3 are required")]
    TooFewPoints { count: usize },

    /// All vertices share a row or a column.
    #[error("polygon bounding box has zero area")]
    ZeroArea,
}

/// A region whose temporal mean intensity is zero, so dF/F0 is undefined.
///
/// Reported per ROI; extraction still completes for the other regions.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("ROI {roi} has a zero baseline (F0 = 0), dF/F0 is undefined")]
pub struct DegenerateSignal {
    /// Index of the region in the mask list.
    pub roi: usize,
}
