//! roiscope-core: Core types for ROI curation and fluorescence signal extraction.
//!
//! This crate provides the polygon geometry and rasterization, labeled
//! regions, display contrast selection, and the per-region signal extraction
//! engine shared by the other roiscope crates.
//!

pub mod contrast;
pub mod error;
pub mod geometry;
pub mod roi;
pub mod signal;

pub use contrast::{histogram, select_band, ContrastBand, ContrastConfig};
pub use error::{DegenerateSignal, Error, GeometryError, Result};
pub use geometry::{contours_to_masks, rasterize, BoundingBox, Contour, Mask, Point};
pub use roi::Roi;
pub use signal::{
    extract, extract_with_progress, FrameProvider, InMemoryStack, IntensityFrame, SignalTraces,
    StackMetadata,
};
