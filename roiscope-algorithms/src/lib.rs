//! roiscope-algorithms: Region detection for fluorescence frames.
//!
//! This crate provides:
//! - **Post-processing** - area filtering and single-pass declumping of contours
//! - **Segmentation** - the [`SegmentationModel`] seam, a classical
//!   percentile-threshold segmenter and an adapter for external binary masks
//!
#![warn(missing_docs)]

mod error;
pub mod postprocess;
pub mod segmentation;

pub use error::{Error, Result};
pub use postprocess::{split_oversized, SplitConfig};
pub use segmentation::{
    contours_from_binary_mask, detect_rois, to_gray_image, BinaryMaskModel, SegmentationModel,
    SegmenterConfig, ThresholdSegmenter,
};
