//! roiscope-io: File formats for roiscope.
//!
//! This crate provides ROI list persistence (JSON), signal table export
//! (CSV), and a memory-mapped OME-TIFF frame provider via memmap2.
//!

pub mod csv;
mod error;
pub mod ome_tiff;
pub mod store;

pub use csv::SignalCsvWriter;
pub use error::{Error, Result};
pub use ome_tiff::TiffStack;
