//! Automatic display contrast selection.
//!
//! Picks an intensity band from a frame's histogram: the lowest and highest
//! intensity buckets that hold more than `pixel_count / criteria` pixels.
//! Samples outside the band are clamped to its edges for display.
#![allow(clippy::cast_precision_loss)]

use ndarray::Array2;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::signal::IntensityFrame;

/// Configuration for automatic contrast selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContrastConfig {
    /// Divisor of the pixel count that a bucket must exceed (default: 10000).
    pub criteria: u32,
    /// Fixed lower bound, bypassing the histogram scan.
    pub forced_min: Option<u16>,
    /// Fixed upper bound, bypassing the histogram scan.
    pub forced_max: Option<u16>,
}

impl Default for ContrastConfig {
    fn default() -> Self {
        Self {
            criteria: 10_000,
            forced_min: None,
            forced_max: None,
        }
    }
}

impl ContrastConfig {
    /// Set the selection criteria.
    #[must_use]
    pub fn with_criteria(mut self, criteria: u32) -> Self {
        self.criteria = criteria;
        self
    }

    /// Force the lower bound.
    #[must_use]
    pub fn with_min(mut self, min: Option<u16>) -> Self {
        self.forced_min = min;
        self
    }

    /// Force the upper bound.
    #[must_use]
    pub fn with_max(mut self, max: Option<u16>) -> Self {
        self.forced_max = max;
        self
    }

    /// Select a band for `image` with this configuration.
    ///
    /// # Errors
    /// See [`select_band`].
    pub fn select(&self, image: &IntensityFrame) -> Result<ContrastBand> {
        select_band(image, self.criteria, self.forced_min, self.forced_max)
    }
}

/// Inclusive display intensity band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContrastBand {
    pub min: u16,
    pub max: u16,
}

impl ContrastBand {
    /// Create a band.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBand`] if `min > max`.
    pub fn new(min: u16, max: u16) -> Result<Self> {
        if min > max {
            return Err(Error::InvalidBand { min, max });
        }
        Ok(Self { min, max })
    }

    /// Clamp a single sample into the band.
    #[must_use]
    pub fn clamp(&self, value: u16) -> u16 {
        value.clamp(self.min, self.max)
    }

    /// Clamp every sample into the band.
    #[must_use]
    pub fn apply(&self, image: &IntensityFrame) -> IntensityFrame {
        image.mapv(|v| self.clamp(v))
    }

    /// Clamp, then stretch the band onto `0..=255`.
    ///
    /// A flat band maps everything to 0.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_display(&self, image: &IntensityFrame) -> Array2<u8> {
        let span = f64::from(self.max - self.min);
        if span == 0.0 {
            return Array2::zeros(image.dim());
        }
        image.mapv(|v| {
            let scaled = f64::from(self.clamp(v) - self.min) / span * 255.0;
            scaled.round().clamp(0.0, 255.0) as u8
        })
    }
}

/// Intensity histogram with one bucket per intensity level up to the
/// observed maximum.
///
/// Bucket `i` counts samples of intensity `i`; the maximum itself folds into
/// the top bucket, so a frame with maximum `m` yields `m` buckets. An
/// all-zero frame yields no buckets.
#[must_use]
pub fn histogram(image: &IntensityFrame) -> Vec<u64> {
    let max = image.iter().copied().max().unwrap_or(0);
    let buckets = usize::from(max);
    let mut counts = vec![0u64; buckets];
    if buckets == 0 {
        return counts;
    }
    for &v in image {
        let idx = usize::from(v).min(buckets - 1);
        counts[idx] += 1;
    }
    counts
}

/// Select a display band from the image histogram.
///
/// The lower bound is the first bucket (scanning up from 0) holding more than
/// `pixel_count / criteria` samples; the upper bound is the first such bucket
/// scanning down from the top. A bound that finds no bucket stays at 0 or at
/// the top bucket respectively. Forced bounds replace the scan result and a
/// forced upper bound also caps the upward scan; when both are forced no
/// histogram is built.
///
/// # Errors
/// Returns [`Error::InvalidConfig`] if `criteria` is zero and
/// [`Error::InvalidBand`] if the resulting lower bound exceeds the upper one.
pub fn select_band(
    image: &IntensityFrame,
    criteria: u32,
    forced_min: Option<u16>,
    forced_max: Option<u16>,
) -> Result<ContrastBand> {
    if criteria == 0 {
        return Err(Error::InvalidConfig(
            "contrast criteria must be positive".to_string(),
        ));
    }
    if let (Some(min), Some(max)) = (forced_min, forced_max) {
        return ContrastBand::new(min, max);
    }

    let counts = histogram(image);
    let threshold = image.len() as f64 / f64::from(criteria);
    let top = counts.len().saturating_sub(1);

    let min = forced_min.unwrap_or_else(|| {
        let ceiling = forced_max.map_or(top, |max| usize::from(max).min(top));
        counts
            .iter()
            .take(ceiling + 1)
            .position(|&c| c as f64 > threshold)
            .map_or(0, bucket_value)
    });
    let max = forced_max.unwrap_or_else(|| {
        let floor = usize::from(min).min(top);
        (floor..=top)
            .rev()
            .find(|&i| counts.get(i).is_some_and(|&c| c as f64 > threshold))
            .map_or_else(|| bucket_value(top), bucket_value)
    });

    log::debug!("contrast band selected: [{min}, {max}] (threshold {threshold:.2})");
    ContrastBand::new(min, max)
}

#[allow(clippy::cast_possible_truncation)]
fn bucket_value(index: usize) -> u16 {
    // Bucket count never exceeds u16::MAX.
    index as u16
}
