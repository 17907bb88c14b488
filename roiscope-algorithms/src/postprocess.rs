//! Area-based filtering and declumping of detected contours.
//!
//! A single pass over the input: small contours are dropped, mid-sized ones
//! pass through, and oversized ones are cut once along the longer axis of
//! their bounding box. Halves are not re-checked, so a very large clump
//! yields two still-oversized halves rather than being subdivided further.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use roiscope_core::{BoundingBox, Contour, Point};

use crate::error::{Error, Result};

/// Area bounds for [`split_oversized`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SplitConfig {
    /// Contours with area at or below this are dropped (pixels²).
    pub min_area: f64,
    /// Contours with area above this are split in two (pixels²).
    pub max_area: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            min_area: 50.0,
            max_area: 250.0,
        }
    }
}

impl SplitConfig {
    /// Set the drop threshold.
    #[must_use]
    pub fn with_min_area(mut self, min_area: f64) -> Self {
        self.min_area = min_area;
        self
    }

    /// Set the split threshold.
    #[must_use]
    pub fn with_max_area(mut self, max_area: f64) -> Self {
        self.max_area = max_area;
        self
    }

    /// Check that the bounds are usable.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for negative, non-finite or inverted bounds.
    pub fn validate(&self) -> Result<()> {
        if !self.min_area.is_finite() || !self.max_area.is_finite() || self.min_area < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "area bounds must be finite and non-negative (min {}, max {})",
                self.min_area, self.max_area
            )));
        }
        if self.min_area > self.max_area {
            return Err(Error::InvalidConfig(format!(
                "min_area {} exceeds max_area {}",
                self.min_area, self.max_area
            )));
        }
        Ok(())
    }

    /// Apply [`split_oversized`] with these bounds.
    #[must_use]
    pub fn apply(&self, contours: Vec<Contour>) -> Vec<Contour> {
        split_oversized(contours, self.min_area, self.max_area)
    }
}

/// Drop small contours and split oversized ones.
///
/// For each contour, by shoelace area:
/// - `area > max_area`: split into exactly two contours. The bounding box is
///   `(x, y, w, h)` with inclusive `w` and `h`; when `w > h` vertices with
///   `x < x + w / 2` go left and the rest right, otherwise the cut is on
///   `y` at `y + h / 2`. Vertex order is preserved in each half. Either half
///   may be empty or degenerate.
/// - `min_area < area <= max_area`: emitted unchanged.
/// - `area <= min_area`: dropped.
#[must_use]
pub fn split_oversized(contours: Vec<Contour>, min_area: f64, max_area: f64) -> Vec<Contour> {
    let mut out = Vec::with_capacity(contours.len());
    for contour in contours {
        let area = contour.area();
        if area > max_area {
            let Some(bounds) = contour.bounding_box() else {
                continue;
            };
            let (first, second) = split_in_two(contour.into_points(), bounds);
            log::debug!(
                "split contour of area {area} into halves of {} and {} points",
                first.len(),
                second.len()
            );
            out.push(first);
            out.push(second);
        } else if area > min_area {
            out.push(contour);
        }
    }
    out
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn split_in_two(points: Vec<Point>, bounds: BoundingBox) -> (Contour, Contour) {
    let (w, h) = (bounds.width(), bounds.height());
    let (first, second): (Vec<Point>, Vec<Point>) = if w > h {
        let mid = bounds.min_x + (w / 2) as i32;
        points.into_iter().partition(|p| p.x < mid)
    } else {
        let mid = bounds.min_y + (h / 2) as i32;
        points.into_iter().partition(|p| p.y < mid)
    };
    (Contour::new(first), Contour::new(second))
}
