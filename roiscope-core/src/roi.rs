//! Labeled regions of interest.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;
use crate::geometry::{rasterize, Contour, Mask, Point};

/// A labeled closed polygon in source-image coordinates.
///
/// The label is the durable identifier written to disk; position in the
/// active list is the identity used while editing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Roi {
    pub label: String,
    pub contour: Contour,
}

impl Roi {
    /// Create a ROI.
    #[must_use]
    pub fn new(label: impl Into<String>, contour: Contour) -> Self {
        Self {
            label: label.into(),
            contour,
        }
    }

    /// Create a ROI from `(x, y)` vertex pairs.
    #[must_use]
    pub fn from_vertices(label: impl Into<String>, vertices: &[(i32, i32)]) -> Self {
        Self::new(label, vertices.iter().copied().map(Point::from).collect())
    }

    /// Whether the ROI's polygon contains a source-image point.
    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        self.contour.contains(point)
    }

    /// Rasterize the ROI's polygon.
    ///
    /// # Errors
    /// Returns [`GeometryError`] if the polygon is degenerate.
    pub fn mask(&self) -> Result<Mask, GeometryError> {
        rasterize(&self.contour)
    }
}
