//! Polygon geometry and rasterization.
//!
//! Contours are closed polygons in integer pixel coordinates. A contour is
//! rasterized into a [`Mask`]: a boolean grid covering the contour's
//! bounding box, where a pixel is set iff the polygon contains it. Pixels on
//! the polygon boundary count as inside.
//!
//! All containment tests use exact integer arithmetic, so rasterizing the
//! same contour twice always yields bit-identical masks.

use ndarray::Array2;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, GeometryError, Result};
use crate::signal::IntensityFrame;

/// A pixel position. `x` is the column, `y` is the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// Inclusive axis-aligned pixel bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoundingBox {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl BoundingBox {
    /// Width in pixels, counting both edges.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn width(&self) -> usize {
        (i64::from(self.max_x) - i64::from(self.min_x) + 1) as usize
    }

    /// Height in pixels, counting both edges.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn height(&self) -> usize {
        (i64::from(self.max_y) - i64::from(self.min_y) + 1) as usize
    }

    /// True when every vertex shares a column or a row.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.min_x == self.max_x || self.min_y == self.max_y
    }
}

/// A closed polygon. Vertex order defines the edges.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Contour(Vec<Point>);

impl Contour {
    /// Create a contour from its vertices.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns the vertices.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Consumes the contour and returns its vertices.
    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.0
    }

    /// Number of vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the contour has no vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bounding box over all vertices, or `None` for an empty contour.
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let first = self.0.first()?;
        let init = BoundingBox {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        Some(self.0.iter().fold(init, |b, p| BoundingBox {
            min_x: b.min_x.min(p.x),
            min_y: b.min_y.min(p.y),
            max_x: b.max_x.max(p.x),
            max_y: b.max_y.max(p.y),
        }))
    }

    /// Enclosed polygon area (shoelace formula, unsigned).
    #[must_use]
    pub fn area(&self) -> f64 {
        let n = self.0.len();
        if n < 3 {
            return 0.0;
        }
        let mut twice = 0i128;
        for i in 0..n {
            let a = self.0[i];
            let b = self.0[(i + 1) % n];
            twice += i128::from(a.x) * i128::from(b.y) - i128::from(b.x) * i128::from(a.y);
        }
        #[allow(clippy::cast_precision_loss)]
        let area = twice.abs() as f64 / 2.0;
        area
    }

    /// Check that the contour can be rasterized.
    ///
    /// # Errors
    /// Returns [`GeometryError`] for fewer than 3 vertices or a flat bounding box.
    pub fn validate(&self) -> std::result::Result<BoundingBox, GeometryError> {
        if self.0.len() < 3 {
            return Err(GeometryError::TooFewPoints {
                count: self.0.len(),
            });
        }
        let bounds = self
            .bounding_box()
            .ok_or(GeometryError::TooFewPoints { count: 0 })?;
        if bounds.is_degenerate() {
            return Err(GeometryError::ZeroArea);
        }
        Ok(bounds)
    }

    /// Point-in-polygon test, boundary inclusive.
    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        let vertices = &self.0;
        let n = vertices.len();
        if n < 3 {
            return false;
        }
        let px = i128::from(point.x);
        let py = i128::from(point.y);
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (ax, ay) = (i128::from(vertices[j].x), i128::from(vertices[j].y));
            let (bx, by) = (i128::from(vertices[i].x), i128::from(vertices[i].y));
            if on_segment((ax, ay), (bx, by), (px, py)) {
                return true;
            }
            if (by > py) != (ay > py) {
                // Compare px against the edge's x at row py without dividing.
                let lhs = (px - bx) * (ay - by);
                let rhs = (py - by) * (ax - bx);
                let crosses = if ay > by { lhs < rhs } else { lhs > rhs };
                if crosses {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

impl From<Vec<Point>> for Contour {
    fn from(points: Vec<Point>) -> Self {
        Self(points)
    }
}

impl FromIterator<Point> for Contour {
    fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// Products of full-range i32 differences need more than 64 bits.
fn on_segment(a: (i128, i128), b: (i128, i128), p: (i128, i128)) -> bool {
    let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    cross == 0
        && p.0 >= a.0.min(b.0)
        && p.0 <= a.0.max(b.0)
        && p.1 >= a.1.min(b.1)
        && p.1 <= a.1.max(b.1)
}

/// Rasterized polygon membership relative to the polygon's bounding box.
///
/// `grid[(dy, dx)]` describes pixel `(origin.x + dx, origin.y + dy)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pub origin: Point,
    pub grid: Array2<bool>,
}

impl Mask {
    /// Width of the grid in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.grid.ncols()
    }

    /// Height of the grid in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.grid.nrows()
    }

    /// Number of member pixels.
    #[must_use]
    pub fn count(&self) -> usize {
        self.grid.iter().filter(|&&inside| inside).count()
    }

    /// Whether an absolute pixel position is a member.
    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        let dx = i64::from(point.x) - i64::from(self.origin.x);
        let dy = i64::from(point.y) - i64::from(self.origin.y);
        let (Ok(dx), Ok(dy)) = (usize::try_from(dx), usize::try_from(dy)) else {
            return false;
        };
        self.grid.get((dy, dx)).copied().unwrap_or(false)
    }

    /// Sum of intensity over member pixels.
    ///
    /// Member pixels outside the frame contribute nothing.
    #[must_use]
    pub fn sum_over(&self, frame: &IntensityFrame) -> f64 {
        let (rows, cols) = frame.dim();
        let mut total = 0u64;
        for ((dy, dx), &inside) in self.grid.indexed_iter() {
            if !inside {
                continue;
            }
            let y = i64::from(self.origin.y) + dy as i64;
            let x = i64::from(self.origin.x) + dx as i64;
            let (Ok(y), Ok(x)) = (usize::try_from(y), usize::try_from(x)) else {
                continue;
            };
            if y < rows && x < cols {
                total += u64::from(frame[(y, x)]);
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let total = total as f64;
        total
    }
}

/// Rasterize a contour into a bounding-box-relative mask.
///
/// # Errors
/// Returns [`GeometryError::TooFewPoints`] for fewer than 3 vertices and
/// [`GeometryError::ZeroArea`] when all vertices share a row or a column.
pub fn rasterize(contour: &Contour) -> std::result::Result<Mask, GeometryError> {
    let bounds = contour.validate()?;
    let mut grid = Array2::from_elem((bounds.height(), bounds.width()), false);
    for ((dy, dx), cell) in grid.indexed_iter_mut() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let point = Point::new(bounds.min_x + dx as i32, bounds.min_y + dy as i32);
        *cell = contour.contains(point);
    }
    Ok(Mask {
        origin: Point::new(bounds.min_x, bounds.min_y),
        grid,
    })
}

/// Rasterize every contour, failing on the first invalid one.
///
/// # Errors
/// Returns [`Error::InvalidPolygon`] naming the offending contour's index.
pub fn contours_to_masks<'a, I>(contours: I) -> Result<Vec<Mask>>
where
    I: IntoIterator<Item = &'a Contour>,
{
    contours
        .into_iter()
        .enumerate()
        .map(|(index, contour)| {
            rasterize(contour).map_err(|source| Error::InvalidPolygon { index, source })
        })
        .collect()
}
