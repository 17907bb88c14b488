//! Mapping between view (display) and source (image) pixel coordinates.
//!
//! The view always shows a rectangle of the source image stretched to the
//! full view size. Every consumer of coordinates goes through
//! [`ViewTransform`], so hit-testing, drawing and rendering agree.

use roiscope_core::Point;

/// Half-open source rectangle `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl SourceRect {
    /// Rectangle spanning two corners, in any order.
    #[must_use]
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            x0: a.x.min(b.x),
            y0: a.y.min(b.y),
            x1: a.x.max(b.x),
            y1: a.y.max(b.y),
        }
    }

    /// The whole image.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: width as i32,
            y1: height as i32,
        }
    }

    #[must_use]
    pub fn width(&self) -> i32 {
        self.x1 - self.x0
    }

    #[must_use]
    pub fn height(&self) -> i32 {
        self.y1 - self.y0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Intersection with another rectangle (possibly empty).
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }
}

/// Maps view pixels onto the current viewport of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewTransform {
    source: SourceRect,
    image_width: u32,
    image_height: u32,
    view_width: u32,
    view_height: u32,
}

impl ViewTransform {
    /// Identity transform: the view is the image at its native size.
    #[must_use]
    pub fn new(image_width: u32, image_height: u32) -> Self {
        Self {
            source: SourceRect::full(image_width, image_height),
            image_width,
            image_height,
            view_width: image_width,
            view_height: image_height,
        }
    }

    /// Use a different view size.
    #[must_use]
    pub fn with_view_size(mut self, width: u32, height: u32) -> Self {
        self.view_width = width;
        self.view_height = height;
        self
    }

    /// The visible source rectangle.
    #[must_use]
    pub fn viewport(&self) -> SourceRect {
        self.source
    }

    /// Image size in pixels.
    #[must_use]
    pub fn image_size(&self) -> (u32, u32) {
        (self.image_width, self.image_height)
    }

    /// View size in pixels.
    #[must_use]
    pub fn view_size(&self) -> (u32, u32) {
        (self.view_width, self.view_height)
    }

    /// Whether the viewport is narrower than the full image.
    #[must_use]
    pub fn is_zoomed(&self) -> bool {
        self.source != SourceRect::full(self.image_width, self.image_height)
    }

    /// Show `rect` across the whole view.
    pub(crate) fn zoom_to(&mut self, rect: SourceRect) {
        self.source = rect;
    }

    /// Show the whole image again.
    pub(crate) fn reset(&mut self) {
        self.source = SourceRect::full(self.image_width, self.image_height);
    }

    /// Source pixel under a view pixel.
    #[must_use]
    pub fn to_source(&self, view: Point) -> Point {
        Point::new(
            scale(view.x, self.source.width(), self.view_width, self.source.x0),
            scale(view.y, self.source.height(), self.view_height, self.source.y0),
        )
    }

    /// View pixel showing a source pixel.
    #[must_use]
    pub fn to_view(&self, source: Point) -> Point {
        Point::new(
            unscale(source.x - self.source.x0, self.view_width, self.source.width()),
            unscale(source.y - self.source.y0, self.view_height, self.source.height()),
        )
    }

    /// Whether a source point lies inside the image.
    #[must_use]
    pub fn in_image(&self, source: Point) -> bool {
        SourceRect::full(self.image_width, self.image_height).contains(source)
    }
}

impl SourceRect {
    /// Whether a point lies inside the rectangle.
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        (self.x0..self.x1).contains(&p.x) && (self.y0..self.y1).contains(&p.y)
    }
}

/// `origin + floor(v * span / extent)`.
#[allow(clippy::cast_possible_truncation)]
fn scale(v: i32, span: i32, extent: u32, origin: i32) -> i32 {
    if extent == 0 {
        return origin;
    }
    let offset = (i64::from(v) * i64::from(span)).div_euclid(i64::from(extent));
    origin + offset as i32
}

/// `floor(v * extent / span)`.
#[allow(clippy::cast_possible_truncation)]
fn unscale(v: i32, extent: u32, span: i32) -> i32 {
    if span == 0 {
        return 0;
    }
    (i64::from(v) * i64::from(extent)).div_euclid(i64::from(span)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let t = ViewTransform::new(64, 48);
        let p = Point::new(17, 33);
        assert_eq!(t.to_source(p), p);
        assert_eq!(t.to_view(p), p);
        assert!(!t.is_zoomed());
    }

    #[test]
    fn test_zoomed_mapping() {
        let mut t = ViewTransform::new(100, 100);
        t.zoom_to(SourceRect::from_corners(Point::new(30, 40), Point::new(10, 20)));
        assert!(t.is_zoomed());
        assert_eq!(t.to_source(Point::new(0, 0)), Point::new(10, 20));
        assert_eq!(t.to_source(Point::new(50, 50)), Point::new(20, 30));
        assert_eq!(t.to_source(Point::new(99, 99)), Point::new(29, 39));
        assert_eq!(t.to_view(Point::new(20, 30)), Point::new(50, 50));
        t.reset();
        assert!(!t.is_zoomed());
    }

    #[test]
    fn test_non_square_view() {
        let t = ViewTransform::new(40, 20).with_view_size(80, 80);
        assert_eq!(t.to_source(Point::new(79, 79)), Point::new(39, 19));
        assert_eq!(t.to_view(Point::new(10, 10)), Point::new(20, 40));
    }

    #[test]
    fn test_points_left_of_viewport_floor() {
        let mut t = ViewTransform::new(100, 100);
        t.zoom_to(SourceRect { x0: 10, y0: 10, x1: 60, y1: 60 });
        // Half a view pixel per source pixel; -1 view maps below x0.
        assert_eq!(t.to_source(Point::new(-1, 0)).x, 9);
        assert_eq!(t.to_view(Point::new(9, 10)).x, -2);
    }

    #[test]
    fn test_rect_helpers() {
        let r = SourceRect::from_corners(Point::new(5, 5), Point::new(5, 9));
        assert!(r.is_empty());
        let full = SourceRect::full(10, 10);
        let clipped = SourceRect { x0: -5, y0: 2, x1: 20, y1: 8 }.intersect(&full);
        assert_eq!(clipped, SourceRect { x0: 0, y0: 2, x1: 10, y1: 8 });
        assert!(full.contains(Point::new(9, 9)));
        assert!(!full.contains(Point::new(10, 0)));
    }
}
