//! Frame segmentation into candidate regions.
//!
//! A [`SegmentationModel`] turns one intensity frame into raw, unsplit
//! contours. [`detect_rois`] runs a model, applies the area post-processor
//! and labels what survives.
#![allow(clippy::cast_precision_loss)]

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use ndarray::Array2;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use roiscope_core::{ContrastConfig, Contour, IntensityFrame, Point, Roi};

use crate::error::{Error, Result};
use crate::postprocess::SplitConfig;

/// Produces raw region outlines for a single frame.
pub trait SegmentationModel {
    /// Segment a frame into closed outer contours.
    ///
    /// # Errors
    /// Returns an error if the frame cannot be segmented.
    fn segment(&self, frame: &IntensityFrame) -> Result<Vec<Contour>>;
}

/// Configuration for [`ThresholdSegmenter`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmenterConfig {
    /// Contrast selection applied before thresholding.
    pub contrast: ContrastConfig,
    /// Gaussian blur sigma; non-positive disables the blur.
    pub sigma: f32,
    /// Pixels strictly above this percentile of the blurred frame are foreground.
    pub percentile: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            contrast: ContrastConfig::default(),
            sigma: 0.4,
            percentile: 98.0,
        }
    }
}

impl SegmenterConfig {
    /// Set the contrast configuration.
    #[must_use]
    pub fn with_contrast(mut self, contrast: ContrastConfig) -> Self {
        self.contrast = contrast;
        self
    }

    /// Set the blur sigma.
    #[must_use]
    pub fn with_sigma(mut self, sigma: f32) -> Self {
        self.sigma = sigma;
        self
    }

    /// Set the foreground percentile.
    #[must_use]
    pub fn with_percentile(mut self, percentile: f64) -> Self {
        self.percentile = percentile;
        self
    }
}

/// Classical segmenter: contrast stretch, blur, percentile threshold.
#[derive(Clone, Debug, Default)]
pub struct ThresholdSegmenter {
    config: SegmenterConfig,
}

impl ThresholdSegmenter {
    /// Create a segmenter.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the percentile is outside `0..=100`.
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        if !(0.0..=100.0).contains(&config.percentile) {
            return Err(Error::InvalidConfig(format!(
                "percentile must be within 0..=100, got {}",
                config.percentile
            )));
        }
        Ok(Self { config })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Binary foreground mask for a frame (255 = foreground).
    ///
    /// # Errors
    /// Propagates contrast selection and image size errors.
    pub fn foreground(&self, frame: &IntensityFrame) -> Result<GrayImage> {
        let band = self.config.contrast.select(frame)?;
        let display = to_gray_image(&band.to_display(frame))?;
        let blurred = if self.config.sigma > 0.0 {
            imageproc::filter::gaussian_blur_f32(&display, self.config.sigma)
        } else {
            display
        };

        let mut values: Vec<u8> = blurred.as_raw().clone();
        values.sort_unstable();
        let threshold = percentile(&values, self.config.percentile);
        log::debug!(
            "foreground threshold {threshold:.2} at percentile {}",
            self.config.percentile
        );

        let mut mask = blurred;
        for pixel in mask.pixels_mut() {
            let on = f64::from(pixel.0[0]) > threshold;
            *pixel = Luma([if on { 255 } else { 0 }]);
        }
        Ok(mask)
    }
}

impl SegmentationModel for ThresholdSegmenter {
    fn segment(&self, frame: &IntensityFrame) -> Result<Vec<Contour>> {
        let mask = self.foreground(frame)?;
        Ok(contours_from_binary_mask(&mask))
    }
}

/// A precomputed binary mask used as a segmentation result.
///
/// Lets the output of an external model drive ROI detection.
#[derive(Clone, Debug)]
pub struct BinaryMaskModel {
    mask: GrayImage,
}

impl BinaryMaskModel {
    /// Wrap a mask; any non-zero pixel is foreground.
    #[must_use]
    pub fn new(mask: GrayImage) -> Self {
        Self { mask }
    }
}

impl SegmentationModel for BinaryMaskModel {
    fn segment(&self, frame: &IntensityFrame) -> Result<Vec<Contour>> {
        let (rows, cols) = frame.dim();
        let (w, h) = self.mask.dimensions();
        if (w as usize, h as usize) != (cols, rows) {
            return Err(Error::InvalidConfig(format!(
                "mask is {w}x{h} but the frame is {cols}x{rows}"
            )));
        }
        Ok(contours_from_binary_mask(&self.mask))
    }
}

/// Outer borders of the foreground objects in a binary image.
///
/// Holes and objects nested inside holes are ignored. Straight runs
/// (horizontal, vertical or diagonal) are reduced to their end points.
#[must_use]
pub fn contours_from_binary_mask(mask: &GrayImage) -> Vec<Contour> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| {
            let points = c.points.into_iter().map(|p| Point::new(p.x, p.y)).collect();
            Contour::new(compress_collinear(points))
        })
        .collect()
}

fn compress_collinear(points: Vec<Point>) -> Vec<Point> {
    let n = points.len();
    if n < 3 {
        return points;
    }
    let step = |a: Point, b: Point| ((b.x - a.x).signum(), (b.y - a.y).signum());
    (0..n)
        .filter(|&i| {
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            step(prev, points[i]) != step(points[i], next)
        })
        .map(|i| points[i])
        .collect()
}

/// Linear-interpolated percentile of sorted samples.
fn percentile(sorted: &[u8], pct: f64) -> f64 {
    let Some(&last) = sorted.last() else {
        return 0.0;
    };
    if sorted.len() == 1 {
        return f64::from(last);
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = rank - lo as f64;
    f64::from(sorted[lo]) + (f64::from(sorted[hi]) - f64::from(sorted[lo])) * frac
}

/// Convert an 8-bit `[(y, x)]` array into a gray image.
///
/// # Errors
/// Returns [`Error::InvalidConfig`] if a dimension exceeds `u32`.
#[allow(clippy::cast_possible_truncation)]
pub fn to_gray_image(display: &Array2<u8>) -> Result<GrayImage> {
    let (rows, cols) = display.dim();
    let too_large = |_| Error::InvalidConfig(format!("image {cols}x{rows} is too large"));
    let width = u32::try_from(cols).map_err(too_large)?;
    let height = u32::try_from(rows).map_err(too_large)?;
    Ok(GrayImage::from_fn(width, height, |x, y| {
        Luma([display[(y as usize, x as usize)]])
    }))
}

/// Segment a frame, post-process the contours and label the survivors.
///
/// Labels are `"0"`, `"1"`, … in output order. Split halves that cannot be
/// rasterized (fewer than 3 vertices, or flat) are dropped with a warning.
///
/// # Errors
/// Returns an error if the split bounds are invalid or the model fails.
pub fn detect_rois<M>(model: &M, frame: &IntensityFrame, split: &SplitConfig) -> Result<Vec<Roi>>
where
    M: SegmentationModel + ?Sized,
{
    split.validate()?;
    let raw = model.segment(frame)?;
    let found = raw.len();
    let processed = split.apply(raw);

    let mut rois = Vec::with_capacity(processed.len());
    for contour in processed {
        if let Err(err) = contour.validate() {
            log::warn!("dropping unusable contour: {err}");
            continue;
        }
        rois.push(Roi::new(rois.len().to_string(), contour));
    }
    log::info!("detected {} ROIs from {found} raw contours", rois.len());
    Ok(rois)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(width: u32, height: u32, rects: &[(u32, u32, u32, u32)]) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let on = rects
                .iter()
                .any(|&(x0, y0, x1, y1)| x >= x0 && x < x1 && y >= y0 && y < y1);
            Luma([if on { 255 } else { 0 }])
        })
    }

    fn sorted_points(contour: &Contour) -> Vec<(i32, i32)> {
        let mut pts: Vec<_> = contour.points().iter().map(|p| (p.x, p.y)).collect();
        pts.sort_unstable();
        pts
    }

    #[test]
    fn test_rectangle_reduced_to_corners() {
        let img = filled(20, 20, &[(5, 5, 15, 15)]);
        let contours = contours_from_binary_mask(&img);
        assert_eq!(contours.len(), 1);
        assert_eq!(
            sorted_points(&contours[0]),
            vec![(5, 5), (5, 14), (14, 5), (14, 14)]
        );
    }

    #[test]
    fn test_holes_and_nested_objects_ignored() {
        // Ring with an island inside its hole.
        let ring = GrayImage::from_fn(30, 30, |x, y| {
            let outer = (3..27).contains(&x) && (3..27).contains(&y);
            let hole = (8..22).contains(&x) && (8..22).contains(&y);
            let island = (12..18).contains(&x) && (12..18).contains(&y);
            Luma([if (outer && !hole) || island { 255 } else { 0 }])
        });
        let contours = contours_from_binary_mask(&ring);
        assert_eq!(contours.len(), 1);
        let bounds = contours[0].bounding_box().unwrap();
        assert_eq!((bounds.min_x, bounds.max_x), (3, 26));
    }

    #[test]
    fn test_empty_mask() {
        assert!(contours_from_binary_mask(&GrayImage::new(8, 8)).is_empty());
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [0u8, 10, 20, 30, 40];
        assert!((percentile(&v, 50.0) - 20.0).abs() < 1e-9);
        assert!((percentile(&v, 90.0) - 36.0).abs() < 1e-9);
        assert!((percentile(&v, 100.0) - 40.0).abs() < 1e-9);
        assert!(percentile(&[], 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_segmenter_finds_blobs() {
        let mut frame = IntensityFrame::from_elem((150, 150), 100);
        for y in 20..30 {
            for x in 20..30 {
                frame[(y, x)] = 1000;
            }
        }
        for y in 80..90 {
            for x in 100..110 {
                frame[(y, x)] = 1000;
            }
        }
        let segmenter = ThresholdSegmenter::new(SegmenterConfig::default()).unwrap();
        let contours = segmenter.segment(&frame).unwrap();
        assert_eq!(contours.len(), 2);
        assert!(contours[0].contains(Point::new(25, 25)));
        assert!(contours[1].contains(Point::new(105, 85)));

        let rois = detect_rois(&segmenter, &frame, &SplitConfig::default()).unwrap();
        let labels: Vec<_> = rois.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["0", "1"]);
    }

    #[test]
    fn test_invalid_percentile() {
        let config = SegmenterConfig::default().with_percentile(120.0);
        assert!(matches!(
            ThresholdSegmenter::new(config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_binary_mask_model_checks_shape() {
        let model = BinaryMaskModel::new(GrayImage::new(10, 12));
        let frame = IntensityFrame::zeros((10, 12));
        assert!(model.segment(&frame).is_err());
        let frame = IntensityFrame::zeros((12, 10));
        assert!(model.segment(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_to_gray_image_layout() {
        let arr = Array2::from_shape_vec((2, 3), vec![1u8, 2, 3, 4, 5, 6]).unwrap();
        let img = to_gray_image(&arr).unwrap();
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(2, 1).0[0], 6);
    }
}
