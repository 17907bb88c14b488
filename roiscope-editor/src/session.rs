//! Editing session over a ROI list.
//!
//! The session is a plain value owned by the caller's event loop. Input
//! arrives in view coordinates and is mapped through the session's
//! [`ViewTransform`] before touching any geometry.
//!
//! The interaction state is derived from what the session holds:
//! a zoom drag means [`EditorState::ZoomSelecting`], otherwise a draw buffer
//! means [`EditorState::DrawingPolygon`], otherwise [`EditorState::Idle`].
//! Zoom is orthogonal and composes with both.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use image::{GrayImage, Luma};
use ndarray::Array2;

use roiscope_core::{contours_to_masks, Contour, ContrastBand, Point, Roi};
use roiscope_io::{store, TiffStack};

use crate::error::{EditorError, Result};
use crate::guard::{ExtractionGuard, ExtractionSnapshot};
use crate::transform::{SourceRect, ViewTransform};

/// Interaction state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorState {
    Idle,
    DrawingPolygon,
    ZoomSelecting,
}

/// An undoable removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoEntry {
    /// `roi` was removed from position `index`.
    Removed { roi: Roi, index: usize },
}

/// What [`EditorSession::undo`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOutcome {
    /// The last draw-buffer point was removed.
    PointRemoved,
    /// A deleted ROI was put back at `index`.
    Restored { index: usize },
    /// Nothing to undo.
    Nothing,
}

/// Session configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EditorConfig {
    /// Maximum number of undo snapshots; the oldest are dropped first.
    /// `None` keeps every snapshot.
    pub undo_limit: Option<usize>,
}

impl EditorConfig {
    /// Bound the undo history.
    #[must_use]
    pub fn with_undo_limit(mut self, limit: Option<usize>) -> Self {
        self.undo_limit = limit;
        self
    }
}

/// A ROI outline in view coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outline {
    pub label: String,
    pub points: Vec<Point>,
    pub selected: bool,
}

/// Everything drawn over the backdrop, in view coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scene {
    pub outlines: Vec<Outline>,
    /// Draw buffer vertices.
    pub draft: Vec<Point>,
    /// Live zoom selection, as two corners.
    pub zoom_rect: Option<(Point, Point)>,
}

/// Mutable state of one editing session.
#[derive(Debug)]
pub struct EditorSession {
    rois: Vec<Roi>,
    undo_stack: VecDeque<UndoEntry>,
    draft: Option<Vec<Point>>,
    zoom_drag: Option<(Point, Point)>,
    selection: Option<usize>,
    transform: ViewTransform,
    pointer: Option<Point>,
    next_label: usize,
    backdrop: Option<Array2<u8>>,
    roi_path: Option<PathBuf>,
    guard: ExtractionGuard,
    dirty: bool,
    config: EditorConfig,
}

/// Open a session on a frame of a TIFF stack and a ROI file.
///
/// `start_frame` is a flattened page index (`channel * frames + time`).
/// The backdrop is that page clamped to `[contrast_min, contrast_max]` and
/// stretched to 8 bits. Saves go back to `roi_file`.
///
/// # Errors
/// Returns an error if either file cannot be read, the page does not
/// exist, or the contrast band is inverted.
pub fn load_session<P, Q>(
    tiff: P,
    roi_file: Q,
    start_frame: usize,
    contrast_min: u16,
    contrast_max: u16,
) -> Result<EditorSession>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let band = ContrastBand::new(contrast_min, contrast_max)?;
    let mut stack = TiffStack::open(tiff)?;
    let frame = stack.read_page(start_frame)?;
    let rois = store::load(roi_file.as_ref())?;

    let (rows, cols) = frame.dim();
    let too_large = |_| {
        EditorError::Core(roiscope_core::Error::InvalidConfig(format!(
            "frame {cols}x{rows} is too large to display"
        )))
    };
    let width = u32::try_from(cols).map_err(too_large)?;
    let height = u32::try_from(rows).map_err(too_large)?;

    log::info!(
        "editing {} ROIs over page {start_frame} ({width}x{height}, contrast [{contrast_min}, {contrast_max}])",
        rois.len()
    );
    Ok(EditorSession::new(rois, width, height)
        .with_backdrop(band.to_display(&frame))
        .with_roi_path(roi_file.as_ref()))
}

impl EditorSession {
    /// Create a session over `rois` on a `width` x `height` image.
    ///
    /// New ROIs are labeled from `rois.len() + 1` upward.
    #[must_use]
    pub fn new(rois: Vec<Roi>, width: u32, height: u32) -> Self {
        let next_label = rois.len() + 1;
        Self {
            rois,
            undo_stack: VecDeque::new(),
            draft: None,
            zoom_drag: None,
            selection: None,
            transform: ViewTransform::new(width, height),
            pointer: None,
            next_label,
            backdrop: None,
            roi_path: None,
            guard: ExtractionGuard::default(),
            dirty: false,
            config: EditorConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EditorConfig) -> Self {
        self.config = config;
        self
    }

    /// Display image, `[(y, x)]`, matching the image size.
    #[must_use]
    pub fn with_backdrop(mut self, backdrop: Array2<u8>) -> Self {
        self.backdrop = Some(backdrop);
        self
    }

    /// File written by [`EditorSession::save`].
    #[must_use]
    pub fn with_roi_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.roi_path = Some(path.into());
        self
    }

    /// Render into a view of a different size.
    #[must_use]
    pub fn with_view_size(mut self, width: u32, height: u32) -> Self {
        self.transform = self.transform.with_view_size(width, height);
        self
    }

    #[must_use]
    pub fn state(&self) -> EditorState {
        if self.zoom_drag.is_some() {
            EditorState::ZoomSelecting
        } else if self.draft.is_some() {
            EditorState::DrawingPolygon
        } else {
            EditorState::Idle
        }
    }

    #[must_use]
    pub fn rois(&self) -> &[Roi] {
        &self.rois
    }

    #[must_use]
    pub fn selection(&self) -> Option<usize> {
        self.selection
    }

    #[must_use]
    pub fn selected_roi(&self) -> Option<&Roi> {
        self.selection.and_then(|i| self.rois.get(i))
    }

    /// Draw buffer in source coordinates, when drawing.
    #[must_use]
    pub fn draft(&self) -> Option<&[Point]> {
        self.draft.as_deref()
    }

    #[must_use]
    pub fn transform(&self) -> &ViewTransform {
        &self.transform
    }

    #[must_use]
    pub fn is_zoomed(&self) -> bool {
        self.transform.is_zoomed()
    }

    /// Source pixel under the pointer, if it is over the image.
    #[must_use]
    pub fn pointer(&self) -> Option<Point> {
        self.pointer
    }

    /// Unsaved changes since load or the last save.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    #[must_use]
    pub fn roi_path(&self) -> Option<&Path> {
        self.roi_path.as_deref()
    }

    #[must_use]
    pub fn is_extracting(&self) -> bool {
        self.guard.is_raised()
    }

    /// Index of the first ROI (list order) containing the view point.
    #[must_use]
    pub fn hit_test(&self, view: Point) -> Option<usize> {
        let p = self.transform.to_source(view);
        self.rois.iter().position(|roi| roi.contains(p))
    }

    /// Enter drawing mode with an empty buffer; clears the selection.
    pub fn start_drawing(&mut self) {
        self.draft = Some(Vec::new());
        self.selection = None;
    }

    /// Leave drawing mode, discarding the buffer.
    pub fn cancel_drawing(&mut self) {
        self.draft = None;
    }

    /// Append the source point under `view` to the draw buffer.
    ///
    /// Returns `false` when not drawing.
    pub fn add_point(&mut self, view: Point) -> bool {
        let p = self.transform.to_source(view);
        match &mut self.draft {
            Some(points) => {
                points.push(p);
                true
            }
            None => false,
        }
    }

    /// Drop the last buffered point; an emptied buffer ends drawing mode.
    ///
    /// Returns `false` if there was no point to remove.
    pub fn remove_last_point(&mut self) -> bool {
        let Some(points) = &mut self.draft else {
            return false;
        };
        if points.pop().is_none() {
            return false;
        }
        if points.is_empty() {
            self.draft = None;
        }
        true
    }

    /// Turn the draw buffer into a new ROI and return to idle.
    ///
    /// # Errors
    /// Returns [`EditorError::ExtractionInProgress`] while an extraction
    /// holds the list, [`EditorError::NotDrawing`] outside drawing mode, and
    /// [`EditorError::InvalidPolygon`] when the buffer has fewer than 3
    /// points or no area. The buffer is kept on error.
    pub fn commit_polygon(&mut self) -> Result<&Roi> {
        self.ensure_unlocked()?;
        let Some(points) = &self.draft else {
            return Err(EditorError::NotDrawing);
        };
        let contour = Contour::new(points.clone());
        contour.validate()?;

        let label = self.allocate_label();
        log::debug!("committed ROI {label} with {} vertices", contour.len());
        self.draft = None;
        self.rois.push(Roi::new(label, contour));
        self.dirty = true;
        let index = self.rois.len() - 1;
        Ok(&self.rois[index])
    }

    fn allocate_label(&mut self) -> String {
        let used: HashSet<&str> = self.rois.iter().map(|r| r.label.as_str()).collect();
        while used.contains(self.next_label.to_string().as_str()) {
            self.next_label += 1;
        }
        let label = self.next_label.to_string();
        self.next_label += 1;
        label
    }

    /// Select the first ROI under `view`, or clear the selection.
    ///
    /// Ignored outside [`EditorState::Idle`].
    pub fn click(&mut self, view: Point) -> Option<usize> {
        if self.state() != EditorState::Idle {
            return self.selection;
        }
        self.selection = self.hit_test(view);
        self.selection
    }

    /// Remove the selected ROI, keeping it for undo.
    ///
    /// # Errors
    /// Returns [`EditorError::ExtractionInProgress`] while an extraction
    /// holds the list.
    pub fn delete_selected(&mut self) -> Result<Option<Roi>> {
        self.ensure_unlocked()?;
        let Some(index) = self.selection.take() else {
            return Ok(None);
        };
        Ok(self.remove_at(index))
    }

    /// Remove the first ROI under `view` (secondary click).
    ///
    /// Does nothing while drawing or selecting a zoom area.
    ///
    /// # Errors
    /// Returns [`EditorError::ExtractionInProgress`] while an extraction
    /// holds the list.
    pub fn delete_at(&mut self, view: Point) -> Result<Option<Roi>> {
        self.ensure_unlocked()?;
        if self.state() != EditorState::Idle {
            return Ok(None);
        }
        let Some(index) = self.hit_test(view) else {
            return Ok(None);
        };
        self.selection = match self.selection {
            Some(s) if s == index => None,
            Some(s) if s > index => Some(s - 1),
            other => other,
        };
        Ok(self.remove_at(index))
    }

    fn remove_at(&mut self, index: usize) -> Option<Roi> {
        if index >= self.rois.len() {
            return None;
        }
        let roi = self.rois.remove(index);
        log::debug!("removed ROI {} at index {index}", roi.label);
        self.undo_stack.push_back(UndoEntry::Removed {
            roi: roi.clone(),
            index,
        });
        if let Some(limit) = self.config.undo_limit {
            while self.undo_stack.len() > limit {
                self.undo_stack.pop_front();
            }
        }
        self.dirty = true;
        Some(roi)
    }

    /// Undo the latest action.
    ///
    /// While drawing with buffered points, removes the last point. Otherwise
    /// restores the most recently deleted ROI at its original position
    /// (clamped to the list length).
    ///
    /// # Errors
    /// Returns [`EditorError::ExtractionInProgress`] if a ROI would be
    /// restored while an extraction holds the list.
    pub fn undo(&mut self) -> Result<UndoOutcome> {
        if self.draft.as_ref().is_some_and(|p| !p.is_empty()) {
            self.remove_last_point();
            return Ok(UndoOutcome::PointRemoved);
        }
        if self.undo_stack.is_empty() {
            return Ok(UndoOutcome::Nothing);
        }
        self.ensure_unlocked()?;
        let Some(UndoEntry::Removed { roi, index }) = self.undo_stack.pop_back() else {
            return Ok(UndoOutcome::Nothing);
        };
        let index = index.min(self.rois.len());
        log::debug!("restored ROI {} at index {index}", roi.label);
        self.rois.insert(index, roi);
        if let Some(s) = self.selection.as_mut() {
            if *s >= index {
                *s += 1;
            }
        }
        self.dirty = true;
        Ok(UndoOutcome::Restored { index })
    }

    /// Start a zoom rectangle at `view`.
    pub fn begin_zoom_selection(&mut self, view: Point) {
        let p = self.transform.to_source(view);
        self.zoom_drag = Some((p, p));
    }

    /// Move the free corner of the zoom rectangle.
    pub fn update_zoom_selection(&mut self, view: Point) {
        let p = self.transform.to_source(view);
        if let Some((_, corner)) = &mut self.zoom_drag {
            *corner = p;
        }
    }

    /// Apply the zoom rectangle as the new viewport.
    ///
    /// The rectangle is clipped to the image. Returns `Ok(false)` if no zoom
    /// selection was in progress.
    ///
    /// # Errors
    /// Returns [`EditorError::EmptyZoomSelection`] when the clipped
    /// rectangle has no area; the viewport is left unchanged.
    pub fn finish_zoom_selection(&mut self) -> Result<bool> {
        let Some((a, b)) = self.zoom_drag.take() else {
            return Ok(false);
        };
        let (width, height) = self.transform.image_size();
        let rect = SourceRect::from_corners(a, b).intersect(&SourceRect::full(width, height));
        if rect.is_empty() {
            return Err(EditorError::EmptyZoomSelection);
        }
        log::debug!(
            "zoomed to [{}, {}) x [{}, {})",
            rect.x0,
            rect.x1,
            rect.y0,
            rect.y1
        );
        self.transform.zoom_to(rect);
        Ok(true)
    }

    pub fn cancel_zoom_selection(&mut self) {
        self.zoom_drag = None;
    }

    /// Show the whole image.
    pub fn reset_zoom(&mut self) {
        self.transform.reset();
    }

    /// Track the pointer; returns the source pixel under it, if any.
    pub fn pointer_moved(&mut self, view: Point) -> Option<Point> {
        let p = self.transform.to_source(view);
        self.pointer = self.transform.in_image(p).then_some(p);
        self.pointer
    }

    /// Overlays in view coordinates.
    #[must_use]
    pub fn scene(&self) -> Scene {
        let to_view = |points: &[Point]| -> Vec<Point> {
            points.iter().map(|&p| self.transform.to_view(p)).collect()
        };
        Scene {
            outlines: self
                .rois
                .iter()
                .enumerate()
                .map(|(i, roi)| Outline {
                    label: roi.label.clone(),
                    points: to_view(roi.contour.points()),
                    selected: self.selection == Some(i),
                })
                .collect(),
            draft: self.draft.as_deref().map(to_view).unwrap_or_default(),
            zoom_rect: self
                .zoom_drag
                .map(|(a, b)| (self.transform.to_view(a), self.transform.to_view(b))),
        }
    }

    /// The backdrop as seen through the viewport, at view size.
    ///
    /// Nearest-neighbour sampling; pixels outside the image are black.
    #[must_use]
    pub fn view_image(&self) -> Option<GrayImage> {
        let backdrop = self.backdrop.as_ref()?;
        let (width, height) = self.transform.view_size();
        Some(GrayImage::from_fn(width, height, |x, y| {
            #[allow(clippy::cast_possible_wrap)]
            let p = self.transform.to_source(Point::new(x as i32, y as i32));
            let value = usize::try_from(p.y)
                .ok()
                .zip(usize::try_from(p.x).ok())
                .and_then(|idx| backdrop.get(idx).copied())
                .unwrap_or(0);
            Luma([value])
        }))
    }

    /// Write the active list to the session's ROI file.
    ///
    /// # Errors
    /// Returns [`EditorError::NoRoiPath`] if the session has no file, or the
    /// store error if writing fails.
    pub fn save(&mut self) -> Result<()> {
        let path = self.roi_path.clone().ok_or(EditorError::NoRoiPath)?;
        self.save_to(path)
    }

    /// Write the active list to `path`.
    ///
    /// # Errors
    /// Returns the store error if writing fails.
    pub fn save_to<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        store::save(path, &self.rois)?;
        self.dirty = false;
        Ok(())
    }

    /// End the session and hand back the active list.
    #[must_use]
    pub fn finish(self) -> Vec<Roi> {
        if self.dirty {
            log::warn!("session closed with unsaved ROI changes");
        }
        self.rois
    }

    /// Rasterize the active list and lock it until the snapshot is dropped.
    ///
    /// # Errors
    /// Returns [`EditorError::ExtractionInProgress`] if another snapshot is
    /// alive, or a core error if a ROI cannot be rasterized.
    pub fn begin_extraction(&self) -> Result<ExtractionSnapshot> {
        let lease = self
            .guard
            .try_raise()
            .ok_or(EditorError::ExtractionInProgress)?;
        let masks = contours_to_masks(self.rois.iter().map(|r| &r.contour))?;
        Ok(ExtractionSnapshot {
            labels: self.rois.iter().map(|r| r.label.clone()).collect(),
            masks,
            lease,
        })
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.guard.is_raised() {
            return Err(EditorError::ExtractionInProgress);
        }
        Ok(())
    }
}
