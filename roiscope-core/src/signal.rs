//! Per-region signal extraction over a frame stack.
//!
//! The engine streams frames one at a time from a [`FrameProvider`] and sums
//! intensity over every mask, producing the raw series `F[r][t]`. Once the
//! whole stack has been read, each region's baseline `F0[r]` (temporal mean)
//! is computed and the normalized series `dF/F0 = (F - F0) / F0` derived.
//!
//! A region with a zero baseline is reported as a [`DegenerateSignal`] and
//! its normalized row is filled with NaN; the other regions are unaffected.
#![allow(clippy::cast_precision_loss)]

use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::Array2;
use rayon::prelude::*;

use crate::error::{DegenerateSignal, Error, Result};
use crate::geometry::Mask;

/// One frame of intensity samples, indexed `[(y, x)]`.
pub type IntensityFrame = Array2<u16>;

/// Dimensions and acquisition metadata of a frame stack.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StackMetadata {
    /// Frames per channel (`SizeT`).
    pub frame_count: usize,
    /// Number of channels (`SizeC`).
    pub channel_count: usize,
    /// Frame width in pixels (`SizeX`).
    pub width: usize,
    /// Frame height in pixels (`SizeY`).
    pub height: usize,
    /// Channel names, in channel order.
    pub channel_names: Vec<String>,
    /// Seconds between frames, when known.
    pub time_increment: Option<f64>,
    /// Physical pixel size in micrometres `(x, y)`, when known.
    pub physical_size: Option<(f64, f64)>,
}

impl StackMetadata {
    /// Index of the channel with the given name.
    #[must_use]
    pub fn channel_from_name(&self, name: &str) -> Option<usize> {
        self.channel_names.iter().position(|n| n == name)
    }
}

/// Random access to the frames of a recording.
///
/// Implementations must tolerate repeated calls for the same frame; the
/// engine does not cache.
pub trait FrameProvider {
    /// Stack dimensions.
    fn metadata(&self) -> &StackMetadata;

    /// Fetch the frame at `(channel, time)`.
    ///
    /// # Errors
    /// Returns an error if the frame cannot be read.
    fn get_slice(&mut self, channel: usize, time: usize) -> Result<IntensityFrame>;
}

impl<P: FrameProvider + ?Sized> FrameProvider for &mut P {
    fn metadata(&self) -> &StackMetadata {
        (**self).metadata()
    }

    fn get_slice(&mut self, channel: usize, time: usize) -> Result<IntensityFrame> {
        (**self).get_slice(channel, time)
    }
}

/// A frame stack held in memory, one frame list per channel.
#[derive(Debug, Clone)]
pub struct InMemoryStack {
    metadata: StackMetadata,
    channels: Vec<Vec<IntensityFrame>>,
}

impl InMemoryStack {
    /// Build a stack from per-channel frame lists.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if channels differ in length or
    /// frames differ in shape.
    pub fn new(channels: Vec<Vec<IntensityFrame>>) -> Result<Self> {
        let frame_count = channels.first().map_or(0, Vec::len);
        if channels.iter().any(|c| c.len() != frame_count) {
            return Err(Error::InvalidConfig(
                "all channels must hold the same number of frames".to_string(),
            ));
        }
        let (height, width) = channels
            .iter()
            .flatten()
            .next()
            .map_or((0, 0), |f| f.dim());
        if channels.iter().flatten().any(|f| f.dim() != (height, width)) {
            return Err(Error::InvalidConfig(
                "all frames must share one shape".to_string(),
            ));
        }
        let channel_count = channels.len();
        Ok(Self {
            metadata: StackMetadata {
                frame_count,
                channel_count,
                width,
                height,
                channel_names: (0..channel_count).map(|c| format!("C{c}")).collect(),
                ..StackMetadata::default()
            },
            channels,
        })
    }

    /// Build a single-channel stack.
    ///
    /// # Errors
    /// See [`InMemoryStack::new`].
    pub fn single_channel(frames: Vec<IntensityFrame>) -> Result<Self> {
        Self::new(vec![frames])
    }
}

impl FrameProvider for InMemoryStack {
    fn metadata(&self) -> &StackMetadata {
        &self.metadata
    }

    fn get_slice(&mut self, channel: usize, time: usize) -> Result<IntensityFrame> {
        self.channels
            .get(channel)
            .and_then(|frames| frames.get(time))
            .cloned()
            .ok_or_else(|| {
                Error::FrameSource(format!("no frame at channel {channel}, time {time}"))
            })
    }
}

/// Raw and normalized time series for a set of regions.
#[derive(Debug, Clone)]
pub struct SignalTraces {
    /// `F[r][t]`: summed intensity of region `r` at frame `t`.
    pub raw: Array2<f64>,
    /// `dF/F0[r][t]`; NaN rows for degenerate regions.
    pub normalized: Array2<f64>,
    /// `F0[r]`: temporal mean of each raw row.
    pub baseline: Vec<f64>,
    /// Regions whose baseline is zero.
    pub degenerate: Vec<DegenerateSignal>,
}

impl SignalTraces {
    /// Number of regions.
    #[must_use]
    pub fn roi_count(&self) -> usize {
        self.raw.nrows()
    }

    /// Number of frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.raw.ncols()
    }

    /// Whether region `roi` has an undefined dF/F0.
    #[must_use]
    pub fn is_degenerate(&self, roi: usize) -> bool {
        self.degenerate.iter().any(|d| d.roi == roi)
    }

    fn from_raw(raw: Array2<f64>) -> Self {
        let (rois, frames) = raw.dim();
        let mut normalized = Array2::zeros((rois, frames));
        let mut baseline = Vec::with_capacity(rois);
        let mut degenerate = Vec::new();

        for (r, row) in raw.outer_iter().enumerate() {
            let f0 = row.sum() / frames as f64;
            baseline.push(f0);
            let mut out = normalized.row_mut(r);
            if f0 == 0.0 {
                log::warn!("ROI {r} has a zero baseline, dF/F0 left undefined");
                degenerate.push(DegenerateSignal { roi: r });
                out.fill(f64::NAN);
            } else {
                out.assign(&row.mapv(|f| (f - f0) / f0));
            }
        }

        Self {
            raw,
            normalized,
            baseline,
            degenerate,
        }
    }
}

/// Extract raw and normalized signals for every mask.
///
/// # Errors
/// See [`extract_with_progress`].
pub fn extract<P: FrameProvider + ?Sized>(
    masks: &[Mask],
    provider: &mut P,
    channel: usize,
    frame_count: usize,
) -> Result<SignalTraces> {
    extract_with_progress(
        masks,
        provider,
        channel,
        frame_count,
        &AtomicBool::new(false),
        |_, _| {},
    )
}

/// Extract signals, reporting progress and honouring a cancel flag.
///
/// `on_frame(done, total)` is called after each frame. The cancel flag is
/// checked before each frame is fetched.
///
/// # Errors
/// Returns [`Error::NoFrames`] for `frame_count == 0`,
/// [`Error::ChannelOutOfRange`] / [`Error::FrameCountOutOfRange`] when the
/// request exceeds the stack, [`Error::Aborted`] when cancelled, and any
/// error raised by the provider.
pub fn extract_with_progress<P, F>(
    masks: &[Mask],
    provider: &mut P,
    channel: usize,
    frame_count: usize,
    cancel: &AtomicBool,
    mut on_frame: F,
) -> Result<SignalTraces>
where
    P: FrameProvider + ?Sized,
    F: FnMut(usize, usize),
{
    if frame_count == 0 {
        return Err(Error::NoFrames);
    }
    let metadata = provider.metadata();
    if channel >= metadata.channel_count {
        return Err(Error::ChannelOutOfRange {
            channel,
            channels: metadata.channel_count,
        });
    }
    if frame_count > metadata.frame_count {
        return Err(Error::FrameCountOutOfRange {
            requested: frame_count,
            available: metadata.frame_count,
        });
    }

    log::debug!(
        "extracting {} ROIs over {frame_count} frames (channel {channel})",
        masks.len()
    );

    let mut raw = Array2::<f64>::zeros((masks.len(), frame_count));
    for t in 0..frame_count {
        if cancel.load(Ordering::SeqCst) {
            log::info!("extraction aborted after {t} frames");
            return Err(Error::Aborted { completed: t });
        }
        let frame = provider.get_slice(channel, t)?;
        let sums: Vec<f64> = masks.par_iter().map(|mask| mask.sum_over(&frame)).collect();
        for (r, sum) in sums.into_iter().enumerate() {
            raw[(r, t)] = sum;
        }
        on_frame(t + 1, frame_count);
    }

    let traces = SignalTraces::from_raw(raw);
    log::info!(
        "extracted {} ROIs over {frame_count} frames ({} degenerate)",
        traces.roi_count(),
        traces.degenerate.len()
    );
    Ok(traces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{rasterize, Contour, Point};
    use approx::assert_relative_eq;

    fn square(x: i32, y: i32, size: i32) -> Mask {
        let contour: Contour = [(x, y), (x + size, y), (x + size, y + size), (x, y + size)]
            .into_iter()
            .map(Point::from)
            .collect();
        rasterize(&contour).unwrap()
    }

    fn constant_stack(values: &[u16], dim: (usize, usize)) -> InMemoryStack {
        InMemoryStack::single_channel(
            values
                .iter()
                .map(|&v| IntensityFrame::from_elem(dim, v))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_constant_intensity_full_frame() {
        let mask = square(0, 0, 3);
        let mut stack = constant_stack(&[7; 6], (4, 4));
        let traces = extract(&[mask], &mut stack, 0, 6).unwrap();
        assert_relative_eq!(traces.baseline[0], 7.0 * 16.0);
        assert!(traces.normalized.iter().all(|&v| v == 0.0));
        assert!(traces.degenerate.is_empty());
    }

    #[test]
    fn test_degenerate_roi_does_not_abort_others() {
        let mut frames = Vec::new();
        for t in 1..=4u16 {
            // Left half stays dark, right half brightens.
            let mut frame = IntensityFrame::zeros((4, 8));
            frame.slice_mut(ndarray::s![.., 4..]).fill(t * 10);
            frames.push(frame);
        }
        let mut stack = InMemoryStack::single_channel(frames).unwrap();
        let dark = square(0, 0, 3);
        let bright = square(4, 0, 3);
        let traces = extract(&[dark, bright], &mut stack, 0, 4).unwrap();

        assert_eq!(traces.degenerate, vec![DegenerateSignal { roi: 0 }]);
        assert!(traces.is_degenerate(0));
        assert!(traces.normalized.row(0).iter().all(|v| v.is_nan()));
        assert!(!traces.is_degenerate(1));
        assert_relative_eq!(traces.baseline[1], 25.0 * 16.0);
        assert_relative_eq!(traces.normalized[(1, 0)], -0.6);
        assert_relative_eq!(traces.normalized[(1, 3)], 0.6);
    }

    #[test]
    fn test_partial_stack() {
        let mut stack = constant_stack(&[1, 2, 3, 100], (2, 2));
        let traces = extract(&[square(0, 0, 1)], &mut stack, 0, 3).unwrap();
        assert_eq!(traces.frame_count(), 3);
        assert_relative_eq!(traces.baseline[0], 8.0);
    }

    #[test]
    fn test_request_validation() {
        let mut stack = constant_stack(&[1, 2], (2, 2));
        let masks = [square(0, 0, 1)];
        assert!(matches!(
            extract(&masks, &mut stack, 0, 0),
            Err(Error::NoFrames)
        ));
        assert!(matches!(
            extract(&masks, &mut stack, 1, 2),
            Err(Error::ChannelOutOfRange { channel: 1, channels: 1 })
        ));
        assert!(matches!(
            extract(&masks, &mut stack, 0, 3),
            Err(Error::FrameCountOutOfRange { requested: 3, available: 2 })
        ));
    }

    #[test]
    fn test_cancel_discards_results() {
        let mut stack = constant_stack(&[1, 2, 3], (2, 2));
        let cancel = AtomicBool::new(false);
        let mut seen = 0;
        let result = extract_with_progress(
            &[square(0, 0, 1)],
            &mut stack,
            0,
            3,
            &cancel,
            |done, _| {
                seen = done;
                if done == 2 {
                    cancel.store(true, Ordering::SeqCst);
                }
            },
        );
        assert!(matches!(result, Err(Error::Aborted { completed: 2 })));
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_no_masks() {
        let mut stack = constant_stack(&[1, 2], (2, 2));
        let traces = extract(&[], &mut stack, 0, 2).unwrap();
        assert_eq!(traces.roi_count(), 0);
        assert_eq!(traces.frame_count(), 2);
    }

    #[test]
    fn test_in_memory_stack_rejects_ragged_channels() {
        let result = InMemoryStack::new(vec![
            vec![IntensityFrame::zeros((2, 2))],
            vec![],
        ]);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
