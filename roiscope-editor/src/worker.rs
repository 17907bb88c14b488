//! Background signal extraction.
//!
//! The worker owns its frame provider and a rasterized snapshot of the ROI
//! list, and reports back over a channel. The snapshot's lease travels with
//! the thread, so the session stays locked until the worker is done.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use roiscope_core::{extract_with_progress, Error as CoreError, FrameProvider, Mask, SignalTraces};

use crate::error::{EditorError, Result};
use crate::guard::ExtractionSnapshot;

/// Labels and traces of a finished extraction.
#[derive(Debug)]
pub struct ExtractionResult {
    pub labels: Vec<String>,
    pub traces: SignalTraces,
}

/// Messages sent from the extraction worker.
#[derive(Debug)]
pub enum ExtractionMessage {
    /// Fraction done and a status line.
    Progress(f32, String),

    /// Extraction finished, with the time it took.
    Complete(Box<ExtractionResult>, Duration),

    /// The cancel flag was raised before the last frame.
    Aborted,

    /// Extraction failed.
    Failed(String),
}

/// Run an extraction of `snapshot` on the current thread, reporting over `tx`.
///
/// Every run ends with exactly one of `Complete`, `Aborted` or `Failed`. The
/// snapshot's lease is released just before that message is sent.
pub fn run_extraction_worker<P: FrameProvider + ?Sized>(
    provider: &mut P,
    snapshot: ExtractionSnapshot,
    channel: usize,
    cancel: &AtomicBool,
    tx: &Sender<ExtractionMessage>,
) {
    let ExtractionSnapshot {
        labels,
        masks,
        lease,
    } = snapshot;
    let outcome = run_extraction(provider, labels, &masks, channel, cancel, tx);
    // Unlock before reporting so the receiver can edit right away.
    drop(lease);
    let _ = tx.send(outcome);
}

/// Sends progress over `tx` and returns the terminal message.
fn run_extraction<P: FrameProvider + ?Sized>(
    provider: &mut P,
    labels: Vec<String>,
    masks: &[Mask],
    channel: usize,
    cancel: &AtomicBool,
    tx: &Sender<ExtractionMessage>,
) -> ExtractionMessage {
    let start = Instant::now();
    let frame_count = provider.metadata().frame_count;
    let mut last_update: Option<Instant> = None;

    let result = extract_with_progress(masks, provider, channel, frame_count, cancel, |done, total| {
        if done < total && last_update.is_some_and(|t| t.elapsed() < Duration::from_millis(100)) {
            return;
        }
        let progress = usize_to_f32(done) / usize_to_f32(total.max(1));
        let _ = tx.send(ExtractionMessage::Progress(
            progress,
            format!("Extracting frame {done}/{total}"),
        ));
        last_update = Some(Instant::now());
    });

    match result {
        Ok(traces) => {
            log::debug!(
                "extraction worker finished {} ROIs over {frame_count} frames in {:.2?}",
                masks.len(),
                start.elapsed()
            );
            ExtractionMessage::Complete(
                Box::new(ExtractionResult { labels, traces }),
                start.elapsed(),
            )
        }
        Err(CoreError::Aborted { completed }) => {
            log::debug!("extraction worker stopped after {completed} frames");
            ExtractionMessage::Aborted
        }
        Err(e) => {
            log::error!("extraction failed: {e}");
            ExtractionMessage::Failed(e.to_string())
        }
    }
}

/// Handle on a running extraction thread.
pub struct ExtractionHandle {
    cancel: Arc<AtomicBool>,
    rx: Receiver<ExtractionMessage>,
    thread: Option<JoinHandle<()>>,
}

/// Start extracting `snapshot` from `provider` on a new thread.
///
/// Every frame of `channel` is processed. The snapshot's lease is released
/// just before the final message is sent.
#[must_use]
pub fn spawn_extraction<P>(
    mut provider: P,
    snapshot: ExtractionSnapshot,
    channel: usize,
) -> ExtractionHandle
where
    P: FrameProvider + Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    let flag = Arc::clone(&cancel);
    let thread = thread::spawn(move || {
        run_extraction_worker(&mut provider, snapshot, channel, &flag, &tx);
    });
    ExtractionHandle {
        cancel,
        rx,
        thread: Some(thread),
    }
}

impl ExtractionHandle {
    /// Ask the worker to stop before its next frame.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Next pending message, if any.
    ///
    /// # Errors
    /// Returns [`EditorError::WorkerDisconnected`] once the worker has exited
    /// and every message has been received.
    pub fn try_recv(&self) -> Result<Option<ExtractionMessage>> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(EditorError::WorkerDisconnected),
        }
    }

    /// Block until the worker finishes, passing progress to `on_progress`.
    ///
    /// # Errors
    /// Returns [`EditorError::Aborted`] if the run was cancelled,
    /// [`EditorError::ExtractionFailed`] if it failed, and
    /// [`EditorError::WorkerDisconnected`] if the thread died without a result.
    pub fn wait_with_progress<F: FnMut(f32, &str)>(
        mut self,
        mut on_progress: F,
    ) -> Result<ExtractionResult> {
        let outcome = loop {
            match self.rx.recv() {
                Ok(ExtractionMessage::Progress(f, status)) => on_progress(f, &status),
                Ok(ExtractionMessage::Complete(result, _)) => break Ok(*result),
                Ok(ExtractionMessage::Aborted) => break Err(EditorError::Aborted),
                Ok(ExtractionMessage::Failed(e)) => break Err(EditorError::ExtractionFailed(e)),
                Err(_) => break Err(EditorError::WorkerDisconnected),
            }
        };
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("extraction thread panicked");
            }
        }
        outcome
    }

    /// Block until the worker finishes.
    ///
    /// # Errors
    /// See [`ExtractionHandle::wait_with_progress`].
    pub fn wait(self) -> Result<ExtractionResult> {
        self.wait_with_progress(|_, _| {})
    }
}

#[allow(clippy::cast_precision_loss)]
fn usize_to_f32(value: usize) -> f32 {
    value as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EditorSession;
    use roiscope_core::{InMemoryStack, IntensityFrame, Roi};

    fn session() -> EditorSession {
        EditorSession::new(
            vec![
                Roi::from_vertices("0", &[(0, 0), (1, 0), (1, 1), (0, 1)]),
                Roi::from_vertices("1", &[(2, 2), (3, 2), (3, 3), (2, 3)]),
            ],
            4,
            4,
        )
    }

    fn stack(values: &[u16]) -> InMemoryStack {
        InMemoryStack::single_channel(
            values
                .iter()
                .map(|&v| IntensityFrame::from_elem((4, 4), v))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_worker_reports_progress_then_result() {
        let session = session();
        let (tx, rx) = mpsc::channel();
        run_extraction_worker(
            &mut stack(&[1, 2, 3]),
            session.begin_extraction().unwrap(),
            0,
            &AtomicBool::new(false),
            &tx,
        );
        drop(tx);
        assert!(!session.is_extracting());

        let messages: Vec<_> = rx.iter().collect();
        let (last, progress) = messages.split_last().unwrap();
        assert!(progress
            .iter()
            .all(|m| matches!(m, ExtractionMessage::Progress(..))));
        assert!(matches!(
            progress.last(),
            Some(ExtractionMessage::Progress(f, _)) if (*f - 1.0).abs() < f32::EPSILON
        ));
        let ExtractionMessage::Complete(result, _) = last else {
            panic!("expected a result, got {last:?}");
        };
        assert_eq!(result.labels, ["0", "1"]);
        assert_eq!(result.traces.raw.dim(), (2, 3));
        assert!((result.traces.raw[(1, 2)] - 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_worker_raised_cancel_aborts() {
        let session = session();
        let (tx, rx) = mpsc::channel();
        run_extraction_worker(
            &mut stack(&[1, 2]),
            session.begin_extraction().unwrap(),
            0,
            &AtomicBool::new(true),
            &tx,
        );
        drop(tx);
        assert!(!session.is_extracting());
        let messages: Vec<_> = rx.iter().collect();
        assert!(matches!(messages.as_slice(), [ExtractionMessage::Aborted]));
    }

    #[test]
    fn test_worker_bad_channel_fails() {
        let session = session();
        let (tx, rx) = mpsc::channel();
        run_extraction_worker(
            &mut stack(&[1]),
            session.begin_extraction().unwrap(),
            3,
            &AtomicBool::new(false),
            &tx,
        );
        drop(tx);
        assert!(matches!(
            rx.iter().last(),
            Some(ExtractionMessage::Failed(msg)) if msg.contains("channel 3")
        ));
    }
}
