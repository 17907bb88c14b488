//! roiscope-editor: Interactive ROI editing for roiscope.
//!
//! This crate provides the editing session (draw, select, delete, undo,
//! zoom, save), the view/source coordinate mapping, and background signal
//! extraction that locks the ROI list while it runs.
//!

mod error;
pub mod guard;
pub mod session;
pub mod transform;
pub mod worker;

pub use error::{EditorError, Result};
pub use guard::{ExtractionGuard, ExtractionLease, ExtractionSnapshot};
pub use session::{
    load_session, EditorConfig, EditorSession, EditorState, Outline, Scene, UndoEntry,
    UndoOutcome,
};
pub use transform::{SourceRect, ViewTransform};
pub use worker::{
    run_extraction_worker, spawn_extraction, ExtractionHandle, ExtractionMessage,
    ExtractionResult,
};
