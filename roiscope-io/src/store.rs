//! JSON persistence for ROI lists.
//!
//! Layout:
//!
//! ```json
//! {
//!     "contours": [
//!         { "label": "0", "vertices": [[x, y], ...] }
//!     ]
//! }
//! ```
//!
//! Other top-level keys are ignored on load. Saves rewrite the whole file.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};
use tempfile::NamedTempFile;

use roiscope_core::{Contour, Point, Roi};

use crate::{Error, Result};

#[derive(Deserialize)]
struct RoiFile {
    contours: Option<Vec<RoiRecord>>,
}

#[derive(Deserialize)]
struct RoiRecord {
    label: Label,
    vertices: Vec<[i32; 2]>,
}

/// Labels are strings, but integer labels written by other tools are accepted.
#[derive(Deserialize)]
#[serde(untagged)]
enum Label {
    Text(String),
    Integer(i64),
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        match label {
            Label::Text(s) => s,
            Label::Integer(n) => n.to_string(),
        }
    }
}

#[derive(Serialize)]
struct RoiFileOut<'a> {
    contours: Vec<RoiRecordOut<'a>>,
}

#[derive(Serialize)]
struct RoiRecordOut<'a> {
    label: &'a str,
    vertices: Vec<[i32; 2]>,
}

/// Parse a ROI list from JSON text.
///
/// # Errors
/// Returns [`Error::MalformedFile`] for invalid JSON, a missing `contours`
/// key, or a record that is not a valid polygon (fewer than 3 vertices or a
/// flat bounding box).
pub fn from_json_str(text: &str) -> Result<Vec<Roi>> {
    let file: RoiFile = serde_json::from_str(text)?;
    let records = file
        .contours
        .ok_or_else(|| Error::MalformedFile("no \"contours\" key".to_string()))?;

    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let label = String::from(record.label);
            let contour: Contour = record
                .vertices
                .into_iter()
                .map(|[x, y]| Point::new(x, y))
                .collect();
            contour.validate().map_err(|e| {
                Error::MalformedFile(format!("record {index} (label {label:?}): {e}"))
            })?;
            Ok(Roi::new(label, contour))
        })
        .collect()
}

/// Serialize a ROI list as JSON with 4-space indentation.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn to_json_string(rois: &[Roi]) -> Result<String> {
    let mut buf = Vec::new();
    write_json(&mut buf, rois)?;
    String::from_utf8(buf).map_err(|e| Error::InvalidFormat(e.to_string()))
}

fn write_json<W: Write>(writer: W, rois: &[Roi]) -> Result<()> {
    let out = RoiFileOut {
        contours: rois
            .iter()
            .map(|roi| RoiRecordOut {
                label: &roi.label,
                vertices: roi.contour.points().iter().map(|p| [p.x, p.y]).collect(),
            })
            .collect(),
    };
    let mut ser = Serializer::with_formatter(writer, PrettyFormatter::with_indent(b"    "));
    out.serialize(&mut ser)?;
    Ok(())
}

/// Load a ROI list from a file.
///
/// # Errors
/// Returns [`Error::Io`] if the file cannot be read and
/// [`Error::MalformedFile`] if its content does not follow the schema.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<Roi>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let rois = from_json_str(&text)?;
    log::debug!("loaded {} ROIs from {}", rois.len(), path.as_ref().display());
    Ok(rois)
}

/// Replace the file at `path` with the given ROI list.
///
/// The list is written to a temporary file next to the target and renamed
/// over it, so an interrupted save leaves the previous file intact.
///
/// # Errors
/// Returns [`Error::Io`] if the file cannot be written.
pub fn save<P: AsRef<Path>>(path: P, rois: &[Roi]) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    write_json(&mut tmp, rois)?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    log::info!("saved {} ROIs to {}", rois.len(), path.display());
    Ok(())
}
