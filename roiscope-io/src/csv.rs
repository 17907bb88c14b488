//! CSV export of signal traces.
//!
//! One row per frame: `Step,<label_1>,...,<label_R>` then
//! `t,F[1][t],...,F[R][t]`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::Array2;
use roiscope_core::SignalTraces;

use crate::{Error, Result};

/// Writer for per-frame signal tables.
pub struct SignalCsvWriter<W: Write = BufWriter<File>> {
    writer: W,
}

impl SignalCsvWriter {
    /// Creates a new file writer.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> SignalCsvWriter<W> {
    /// Wraps an arbitrary writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes the raw series `F`.
    ///
    /// # Errors
    /// Returns an error if the label count does not match the traces or the
    /// write fails.
    pub fn write_raw(&mut self, labels: &[String], traces: &SignalTraces) -> Result<()> {
        self.write_table(labels, &traces.raw)
    }

    /// Writes the normalized series `dF/F0`; degenerate rows are written as NaN.
    ///
    /// # Errors
    /// See [`SignalCsvWriter::write_raw`].
    pub fn write_normalized(&mut self, labels: &[String], traces: &SignalTraces) -> Result<()> {
        self.write_table(labels, &traces.normalized)
    }

    fn write_table(&mut self, labels: &[String], table: &Array2<f64>) -> Result<()> {
        let (rois, frames) = table.dim();
        if labels.len() != rois {
            return Err(Error::InvalidFormat(format!(
                "{} labels for {rois} ROIs",
                labels.len()
            )));
        }

        write!(self.writer, "Step")?;
        for label in labels {
            write!(self.writer, ",{}", escape(label))?;
        }
        writeln!(self.writer)?;

        for t in 0..frames {
            write!(self.writer, "{t}")?;
            for value in table.column(t) {
                write!(self.writer, ",{value:?}")?;
            }
            writeln!(self.writer)?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Consumes the writer and returns the underlying sink.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn escape(field: &str) -> std::borrow::Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\"")).into()
    } else {
        field.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roiscope_core::{extract, rasterize, Contour, InMemoryStack, IntensityFrame, Point};
    use tempfile::NamedTempFile;

    fn traces() -> SignalTraces {
        let square: Contour = [(0, 0), (1, 0), (1, 1), (0, 1)]
            .into_iter()
            .map(Point::from)
            .collect();
        let mask = rasterize(&square).unwrap();
        let frames = [1u16, 2, 3]
            .iter()
            .map(|&v| IntensityFrame::from_elem((2, 2), v))
            .collect();
        let mut stack = InMemoryStack::single_channel(frames).unwrap();
        extract(&[mask.clone(), mask], &mut stack, 0, 3).unwrap()
    }

    fn render(labels: &[&str], normalized: bool) -> String {
        let labels: Vec<String> = labels.iter().map(ToString::to_string).collect();
        let mut writer = SignalCsvWriter::new(Vec::new());
        if normalized {
            writer.write_normalized(&labels, &traces()).unwrap();
        } else {
            writer.write_raw(&labels, &traces()).unwrap();
        }
        String::from_utf8(writer.into_inner()).unwrap()
    }

    #[test]
    fn test_raw_layout() {
        let text = render(&["0", "1"], false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            ["Step,0,1", "0,4.0,4.0", "1,8.0,8.0", "2,12.0,12.0"]
        );
    }

    #[test]
    fn test_normalized_layout() {
        let text = render(&["a", "b"], true);
        assert_eq!(text.lines().nth(1), Some("0,-0.5,-0.5"));
        assert_eq!(text.lines().nth(2), Some("1,0.0,0.0"));
    }

    #[test]
    fn test_labels_quoted_when_needed() {
        let text = render(&["x,y", "say \"hi\""], false);
        assert_eq!(text.lines().next(), Some("Step,\"x,y\",\"say \"\"hi\"\"\""));
    }

    #[test]
    fn test_label_count_mismatch() {
        let mut writer = SignalCsvWriter::new(Vec::new());
        let result = writer.write_raw(&["only".to_string()], &traces());
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_create_writes_file() {
        let file = NamedTempFile::new().unwrap();
        let mut writer = SignalCsvWriter::create(file.path()).unwrap();
        writer
            .write_raw(&["0".to_string(), "1".to_string()], &traces())
            .unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.starts_with("Step,0,1\n"));
        assert_eq!(content.lines().count(), 4);
    }
}
