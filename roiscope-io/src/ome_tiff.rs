//! Memory-mapped OME-TIFF frame stacks.
//!
//! Pages are stored channel-major: page `c * SizeT + t` holds channel `c` at
//! time `t`. Stack dimensions come from the OME-XML block in the first
//! page's `ImageDescription`; files without one are read as a single
//! channel with one frame per page.

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use ndarray::Array2;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::ColorType;

use roiscope_core::{FrameProvider, IntensityFrame, StackMetadata};

use crate::{Error, Result};

#[derive(Clone)]
struct SharedMmap(Arc<Mmap>);

impl AsRef<[u8]> for SharedMmap {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

/// A frame stack backed by a memory-mapped (OME-)TIFF file.
pub struct TiffStack {
    decoder: Decoder<Cursor<SharedMmap>>,
    metadata: StackMetadata,
    page_count: usize,
    path: PathBuf,
}

impl TiffStack {
    /// Opens a TIFF file and reads its stack layout.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped or decoded, or if the
    /// OME metadata describes more pages than the file holds.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        let mut decoder = Decoder::new(Cursor::new(SharedMmap(Arc::new(mmap))))?;

        let (width, height) = decoder.dimensions()?;
        let description = decoder.get_tag_ascii_string(Tag::ImageDescription).ok();

        let mut page_count = 1;
        while decoder.more_images() {
            decoder.next_image()?;
            page_count += 1;
        }

        let metadata = match description.as_deref().and_then(parse_ome) {
            Some(metadata) => metadata,
            None => StackMetadata {
                frame_count: page_count,
                channel_count: 1,
                width: width as usize,
                height: height as usize,
                channel_names: vec!["C0".to_string()],
                ..StackMetadata::default()
            },
        };

        let needed = metadata.frame_count * metadata.channel_count;
        if needed > page_count {
            return Err(Error::InvalidFormat(format!(
                "metadata describes {needed} pages but the file holds {page_count}"
            )));
        }

        log::debug!(
            "opened {}: {} frames x {} channels, {}x{} px",
            path.as_ref().display(),
            metadata.frame_count,
            metadata.channel_count,
            metadata.width,
            metadata.height
        );

        Ok(Self {
            decoder,
            metadata,
            page_count,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Number of pages in the file.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// The file this stack was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index of the channel with the given name.
    #[must_use]
    pub fn channel_from_name(&self, name: &str) -> Option<usize> {
        self.metadata.channel_from_name(name)
    }

    /// Decodes the page at a flattened (channel-major) index.
    ///
    /// # Errors
    /// Returns an error if the index is out of range, the page cannot be
    /// decoded, or its samples are not 8- or 16-bit grayscale.
    pub fn read_page(&mut self, index: usize) -> Result<IntensityFrame> {
        if index >= self.page_count {
            return Err(Error::InvalidFormat(format!(
                "page {index} out of range ({} pages)",
                self.page_count
            )));
        }
        self.decoder.seek_to_image(index)?;

        let (width, height) = self.decoder.dimensions()?;
        let color_type = self.decoder.colortype()?;
        if !matches!(color_type, ColorType::Gray(8 | 16)) {
            return Err(Error::UnsupportedSampleFormat(format!("{color_type:?}")));
        }

        let samples = match self.decoder.read_image()? {
            DecodingResult::U8(buf) => buf.into_iter().map(u16::from).collect(),
            DecodingResult::U16(buf) => buf,
            _ => return Err(Error::UnsupportedSampleFormat(format!("{color_type:?}"))),
        };
        Array2::from_shape_vec((height as usize, width as usize), samples)
            .map_err(|e| Error::InvalidFormat(format!("page {index}: {e}")))
    }
}

impl FrameProvider for TiffStack {
    fn metadata(&self) -> &StackMetadata {
        &self.metadata
    }

    fn get_slice(&mut self, channel: usize, time: usize) -> roiscope_core::Result<IntensityFrame> {
        if channel >= self.metadata.channel_count {
            return Err(roiscope_core::Error::ChannelOutOfRange {
                channel,
                channels: self.metadata.channel_count,
            });
        }
        if time >= self.metadata.frame_count {
            return Err(roiscope_core::Error::FrameSource(format!(
                "time {time} out of range ({} frames)",
                self.metadata.frame_count
            )));
        }
        self.read_page(channel * self.metadata.frame_count + time)
            .map_err(|e| roiscope_core::Error::FrameSource(e.to_string()))
    }
}

/// Stack layout from an OME-XML document, or `None` if it is not one.
fn parse_ome(xml: &str) -> Option<StackMetadata> {
    let pixels = elements(xml, "Pixels").next()?;
    let size = |key: &str| attribute(pixels, key)?.parse::<usize>().ok();
    let real = |key: &str| attribute(pixels, key)?.parse::<f64>().ok();

    let frame_count = size("SizeT")?;
    let channel_count = size("SizeC")?;
    let mut channel_names: Vec<String> = elements(xml, "Channel")
        .take(channel_count)
        .enumerate()
        .map(|(i, tag)| attribute(tag, "Name").unwrap_or_else(|| format!("C{i}")))
        .collect();
    for i in channel_names.len()..channel_count {
        channel_names.push(format!("C{i}"));
    }

    Some(StackMetadata {
        frame_count,
        channel_count,
        width: size("SizeX")?,
        height: size("SizeY")?,
        channel_names,
        time_increment: real("TimeIncrement"),
        physical_size: real("PhysicalSizeX").zip(real("PhysicalSizeY")),
    })
}

/// Opening tags (attribute text) of every element with the given local name.
fn elements<'a>(xml: &'a str, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    xml.split('<').skip(1).filter_map(move |chunk| {
        let tag = chunk.split('>').next()?;
        let tag_name = tag.split(|c: char| c.is_whitespace() || c == '/').next()?;
        let local = tag_name.rsplit(':').next()?;
        (local == name).then_some(tag)
    })
}

fn attribute(tag: &str, key: &str) -> Option<String> {
    let needle = format!("{key}=\"");
    let mut rest = tag;
    while let Some(pos) = rest.find(&needle) {
        let preceded_by_space = rest[..pos]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace);
        let after = &rest[pos + needle.len()..];
        if preceded_by_space {
            let end = after.find('"')?;
            return Some(unescape(&after[..end]));
        }
        rest = after;
    }
    None
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const OME: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06">
  <Image ID="Image:0" Name="stack">
    <Pixels ID="Pixels:0" DimensionOrder="XYTCZ" Type="uint16" SizeX="64" SizeY="32"
            SizeZ="1" SizeC="2" SizeT="5" TimeIncrement="0.5"
            PhysicalSizeX="0.65" PhysicalSizeY="0.7">
      <Channel ID="Channel:0:0" Name="GFP" SamplesPerPixel="1"/>
      <Channel ID="Channel:0:1" Name="R&amp;D" SamplesPerPixel="1"/>
      <TiffData/>
    </Pixels>
  </Image>
</OME>"#;

    #[test]
    fn test_parse_ome_pixels() {
        let meta = parse_ome(OME).unwrap();
        assert_eq!(meta.frame_count, 5);
        assert_eq!(meta.channel_count, 2);
        assert_eq!((meta.width, meta.height), (64, 32));
        assert_eq!(meta.time_increment, Some(0.5));
        assert_eq!(meta.physical_size, Some((0.65, 0.7)));
        assert_eq!(meta.channel_names, ["GFP", "R&D"]);
        assert_eq!(meta.channel_from_name("R&D"), Some(1));
    }

    #[test]
    fn test_size_x_not_confused_with_physical_size() {
        let tag = r#"Pixels PhysicalSizeX="0.3" SizeX="10""#;
        assert_eq!(attribute(tag, "SizeX").as_deref(), Some("10"));
        assert_eq!(attribute(tag, "PhysicalSizeX").as_deref(), Some("0.3"));
    }

    #[test]
    fn test_missing_channel_names_are_filled() {
        let xml = r#"<OME><Pixels SizeX="4" SizeY="4" SizeC="3" SizeT="1"><Channel ID="c"/></Pixels></OME>"#;
        let meta = parse_ome(xml).unwrap();
        assert_eq!(meta.channel_names, ["C0", "C1", "C2"]);
    }

    #[test]
    fn test_plain_description_is_not_ome() {
        assert!(parse_ome("ImageJ=1.53t\nimages=10").is_none());
        assert!(parse_ome(r#"<OME><Pixels SizeX="4"/></OME>"#).is_none());
    }

    #[test]
    fn test_prefixed_elements() {
        let xml = r#"<ome:OME><ome:Pixels SizeX="2" SizeY="3" SizeC="1" SizeT="4"/></ome:OME>"#;
        let meta = parse_ome(xml).unwrap();
        assert_eq!((meta.width, meta.height, meta.frame_count), (2, 3, 4));
    }
}
