//! roiscope command-line interface.
//!
//! Inspect OME-TIFF stacks, pick contrast bands, detect ROIs, extract
//! fluorescence traces, and replay editing scripts against a ROI file.

mod script;

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use thiserror::Error;

use roiscope_algorithms::{
    detect_rois, to_gray_image, BinaryMaskModel, SegmenterConfig, SplitConfig, ThresholdSegmenter,
};
use roiscope_core::{ContrastConfig, FrameProvider, IntensityFrame};
use roiscope_editor::{load_session, spawn_extraction, EditorError, EditorSession};
use roiscope_io::{store, SignalCsvWriter, TiffStack};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("I/O error: {0}")]
    RoiscopeIo(#[from] roiscope_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] roiscope_core::Error),

    #[error("Segmentation error: {0}")]
    Algorithms(#[from] roiscope_algorithms::Error),

    #[error("Editor error: {0}")]
    Editor(#[from] EditorError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("script line {line}: {message}")]
    Script { line: usize, message: String },

    #[error("unknown channel {0:?}")]
    UnknownChannel(String),
}

/// ROI curation and fluorescence signal extraction.
#[derive(Parser)]
#[command(name = "roiscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log progress (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show stack metadata
    Info {
        /// Input OME-TIFF stack
        stack: PathBuf,
    },

    /// Pick a display contrast band for one frame
    Contrast {
        /// Input OME-TIFF stack
        stack: PathBuf,

        /// Channel index or name
        #[arg(short, long, default_value = "0")]
        channel: String,

        /// Frame (time point) within the channel
        #[arg(short, long, default_value = "0")]
        frame: usize,

        /// Minimum bucket count for an intensity level to count
        #[arg(long, default_value = "10000")]
        criteria: u32,

        /// Force the lower bound
        #[arg(long)]
        min: Option<u16>,

        /// Force the upper bound
        #[arg(long)]
        max: Option<u16>,

        /// Write the contrast-adjusted frame as an 8-bit PNG
        #[arg(long)]
        preview: Option<PathBuf>,
    },

    /// Detect ROIs on one frame and save them
    Segment {
        /// Input OME-TIFF stack
        stack: PathBuf,

        /// Output ROI file
        #[arg(short, long)]
        output: PathBuf,

        /// Channel index or name
        #[arg(short, long, default_value = "0")]
        channel: String,

        /// Frame (time point) within the channel
        #[arg(short, long, default_value = "0")]
        frame: usize,

        /// Regions at or below this area are dropped
        #[arg(long, default_value = "50.0")]
        min_area: f64,

        /// Regions above this area are split in two
        #[arg(long, default_value = "250.0")]
        max_area: f64,

        /// Foreground percentile of the threshold segmenter
        #[arg(long, default_value = "98.0")]
        percentile: f64,

        /// Gaussian blur sigma before thresholding (0 disables)
        #[arg(long, default_value = "0.4")]
        sigma: f32,

        /// Use an external binary mask (PNG) instead of thresholding
        #[arg(long)]
        mask: Option<PathBuf>,
    },

    /// Extract raw and normalized traces for every ROI
    Extract {
        /// Input OME-TIFF stack
        stack: PathBuf,

        /// ROI file
        rois: PathBuf,

        /// Output CSV for raw F
        #[arg(short, long)]
        output: PathBuf,

        /// Output CSV for dF/F0
        #[arg(long)]
        dff: Option<PathBuf>,

        /// Channel index or name
        #[arg(short, long, default_value = "0")]
        channel: String,
    },

    /// Replay an editing script against a ROI file
    Edit {
        /// Input OME-TIFF stack
        stack: PathBuf,

        /// ROI file, rewritten by `save`
        rois: PathBuf,

        /// Page shown as the backdrop
        #[arg(short, long, default_value = "0")]
        frame: usize,

        /// Lower display bound
        #[arg(long)]
        contrast_min: u16,

        /// Upper display bound
        #[arg(long)]
        contrast_max: u16,

        /// Command script (stdin when absent)
        #[arg(short, long)]
        script: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Info { stack } => info(&stack),
        Commands::Contrast {
            stack,
            channel,
            frame,
            criteria,
            min,
            max,
            preview,
        } => {
            let config = ContrastConfig::default()
                .with_criteria(criteria)
                .with_min(min)
                .with_max(max);
            contrast(&stack, &channel, frame, &config, preview.as_deref())
        }
        Commands::Segment {
            stack,
            output,
            channel,
            frame,
            min_area,
            max_area,
            percentile,
            sigma,
            mask,
        } => {
            let split = SplitConfig::default()
                .with_min_area(min_area)
                .with_max_area(max_area);
            let segmenter = SegmenterConfig::default()
                .with_percentile(percentile)
                .with_sigma(sigma);
            segment(
                &stack,
                &output,
                &channel,
                frame,
                &split,
                segmenter,
                mask.as_deref(),
            )
        }
        Commands::Extract {
            stack,
            rois,
            output,
            dff,
            channel,
        } => extract(&stack, &rois, &output, dff.as_deref(), &channel),
        Commands::Edit {
            stack,
            rois,
            frame,
            contrast_min,
            contrast_max,
            script,
        } => edit(
            &stack,
            &rois,
            frame,
            contrast_min,
            contrast_max,
            script.as_deref(),
        ),
    }
}

/// Channel index from a number or a channel name.
fn resolve_channel(stack: &TiffStack, channel: &str) -> Result<usize> {
    if let Ok(index) = channel.parse() {
        return Ok(index);
    }
    stack
        .channel_from_name(channel)
        .ok_or_else(|| CliError::UnknownChannel(channel.to_string()))
}

fn read_frame(stack: &mut TiffStack, channel: &str, frame: usize) -> Result<IntensityFrame> {
    let channel = resolve_channel(stack, channel)?;
    Ok(stack.get_slice(channel, frame)?)
}

fn info(path: &Path) -> Result<()> {
    let stack = TiffStack::open(path)?;
    let meta = stack.metadata();

    println!("File: {}", path.display());
    println!("Pages: {}", stack.page_count());
    println!("Size: {} x {}", meta.width, meta.height);
    println!("Frames: {}", meta.frame_count);
    println!("Channels: {}", meta.channel_count);
    for (i, name) in meta.channel_names.iter().enumerate() {
        println!("  {i}: {name}");
    }
    if let Some(dt) = meta.time_increment {
        println!("Time increment: {dt} s");
    }
    if let Some((x, y)) = meta.physical_size {
        println!("Pixel size: {x} x {y} um");
    }
    Ok(())
}

fn contrast(
    path: &Path,
    channel: &str,
    frame: usize,
    config: &ContrastConfig,
    preview: Option<&Path>,
) -> Result<()> {
    let mut stack = TiffStack::open(path)?;
    let image = read_frame(&mut stack, channel, frame)?;
    let band = config.select(&image)?;
    println!("{} {}", band.min, band.max);

    if let Some(out) = preview {
        to_gray_image(&band.to_display(&image))?.save(out)?;
        log::info!("wrote preview to {}", out.display());
    }
    Ok(())
}

fn segment(
    path: &Path,
    output: &Path,
    channel: &str,
    frame: usize,
    split: &SplitConfig,
    segmenter: SegmenterConfig,
    mask: Option<&Path>,
) -> Result<()> {
    let start = Instant::now();
    let mut stack = TiffStack::open(path)?;
    let image = read_frame(&mut stack, channel, frame)?;

    let rois = if let Some(mask) = mask {
        let model = BinaryMaskModel::new(image::open(mask)?.to_luma8());
        detect_rois(&model, &image, split)?
    } else {
        let model = ThresholdSegmenter::new(segmenter)?;
        detect_rois(&model, &image, split)?
    };

    store::save(output, &rois)?;
    println!(
        "Detected {} ROIs in {:.2}s",
        rois.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn extract(
    path: &Path,
    rois_path: &Path,
    output: &Path,
    dff: Option<&Path>,
    channel: &str,
) -> Result<()> {
    let start = Instant::now();
    let stack = TiffStack::open(path)?;
    let channel = resolve_channel(&stack, channel)?;
    let meta = stack.metadata();
    let (width, height) = (
        u32::try_from(meta.width).unwrap_or(u32::MAX),
        u32::try_from(meta.height).unwrap_or(u32::MAX),
    );

    let session = EditorSession::new(store::load(rois_path)?, width, height);
    let snapshot = session.begin_extraction()?;
    let result = spawn_extraction(stack, snapshot, channel).wait_with_progress(|_, status| {
        log::debug!("{status}");
    })?;

    for degenerate in &result.traces.degenerate {
        log::warn!(
            "ROI {} has a zero baseline, its dF/F0 is NaN",
            result.labels[degenerate.roi]
        );
    }

    SignalCsvWriter::create(output)?.write_raw(&result.labels, &result.traces)?;
    if let Some(dff) = dff {
        SignalCsvWriter::create(dff)?.write_normalized(&result.labels, &result.traces)?;
    }

    println!(
        "Extracted {} ROIs over {} frames in {:.2}s",
        result.traces.roi_count(),
        result.traces.frame_count(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn edit(
    stack: &Path,
    rois: &Path,
    frame: usize,
    contrast_min: u16,
    contrast_max: u16,
    script_path: Option<&Path>,
) -> Result<()> {
    let mut session = load_session(stack, rois, frame, contrast_min, contrast_max)?;

    let commands = match script_path {
        Some(path) => script::parse(BufReader::new(File::open(path)?))?,
        None => script::parse(io::stdin().lock())?,
    };
    let applied = script::run(&mut session, &commands)?;

    let dirty = session.is_dirty();
    let rois = session.finish();
    println!(
        "Applied {applied} commands, {} ROIs{}",
        rois.len(),
        if dirty { " (unsaved changes)" } else { "" }
    );
    Ok(())
}
