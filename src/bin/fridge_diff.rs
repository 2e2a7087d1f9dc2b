//! fridge_diff - compare a before/after image pair offline
//!
//! Prints the change regions as JSON. Optionally writes the annotated after
//! image and a difference heatmap.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use fridge_kernel::compare::{filter_by_confidence, merge_overlapping, DEFAULT_OVERLAP_THRESHOLD};
use fridge_kernel::{ChangeRegion, ComparatorConfig, Frame, ImageComparator};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long)]
    before: PathBuf,
    #[arg(long)]
    after: PathBuf,
    /// Zone name recorded on every region.
    #[arg(long, default_value = "cli")]
    zone: String,
    #[arg(long, default_value_t = 30)]
    diff_threshold: u8,
    #[arg(long, default_value_t = 500)]
    min_area: u32,
    #[arg(long, default_value_t = 21)]
    blur: u32,
    /// Drop regions below this confidence.
    #[arg(long, default_value_t = 0.0)]
    min_confidence: f32,
    /// Merge regions overlapping by more than this fraction of the smaller one.
    #[arg(long)]
    merge: Option<Option<f32>>,
    /// Write the after image with region boxes.
    #[arg(long, value_name = "PATH")]
    annotated: Option<PathBuf>,
    /// Write the difference heatmap.
    #[arg(long, value_name = "PATH")]
    heatmap: Option<PathBuf>,
}

#[derive(Serialize)]
struct DiffOutput<'a> {
    zone: &'a str,
    width: u32,
    height: u32,
    region_count: usize,
    regions: Vec<ChangeRegion>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let before = Frame::load(args.zone.as_str(), &args.before)
        .with_context(|| format!("load before image {}", args.before.display()))?;
    let after = Frame::load(args.zone.as_str(), &args.after)
        .with_context(|| format!("load after image {}", args.after.display()))?;

    let comparator = ImageComparator::new(ComparatorConfig {
        diff_threshold: args.diff_threshold,
        min_contour_area: args.min_area,
        blur_kernel_size: args.blur,
    });
    let comparison = comparator.compare(&before, &after, &args.zone)?;

    let mut regions = filter_by_confidence(&comparison.regions, args.min_confidence);
    if let Some(threshold) = args.merge {
        regions = merge_overlapping(&regions, threshold.unwrap_or(DEFAULT_OVERLAP_THRESHOLD));
    }

    if let Some(path) = &args.annotated {
        comparison.annotated.save_jpeg(path)?;
        log::info!("annotated image written to {}", path.display());
    }
    if let Some(path) = &args.heatmap {
        comparator.difference_heatmap(&before, &after)?.save_jpeg(path)?;
        log::info!("heatmap written to {}", path.display());
    }

    let output = DiffOutput {
        zone: &args.zone,
        width: before.width,
        height: before.height,
        region_count: regions.len(),
        regions,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
