use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use glob::glob;
use indicatif::ParallelProgressIterator;
use puzzle_locator::io::{object_from_json, object_to_json};
use puzzle_locator::{
    FramePipeline, InMemoryReferenceStore, LocateError, LocatorConfig, MatchResult,
    ReferenceRegistry,
};
use rayon::prelude::*;

#[derive(Parser)]
#[command(version, about, author)]
struct LocatePieceCli {
    /// path to the reference image
    reference: PathBuf,

    /// glob pattern of frame images, e.g. "frames/*.jpg"
    frames: String,

    /// locator config json, defaults are used for missing fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// output raw point correspondences instead of candidate regions
    #[arg(long)]
    raw: bool,

    /// match whole frames without isolating the piece
    #[arg(long)]
    no_segment: bool,

    /// where to write the path -> result json map
    #[arg(short, long, default_value = "matches.json")]
    output: PathBuf,
}

fn img_filter(rp: glob::GlobResult) -> Option<PathBuf> {
    if let Ok(p) = rp {
        for ext in &[".png", ".jpg", ".jpeg"] {
            if p.as_os_str()
                .to_string_lossy()
                .to_lowercase()
                .ends_with(ext)
            {
                return Some(p);
            }
        }
    }
    None
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = LocatePieceCli::parse();

    let mut config: LocatorConfig = match &cli.config {
        Some(path) => object_from_json(path)?,
        None => LocatorConfig::default(),
    };
    if cli.raw {
        config.output.mode = puzzle_locator::config::OutputMode::Raw;
    }
    if cli.no_segment {
        config.segmentation.enabled = false;
    }

    let now = Instant::now();
    let registry = ReferenceRegistry::new(InMemoryReferenceStore::new(), config.clone());
    let name = cli
        .reference
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let info = registry.register(&name, &std::fs::read(&cli.reference)?)?;
    let index = registry.index(&info.id)?;
    println!(
        "indexed {} ({}x{}, {} features) in {:.3} sec",
        info.name,
        info.width,
        info.height,
        info.num_features,
        now.elapsed().as_secs_f64()
    );

    let mut paths: Vec<PathBuf> = glob(&cli.frames)
        .map_err(|e| LocateError::Pattern(e.to_string()))?
        .filter_map(img_filter)
        .collect();
    paths.sort();
    log::debug!("{} frames match {}", paths.len(), cli.frames);

    let pipeline = FramePipeline::new(config);
    let now = Instant::now();
    let results: BTreeMap<String, MatchResult> = paths
        .par_iter()
        .progress_count(paths.len() as u64)
        .filter_map(|path| match std::fs::read(path) {
            Ok(bytes) => Some((
                path.to_string_lossy().to_string(),
                pipeline.process(&index, &bytes),
            )),
            Err(e) => {
                log::warn!("skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect();
    let duration_sec = now.elapsed().as_secs_f64();
    println!("matching {} frames took {:.6} sec", results.len(), duration_sec);
    if !results.is_empty() {
        println!("avg: {} sec", duration_sec / results.len() as f64);
    }

    object_to_json(&cli.output, &results)?;
    println!("results written to {}", cli.output.display());
    Ok(())
}
