//! retina-bench: CLI tool for extraction tuning and record comparison.
//!
//! Runs the feature pipeline on image files with configurable parameters,
//! printing per-stage diagnostics. Useful for:
//!
//! - Tuning the adaptive threshold and CLAHE parameters
//! - Inspecting the vessel mask and skeleton a config produces
//! - Measuring per-stage durations to identify bottlenecks
//! - Checking how two scans of the same eye score against each other
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin retina-bench -- extract [OPTIONS] <IMAGE_PATH>
//! cargo run --release --bin retina-bench -- compare [OPTIONS] <A> <B>
//! ```
//!
//! Set `RUST_LOG=retina_pipeline=debug` for per-stage log events.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use retina_pipeline::{
    DynamicImage, ExtractConfig, ExtractDiagnostics, FeatureRecord, MatchConfig, Pipeline,
    canonical,
};

/// Feature extraction diagnostics and comparison for retinal scans.
#[derive(Parser)]
#[command(name = "retina-bench", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract a feature record and print per-stage diagnostics.
    Extract {
        /// Path to the input image (PNG, JPEG, BMP, WebP).
        image_path: PathBuf,

        #[command(flatten)]
        params: ExtractParams,

        /// Write the normalized frame, vessel mask, and skeleton as PNGs
        /// into this directory.
        #[arg(long)]
        dump_dir: Option<PathBuf>,

        /// Number of runs for averaging.
        #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
        runs: usize,

        /// Print the feature record document instead of the report.
        #[arg(long)]
        json: bool,
    },
    /// Extract both images and score them against each other.
    Compare {
        /// First image.
        a: PathBuf,
        /// Second image.
        b: PathBuf,

        #[command(flatten)]
        params: ExtractParams,

        /// Overall similarity at or above which the pair is a match.
        #[arg(long, default_value_t = MatchConfig::DEFAULT_SIMILARITY_THRESHOLD)]
        threshold: f64,

        /// Print the similarity result as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ExtractParams {
    /// Canonical frame side length.
    #[arg(long, default_value_t = ExtractConfig::DEFAULT_STANDARD_SIZE)]
    standard_size: u32,

    /// CLAHE clip limit.
    #[arg(long, default_value_t = ExtractConfig::DEFAULT_CLAHE_CLIP_LIMIT)]
    clahe_clip_limit: f32,

    /// Adaptive threshold neighbourhood (odd).
    #[arg(long, default_value_t = ExtractConfig::DEFAULT_THRESHOLD_BLOCK_SIZE)]
    threshold_block_size: u32,

    /// Adaptive threshold offset below the local mean.
    #[arg(long, default_value_t = ExtractConfig::DEFAULT_THRESHOLD_OFFSET, allow_hyphen_values = true)]
    threshold_offset: i32,

    /// Gradient histogram cell size in pixels.
    #[arg(long, default_value_t = ExtractConfig::DEFAULT_HOG_CELL_SIZE)]
    hog_cell_size: u32,

    /// Full extraction config as a JSON string.
    ///
    /// When provided, all other extraction flags are ignored.
    /// The JSON must be a valid `ExtractConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Build an [`ExtractConfig`] from CLI arguments.
fn config_from_params(params: &ExtractParams) -> Result<ExtractConfig, String> {
    if let Some(ref json) = params.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(ExtractConfig {
        standard_size: params.standard_size,
        clahe_clip_limit: params.clahe_clip_limit,
        threshold_block_size: params.threshold_block_size,
        threshold_offset: params.threshold_offset,
        hog_cell_size: params.hog_cell_size,
        ..ExtractConfig::default()
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Extract {
            image_path,
            params,
            dump_dir,
            runs,
            json,
        } => config_from_params(&params)
            .and_then(|config| run_extract(&image_path, &config, dump_dir.as_deref(), runs, json)),
        Command::Compare {
            a,
            b,
            params,
            threshold,
            json,
        } => config_from_params(&params).and_then(|config| {
            let matching = MatchConfig {
                similarity_threshold: threshold,
                ..MatchConfig::default()
            };
            run_compare(&a, &b, &config, &matching, json)
        }),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn load(path: &Path) -> Result<DynamicImage, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    eprintln!("Image: {} ({} bytes)", path.display(), bytes.len());
    retina_pipeline::grayscale::decode(&bytes).map_err(|e| format!("Error decoding {}: {e}", path.display()))
}

fn run_extract(
    path: &Path,
    config: &ExtractConfig,
    dump_dir: Option<&Path>,
    runs: usize,
    json: bool,
) -> Result<(), String> {
    let image = load(path)?;
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {runs}");
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(runs);
    let mut record = None;

    for run in 0..runs {
        if runs > 1 {
            eprintln!("--- Run {}/{runs} ---", run + 1);
        }

        let extracted = Pipeline::new(&image, config.clone())
            .normalize()
            .map_err(|e| format!("Pipeline error: {e}"))?
            .segment_vessels()
            .extract_features();

        // Dump rasters on the first run only.
        if run == 0
            && let Some(dir) = dump_dir
        {
            dump_rasters(dir, &extracted);
        }

        let (rec, diagnostics) = extracted.into_parts();
        if !json {
            println!("{}", diagnostics.report());
        }
        all_diagnostics.push(diagnostics);
        record = Some(rec);

        if runs > 1 {
            eprintln!();
        }
    }

    if let Some(record) = record {
        if json {
            let doc = canonical::to_document(&record, None).map_err(|e| e.to_string())?;
            let text = serde_json::to_string_pretty(&doc)
                .map_err(|e| format!("Error serializing record: {e}"))?;
            println!("{text}");
        } else {
            print_record_summary(&record);
        }
    }

    if runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }
    Ok(())
}

fn dump_rasters(dir: &Path, extracted: &retina_pipeline::pipeline::Extracted) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("Error creating {}: {e}", dir.display());
        return;
    }
    for (name, raster) in [
        ("normalized.png", extracted.normalized()),
        ("vessels.png", extracted.vessel_mask()),
        ("skeleton.png", extracted.skeleton()),
    ] {
        let target = dir.join(name);
        match raster.save(&target) {
            Ok(()) => eprintln!("Wrote {}", target.display()),
            Err(e) => eprintln!("Error writing {}: {e}", target.display()),
        }
    }
}

fn run_compare(
    a: &Path,
    b: &Path,
    config: &ExtractConfig,
    matching: &MatchConfig,
    json: bool,
) -> Result<(), String> {
    let extract = |path: &Path| -> Result<FeatureRecord, String> {
        let image = load(path)?;
        retina_pipeline::extract(&image, config).map_err(|e| format!("Pipeline error: {e}"))
    };
    let first = extract(a)?;
    let second = extract(b)?;
    let result = retina_pipeline::compare(&first, &second, matching).map_err(|e| e.to_string())?;

    if json {
        let text = serde_json::to_string_pretty(&result)
            .map_err(|e| format!("Error serializing result: {e}"))?;
        println!("{text}");
        return Ok(());
    }

    println!("Similarity Report\n{}", "=".repeat(60));
    for (name, score) in [
        ("LBP", result.lbp_similarity),
        ("Gradient", result.hog_similarity),
        ("Vessel density", result.vessel_density_similarity),
        ("Vessel length", result.vessel_length_similarity),
        ("Vessel width", result.vessel_width_similarity),
        ("Bifurcations", result.bifurcation_similarity),
        ("Spatial density", result.vessel_spatial_similarity),
    ] {
        println!("{name:<24} {score:>8.4}");
    }
    println!("{}", "-".repeat(40));
    println!("{:<24} {:>8.4}", "Overall", result.overall_similarity);
    println!(
        "Verdict: {} (threshold {:.2})",
        if result.is_match { "MATCH" } else { "no match" },
        matching.similarity_threshold,
    );
    Ok(())
}

fn print_record_summary(record: &FeatureRecord) {
    println!();
    println!("Record {}", record.id);
    println!("  vessel density:   {:.4}", record.vessel_density);
    println!(
        "  vessels:          {} (avg length {:.1}, avg width {:.1})",
        record.vessel_count, record.avg_vessel_length, record.avg_vessel_width
    );
    println!("  bifurcations:     {}", record.bifurcation_points.len());
    match record.optic_disc {
        Some(disc) => println!(
            "  optic disc:       ({}, {}) r={}",
            disc.center.x, disc.center.y, disc.radius
        ),
        None => println!("  optic disc:       not found"),
    }
    println!("  gradient bins:    {}", record.gradient_histogram.len());
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&ExtractDiagnostics) -> std::time::Duration;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[ExtractDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Normalize", |d| d.normalize.duration),
        ("Vessels", |d| d.vessels.duration),
        ("Optic Disc", |d| d.optic_disc.duration),
        ("Bifurcations", |d| d.bifurcations.duration),
        ("Density", |d| d.density.duration),
        ("Texture", |d| d.texture.duration),
    ];

    for (name, extractor) in stage_extractors {
        let stage_mean = all_diagnostics
            .iter()
            .map(|d| extractor(d).as_secs_f64() * 1000.0)
            .sum::<f64>()
            / all_diagnostics.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
