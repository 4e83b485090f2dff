use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use cocotools::{
    compute_stats, crop, merge_files, split, split_three_way, CocoDataset, CropOptions,
    RemovalOutcome, SplitMode, SplitOptions,
};

#[derive(Parser)]
#[command(
    name = "cocotools",
    about = "COCO tools for Machine Learning",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a coco file into train and test (and optionally val) files
    Split(SplitArgs),
    /// Merge coco files
    Merge(MergeArgs),
    /// Crop images from annotations in a coco file
    Crop(CropArgs),
    /// Drop the annotations of some categories, keeping images and categories
    Filter(FilterArgs),
    /// Remove categories or images together with what depends on them
    Remove(RemoveArgs),
    /// Print dataset statistics as json
    Stats(StatsArgs),
}

#[derive(Args)]
struct SplitArgs {
    /// Path to coco file
    #[arg(long)]
    coco_path: PathBuf,
    /// Where to save the split coco files, defaults to the coco file's folder
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Share of the dataset going to test
    #[arg(long, default_value_t = 0.2)]
    ratio: f64,
    /// Share of what is left after the test split going to val
    #[arg(long)]
    val_ratio: Option<f64>,
    /// One of random, strat_single_obj or strat_multi_obj
    #[arg(long, default_value = "random")]
    mode: String,
    /// Comma separated categories that do not drive the stratified multi-object split
    #[arg(long, value_delimiter = ',')]
    skip_categories: Vec<String>,
    /// Seed for a reproducible split
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args)]
struct MergeArgs {
    /// Comma separated paths to coco files
    #[arg(long, value_delimiter = ',', required = true)]
    coco_paths: Vec<PathBuf>,
    /// Where to save the merged coco file, defaults to the first file's folder
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args)]
struct CropArgs {
    /// Path to coco file
    #[arg(long)]
    coco_path: PathBuf,
    /// Path to the coco image files
    #[arg(long)]
    images_dir: PathBuf,
    /// Defaults to a `cropped` folder next to the images folder
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Number of workers cropping the dataset
    #[arg(long, default_value_t = 1)]
    num_workers: usize,
    /// Comma separated categories to crop, all of them by default
    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,
}

#[derive(Args)]
struct FilterArgs {
    /// Path to coco file
    #[arg(long)]
    coco_path: PathBuf,
    /// Comma separated categories whose annotations are dropped
    #[arg(long, value_delimiter = ',', required = true)]
    categories: Vec<String>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args)]
struct RemoveArgs {
    /// Path to coco file
    #[arg(long)]
    coco_path: PathBuf,
    /// Comma separated categories to remove
    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,
    /// Comma separated image file names to remove
    #[arg(long, value_delimiter = ',')]
    images: Vec<String>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args)]
struct StatsArgs {
    /// Path to coco file
    #[arg(long)]
    coco_path: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Split(args) => split_cmd(args),
        Commands::Merge(args) => merge_cmd(args),
        Commands::Crop(args) => crop_cmd(args),
        Commands::Filter(args) => filter_cmd(args),
        Commands::Remove(args) => remove_cmd(args),
        Commands::Stats(args) => stats_cmd(args),
    }
}

fn load_json(coco_path: &Path) -> Result<CocoDataset> {
    if !coco_path.is_file() {
        bail!("file not found: {}", coco_path.display());
    }
    if coco_path.extension().map_or(true, |ext| ext != "json") {
        bail!("incorrect file format, provide JSON as input");
    }
    CocoDataset::load(coco_path).with_context(|| format!("loading {}", coco_path.display()))
}

/// The requested output folder if it exists, else the folder of `input`.
fn output_dir(requested: Option<&Path>, input: &Path) -> PathBuf {
    match requested {
        Some(dir) if dir.is_dir() => dir.to_path_buf(),
        other => {
            if let Some(dir) = other {
                warn!("{} is not a directory, writing next to the input", dir.display());
            }
            input
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        }
    }
}

fn split_cmd(args: SplitArgs) -> Result<()> {
    let coco = load_json(&args.coco_path)?;
    let options = SplitOptions {
        ratio: args.ratio,
        mode: args.mode.parse::<SplitMode>()?,
        skip_categories: args.skip_categories,
        seed: args.seed,
    };
    let output_dir = output_dir(args.output_dir.as_deref(), &args.coco_path);

    match args.val_ratio {
        Some(val_ratio) => {
            let (train, val, test) = split_three_way(&coco, &options, val_ratio)?;
            train.save(output_dir.join("coco_train.json"))?;
            val.save(output_dir.join("coco_val.json"))?;
            test.save(output_dir.join("coco_test.json"))?;
        }
        None => {
            let (train, test) = split(&coco, &options)?;
            train.save(output_dir.join("coco_train.json"))?;
            test.save(output_dir.join("coco_test.json"))?;
        }
    }
    Ok(())
}

fn merge_cmd(args: MergeArgs) -> Result<()> {
    let merged = merge_files(&args.coco_paths).context("merging coco files")?;
    let output_dir = output_dir(args.output_dir.as_deref(), &args.coco_paths[0]);
    merged.save(output_dir.join("coco_merged.json"))?;
    Ok(())
}

fn crop_cmd(args: CropArgs) -> Result<()> {
    let coco = load_json(&args.coco_path)?;
    let output_dir = args.output_dir.unwrap_or_else(|| {
        args.images_dir
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("cropped")
    });
    let options = CropOptions::new(&args.images_dir, output_dir)
        .with_parallelism(args.num_workers)
        .with_categories(args.categories);
    let report = crop(&coco, &options)?;
    for failure in &report.failures {
        warn!("{}: {}", failure.file_name, failure.error);
    }
    info!(
        "{} crops written, {} images skipped without annotations",
        report.crops_written, report.images_skipped
    );
    if !report.is_success() {
        bail!("{} images could not be cropped", report.failures.len());
    }
    Ok(())
}

fn filter_cmd(args: FilterArgs) -> Result<()> {
    let coco = load_json(&args.coco_path)?;
    let outcome = coco.filter_categories(&args.categories);
    if !outcome.is_applied() {
        warn!("unknown categories {:?}, writing an empty dataset", outcome.missing);
    }
    let output_dir = output_dir(args.output_dir.as_deref(), &args.coco_path);
    outcome.dataset.save(output_dir.join("coco_filtered.json"))?;
    Ok(())
}

fn remove_cmd(args: RemoveArgs) -> Result<()> {
    if args.categories.is_empty() && args.images.is_empty() {
        bail!("nothing to remove, pass --categories and/or --images");
    }
    let mut coco = load_json(&args.coco_path)?;
    let outcomes = coco
        .remove_images(&args.images)
        .into_iter()
        .chain(coco.remove_categories(&args.categories));
    let (mut images, mut annotations, mut unknown) = (0, 0, 0);
    for outcome in outcomes {
        match outcome {
            RemovalOutcome::Removed {
                images: i,
                annotations: a,
            } => {
                images += i;
                annotations += a;
            }
            RemovalOutcome::UnknownName(_) => unknown += 1,
        }
    }
    info!(
        "removed {} images and {} annotations, {} names not found",
        images, annotations, unknown
    );
    let output_dir = output_dir(args.output_dir.as_deref(), &args.coco_path);
    coco.save(output_dir.join("coco_pruned.json"))?;
    Ok(())
}

fn stats_cmd(args: StatsArgs) -> Result<()> {
    let coco = load_json(&args.coco_path)?;
    let stats = compute_stats(&coco);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
