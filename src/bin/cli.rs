//! CLI application for face-part centroid evaluation.
//!
//! Usage:
//!   face-parts evaluate --root data/helen --predictions preds/    # Human-readable report
//!   face-parts evaluate --config run.json --predictions preds/ --json
//!   face-parts evaluate ... --save-accumulator shard0.bin        # Keep partial sums
//!   face-parts merge shard0.bin shard1.bin -o report.json --json

use clap::{Args, Parser, Subcommand};
use face_parts::{
    evaluate, ArtifactWriter, ErrorAccumulator, ErrorReport, EvalConfig, MaskDirectory, OnError,
    OutputSize,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "face-parts")]
#[command(author, version, about = "Face-part segmentation centroid evaluation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate stored predictions against a dataset
    Evaluate(EvaluateArgs),
    /// Combine saved accumulators into one report
    Merge(MergeArgs),
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dataset root directory
    #[arg(long)]
    root: Option<PathBuf>,

    /// List file relative to the dataset root
    #[arg(long)]
    list: Option<String>,

    /// Directory of predicted masks (<name>/<name>_lblNN.png), in source image geometry
    #[arg(long)]
    predictions: PathBuf,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Short-edge length to rescale samples to
    #[arg(long)]
    output_size: Option<usize>,

    /// Apply random shift/rotation augmentation
    #[arg(long)]
    augment: bool,

    /// Mirror samples horizontally
    #[arg(long)]
    invert: bool,

    /// Stop at the first sample that fails to load
    #[arg(long)]
    abort_on_error: bool,

    /// Write centroid overlays and mask composites here
    #[arg(long)]
    artifacts: Option<PathBuf>,

    /// Save the raw accumulator for a later merge
    #[arg(long)]
    save_accumulator: Option<PathBuf>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Accumulator files written by `evaluate --save-accumulator`
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// JSON config providing the part layout
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output as JSON
    #[arg(short, long)]
    json: bool,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Command::Evaluate(args) => run_evaluate(args),
        Command::Merge(args) => run_merge(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<EvalConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => EvalConfig::load(path)?,
        None => EvalConfig::default(),
    })
}

fn run_evaluate(args: &EvaluateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    if let Some(list) = &args.list {
        config.list = list.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(size) = args.output_size {
        config.output_size = Some(OutputSize::ShortEdge(size));
    }
    config.augment |= args.augment;
    config.invert |= args.invert;
    if args.abort_on_error {
        config.on_error = OnError::Abort;
    }
    config.validate()?;

    let seed = config.resolved_seed();
    info!(seed, root = %config.root.display(), "starting evaluation");

    let dataset = config.open_dataset()?;
    let loader = config.loader(&dataset, seed)?;
    let model = MaskDirectory::for_loader(&args.predictions, &loader)?;

    let writer = match &args.artifacts {
        Some(dir) => Some(ArtifactWriter::new(dir, &dataset, config.overlay_frame())?),
        None => None,
    };

    let (accumulator, stats) = evaluate(&loader, &model, |evaluation| match &writer {
        Some(writer) => writer.write(evaluation),
        None => Ok(()),
    })?;
    if stats.skipped > 0 {
        info!(skipped = stats.skipped, "some samples were skipped");
    }

    if let Some(path) = &args.save_accumulator {
        accumulator.save(path)?;
        info!(path = %path.display(), "accumulator saved");
    }

    let report = accumulator.finalize(&config.parts)?;
    emit(&report, &args.output)
}

fn run_merge(args: &MergeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args.config.as_deref())?;

    let mut merged: Option<ErrorAccumulator> = None;
    for path in &args.inputs {
        let shard = ErrorAccumulator::load(path)?;
        info!(path = %path.display(), samples = shard.count(), "loaded shard");
        match merged.as_mut() {
            Some(acc) => acc.merge(&shard)?,
            None => merged = Some(shard),
        }
    }
    let merged = merged.ok_or("no accumulator files given")?;

    let report = merged.finalize(&config.parts)?;
    emit(&report, &args.output)
}

fn emit(report: &ErrorReport, output: &OutputArgs) -> Result<(), Box<dyn std::error::Error>> {
    let output_str = if output.json {
        serde_json::to_string_pretty(report)?
    } else {
        report.to_human_readable()
    };

    if let Some(ref path) = output.output {
        std::fs::write(path, &output_str)?;
        info!(path = %path.display(), "report written");
    } else {
        println!("{}", output_str);
    }

    Ok(())
}
