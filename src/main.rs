use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceauth::config::{self, Config, Mode};
use faceauth::extract::{extract_dataset, output_path};
use faceauth::folds::SparseClassPolicy;
use faceauth::table::{load_pair, TableFormat};
use faceauth::{evaluate, Device, EmbeddingMethod, LinearSvm, OnnxEmbedder};
use log::info;

#[derive(Parser)]
#[command(name = "faceauth")]
#[command(
    version,
    about = "Face embedding extraction and cross-validated authentication evaluation"
)]
struct Cli {
    /// Config file (defaults to $FACEAUTH_CONFIG or the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed every image of a dataset into a feature table and its flipped companion
    Extract {
        /// Dataset directory name under the images root
        #[arg(short, long)]
        dataset: String,
        /// Embedding model: arcface or facenet
        #[arg(short, long, default_value = "arcface")]
        method: EmbeddingMethod,
        /// CUDA device index, negative for CPU
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        gpu: i32,
        /// Skip face detection and alignment
        #[arg(long)]
        no_align: bool,
        #[arg(long)]
        images_root: Option<PathBuf>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Table format: txt or bin
        #[arg(long)]
        format: Option<TableFormat>,
    },
    /// Cross-validate per-subject classifiers over a feature table
    Evaluate {
        /// Feature table (.txt or .bin)
        features: PathBuf,
        /// Flipped companion table (defaults to <features>_flip)
        #[arg(long)]
        flipped: Option<PathBuf>,
        #[arg(long)]
        folds: Option<usize>,
        /// Classifiers trained or tested concurrently
        #[arg(long)]
        batch_size: Option<usize>,
        /// Fold shuffle seed
        #[arg(long)]
        seed: Option<u64>,
        /// Highest FAR accepted at the operating point
        #[arg(long)]
        far_target: Option<f64>,
        /// Drop classes with fewer samples than folds instead of failing
        #[arg(long)]
        exclude_sparse: bool,
        /// authentication or recognition
        #[arg(long)]
        mode: Option<Mode>,
        /// Write the full report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Extract {
            dataset,
            method,
            gpu,
            no_align,
            images_root,
            data_dir,
            model_dir,
            format,
        } => {
            let ex = &mut cfg.extraction;
            ex.images_root = images_root.unwrap_or(ex.images_root.clone());
            ex.data_dir = data_dir.unwrap_or(ex.data_dir.clone());
            ex.model_dir = model_dir.unwrap_or(ex.model_dir.clone());
            ex.format = format.unwrap_or(ex.format);
            ex.align &= !no_align;
            extract(&cfg, &dataset, method, Device::from_index(gpu))
        }
        Commands::Evaluate {
            features,
            flipped,
            folds,
            batch_size,
            seed,
            far_target,
            exclude_sparse,
            mode,
            output,
        } => {
            let ev = &mut cfg.evaluation;
            ev.folds = folds.unwrap_or(ev.folds);
            ev.batch_size = batch_size.unwrap_or(ev.batch_size);
            ev.seed = seed.or(ev.seed);
            ev.far_target = far_target.unwrap_or(ev.far_target);
            ev.mode = mode.unwrap_or(ev.mode);
            if exclude_sparse {
                ev.sparse_classes = SparseClassPolicy::Exclude;
            }
            run_evaluation(&cfg, &features, flipped, output)
        }
        Commands::Config { save } => {
            print!("{}", toml::to_string_pretty(&cfg)?);
            if save {
                config::save_config(&cfg, cli.config.as_deref())?;
                info!(
                    "Saved config to {}",
                    cli.config
                        .as_deref()
                        .unwrap_or(&config::CONFIG_PATH)
                        .display()
                );
            }
            Ok(())
        }
    }
}

fn extract(cfg: &Config, dataset: &str, method: EmbeddingMethod, device: Device) -> Result<()> {
    let ex = &cfg.extraction;
    let dataset_dir = ex.images_root.join(dataset);
    info!("Extracting {} features from {}", method, dataset_dir.display());

    let threshold = ex.align.then_some(ex.detector_threshold);
    let mut embedder = OnnxEmbedder::load(method, &ex.model_dir, device, threshold)
        .context("Failed to initialize embedding model")?;
    let tables = extract_dataset(&mut embedder, &dataset_dir, ex.align)?;

    let path = output_path(&ex.data_dir, dataset, method.name(), ex.format);
    let flipped = tables.save(&path)?;
    info!("Saved features to {}", path.display());
    info!("Saved flipped features to {}", flipped.display());
    Ok(())
}

fn run_evaluation(
    cfg: &Config,
    features: &std::path::Path,
    flipped: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let (normal, flipped) = load_pair(features, flipped.as_deref())
        .with_context(|| format!("Failed to load features from {}", features.display()))?;

    let ev = &cfg.evaluation;
    let trainer = LinearSvm::new(ev.svm.clone());
    let report = evaluate::run(&normal, &flipped, ev, &trainer)?;

    println!("{report}");
    if let Some(path) = output {
        report
            .write_json(&path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Wrote report to {}", path.display());
    }
    Ok(())
}
