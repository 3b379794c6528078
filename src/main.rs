//! SafeOn ML - Command line entry point
//!
//! `train` fits and writes a bundle, `predict` scores JSON-lines flow records,
//! `inspect` prints what is on disk.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use safeon_ml_core::constants::{APP_NAME, APP_VERSION};
use safeon_ml_core::logic::features::layout::LayoutInfo;
use safeon_ml_core::logic::model::CalibrationPolicy;
use safeon_ml_core::{train, ArtifactStore, Engine, EngineConfig, FlowRecord, JsonlScoreSink};

#[derive(Parser)]
#[command(name = "safeon")]
#[command(author, version, about = "Flow anomaly scoring engine")]
#[command(propagate_version = true)]
struct Cli {
    /// Artifact bundle directory (overrides MODEL_DIR)
    #[arg(short, long, global = true)]
    model_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit every detector on a labeled table and write the bundle
    Train {
        /// Labeled flow table (CSV)
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Attacker-only table; every row is labeled as attack
        #[arg(long)]
        attacker_dataset: Option<PathBuf>,

        /// Threshold calibration policy (grid_f1, gap_midpoint)
        #[arg(long)]
        policy: Option<CalibrationPolicy>,

        /// Sliding window length for the sequence detector
        #[arg(long)]
        sequence_length: Option<usize>,

        /// Sequence detector epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Training seed
        #[arg(long)]
        seed: Option<u64>,

        /// Skip the supervised classifier
        #[arg(long)]
        no_classifier: bool,

        /// Skip the sequence detector
        #[arg(long)]
        no_sequence: bool,
    },

    /// Score flow records read as JSON lines (stdin when no file is given)
    Predict {
        /// Input file of JSON flow records, one per line
        input: Option<PathBuf>,

        /// Replace the calibrated threshold
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Also append scored flows under this directory
        #[arg(long)]
        sink_dir: Option<PathBuf>,

        /// Refuse to score without a bundle instead of returning dummy results
        #[arg(long)]
        strict: bool,
    },

    /// Print bundle metadata, manifest and feature layout
    Inspect,

    /// Rewrite the stored decision threshold
    SetThreshold {
        /// New threshold in [0, 1]
        value: f64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let mut config = EngineConfig::from_env();
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }

    match cli.command {
        Commands::Train {
            dataset,
            attacker_dataset,
            policy,
            sequence_length,
            epochs,
            seed,
            no_classifier,
            no_sequence,
        } => {
            if dataset.is_some() {
                config.dataset_path = dataset;
            }
            if attacker_dataset.is_some() {
                config.attacker_dataset_path = attacker_dataset;
            }
            if let Some(policy) = policy {
                config.threshold.policy = policy;
            }
            if let Some(len) = sequence_length {
                config.sequence_length = len;
            }
            if let Some(epochs) = epochs {
                config.epochs = epochs;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            config.enable_classifier &= !no_classifier;
            config.enable_sequence &= !no_sequence;
            run_train(&config)
        }
        Commands::Predict {
            input,
            threshold,
            sink_dir,
            strict,
        } => {
            if threshold.is_some() {
                config.threshold_override = threshold;
            }
            if strict {
                config.allow_dummy = false;
            }
            run_predict(config, input, sink_dir)
        }
        Commands::Inspect => run_inspect(config),
        Commands::SetThreshold { value } => {
            ArtifactStore::new(&config.model_dir)
                .update_threshold(value)
                .with_context(|| format!("Failed to update threshold in {:?}", config.model_dir))?;
            println!("threshold set to {:.2}", value);
            Ok(())
        }
    }
}

fn run_train(config: &EngineConfig) -> Result<()> {
    log::info!("Starting {} v{} training into {:?}", APP_NAME, APP_VERSION, config.model_dir);

    let report = train(config).context("Training failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_predict(config: EngineConfig, input: Option<PathBuf>, sink_dir: Option<PathBuf>) -> Result<()> {
    let mut engine = Engine::from_config(config).context("Failed to initialize engine")?;
    if let Some(dir) = sink_dir {
        engine = engine.with_sink(Arc::new(JsonlScoreSink::from_path(dir)));
    }

    let reader: Box<dyn BufRead> = match &input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {:?}", path))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut rejected = 0usize;

    for (number, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }

        let scored = serde_json::from_str::<FlowRecord>(&line)
            .map_err(anyhow::Error::from)
            .and_then(|flow| engine.predict(&flow).map_err(anyhow::Error::from));

        match scored {
            Ok(score) => writeln!(out, "{}", serde_json::to_string(&score)?)?,
            Err(e) => {
                rejected += 1;
                log::warn!("line {}: {}", number + 1, e);
            }
        }
    }

    let status = engine.status();
    log::info!(
        "Scored {} flows ({} rejected), avg latency {:.1} us",
        status.prediction_count,
        rejected,
        status.avg_latency_us
    );
    Ok(())
}

fn run_inspect(config: EngineConfig) -> Result<()> {
    let store = ArtifactStore::new(&config.model_dir);

    println!("layout: {}", serde_json::to_string_pretty(&LayoutInfo::current())?);

    if !store.exists() {
        println!("no bundle at {:?}", config.model_dir);
        return Ok(());
    }

    let manifest = store.load_manifest().context("Failed to read manifest")?;
    println!("manifest: {}", serde_json::to_string_pretty(&manifest)?);

    let engine = Engine::from_config(config).context("Failed to load bundle")?;
    if let Some(bundle) = engine.bundle() {
        println!("metadata: {}", serde_json::to_string_pretty(&bundle.metadata)?);
    }
    println!("status: {}", serde_json::to_string_pretty(&engine.status())?);
    Ok(())
}
