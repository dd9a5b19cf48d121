//! Command-line front end for preparing CTC fine-tuning data.
//!
//! Subcommands:
//! - `vocab`: build the vocabulary from both record files and write it
//! - `prepare`: run the full preparation and write a JSON report
//! - `dry-run`: prepare, then walk the training schedule without a model
//! - `score`: decode a logits/labels dump and print its CER

#![deny(unsafe_code)]

mod logging;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scribe_prep::pipeline::{build_vocabulary, write_report};
use scribe_prep::{
    CharTokenizer, CheckpointManager, CtcCollator, DryRunDriver, EvalPrediction, OracleScorer,
    PrepReport, SpecialTokens, TrainingDriver, TrainingPlan, Vocabulary, WorkerPool,
    compute_metrics, prepare,
};
use scribe_settings::PrepSettings;
use serde::{Deserialize, Serialize};
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const REPORT_FILE: &str = "prep_report.json";
const DRY_RUN_FILE: &str = "dry_run.json";

#[derive(Debug, Parser)]
#[command(name = "scribe", about = "Data preparation for CTC speech fine-tuning")]
struct Args {
    /// Settings file (defaults to `$SCRIBE_CONFIG` or `scribe.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the vocabulary and write it to `vocab_path`.
    Vocab,
    /// Load, encode and summarize both splits.
    Prepare,
    /// Prepare, then walk the training schedule with an oracle scorer.
    DryRun,
    /// Score a JSON dump of `logits` and `label_ids` against the vocabulary.
    Score {
        /// Path to the dump.
        #[arg(long)]
        predictions: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct PredictionDump {
    logits: Vec<Vec<Vec<f32>>>,
    label_ids: Vec<Vec<i64>>,
}

#[derive(Debug, Serialize)]
struct DryRunReport {
    generated_at: chrono::DateTime<chrono::Utc>,
    prep: PrepReport,
    training: scribe_prep::TrainingSummary,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = load(args.config.as_deref())?;
    logging::init_subscriber(&settings.logging.log_level, settings.logging.log_json);

    match args.command {
        Command::Vocab => run_vocab(&settings),
        Command::Prepare => run_prepare(&settings),
        Command::DryRun => run_dry_run(&settings),
        Command::Score { predictions } => run_score(&settings, &predictions),
    }
}

fn load(config: Option<&Path>) -> Result<PrepSettings> {
    match config {
        Some(path) => scribe_settings::load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => scribe_settings::load_settings().context("loading settings"),
    }
}

fn run_vocab(settings: &PrepSettings) -> Result<()> {
    let pool = WorkerPool::new(settings.pipeline.num_workers)?;
    let vocab = build_vocabulary(settings, &pool).context("building vocabulary")?;
    println!("{}", serde_json::to_string_pretty(&vocab)?);
    Ok(())
}

fn run_prepare(settings: &PrepSettings) -> Result<()> {
    let corpus = prepare(settings).context("preparing corpus")?;
    let report = PrepReport::from_corpus(&corpus);
    let path = settings.data.output_dir.join(REPORT_FILE);
    write_report(&report, &path).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "report written");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_dry_run(settings: &PrepSettings) -> Result<()> {
    let corpus = prepare(settings).context("preparing corpus")?;
    let vocab = corpus.vocabulary();
    let scorer = OracleScorer::new(vocab.len(), vocab.pad_id());
    let checkpoints = CheckpointManager::new(
        &settings.training.checkpoint_dir,
        settings.training.save_total_limit,
    );
    let mut driver = DryRunDriver::new(
        TrainingPlan::from(&settings.training),
        corpus.encoder.tokenizer().clone(),
        Box::new(scorer),
        Some(checkpoints),
    );
    let collator = CtcCollator::for_encoder(&corpus.encoder);
    let training = driver
        .train(&corpus.train, &corpus.test, &collator)
        .context("dry run")?;

    let report = DryRunReport {
        generated_at: chrono::Utc::now(),
        prep: PrepReport::from_corpus(&corpus),
        training,
    };
    let json = serde_json::to_string_pretty(&report)?;
    let path = settings.data.output_dir.join(DRY_RUN_FILE);
    std::fs::create_dir_all(&settings.data.output_dir)
        .with_context(|| format!("creating {}", settings.data.output_dir.display()))?;
    std::fs::write(&path, &json).with_context(|| format!("writing {}", path.display()))?;
    println!("{json}");
    Ok(())
}

fn run_score(settings: &PrepSettings, predictions: &Path) -> Result<()> {
    let vocab = Vocabulary::load(
        &settings.data.vocab_path,
        SpecialTokens::from(&settings.tokenizer),
    )
    .context("loading vocabulary")?;
    let tokenizer = CharTokenizer::new(vocab);

    let raw = std::fs::read_to_string(predictions)
        .with_context(|| format!("reading {}", predictions.display()))?;
    let dump: PredictionDump = serde_json::from_str(&raw).context("parsing prediction dump")?;
    let pred = EvalPrediction::from_nested(dump.logits, dump.label_ids)?;
    let metrics = compute_metrics(&pred, &tokenizer)?;
    info!(cer = metrics.cer, examples = pred.label_ids.nrows(), "scored");
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}
