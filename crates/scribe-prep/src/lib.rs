//! # scribe-prep
//!
//! Data preparation for CTC fine-tuning of a pretrained speech encoder.
//!
//! # Architecture
//!
//! ```text
//! record files → vocab (union of characters) → vocab.json
//! raw PCM → Waveform @ 16kHz → zero-mean/unit-var input_values ┐
//! transcript → char ids ([UNK] fallback, ' ' → '|')            ┴→ Example
//! [Example] → CtcCollator → Batch (padded inputs, mask, labels = -100 on padding)
//! Batch → TrainingDriver → logits → greedy CTC decode → CER
//! ```
//!
//! Per-record work is pure and runs on a [`WorkerPool`]; outputs keep input
//! order. Model training itself lives behind [`TrainingDriver`];
//! [`DryRunDriver`] walks the same schedule without a model.
//!
//! ## Crate Position
//!
//! Depends on: scribe-settings.
//! Depended on by: scribe.

#![deny(unsafe_code)]

pub mod audio;
pub mod checkpoint;
pub mod collator;
pub mod dataset;
pub mod driver;
pub mod encoder;
pub mod features;
pub mod metrics;
pub mod parallel;
pub mod pipeline;
pub mod tokenizer;
pub mod types;
pub mod vocab;

pub use checkpoint::CheckpointManager;
pub use collator::{Collator, CtcCollator, PadSpec, Padding};
pub use driver::{
    BatchSchedule, DryRunDriver, OracleScorer, Scorer, TrainingDriver, TrainingPlan,
    TrainingSummary,
};
pub use encoder::ExampleEncoder;
pub use features::FeatureExtractor;
pub use metrics::{EvalMetrics, EvalPrediction, compute_metrics};
pub use parallel::WorkerPool;
pub use pipeline::{PrepReport, PreparedCorpus, prepare};
pub use tokenizer::CharTokenizer;
pub use types::{
    Batch, Example, IGNORE_INDEX, PrepError, Record, Result, ResultExt, SpeechRecord, Waveform,
};
pub use vocab::{SpecialTokens, Vocabulary};
