//! Settings type definitions.
//!
//! The on-disk format is one flat JSON object with `snake_case` keys (the
//! same key names the training configs have always used). Each section below
//! is `#[serde(flatten)]`-ed into [`PrepSettings`], so sections exist only in
//! Rust. Every type implements [`Default`] with production values and is
//! marked `#[serde(default)]`, so partial files are fine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings for a fine-tuning data preparation run.
///
/// # JSON Format
///
/// ```json
/// {
///   "train_data_path": "data/train.jsonl",
///   "test_data_path": "data/test.jsonl",
///   "make_vocab": true,
///   "vocab_path": "vocab.json",
///   "batch_size": 8
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepSettings {
    /// Dataset and artifact paths.
    #[serde(flatten)]
    pub data: DataSettings,
    /// Worker pool and encode batching.
    #[serde(flatten)]
    pub pipeline: PipelineSettings,
    /// Audio decoding and feature extraction.
    #[serde(flatten)]
    pub audio: AudioSettings,
    /// Special token spellings.
    #[serde(flatten)]
    pub tokenizer: TokenizerSettings,
    /// Pretrained model hyperparameters, forwarded to the training driver.
    #[serde(flatten)]
    pub model: ModelSettings,
    /// Training loop hyperparameters, forwarded to the training driver.
    #[serde(flatten)]
    pub training: TrainingSettings,
    /// Log output.
    #[serde(flatten)]
    pub logging: LoggingSettings,
}

impl PrepSettings {
    /// Clamp ratio fields to [0.0, 1.0] and raise zero counts to 1.
    ///
    /// Called automatically during loading. Out-of-range values are corrected
    /// with a warning rather than rejected.
    pub fn validate(&mut self) {
        fn clamp_ratio(val: &mut f64, name: &str) {
            if *val < 0.0 || *val > 1.0 {
                let clamped = val.clamp(0.0, 1.0);
                tracing::warn!("{name} out of range ({val}), clamped to {clamped}");
                *val = clamped;
            }
        }

        fn at_least_one(val: &mut usize, name: &str) {
            if *val == 0 {
                tracing::warn!("{name} must be positive, using 1");
                *val = 1;
            }
        }

        let m = &mut self.model;
        clamp_ratio(&mut m.attention_dropout, "attention_dropout");
        clamp_ratio(&mut m.hidden_dropout, "hidden_dropout");
        clamp_ratio(&mut m.feat_proj_dropout, "feat_proj_dropout");
        clamp_ratio(&mut m.mask_time_prob, "mask_time_prob");
        clamp_ratio(&mut m.layerdrop, "layerdrop");

        at_least_one(&mut self.pipeline.encode_batch_size, "encode_batch_size");

        let t = &mut self.training;
        at_least_one(&mut t.batch_size, "batch_size");
        at_least_one(
            &mut t.gradient_accumulation_steps,
            "gradient_accumulation_steps",
        );
        at_least_one(&mut t.save_steps, "save_steps");
        at_least_one(&mut t.eval_steps, "eval_steps");
        at_least_one(&mut t.logging_steps, "logging_steps");

        if self.audio.sampling_rate == 0 {
            tracing::warn!("sampling_rate must be positive, using 16000");
            self.audio.sampling_rate = 16_000;
        }
    }
}

/// Dataset and artifact paths.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Training records (JSON Lines or JSON array).
    pub train_data_path: PathBuf,
    /// Evaluation records (JSON Lines or JSON array).
    pub test_data_path: PathBuf,
    /// Rebuild the vocabulary from both splits before encoding.
    pub make_vocab: bool,
    /// Vocabulary artifact, written when `make_vocab` is set and always read.
    pub vocab_path: PathBuf,
    /// Directory for preparation reports.
    pub output_dir: PathBuf,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            train_data_path: PathBuf::from("data/train.jsonl"),
            test_data_path: PathBuf::from("data/test.jsonl"),
            make_vocab: true,
            vocab_path: PathBuf::from("vocab.json"),
            output_dir: PathBuf::from("output"),
        }
    }
}

/// Worker pool and encode batching.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Worker threads for loading and encoding. `0` means one per CPU.
    pub num_workers: usize,
    /// Records per encode batch; each batch must share one sampling rate.
    pub encode_batch_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            num_workers: 0,
            encode_batch_size: 4,
        }
    }
}

/// Audio decoding and feature extraction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Sampling rate the feature extractor expects, in Hz.
    pub sampling_rate: u32,
    /// Apply zero-mean unit-variance normalization per utterance.
    pub do_normalize: bool,
    /// Value written into padded input positions.
    pub padding_value: f32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sampling_rate: 16_000,
            do_normalize: true,
            padding_value: 0.0,
        }
    }
}

/// Special token spellings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerSettings {
    /// Unknown-character token.
    pub unk_token: String,
    /// Padding token.
    pub pad_token: String,
    /// Token that stands in for a literal space.
    pub word_delimiter_token: String,
}

impl Default for TokenizerSettings {
    fn default() -> Self {
        Self {
            unk_token: "[UNK]".to_string(),
            pad_token: "[PAD]".to_string(),
            word_delimiter_token: "|".to_string(),
        }
    }
}

/// How per-example CTC losses are reduced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CtcLossReduction {
    /// Average over the batch.
    #[default]
    Mean,
    /// Sum over the batch.
    Sum,
}

/// Pretrained model hyperparameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Model identifier to fine-tune from.
    pub pretrained_model: String,
    /// Attention dropout probability.
    pub attention_dropout: f64,
    /// Hidden-layer dropout probability.
    pub hidden_dropout: f64,
    /// Feature projection dropout probability.
    pub feat_proj_dropout: f64,
    /// Probability of masking a time step (`SpecAugment`).
    pub mask_time_prob: f64,
    /// Layer drop probability.
    pub layerdrop: f64,
    /// Trade compute for memory during backprop.
    pub gradient_checkpointing: bool,
    /// CTC loss reduction.
    pub ctc_loss_reduction: CtcLossReduction,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            pretrained_model: "facebook/wav2vec2-large-xlsr-53".to_string(),
            attention_dropout: 0.1,
            hidden_dropout: 0.1,
            feat_proj_dropout: 0.0,
            mask_time_prob: 0.05,
            layerdrop: 0.1,
            gradient_checkpointing: true,
            ctc_loss_reduction: CtcLossReduction::Mean,
        }
    }
}

/// When evaluation runs during training.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStrategy {
    /// Never evaluate.
    No,
    /// Every `eval_steps` optimizer steps.
    #[default]
    Steps,
    /// At the end of every epoch.
    Epoch,
}

/// Training loop hyperparameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// Checkpoint output directory.
    pub checkpoint_dir: PathBuf,
    /// Group examples of similar input length into the same batch.
    pub group_by_length: bool,
    /// Examples per device batch (train and eval).
    pub batch_size: usize,
    /// Batches accumulated per optimizer step.
    pub gradient_accumulation_steps: usize,
    /// Evaluation cadence.
    pub evaluation_strategy: EvaluationStrategy,
    /// Passes over the training set.
    pub num_train_epochs: usize,
    /// Mixed precision.
    pub fp16: bool,
    /// Optimizer steps between checkpoints.
    pub save_steps: usize,
    /// Optimizer steps between evaluations.
    pub eval_steps: usize,
    /// Optimizer steps between log lines.
    pub logging_steps: usize,
    /// Weight decay.
    pub weight_decay: f64,
    /// Peak learning rate.
    pub learning_rate: f64,
    /// Linear warmup steps.
    pub warmup_steps: usize,
    /// Maximum checkpoints kept on disk. `None` keeps all.
    pub save_total_limit: Option<usize>,
    /// Data loader workers used by the training driver.
    pub dataloader_num_workers: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("checkpoints"),
            group_by_length: true,
            batch_size: 16,
            gradient_accumulation_steps: 2,
            evaluation_strategy: EvaluationStrategy::Steps,
            num_train_epochs: 30,
            fp16: true,
            save_steps: 400,
            eval_steps: 400,
            logging_steps: 400,
            weight_decay: 0.0,
            learning_rate: 3e-4,
            warmup_steps: 500,
            save_total_limit: Some(2),
            dataloader_num_workers: 0,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit JSON lines instead of human-readable logs.
    pub log_json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}
