//! Core types and errors shared by every stage.

use std::path::PathBuf;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Label value excluded from the loss.
pub const IGNORE_INDEX: i64 = -100;

/// One line of a train/test record file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Path to a headerless 16-bit PCM file.
    pub audio_path: PathBuf,
    /// Reference transcript.
    pub transcript: String,
}

/// Decoded audio at a known sampling rate.
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    /// Samples in roughly [-1, 1).
    pub samples: Vec<f32>,
    /// Sampling rate in Hz.
    pub sampling_rate: u32,
}

/// A loaded record waiting to be encoded.
#[derive(Clone, Debug, PartialEq)]
pub struct SpeechRecord {
    /// Decoded audio.
    pub speech: Waveform,
    /// Transcript to tokenize.
    pub target_text: String,
}

/// A model-ready training/eval example.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// Extracted input features, one per audio sample.
    pub input_values: Vec<f32>,
    /// Vocabulary ids, one per transcript character.
    pub labels: Vec<u32>,
}

/// A padded, rectangular batch of examples.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    /// `(batch, max_input_len)` inputs, right-padded.
    pub input_values: Array2<f32>,
    /// `(batch, max_input_len)`, 1 for real samples and 0 for padding.
    pub attention_mask: Array2<i64>,
    /// `(batch, max_label_len)`, padded positions set to [`IGNORE_INDEX`].
    pub labels: Array2<i64>,
}

impl Batch {
    /// Number of examples in the batch.
    pub fn len(&self) -> usize {
        self.input_values.nrows()
    }

    /// Whether the batch holds no examples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fraction of input positions that are real samples.
    pub fn input_fill_ratio(&self) -> f64 {
        let total = self.attention_mask.len();
        if total == 0 {
            return 0.0;
        }
        let real = self.attention_mask.iter().filter(|&&m| m == 1).count();
        real as f64 / total as f64
    }
}

/// Errors raised by the preparation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PrepError {
    /// File read/write failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed record file.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Vocabulary artifact missing, malformed or inconsistent.
    #[error("vocabulary error: {0}")]
    Vocabulary(String),

    /// No transcript contributed any character.
    #[error("cannot build a vocabulary from empty transcripts")]
    EmptyVocabulary,

    /// Records in one encode batch disagree on sampling rate.
    #[error("sampling rate error: {0}")]
    SamplingRate(String),

    /// Caller passed something the stage cannot process.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Checkpoint save or rotation failure.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

impl PrepError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias for pipeline results.
pub type Result<T> = std::result::Result<T, PrepError>;

/// Extension trait to reduce `.map_err()` boilerplate when wrapping errors into [`PrepError`].
pub trait ResultExt<T> {
    /// Wrap the error as [`PrepError::Dataset`] with `context` prefix.
    fn dataset(self, context: &str) -> Result<T>;
    /// Wrap the error as [`PrepError::Vocabulary`] with `context` prefix.
    fn vocabulary(self, context: &str) -> Result<T>;
    /// Wrap the error as [`PrepError::Checkpoint`] with `context` prefix.
    fn checkpoint(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn dataset(self, context: &str) -> Result<T> {
        self.map_err(|e| PrepError::Dataset(format!("{context}: {e}")))
    }
    fn vocabulary(self, context: &str) -> Result<T> {
        self.map_err(|e| PrepError::Vocabulary(format!("{context}: {e}")))
    }
    fn checkpoint(self, context: &str) -> Result<T> {
        self.map_err(|e| PrepError::Checkpoint(format!("{context}: {e}")))
    }
}
