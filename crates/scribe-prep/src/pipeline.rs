//! End-to-end preparation: record files in, model-ready examples out.
//!
//! ```text
//! train/test records → [vocab build + persist] → vocab load
//!   → PCM load (worker pool) → feature + label encode (worker pool, chunked)
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use scribe_settings::PrepSettings;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::audio::load_waveform;
use crate::dataset::load_records;
use crate::encoder::ExampleEncoder;
use crate::features::FeatureExtractor;
use crate::parallel::WorkerPool;
use crate::tokenizer::CharTokenizer;
use crate::types::{Example, PrepError, Record, Result, SpeechRecord};
use crate::vocab::{SpecialTokens, Vocabulary};

/// Output of [`prepare`].
#[derive(Debug)]
pub struct PreparedCorpus {
    /// Feature extractor and tokenizer used for both splits.
    pub encoder: ExampleEncoder,
    /// Encoded training split, in record order.
    pub train: Vec<Example>,
    /// Encoded test split, in record order.
    pub test: Vec<Example>,
}

impl PreparedCorpus {
    /// The vocabulary used for labels.
    pub fn vocabulary(&self) -> &Vocabulary {
        self.encoder.tokenizer().vocabulary()
    }
}

/// Per-split counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitReport {
    /// Encoded examples.
    pub examples: usize,
    /// Longest input sequence.
    pub max_input_len: usize,
    /// Longest label sequence.
    pub max_label_len: usize,
    /// Labels mapped to the unknown token.
    pub unknown_labels: usize,
}

impl SplitReport {
    fn from_examples(examples: &[Example], unk_id: u32) -> Self {
        Self {
            examples: examples.len(),
            max_input_len: examples.iter().map(|e| e.input_values.len()).max().unwrap_or(0),
            max_label_len: examples.iter().map(|e| e.labels.len()).max().unwrap_or(0),
            unknown_labels: examples
                .iter()
                .flat_map(|e| &e.labels)
                .filter(|&&id| id == unk_id)
                .count(),
        }
    }
}

/// Summary of a preparation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrepReport {
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Vocabulary size including reserved tokens.
    pub vocab_size: usize,
    /// Training split.
    pub train: SplitReport,
    /// Test split.
    pub test: SplitReport,
}

impl PrepReport {
    /// Summarize a prepared corpus.
    pub fn from_corpus(corpus: &PreparedCorpus) -> Self {
        let unk = corpus.vocabulary().unk_id();
        Self {
            generated_at: Utc::now(),
            vocab_size: corpus.vocabulary().len(),
            train: SplitReport::from_examples(&corpus.train, unk),
            test: SplitReport::from_examples(&corpus.test, unk),
        }
    }
}

/// Build and persist the vocabulary from both record files.
#[instrument(skip_all, fields(vocab_path = %settings.data.vocab_path.display()))]
pub fn build_vocabulary(settings: &PrepSettings, pool: &WorkerPool) -> Result<Vocabulary> {
    let train = load_records(&settings.data.train_data_path)?;
    let test = load_records(&settings.data.test_data_path)?;
    persist_vocabulary(&train, &test, settings, pool)
}

/// Build the vocabulary from already-loaded records and write it to
/// `vocab_path`.
pub fn persist_vocabulary(
    train: &[Record],
    test: &[Record],
    settings: &PrepSettings,
    pool: &WorkerPool,
) -> Result<Vocabulary> {
    let vocab = Vocabulary::build(
        &transcripts(train),
        &transcripts(test),
        &SpecialTokens::from(&settings.tokenizer),
        pool,
    )?;
    vocab.persist(&settings.data.vocab_path)?;
    Ok(vocab)
}

/// Run every preparation stage.
///
/// With `make_vocab` the vocabulary is rebuilt and written to `vocab_path`
/// first. Either way it is then read back from `vocab_path`, so a missing or
/// malformed artifact is fatal.
#[instrument(skip_all)]
pub fn prepare(settings: &PrepSettings) -> Result<PreparedCorpus> {
    let pool = WorkerPool::new(settings.pipeline.num_workers)?;
    let train_records = load_records(&settings.data.train_data_path)?;
    let test_records = load_records(&settings.data.test_data_path)?;

    if settings.data.make_vocab {
        let _ = persist_vocabulary(&train_records, &test_records, settings, &pool)?;
    }
    let tokens = SpecialTokens::from(&settings.tokenizer);
    let vocab = Vocabulary::load(&settings.data.vocab_path, tokens)?;
    info!(size = vocab.len(), "vocabulary ready");

    let encoder = ExampleEncoder::new(
        FeatureExtractor::from(&settings.audio),
        CharTokenizer::new(vocab),
    );
    let chunk = settings.pipeline.encode_batch_size.max(1);
    let train = encode_split("train", &train_records, &encoder, &pool, chunk)?;
    let test = encode_split("test", &test_records, &encoder, &pool, chunk)?;

    Ok(PreparedCorpus {
        encoder,
        train,
        test,
    })
}

fn encode_split(
    split: &str,
    records: &[Record],
    encoder: &ExampleEncoder,
    pool: &WorkerPool,
    chunk: usize,
) -> Result<Vec<Example>> {
    let speech = load_speech(records, pool)?;
    info!(split, records = speech.len(), "audio loaded");
    let examples = pool.try_map_chunks(&speech, chunk, |batch| encoder.encode_batch(batch))?;
    info!(split, examples = examples.len(), "examples encoded");
    Ok(examples)
}

/// Decode every record's audio on the pool, preserving record order.
pub fn load_speech(records: &[Record], pool: &WorkerPool) -> Result<Vec<SpeechRecord>> {
    pool.try_map(records, |record| {
        Ok(SpeechRecord {
            speech: load_waveform(&record.audio_path)?,
            target_text: record.transcript.clone(),
        })
    })
}

/// Write `report` as pretty JSON to `path`.
pub fn write_report(report: &PrepReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PrepError::io(parent, e))?;
    }
    let json = serde_json::to_vec_pretty(report)?;
    std::fs::write(path, json).map_err(|e| PrepError::io(path, e))
}

fn transcripts(records: &[Record]) -> Vec<&str> {
    records.iter().map(|r| r.transcript.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::path::PathBuf;

    struct Fixture {
        _dir: tempfile::TempDir,
        settings: PrepSettings,
    }

    fn write_pcm(path: &Path, samples: &[i16]) {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        std::fs::write(path, bytes).unwrap();
    }

    fn write_records(path: &Path, records: &[(PathBuf, &str)]) {
        let lines: Vec<String> = records
            .iter()
            .map(|(audio, text)| {
                serde_json::json!({"audio_path": audio, "transcript": text}).to_string()
            })
            .collect();
        std::fs::write(path, lines.join("\n")).unwrap();
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pcm");
        let b = dir.path().join("b.pcm");
        write_pcm(&a, &[0, 1000, -1000, 2000]);
        write_pcm(&b, &[500, -500]);
        write_records(&dir.path().join("train.jsonl"), &[(a.clone(), "hi there"), (b, "hi")]);
        write_records(&dir.path().join("test.jsonl"), &[(a, "hit")]);

        let mut settings = PrepSettings::default();
        settings.data.train_data_path = dir.path().join("train.jsonl");
        settings.data.test_data_path = dir.path().join("test.jsonl");
        settings.data.vocab_path = dir.path().join("out/vocab.json");
        settings.pipeline.num_workers = 2;
        settings.pipeline.encode_batch_size = 1;
        Fixture {
            _dir: dir,
            settings,
        }
    }

    #[test]
    fn prepare_encodes_both_splits_in_order() {
        let f = fixture();
        let corpus = prepare(&f.settings).unwrap();
        assert!(f.settings.data.vocab_path.exists());
        assert_eq!(
            corpus.vocabulary().symbols(),
            &["|", "e", "h", "i", "r", "t", "[UNK]", "[PAD]"]
        );
        assert_eq!(corpus.train.len(), 2);
        assert_eq!(corpus.train[0].input_values.len(), 4);
        assert_eq!(corpus.train[0].labels, vec![2, 3, 0, 5, 2, 1, 4, 1]);
        assert_eq!(corpus.train[1].labels, vec![2, 3]);
        assert_eq!(corpus.test[0].labels, vec![2, 3, 5]);
    }

    #[test]
    fn prepare_reuses_existing_vocabulary() {
        let mut f = fixture();
        let _ = prepare(&f.settings).unwrap();
        f.settings.data.make_vocab = false;
        let corpus = prepare(&f.settings).unwrap();
        assert_eq!(corpus.vocabulary().len(), 8);
    }

    #[test]
    fn missing_vocabulary_is_fatal() {
        let mut f = fixture();
        f.settings.data.make_vocab = false;
        assert_matches!(prepare(&f.settings), Err(PrepError::Vocabulary(_)));
    }

    #[test]
    fn missing_audio_fails_preparation() {
        let f = fixture();
        write_records(
            &f.settings.data.train_data_path,
            &[(PathBuf::from("/nonexistent/x.pcm"), "hi")],
        );
        assert_matches!(prepare(&f.settings), Err(PrepError::Io { .. }));
    }

    #[test]
    fn configured_rate_mismatch_is_rejected() {
        let mut f = fixture();
        f.settings.audio.sampling_rate = 8_000;
        assert_matches!(prepare(&f.settings), Err(PrepError::SamplingRate(_)));
    }

    #[test]
    fn build_vocabulary_persists_artifact() {
        let f = fixture();
        let pool = WorkerPool::new(1).unwrap();
        let vocab = build_vocabulary(&f.settings, &pool).unwrap();
        let loaded =
            Vocabulary::load(&f.settings.data.vocab_path, SpecialTokens::default()).unwrap();
        assert_eq!(vocab.symbols(), loaded.symbols());
    }

    #[test]
    fn persist_vocabulary_uses_loaded_records() {
        let f = fixture();
        let pool = WorkerPool::new(1).unwrap();
        let train = load_records(&f.settings.data.train_data_path).unwrap();
        let vocab = persist_vocabulary(&train, &[], &f.settings, &pool).unwrap();
        assert_eq!(vocab.len(), 8);
        let loaded =
            Vocabulary::load(&f.settings.data.vocab_path, SpecialTokens::default()).unwrap();
        assert_eq!(loaded.symbols(), vocab.symbols());
    }

    #[test]
    fn report_summarizes_corpus() {
        let f = fixture();
        let corpus = prepare(&f.settings).unwrap();
        let report = PrepReport::from_corpus(&corpus);
        assert_eq!(report.vocab_size, 8);
        assert_eq!(report.train.examples, 2);
        assert_eq!(report.train.max_input_len, 4);
        assert_eq!(report.train.max_label_len, 8);
        assert_eq!(report.test.unknown_labels, 0);

        let path = f.settings.data.vocab_path.with_file_name("report.json");
        write_report(&report, &path).unwrap();
        let back: PrepReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.train, report.train);
    }
}
