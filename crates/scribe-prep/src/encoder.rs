//! Turns loaded speech records into [`Example`]s.

use crate::features::FeatureExtractor;
use crate::tokenizer::CharTokenizer;
use crate::types::{Example, Result, SpeechRecord, Waveform};

/// Feature extractor and tokenizer applied together.
#[derive(Clone, Debug)]
pub struct ExampleEncoder {
    features: FeatureExtractor,
    tokenizer: CharTokenizer,
}

impl ExampleEncoder {
    /// Pair a feature extractor with a tokenizer.
    pub fn new(features: FeatureExtractor, tokenizer: CharTokenizer) -> Self {
        Self {
            features,
            tokenizer,
        }
    }

    /// The feature extractor.
    pub fn features(&self) -> &FeatureExtractor {
        &self.features
    }

    /// The tokenizer.
    pub fn tokenizer(&self) -> &CharTokenizer {
        &self.tokenizer
    }

    /// Encode one processing batch.
    ///
    /// Every record must share one sampling rate; a mismatch fails before
    /// any record is encoded.
    pub fn encode_batch(&self, records: &[SpeechRecord]) -> Result<Vec<Example>> {
        let waveforms: Vec<&Waveform> = records.iter().map(|r| &r.speech).collect();
        let inputs = self.features.extract(&waveforms)?;
        Ok(inputs
            .into_iter()
            .zip(records)
            .map(|(input_values, record)| Example {
                input_values,
                labels: self.tokenizer.encode(&record.target_text),
            })
            .collect())
    }
}
