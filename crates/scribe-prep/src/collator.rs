//! Padding collator for CTC training batches.
//!
//! Inputs are right-padded with the feature extractor's padding value and
//! get a 0/1 attention mask. Labels are right-padded with the pad token id,
//! then every padded position is replaced by [`IGNORE_INDEX`] so the loss
//! skips it. Each call owns only its inputs and output.

use ndarray::{Array2, Zip};

use crate::encoder::ExampleEncoder;
use crate::types::{Batch, Example, IGNORE_INDEX, PrepError, Result};

/// Anything that turns a list of examples into one batch.
///
/// The training driver only sees this trait.
pub trait Collator: Send + Sync {
    /// Assemble borrowed examples into a rectangular batch.
    fn collate_refs(&self, examples: &[&Example]) -> Result<Batch>;

    /// Assemble `examples` into a rectangular batch.
    fn collate(&self, examples: &[Example]) -> Result<Batch> {
        let refs: Vec<&Example> = examples.iter().collect();
        self.collate_refs(&refs)
    }
}

/// How far sequences are padded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Padding {
    /// To the longest sequence in the batch.
    #[default]
    Longest,
    /// To a fixed length. Longer sequences are an error.
    MaxLength(usize),
}

/// Target length and rounding for one padded field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PadSpec {
    /// Padding strategy.
    pub padding: Padding,
    /// Round the padded length up to a multiple of this.
    pub pad_to_multiple_of: Option<usize>,
}

impl PadSpec {
    fn target_len(&self, longest: usize, field: &str) -> Result<usize> {
        let len = match self.padding {
            Padding::Longest => longest,
            Padding::MaxLength(max) if longest > max => {
                return Err(PrepError::InvalidInput(format!(
                    "{field} of length {longest} exceeds max_length {max}"
                )));
            }
            Padding::MaxLength(max) => max,
        };
        Ok(match self.pad_to_multiple_of {
            Some(m) if m > 1 => len.div_ceil(m) * m,
            _ => len,
        })
    }
}

/// Collator for `(input_values, labels)` examples.
#[derive(Clone, Debug, PartialEq)]
pub struct CtcCollator {
    /// Filler for labels before masking.
    pub pad_token_id: u32,
    /// Filler for padded input positions.
    pub padding_value: f32,
    /// Input padding.
    pub inputs: PadSpec,
    /// Label padding.
    pub labels: PadSpec,
}

impl CtcCollator {
    /// Pad both fields to the longest sequence in each batch.
    pub fn new(pad_token_id: u32, padding_value: f32) -> Self {
        Self {
            pad_token_id,
            padding_value,
            inputs: PadSpec::default(),
            labels: PadSpec::default(),
        }
    }

    /// Collator matching an encoder's padding value and pad token.
    pub fn for_encoder(encoder: &ExampleEncoder) -> Self {
        Self::new(
            encoder.tokenizer().vocabulary().pad_id(),
            encoder.features().padding_value,
        )
    }

    fn pad_inputs(&self, examples: &[&Example]) -> Result<(Array2<f32>, Array2<i64>)> {
        let longest = examples
            .iter()
            .map(|e| e.input_values.len())
            .max()
            .unwrap_or(0);
        let width = self.inputs.target_len(longest, "input_values")?;

        let mut values = Array2::from_elem((examples.len(), width), self.padding_value);
        let mut mask = Array2::<i64>::zeros((examples.len(), width));
        for (i, example) in examples.iter().enumerate() {
            for (j, &v) in example.input_values.iter().enumerate() {
                values[[i, j]] = v;
                mask[[i, j]] = 1;
            }
        }
        Ok((values, mask))
    }

    fn pad_labels(&self, examples: &[&Example]) -> Result<Array2<i64>> {
        let longest = examples.iter().map(|e| e.labels.len()).max().unwrap_or(0);
        let width = self.labels.target_len(longest, "labels")?;

        let mut labels = Array2::from_elem((examples.len(), width), i64::from(self.pad_token_id));
        let mut mask = Array2::<i64>::zeros((examples.len(), width));
        for (i, example) in examples.iter().enumerate() {
            for (j, &id) in example.labels.iter().enumerate() {
                labels[[i, j]] = i64::from(id);
                mask[[i, j]] = 1;
            }
        }
        // A real label may equal the pad id; only the mask decides.
        Zip::from(&mut labels).and(&mask).for_each(|label, &m| {
            if m != 1 {
                *label = IGNORE_INDEX;
            }
        });
        Ok(labels)
    }
}

impl Collator for CtcCollator {
    fn collate_refs(&self, examples: &[&Example]) -> Result<Batch> {
        if examples.is_empty() {
            return Err(PrepError::InvalidInput("cannot collate an empty batch".into()));
        }
        let (input_values, attention_mask) = self.pad_inputs(examples)?;
        let labels = self.pad_labels(examples)?;
        Ok(Batch {
            input_values,
            attention_mask,
            labels,
        })
    }
}
