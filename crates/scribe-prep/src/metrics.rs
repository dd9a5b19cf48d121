//! Greedy CTC decoding and character error rate.
//!
//! The training driver hands over raw scores and padded label ids; this
//! module turns both into text and scores them.

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::tokenizer::CharTokenizer;
use crate::types::{IGNORE_INDEX, PrepError, Result};

/// Model output and references for one evaluation pass.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalPrediction {
    /// `(batch, frames, vocab)` scores.
    pub logits: Array3<f32>,
    /// `(batch, max_label_len)` ids, padded with [`IGNORE_INDEX`].
    pub label_ids: Array2<i64>,
}

impl EvalPrediction {
    /// Build from nested rows, as read from a JSON dump.
    ///
    /// Every prediction must have the same frame count and vocabulary width,
    /// and every label row the same length.
    pub fn from_nested(logits: Vec<Vec<Vec<f32>>>, label_ids: Vec<Vec<i64>>) -> Result<Self> {
        let batch = logits.len();
        let frames = logits.first().map_or(0, Vec::len);
        let vocab = logits.first().and_then(|p| p.first()).map_or(0, Vec::len);
        if logits.iter().any(|p| p.len() != frames || p.iter().any(|f| f.len() != vocab)) {
            return Err(PrepError::InvalidInput(format!(
                "ragged logits, expected {frames} frames of width {vocab}"
            )));
        }
        let flat: Vec<f32> = logits.into_iter().flatten().flatten().collect();
        let logits = Array3::from_shape_vec((batch, frames, vocab), flat)
            .map_err(|e| PrepError::InvalidInput(format!("logits: {e}")))?;

        let rows = label_ids.len();
        let width = label_ids.first().map_or(0, Vec::len);
        if label_ids.iter().any(|r| r.len() != width) {
            return Err(PrepError::InvalidInput(format!(
                "ragged label ids, expected rows of {width}"
            )));
        }
        let flat: Vec<i64> = label_ids.into_iter().flatten().collect();
        let label_ids = Array2::from_shape_vec((rows, width), flat)
            .map_err(|e| PrepError::InvalidInput(format!("label ids: {e}")))?;
        Ok(Self { logits, label_ids })
    }
}

/// Scores reported after an evaluation pass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    /// Character error rate over the whole pass.
    pub cer: f64,
}

/// Index of the highest score; the first one wins ties. NaN never wins.
pub fn argmax(scores: ArrayView1<'_, f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in scores.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b || v.is_nan() => {}
            None if v.is_nan() => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Best id per frame of a `(frames, vocab)` score matrix.
///
/// A frame with no comparable score (all NaN) yields `fallback`, so the
/// output always has one id per frame.
pub fn greedy_ids(logits: ArrayView2<'_, f32>, fallback: u32) -> Vec<u32> {
    logits
        .outer_iter()
        .map(|frame| argmax(frame).map_or(fallback, |i| i as u32))
        .collect()
}

/// Levenshtein distance between two character sequences.
pub fn edit_distance(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            cur[j + 1] = substitution.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Total character edits divided by total reference characters.
///
/// Individual references may be empty; an all-empty reference set cannot be
/// scored.
pub fn character_error_rate<P: AsRef<str>, R: AsRef<str>>(
    predictions: &[P],
    references: &[R],
) -> Result<f64> {
    if predictions.len() != references.len() {
        return Err(PrepError::InvalidInput(format!(
            "{} predictions for {} references",
            predictions.len(),
            references.len()
        )));
    }
    let mut edits = 0usize;
    let mut total = 0usize;
    for (p, r) in predictions.iter().zip(references) {
        let p: Vec<char> = p.as_ref().trim().chars().collect();
        let r: Vec<char> = r.as_ref().trim().chars().collect();
        edits += edit_distance(&p, &r);
        total += r.len();
    }
    if total == 0 {
        return Err(PrepError::InvalidInput(
            "references contain no characters".into(),
        ));
    }
    Ok(edits as f64 / total as f64)
}

/// Decode predictions with CTC collapse.
pub fn decode_predictions(logits: &Array3<f32>, tokenizer: &CharTokenizer) -> Vec<String> {
    let pad = tokenizer.vocabulary().pad_id();
    logits
        .axis_iter(Axis(0))
        .map(|row| tokenizer.decode(&greedy_ids(row, pad), true))
        .collect()
}

/// Decode padded reference labels without collapsing repeats.
///
/// [`IGNORE_INDEX`] positions are mapped back to the pad id first.
pub fn decode_references(label_ids: &Array2<i64>, tokenizer: &CharTokenizer) -> Result<Vec<String>> {
    let pad = tokenizer.vocabulary().pad_id();
    label_ids
        .outer_iter()
        .map(|row| {
            let ids = row
                .iter()
                .map(|&id| {
                    if id == IGNORE_INDEX {
                        Ok(pad)
                    } else {
                        u32::try_from(id)
                            .map_err(|_| PrepError::InvalidInput(format!("invalid label id {id}")))
                    }
                })
                .collect::<Result<Vec<u32>>>()?;
            Ok(tokenizer.decode(&ids, false))
        })
        .collect()
}

/// Decode both sides of an evaluation pass and compute CER.
pub fn compute_metrics(pred: &EvalPrediction, tokenizer: &CharTokenizer) -> Result<EvalMetrics> {
    let (batch, _, vocab) = pred.logits.dim();
    if batch != pred.label_ids.nrows() {
        return Err(PrepError::InvalidInput(format!(
            "{batch} prediction rows for {} label rows",
            pred.label_ids.nrows()
        )));
    }
    if vocab != tokenizer.vocabulary().len() {
        tracing::warn!(
            logits = vocab,
            vocabulary = tokenizer.vocabulary().len(),
            "score width differs from vocabulary size"
        );
    }
    let predictions = decode_predictions(&pred.logits, tokenizer);
    let references = decode_references(&pred.label_ids, tokenizer)?;
    let cer = character_error_rate(&predictions, &references)?;
    tracing::debug!(cer, examples = batch, "evaluation scored");
    Ok(EvalMetrics { cer })
}
