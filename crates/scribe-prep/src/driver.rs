//! Training driver seam and the in-tree dry-run driver.
//!
//! A real driver owns the model, optimizer and device placement. It receives
//! encoded examples for both splits plus a [`Collator`], and reports back a
//! [`TrainingSummary`]. [`DryRunDriver`] walks exactly the same batch
//! schedule, evaluation cadence and checkpoint rotation without a model,
//! which makes it useful for sizing runs and checking the data path.

use ndarray::Array3;
use scribe_settings::{EvaluationStrategy, TrainingSettings};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointManager;
use crate::collator::Collator;
use crate::metrics::{EvalMetrics, character_error_rate, decode_predictions, decode_references};
use crate::tokenizer::CharTokenizer;
use crate::types::{Batch, Example, IGNORE_INDEX, PrepError, Result};

/// Mega-batch size, in batches, inside which examples are sorted by length.
const MEGABATCH_MULTIPLIER: usize = 50;

/// Consumes prepared examples and runs the fit loop.
pub trait TrainingDriver {
    /// Train on `train`, evaluating on `eval`, batching through `collator`.
    fn train(
        &mut self,
        train: &[Example],
        eval: &[Example],
        collator: &dyn Collator,
    ) -> Result<TrainingSummary>;
}

/// Produces `(batch, frames, vocab)` scores for a collated batch.
pub trait Scorer {
    /// Score one batch.
    fn logits(&mut self, batch: &Batch) -> Result<Array3<f32>>;
}

/// Loop shape taken from the training settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainingPlan {
    /// Examples per batch.
    pub batch_size: usize,
    /// Batches per optimizer step.
    pub gradient_accumulation_steps: usize,
    /// Passes over the training set.
    pub num_train_epochs: usize,
    /// Sort by input length inside mega-batches.
    pub group_by_length: bool,
    /// Evaluation cadence.
    pub evaluation_strategy: EvaluationStrategy,
    /// Steps between evaluations.
    pub eval_steps: usize,
    /// Steps between checkpoints.
    pub save_steps: usize,
    /// Steps between progress logs.
    pub logging_steps: usize,
}

impl From<&TrainingSettings> for TrainingPlan {
    fn from(s: &TrainingSettings) -> Self {
        Self {
            batch_size: s.batch_size.max(1),
            gradient_accumulation_steps: s.gradient_accumulation_steps.max(1),
            num_train_epochs: s.num_train_epochs,
            group_by_length: s.group_by_length,
            evaluation_strategy: s.evaluation_strategy,
            eval_steps: s.eval_steps.max(1),
            save_steps: s.save_steps.max(1),
            logging_steps: s.logging_steps.max(1),
        }
    }
}

/// One evaluation result in the run history.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    /// Optimizer step.
    pub step: usize,
    /// Epoch (1-based) the step belongs to.
    pub epoch: usize,
    /// Scores.
    pub metrics: EvalMetrics,
}

/// What a driver reports after training.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    /// Optimizer steps taken.
    pub global_step: usize,
    /// Epochs completed.
    pub epochs: usize,
    /// Batches collated.
    pub batches: usize,
    /// Mean fraction of real (unpadded) input positions per batch.
    pub mean_input_fill: f64,
    /// Evaluation history.
    pub evaluations: Vec<EvalRecord>,
    /// Steps of checkpoints still on disk.
    pub checkpoints: Vec<usize>,
}

/// Checkpointed trainer state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainerState {
    /// Optimizer steps taken.
    pub global_step: usize,
    /// Current epoch (1-based).
    pub epoch: usize,
    /// Evaluation history so far.
    pub log_history: Vec<EvalRecord>,
}

/// Order in which training examples are batched within an epoch.
///
/// Without grouping, indices stay in input order. With grouping, each
/// mega-batch of `50 * batch_size` indices is stably sorted by descending
/// length before being cut into batches, so similar lengths share a batch
/// and padding stays small.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchSchedule {
    batch_size: usize,
    group_by_length: bool,
}

impl BatchSchedule {
    /// Schedule batches of `batch_size` (at least 1).
    pub fn new(batch_size: usize, group_by_length: bool) -> Self {
        Self {
            batch_size: batch_size.max(1),
            group_by_length,
        }
    }

    /// Batches of example indices for examples with the given lengths.
    pub fn epoch(&self, lengths: &[usize]) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..lengths.len()).collect();
        if self.group_by_length {
            for mega in order.chunks_mut(self.batch_size * MEGABATCH_MULTIPLIER) {
                mega.sort_by_key(|&i| std::cmp::Reverse(lengths[i]));
            }
        }
        order.chunks(self.batch_size).map(<[usize]>::to_vec).collect()
    }
}

/// Scores that decode exactly to the batch's own labels.
///
/// Each label id gets one frame, followed by a pad frame so repeated
/// characters survive CTC collapse. Used to check the decode/score path
/// end to end: the CER of an oracle pass is zero.
pub struct OracleScorer {
    vocab_size: usize,
    pad_id: u32,
}

impl OracleScorer {
    /// Oracle over a vocabulary of `vocab_size` ids with padding `pad_id`.
    pub fn new(vocab_size: usize, pad_id: u32) -> Self {
        Self { vocab_size, pad_id }
    }
}

impl Scorer for OracleScorer {
    fn logits(&mut self, batch: &Batch) -> Result<Array3<f32>> {
        let pad = self.pad_id as usize;
        if pad >= self.vocab_size {
            return Err(PrepError::InvalidInput(format!(
                "pad id {pad} outside vocabulary of {}",
                self.vocab_size
            )));
        }
        let (rows, width) = batch.labels.dim();
        let frames = (width * 2).max(1);
        let mut logits = Array3::<f32>::zeros((rows, frames, self.vocab_size));
        for (b, row) in batch.labels.outer_iter().enumerate() {
            let mut ids: Vec<usize> = Vec::with_capacity(frames);
            for &label in row.iter().filter(|&&l| l != IGNORE_INDEX) {
                let id = usize::try_from(label)
                    .ok()
                    .filter(|&id| id < self.vocab_size)
                    .ok_or_else(|| PrepError::InvalidInput(format!("label {label} outside vocabulary")))?;
                ids.push(id);
                ids.push(pad);
            }
            ids.resize(frames, pad);
            for (t, id) in ids.into_iter().enumerate() {
                logits[[b, t, id]] = 1.0;
            }
        }
        Ok(logits)
    }
}

/// Model-free driver: collates every scheduled batch, counts optimizer
/// steps, evaluates with a [`Scorer`] and rotates checkpoints.
pub struct DryRunDriver {
    plan: TrainingPlan,
    tokenizer: CharTokenizer,
    scorer: Box<dyn Scorer>,
    checkpoints: Option<CheckpointManager>,
}

impl DryRunDriver {
    /// Create a driver. Without a checkpoint manager nothing is written.
    pub fn new(
        plan: TrainingPlan,
        tokenizer: CharTokenizer,
        scorer: Box<dyn Scorer>,
        checkpoints: Option<CheckpointManager>,
    ) -> Self {
        Self {
            plan,
            tokenizer,
            scorer,
            checkpoints,
        }
    }

    /// Run one evaluation pass over `eval` in batches of `batch_size`.
    pub fn evaluate(&mut self, eval: &[Example], collator: &dyn Collator) -> Result<EvalMetrics> {
        let mut predictions = Vec::with_capacity(eval.len());
        let mut references = Vec::with_capacity(eval.len());
        for chunk in eval.chunks(self.plan.batch_size) {
            let batch = collator.collate(chunk)?;
            let logits = self.scorer.logits(&batch)?;
            predictions.extend(decode_predictions(&logits, &self.tokenizer));
            references.extend(decode_references(&batch.labels, &self.tokenizer)?);
        }
        let cer = character_error_rate(&predictions, &references)?;
        Ok(EvalMetrics { cer })
    }

    fn on_step(
        &mut self,
        step: usize,
        epoch: usize,
        eval: &[Example],
        collator: &dyn Collator,
        summary: &mut TrainingSummary,
    ) -> Result<()> {
        if step % self.plan.logging_steps == 0 {
            info!(step, epoch, batches = summary.batches, "training progress");
        }
        if self.plan.evaluation_strategy == EvaluationStrategy::Steps
            && step % self.plan.eval_steps == 0
        {
            self.record_eval(step, epoch, eval, collator, summary)?;
        }
        if step % self.plan.save_steps == 0 {
            if let Some(manager) = &self.checkpoints {
                let state = TrainerState {
                    global_step: step,
                    epoch,
                    log_history: summary.evaluations.clone(),
                };
                let _ = manager.save(step, &state)?;
            }
        }
        Ok(())
    }

    fn record_eval(
        &mut self,
        step: usize,
        epoch: usize,
        eval: &[Example],
        collator: &dyn Collator,
        summary: &mut TrainingSummary,
    ) -> Result<()> {
        if eval.is_empty() {
            warn!(step, "no evaluation examples, skipping evaluation");
            return Ok(());
        }
        let metrics = self.evaluate(eval, collator)?;
        info!(step, epoch, cer = metrics.cer, "evaluation");
        summary.evaluations.push(EvalRecord {
            step,
            epoch,
            metrics,
        });
        Ok(())
    }
}

impl TrainingDriver for DryRunDriver {
    fn train(
        &mut self,
        train: &[Example],
        eval: &[Example],
        collator: &dyn Collator,
    ) -> Result<TrainingSummary> {
        if train.is_empty() {
            return Err(PrepError::InvalidInput("no training examples".into()));
        }
        let lengths: Vec<usize> = train.iter().map(|e| e.input_values.len()).collect();
        let schedule =
            BatchSchedule::new(self.plan.batch_size, self.plan.group_by_length).epoch(&lengths);
        let accumulation = self.plan.gradient_accumulation_steps;
        info!(
            examples = train.len(),
            batches_per_epoch = schedule.len(),
            epochs = self.plan.num_train_epochs,
            "dry run started"
        );

        let mut summary = TrainingSummary::default();
        let mut fill_total = 0.0;
        for epoch in 1..=self.plan.num_train_epochs {
            let mut pending = 0usize;
            for indices in &schedule {
                let examples: Vec<&Example> = indices.iter().map(|&i| &train[i]).collect();
                let batch = collator.collate_refs(&examples)?;
                fill_total += batch.input_fill_ratio();
                summary.batches += 1;
                pending += 1;
                debug!(epoch, shape = ?batch.input_values.dim(), "batch collated");

                if pending == accumulation {
                    pending = 0;
                    summary.global_step += 1;
                    self.on_step(summary.global_step, epoch, eval, collator, &mut summary)?;
                }
            }
            // A partial accumulation window still ends in an optimizer step.
            if pending > 0 {
                summary.global_step += 1;
                self.on_step(summary.global_step, epoch, eval, collator, &mut summary)?;
            }
            if self.plan.evaluation_strategy == EvaluationStrategy::Epoch {
                self.record_eval(summary.global_step, epoch, eval, collator, &mut summary)?;
            }
            summary.epochs = epoch;
        }

        if summary.batches > 0 {
            summary.mean_input_fill = fill_total / summary.batches as f64;
        }
        if let Some(manager) = &self.checkpoints {
            summary.checkpoints = manager.list()?.into_iter().map(|c| c.step).collect();
        }
        info!(
            steps = summary.global_step,
            batches = summary.batches,
            fill = summary.mean_input_fill,
            "dry run finished"
        );
        Ok(summary)
    }
}
