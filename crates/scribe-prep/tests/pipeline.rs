#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use scribe_prep::{
    Batch, CheckpointManager, Collator, CtcCollator, DryRunDriver, IGNORE_INDEX, OracleScorer,
    PrepReport, TrainingDriver, TrainingPlan, prepare,
};
use scribe_settings::{EvaluationStrategy, PrepSettings};

fn write_pcm(path: &Path, samples: &[i16]) {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
    std::fs::write(path, bytes).unwrap();
}

fn write_jsonl(path: &Path, rows: &[(PathBuf, &str)]) {
    let body: String = rows
        .iter()
        .map(|(audio, text)| {
            format!(
                "{}\n",
                serde_json::json!({ "audio_path": audio, "transcript": text })
            )
        })
        .collect();
    std::fs::write(path, body).unwrap();
}

fn corpus_settings(root: &Path) -> PrepSettings {
    let transcripts = ["hello world", "hold", "low"];
    let mut train = Vec::new();
    for (i, text) in transcripts.iter().enumerate() {
        let audio = root.join(format!("train-{i}.pcm"));
        let samples: Vec<i16> = (0..(i + 2) * 100).map(|n| ((n * 37) % 2000) as i16 - 1000).collect();
        write_pcm(&audio, &samples);
        train.push((audio, *text));
    }
    let test_audio = root.join("test-0.pcm");
    write_pcm(&test_audio, &[100, -100, 200, -200, 50]);

    write_jsonl(&root.join("train.jsonl"), &train);
    // 'x' only appears in the test split and still makes it into the vocabulary
    write_jsonl(&root.join("test.jsonl"), &[(test_audio, "ox")]);

    let mut settings = PrepSettings::default();
    settings.data.train_data_path = root.join("train.jsonl");
    settings.data.test_data_path = root.join("test.jsonl");
    settings.data.vocab_path = root.join("vocab.json");
    settings.pipeline.num_workers = 3;
    settings.training.checkpoint_dir = root.join("checkpoints");
    settings
}

#[test]
fn prepared_examples_collate_into_masked_batches() {
    let dir = tempfile::tempdir().unwrap();
    let settings = corpus_settings(dir.path());
    let corpus = prepare(&settings).unwrap();

    let vocab = corpus.vocabulary();
    assert_eq!(
        vocab.symbols(),
        &["|", "d", "e", "h", "l", "o", "r", "w", "x", "[UNK]", "[PAD]"]
    );
    let raw = std::fs::read_to_string(&settings.data.vocab_path).unwrap();
    let on_disk: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(on_disk["|"], 0);
    assert_eq!(on_disk["[PAD]"], 10);

    // normalized inputs are zero-mean
    for example in &corpus.train {
        let mean: f32 = example.input_values.iter().sum::<f32>() / example.input_values.len() as f32;
        assert!(mean.abs() < 1e-3, "mean {mean}");
    }

    let collator = CtcCollator::for_encoder(&corpus.encoder);
    let batch: Batch = collator.collate(&corpus.train).unwrap();
    assert_eq!(batch.input_values.shape(), &[3, 400]);
    assert_eq!(batch.labels.shape(), &[3, 11]);
    assert_eq!(batch.attention_mask.row(0).sum(), 200);
    assert_eq!(batch.labels[[1, 4]], IGNORE_INDEX);
    assert_eq!(batch.labels[[2, 3]], IGNORE_INDEX);

    let report = PrepReport::from_corpus(&corpus);
    assert_eq!(report.vocab_size, 11);
    assert_eq!(report.test.max_label_len, 2);
}

#[test]
fn dry_run_scores_perfectly_with_oracle() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = corpus_settings(dir.path());
    settings.training.batch_size = 2;
    settings.training.gradient_accumulation_steps = 1;
    settings.training.num_train_epochs = 2;
    settings.training.evaluation_strategy = EvaluationStrategy::Epoch;
    settings.training.save_steps = 1;
    settings.training.save_total_limit = Some(2);
    let corpus = prepare(&settings).unwrap();

    let vocab = corpus.vocabulary();
    let scorer = OracleScorer::new(vocab.len(), vocab.pad_id());
    let checkpoints =
        CheckpointManager::new(&settings.training.checkpoint_dir, settings.training.save_total_limit);
    let mut driver = DryRunDriver::new(
        TrainingPlan::from(&settings.training),
        corpus.encoder.tokenizer().clone(),
        Box::new(scorer),
        Some(checkpoints),
    );
    let collator = CtcCollator::for_encoder(&corpus.encoder);
    let summary = driver.train(&corpus.train, &corpus.test, &collator).unwrap();

    assert_eq!(summary.global_step, 4);
    assert_eq!(summary.evaluations.len(), 2);
    assert!(summary.evaluations.iter().all(|e| e.metrics.cer == 0.0));
    assert_eq!(summary.checkpoints, vec![3, 4]);
    assert!(
        settings
            .training
            .checkpoint_dir
            .join("checkpoint-4")
            .join(scribe_prep::checkpoint::STATE_FILE)
            .exists()
    );
}
