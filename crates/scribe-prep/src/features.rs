//! Per-utterance input feature extraction.

use scribe_settings::AudioSettings;

use crate::types::{PrepError, Result, Waveform};

/// Added to the variance before the square root.
const VARIANCE_EPSILON: f64 = 1e-7;

/// Raw-waveform feature extractor.
///
/// Features are the samples themselves (one value per sample), optionally
/// normalized to zero mean and unit variance per utterance.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureExtractor {
    /// Values per time step.
    pub feature_size: usize,
    /// Expected sampling rate in Hz.
    pub sampling_rate: u32,
    /// Value used by the collator for padded inputs.
    pub padding_value: f32,
    /// Apply zero-mean unit-variance normalization.
    pub do_normalize: bool,
    /// Whether batches carry an attention mask.
    pub return_attention_mask: bool,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::from(&AudioSettings::default())
    }
}

impl From<&AudioSettings> for FeatureExtractor {
    fn from(s: &AudioSettings) -> Self {
        Self {
            feature_size: 1,
            sampling_rate: s.sampling_rate,
            padding_value: s.padding_value,
            do_normalize: s.do_normalize,
            return_attention_mask: true,
        }
    }
}

impl FeatureExtractor {
    /// Check that every waveform shares one sampling rate equal to ours.
    pub fn check_sampling_rate(&self, waveforms: &[&Waveform]) -> Result<()> {
        let Some(first) = waveforms.first() else {
            return Ok(());
        };
        if let Some(other) = waveforms
            .iter()
            .find(|w| w.sampling_rate != first.sampling_rate)
        {
            return Err(PrepError::SamplingRate(format!(
                "mixed sampling rates in one batch ({} and {}); all inputs must be {} Hz",
                first.sampling_rate, other.sampling_rate, self.sampling_rate
            )));
        }
        if first.sampling_rate != self.sampling_rate {
            return Err(PrepError::SamplingRate(format!(
                "input sampled at {} Hz, extractor expects {} Hz",
                first.sampling_rate, self.sampling_rate
            )));
        }
        Ok(())
    }

    /// Extract features for a batch after validating sampling rates.
    pub fn extract(&self, waveforms: &[&Waveform]) -> Result<Vec<Vec<f32>>> {
        self.check_sampling_rate(waveforms)?;
        Ok(waveforms
            .iter()
            .map(|w| {
                if self.do_normalize {
                    zero_mean_unit_var(&w.samples)
                } else {
                    w.samples.clone()
                }
            })
            .collect())
    }
}

/// Normalize to zero mean and unit variance: `(x - mean) / sqrt(var + 1e-7)`.
///
/// Statistics accumulate in `f64`. An empty input stays empty.
pub fn zero_mean_unit_var(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&x| f64::from(x)).sum::<f64>() / n;
    let var = samples
        .iter()
        .map(|&x| {
            let d = f64::from(x) - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let denom = (var + VARIANCE_EPSILON).sqrt();
    samples
        .iter()
        .map(|&x| ((f64::from(x) - mean) / denom) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn wav(samples: Vec<f32>, sampling_rate: u32) -> Waveform {
        Waveform {
            samples,
            sampling_rate,
        }
    }

    fn mean_var(v: &[f32]) -> (f64, f64) {
        let n = v.len() as f64;
        let mean = v.iter().map(|&x| f64::from(x)).sum::<f64>() / n;
        let var = v.iter().map(|&x| (f64::from(x) - mean).powi(2)).sum::<f64>() / n;
        (mean, var)
    }

    #[test]
    fn normalization_gives_zero_mean_unit_variance() {
        let out = zero_mean_unit_var(&[0.1, -0.3, 0.5, 0.2, -0.05]);
        let (mean, var) = mean_var(&out);
        assert!(mean.abs() < 1e-6, "mean {mean}");
        assert!((var - 1.0).abs() < 1e-4, "var {var}");
    }

    #[test]
    fn constant_signal_maps_to_zeros() {
        let out = zero_mean_unit_var(&[0.25; 8]);
        assert!(out.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn output_length_matches_input() {
        let fe = FeatureExtractor::default();
        let a = wav(vec![0.1; 10], 16_000);
        let b = wav(vec![0.2, 0.3, 0.4], 16_000);
        let out = fe.extract(&[&a, &b]).unwrap();
        assert_eq!(out[0].len(), 10);
        assert_eq!(out[1].len(), 3);
    }

    #[test]
    fn normalization_can_be_disabled() {
        let fe = FeatureExtractor {
            do_normalize: false,
            ..FeatureExtractor::default()
        };
        let a = wav(vec![0.5, -0.5], 16_000);
        assert_eq!(fe.extract(&[&a]).unwrap(), vec![vec![0.5, -0.5]]);
    }

    #[test]
    fn mixed_rates_fail_before_extraction() {
        let fe = FeatureExtractor::default();
        let a = wav(vec![0.1], 16_000);
        let b = wav(vec![0.1], 8_000);
        assert_matches!(fe.extract(&[&a, &b]), Err(PrepError::SamplingRate(_)));
    }

    #[test]
    fn rate_must_match_extractor() {
        let fe = FeatureExtractor::default();
        let a = wav(vec![0.1], 44_100);
        let b = wav(vec![0.2], 44_100);
        let err = fe.extract(&[&a, &b]).unwrap_err();
        assert!(err.to_string().contains("expects 16000 Hz"), "Got: {err}");
    }

    #[test]
    fn empty_batch_is_ok() {
        let fe = FeatureExtractor::default();
        assert!(fe.extract(&[]).unwrap().is_empty());
    }
}
