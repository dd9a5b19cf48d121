//! Headerless 16-bit PCM loading.
//!
//! ```text
//! raw bytes → native-endian i16 → f32 / 32768 → Waveform @ 16 kHz
//! ```
//!
//! There is no header to parse and no resampling: every file is assumed to
//! be mono PCM at [`SAMPLING_RATE`]. A file recorded at another rate is not
//! detected.

use std::path::Path;

use tracing::{trace, warn};

use crate::types::{PrepError, Result, Waveform};

/// Sampling rate assumed for every raw PCM file, in Hz.
pub const SAMPLING_RATE: u32 = 16_000;

/// Full-scale divisor for signed 16-bit samples.
pub const PCM16_SCALE: f32 = 32_768.0;

/// Decode native-endian signed 16-bit samples into floats in [-1, 1).
///
/// A trailing odd byte cannot form a sample and is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    let whole = bytes.len() - bytes.len() % 2;
    if whole != bytes.len() {
        warn!(len = bytes.len(), "odd-length PCM buffer, dropping trailing byte");
    }
    // Copies into an aligned buffer; the input slice has no alignment guarantee.
    let samples: Vec<i16> = bytemuck::allocation::pod_collect_to_vec(&bytes[..whole]);
    samples
        .into_iter()
        .map(|s| f32::from(s) / PCM16_SCALE)
        .collect()
}

/// Read a raw PCM file into a [`Waveform`] at [`SAMPLING_RATE`].
pub fn load_waveform(path: &Path) -> Result<Waveform> {
    let bytes = std::fs::read(path).map_err(|e| PrepError::io(path, e))?;
    let samples = decode_pcm16(&bytes);
    trace!(path = %path.display(), samples = samples.len(), "pcm decoded");
    Ok(Waveform {
        samples,
        sampling_rate: SAMPLING_RATE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn encode(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    #[test]
    fn decodes_extremes() {
        let out = decode_pcm16(&encode(&[0, i16::MIN, i16::MAX, 16_384]));
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], -1.0);
        assert!(out[2] < 1.0 && out[2] > 0.9999);
        assert_eq!(out[3], 0.5);
    }

    #[test]
    fn empty_buffer_is_empty_waveform() {
        assert!(decode_pcm16(&[]).is_empty());
    }

    #[test]
    fn trailing_odd_byte_is_ignored() {
        let mut bytes = encode(&[100, -100]);
        bytes.push(0x7f);
        assert_eq!(decode_pcm16(&bytes).len(), 2);
    }

    #[test]
    fn load_waveform_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pcm");
        std::fs::write(&path, encode(&[8192, -8192])).unwrap();
        let wav = load_waveform(&path).unwrap();
        assert_eq!(wav.sampling_rate, 16_000);
        assert_eq!(wav.samples, vec![0.25, -0.25]);
    }

    #[test]
    fn load_waveform_missing_file() {
        let r = load_waveform(Path::new("/nonexistent/a.pcm"));
        assert_matches!(r, Err(PrepError::Io { ref path, .. }) if path.ends_with("a.pcm"));
    }

    proptest! {
        #[test]
        fn rescaling_recovers_samples(samples in proptest::collection::vec(any::<i16>(), 0..512)) {
            let decoded = decode_pcm16(&encode(&samples));
            prop_assert_eq!(decoded.len(), samples.len());
            for (f, &s) in decoded.iter().zip(&samples) {
                prop_assert!((-1.0..1.0).contains(f));
                prop_assert_eq!((f * PCM16_SCALE).round() as i16, s);
            }
        }
    }
}
