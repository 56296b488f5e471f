//! Silence-bounded speech segments

use std::time::Instant;

/// One spoken turn captured from the microphone
///
/// Produced once per detected speech segment and consumed by exactly one
/// recognition attempt.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Capture order, starting at 0 for each listener session
    pub sequence: u64,
    /// When speech onset was detected
    pub started_at: Instant,
    /// Mono samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

impl Utterance {
    /// Create an utterance starting now
    #[must_use]
    pub fn new(sequence: u64, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            sequence,
            started_at: Instant::now(),
            samples,
            sample_rate,
        }
    }

    /// Set when speech began
    #[must_use]
    pub fn with_start(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    /// Duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Samples as 16-bit little-endian PCM
    #[must_use]
    pub fn to_pcm16_le(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|&s| sample_to_i16(s).to_le_bytes())
            .collect()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn sample_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
