//! Energy-based utterance endpointing
//!
//! Slices a continuous sample stream into silence-bounded utterances. A
//! phrase starts when frame energy rises above the threshold and ends after
//! `pause_threshold` of quiet. Phrases with less than `phrase_threshold` of
//! speech are dropped as noise bursts.

use std::collections::VecDeque;

use crate::config::ListenerConfig;

/// Analysis frame length in seconds
const FRAME_SECS: f32 = 0.032;

/// Ambient energy multiplier for the dynamic threshold
const DYNAMIC_ENERGY_RATIO: f32 = 1.5;

/// Fraction of the old threshold kept after one second of adjustment
const DYNAMIC_ENERGY_DAMPING: f32 = 0.15;

/// Endpointing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// No speech yet, tracking ambient noise
    Waiting,
    /// Inside a phrase
    Speaking,
}

/// A completed phrase and where its speech began
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedPhrase {
    /// Phrase audio, including pre-roll and trimmed trailing silence
    pub samples: Vec<f32>,
    /// Stream offset, in samples, of the first frame above the threshold
    pub onset: u64,
}

/// Detects utterance boundaries in captured audio
#[derive(Debug)]
pub struct UtteranceDetector {
    frame_len: usize,
    energy_threshold: f32,
    min_energy_threshold: f32,
    dynamic: bool,
    damping_per_frame: f32,
    pause_frames_limit: usize,
    min_phrase_frames: usize,
    pre_roll_frames: usize,
    max_phrase_frames: Option<usize>,
    state: EndpointState,
    pre_roll: VecDeque<Vec<f32>>,
    phrase: Vec<f32>,
    phrase_frames: usize,
    pause_frames: usize,
    onset: u64,
    framed: u64,
    remainder: Vec<f32>,
}

impl UtteranceDetector {
    /// Create a detector for audio at `sample_rate`
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn new(config: &ListenerConfig, sample_rate: u32) -> Self {
        let frame_len = ((sample_rate as f32 * FRAME_SECS) as usize).max(1);
        let frame_secs = frame_len as f32 / sample_rate.max(1) as f32;
        let frames = |secs: f32| (secs / frame_secs).ceil().max(0.0) as usize;

        Self {
            frame_len,
            energy_threshold: config.energy_threshold,
            min_energy_threshold: config.energy_threshold,
            dynamic: config.dynamic_energy_threshold,
            damping_per_frame: DYNAMIC_ENERGY_DAMPING.powf(frame_secs),
            pause_frames_limit: frames(config.pause_threshold_secs).max(1),
            min_phrase_frames: frames(config.phrase_threshold_secs),
            pre_roll_frames: frames(config.non_speaking_duration_secs),
            max_phrase_frames: config.phrase_time_limit_secs.map(|s| frames(s).max(1)),
            state: EndpointState::Waiting,
            pre_roll: VecDeque::new(),
            phrase: Vec::new(),
            phrase_frames: 0,
            pause_frames: 0,
            onset: 0,
            framed: 0,
            remainder: Vec::new(),
        }
    }

    /// Set the energy threshold from ambient noise
    ///
    /// The threshold becomes the ambient RMS scaled by the dynamic energy
    /// ratio, never lower than the configured minimum.
    pub fn calibrate(&mut self, ambient: &[f32]) {
        let ambient_energy = calculate_energy(ambient);
        self.energy_threshold =
            (ambient_energy * DYNAMIC_ENERGY_RATIO).max(self.min_energy_threshold);
        tracing::info!(
            ambient_energy,
            threshold = self.energy_threshold,
            "calibrated for ambient noise"
        );
    }

    /// Feed captured samples, returning every utterance they completed
    pub fn process(&mut self, samples: &[f32]) -> Vec<DetectedPhrase> {
        self.remainder.extend_from_slice(samples);

        let mut completed = Vec::new();
        let whole = self.remainder.len() / self.frame_len * self.frame_len;
        let frames: Vec<f32> = self.remainder.drain(..whole).collect();

        for frame in frames.chunks(self.frame_len) {
            if let Some(utterance) = self.process_frame(frame) {
                completed.push(utterance);
            }
            self.framed += frame.len() as u64;
        }

        completed
    }

    fn process_frame(&mut self, frame: &[f32]) -> Option<DetectedPhrase> {
        let energy = calculate_energy(frame);
        let is_speech = energy > self.energy_threshold;

        match self.state {
            EndpointState::Waiting => {
                if is_speech {
                    self.state = EndpointState::Speaking;
                    self.phrase.clear();
                    for pre in self.pre_roll.drain(..) {
                        self.phrase.extend_from_slice(&pre);
                    }
                    self.phrase.extend_from_slice(frame);
                    self.phrase_frames = 1;
                    self.pause_frames = 0;
                    self.onset = self.framed;
                    tracing::trace!(energy, threshold = self.energy_threshold, "speech onset");
                } else {
                    self.pre_roll.push_back(frame.to_vec());
                    while self.pre_roll.len() > self.pre_roll_frames {
                        self.pre_roll.pop_front();
                    }
                    if self.dynamic {
                        self.adjust_threshold(energy);
                    }
                }
                None
            }
            EndpointState::Speaking => {
                self.phrase.extend_from_slice(frame);
                self.phrase_frames += 1;

                if is_speech {
                    self.pause_frames = 0;
                } else {
                    self.pause_frames += 1;
                }

                let paused = self.pause_frames > self.pause_frames_limit;
                let too_long = self
                    .max_phrase_frames
                    .is_some_and(|max| self.phrase_frames >= max);

                if paused || too_long {
                    self.finish_phrase()
                } else {
                    None
                }
            }
        }
    }

    fn finish_phrase(&mut self) -> Option<DetectedPhrase> {
        let speech_frames = self.phrase_frames - self.pause_frames;
        let mut phrase = std::mem::take(&mut self.phrase);
        let trailing = self.pause_frames;
        self.reset();

        if speech_frames < self.min_phrase_frames {
            tracing::trace!(speech_frames, "phrase too short, discarded");
            return None;
        }

        // Keep at most the non-speaking duration of trailing silence
        let excess = trailing.saturating_sub(self.pre_roll_frames) * self.frame_len;
        phrase.truncate(phrase.len().saturating_sub(excess));

        tracing::debug!(samples = phrase.len(), onset = self.onset, "utterance complete");
        Some(DetectedPhrase {
            samples: phrase,
            onset: self.onset,
        })
    }

    fn adjust_threshold(&mut self, energy: f32) {
        let target = energy * DYNAMIC_ENERGY_RATIO;
        self.energy_threshold = (self.energy_threshold * self.damping_per_frame
            + target * (1.0 - self.damping_per_frame))
            .max(self.min_energy_threshold);
    }

    /// Drop any partial phrase and return to waiting
    pub fn reset(&mut self) {
        self.state = EndpointState::Waiting;
        self.phrase.clear();
        self.pre_roll.clear();
        self.phrase_frames = 0;
        self.pause_frames = 0;
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> EndpointState {
        self.state
    }

    /// Current energy threshold
    #[must_use]
    pub const fn energy_threshold(&self) -> f32 {
        self.energy_threshold
    }

    /// Total samples fed so far, including any partial frame
    #[must_use]
    pub fn samples_seen(&self) -> u64 {
        self.framed + self.remainder.len() as u64
    }

    /// Samples per analysis frame
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        self.frame_len
    }
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
