//! Voice processing module
//!
//! Handles audio capture, utterance endpointing, and playback.

mod capture;
mod endpoint;
mod playback;
mod utterance;

pub use capture::{AudioCapture, SAMPLE_RATE};
pub use endpoint::{DetectedPhrase, EndpointState, UtteranceDetector, calculate_energy};
pub use playback::{AudioPlayback, AudioSink, Waveform, decode_mp3, decode_wav, resample};
pub use utterance::Utterance;
