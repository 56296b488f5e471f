//! Lookchill - bilingual voice conversation loop
//!
//! Listens on the microphone, recognizes speech in whichever candidate
//! language understands it, streams a reply from a local model and speaks
//! it back sentence by sentence.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  utterances  ┌──────────────────────────────────────┐
//! │ capture      │ ───────────▶ │ session (one utterance at a time)    │
//! │ thread       │   channel    │  recognition → generation → segments │
//! │ (scheduler)  │              │            → speech dispatcher       │
//! └──────────────┘              └──────────────────────────────────────┘
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod generation;
pub mod language;
pub mod recognition;
pub mod scheduler;
pub mod segmentation;
pub mod session;
pub mod speech;
pub mod voice;

pub use config::Config;
pub use conversation::{Actor, ConversationHistory, TranscriptLog, Turn};
pub use error::{Error, Result};
pub use generation::{OllamaGenerator, ResponseGenerator};
pub use language::{LanguageCode, LanguagePreference};
pub use recognition::{RecognitionOutcome, SpeechRecognizer};
pub use scheduler::{BackgroundListener, ListenerState};
pub use segmentation::{SentenceSegmenter, SentenceSink};
pub use session::{Exchange, Session, UtteranceHandler};
pub use speech::{SpeechDispatcher, SpeechOutcome};
