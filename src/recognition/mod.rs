//! Multi-language speech recognition
//!
//! Each utterance is tried against the recognition service once per
//! candidate language, most promising language first, until one of them
//! understands it.

mod google;

use async_trait::async_trait;

pub use google::GoogleSpeechRecognizer;

use crate::Result;
use crate::language::{LanguageCode, LanguagePreference};
use crate::voice::Utterance;

/// Outcome of one recognition request that reached the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    /// Speech transcribed in the hinted language
    Understood(String),
    /// The service could not make sense of the audio in that language
    NotUnderstood,
}

/// Speech recognition capability
///
/// Hard failures (network, malformed responses) are returned as `Err`.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Recognize an utterance with a language hint
    async fn recognize(
        &self,
        utterance: &Utterance,
        language: &LanguageCode,
    ) -> Result<RecognitionOutcome>;
}

/// Text recognized from an utterance together with its language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognized {
    /// Transcribed text
    pub text: String,
    /// Language that produced the transcription
    pub language: LanguageCode,
}

/// Try every candidate language in preference order until one succeeds
///
/// On success the language's count and last-success marker are updated and
/// the remaining languages are skipped. `Ok(None)` means no language
/// understood the utterance, which is not an error.
///
/// # Errors
///
/// Returns the first hard failure from the recognizer; later languages are
/// not tried.
pub async fn recognize(
    recognizer: &dyn SpeechRecognizer,
    preference: &mut LanguagePreference,
    utterance: &Utterance,
) -> Result<Option<Recognized>> {
    for language in preference.ordered() {
        tracing::debug!(
            sequence = utterance.sequence,
            language = %language,
            "attempting recognition"
        );

        match recognizer.recognize(utterance, &language).await? {
            RecognitionOutcome::Understood(text) => {
                preference.record_success(&language);
                tracing::info!(language = %language, transcript = %text, "speech recognized");
                return Ok(Some(Recognized { text, language }));
            }
            RecognitionOutcome::NotUnderstood => {
                tracing::trace!(language = %language, "not understood, trying next language");
            }
        }
    }

    tracing::debug!(
        sequence = utterance.sequence,
        "utterance not understood in any language"
    );
    Ok(None)
}
