//! Language identification for synthesized text

use whatlang::Lang;

use crate::language::LanguageCode;
use crate::{Error, Result};

/// Identifies the language a piece of text is written in
pub trait LanguageIdentifier: Send + Sync {
    /// Detect the language of `text`
    ///
    /// # Errors
    ///
    /// Returns error if no language can be determined
    fn detect(&self, text: &str) -> Result<LanguageCode>;
}

/// Statistical trigram detector backed by `whatlang`
///
/// Guesses whatlang itself marks unreliable are reported as failures, so
/// the caller's fallback applies. Short sentences rarely carry enough
/// trigrams for a reliable guess.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhatlangIdentifier;

impl LanguageIdentifier for WhatlangIdentifier {
    fn detect(&self, text: &str) -> Result<LanguageCode> {
        let info = whatlang::detect(text).ok_or_else(|| {
            Error::LanguageDetection(format!("no language detected in {text:?}"))
        })?;

        tracing::trace!(
            lang = info.lang().code(),
            confidence = info.confidence(),
            reliable = info.is_reliable(),
            "language detected"
        );

        if !info.is_reliable() {
            return Err(Error::LanguageDetection(format!(
                "unreliable guess {} for {text:?}",
                info.lang().code()
            )));
        }

        Ok(LanguageCode::from(iso_639_1(info.lang())))
    }
}

/// Two-letter code for the languages we are likely to meet, else ISO 639-3
fn iso_639_1(lang: Lang) -> &'static str {
    match lang {
        Lang::Eng => "en",
        Lang::Tha => "th",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Spa => "es",
        Lang::Ita => "it",
        Lang::Por => "pt",
        Lang::Nld => "nl",
        Lang::Rus => "ru",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        Lang::Cmn => "zh",
        Lang::Vie => "vi",
        other => other.code(),
    }
}
