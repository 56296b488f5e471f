//! Speech dispatch
//!
//! Each sentence is language-identified and routed to the engine that
//! speaks that language. The networked engine covers one language, the
//! local engine another; anything else is skipped without substitution.
//! Playback is awaited, so consecutive sentences never overlap.

mod detect;
mod google_tts;
mod local_tts;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use detect::{LanguageIdentifier, WhatlangIdentifier};
pub use google_tts::{GoogleTranslateTts, NetworkedSynthesizer, split_text};
pub use local_tts::{CoquiTts, LocalSynthesizer};

use crate::config::SpeechConfig;
use crate::language::LanguageCode;
use crate::segmentation::SentenceSink;
use crate::voice::AudioSink;

/// Engine chosen for a sentence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Networked engine, in its configured language
    Networked(LanguageCode),
    /// Local engine, with its configured voice
    Local(String),
    /// No engine speaks this language
    Unsupported(LanguageCode),
}

/// What happened to one sentence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Audio was synthesized and played to completion
    Spoken(Route),
    /// Language has no engine; nothing was played
    Unsupported(LanguageCode),
    /// Synthesis or playback failed; the error was logged
    Failed(Route),
    /// Sentence had no speakable content
    Empty,
}

/// Pick an engine for a detected language
///
/// Languages compare by primary subtag, so `en-GB` routes like `en`.
#[must_use]
pub fn route(detected: &LanguageCode, config: &SpeechConfig) -> Route {
    if detected.same_language(&config.networked_language) {
        Route::Networked(config.networked_language.clone())
    } else if detected.same_language(&config.local_language) {
        Route::Local(config.local_voice.clone())
    } else {
        Route::Unsupported(detected.clone())
    }
}

/// Pause inserted after a spoken sentence
///
/// `base + per_seven_words * (words / 7)`
#[must_use]
pub fn natural_pause(sentence: &str, config: &SpeechConfig) -> Duration {
    let words = sentence.split_whitespace().count() as u64;
    Duration::from_millis(config.sentence_pause_ms + config.pause_per_seven_words_ms * (words / 7))
}

/// Routes sentences to synthesis engines and plays the result
pub struct SpeechDispatcher {
    config: SpeechConfig,
    identifier: Arc<dyn LanguageIdentifier>,
    networked: Arc<dyn NetworkedSynthesizer>,
    local: Arc<dyn LocalSynthesizer>,
    sink: Arc<dyn AudioSink>,
}

impl SpeechDispatcher {
    /// Create a dispatcher from its capabilities
    #[must_use]
    pub fn new(
        config: SpeechConfig,
        identifier: Arc<dyn LanguageIdentifier>,
        networked: Arc<dyn NetworkedSynthesizer>,
        local: Arc<dyn LocalSynthesizer>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        Self {
            config,
            identifier,
            networked,
            local,
            sink,
        }
    }

    /// Detect the language of `sentence`, using the fallback on failure
    #[must_use]
    pub fn detect(&self, sentence: &str) -> LanguageCode {
        match self.identifier.detect(sentence) {
            Ok(language) => language,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    fallback = %self.config.fallback_language,
                    "language detection failed, using fallback"
                );
                self.config.fallback_language.clone()
            }
        }
    }

    /// Speak one sentence, returning once playback has finished
    ///
    /// Failures are logged and reported in the outcome, never raised.
    pub async fn speak(&self, sentence: &str) -> SpeechOutcome {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            return SpeechOutcome::Empty;
        }

        let language = self.detect(sentence);
        let route = route(&language, &self.config);

        let waveform = match &route {
            Route::Networked(language) => {
                tracing::debug!(language = %language, "speaking with networked engine");
                self.networked.synthesize(sentence, language).await
            }
            Route::Local(voice) => {
                tracing::debug!(voice, "speaking with local engine");
                self.local.synthesize(sentence, voice).await
            }
            Route::Unsupported(language) => {
                tracing::warn!(
                    language = %language,
                    sentence,
                    "no speech engine for language, skipping"
                );
                return SpeechOutcome::Unsupported(language.clone());
            }
        };

        let played = match waveform {
            Ok(waveform) => self.sink.play(waveform).await,
            Err(e) => Err(e),
        };

        if let Err(e) = played {
            tracing::error!(error = %e, route = ?route, "speech failed, skipping sentence");
            return SpeechOutcome::Failed(route);
        }

        let pause = natural_pause(sentence, &self.config);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        SpeechOutcome::Spoken(route)
    }
}

#[async_trait]
impl SentenceSink for SpeechDispatcher {
    async fn sentence(&self, sentence: &str) {
        self.speak(sentence).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::voice::Waveform;
    use crate::{Error, Result};

    /// Reports a fixed language, or fails when none is set
    struct FixedLanguage(Option<&'static str>);

    impl LanguageIdentifier for FixedLanguage {
        fn detect(&self, _text: &str) -> Result<LanguageCode> {
            self.0
                .map(LanguageCode::from)
                .ok_or_else(|| Error::LanguageDetection("undetectable".to_string()))
        }
    }

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    impl Calls {
        fn push(&self, call: String) {
            self.0.lock().unwrap().push(call);
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    /// Both engines; the local one fails on text starting with "fail"
    struct Engines {
        calls: Arc<Calls>,
    }

    #[async_trait]
    impl NetworkedSynthesizer for Engines {
        async fn synthesize(&self, text: &str, language: &LanguageCode) -> Result<Waveform> {
            self.calls.push(format!("networked:{language}:{text}"));
            Ok(Waveform::new(vec![0.0; 160], 16000))
        }
    }

    #[async_trait]
    impl LocalSynthesizer for Engines {
        async fn synthesize(&self, text: &str, voice: &str) -> Result<Waveform> {
            self.calls.push(format!("local:{voice}:{text}"));
            if text.starts_with("fail") {
                return Err(Error::Tts("server down".to_string()));
            }
            Ok(Waveform::new(vec![0.0; 220], 22050))
        }
    }

    struct RecordingSink(Arc<Calls>);

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn play(&self, waveform: Waveform) -> Result<()> {
            self.0.push(format!("play:{}", waveform.sample_rate));
            Ok(())
        }
    }

    fn dispatcher(language: Option<&'static str>) -> (SpeechDispatcher, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let engines = Arc::new(Engines {
            calls: Arc::clone(&calls),
        });
        let dispatcher = SpeechDispatcher::new(
            SpeechConfig::default(),
            Arc::new(FixedLanguage(language)),
            Arc::clone(&engines) as Arc<dyn NetworkedSynthesizer>,
            engines,
            Arc::new(RecordingSink(Arc::clone(&calls))),
        );
        (dispatcher, calls)
    }

    #[test]
    fn test_route() {
        let config = SpeechConfig::default();
        assert_eq!(
            route(&LanguageCode::from("th"), &config),
            Route::Networked(LanguageCode::from("th"))
        );
        assert_eq!(
            route(&LanguageCode::from("en-GB"), &config),
            Route::Local("p225".to_string())
        );
        assert_eq!(
            route(&LanguageCode::from("fr"), &config),
            Route::Unsupported(LanguageCode::from("fr"))
        );
    }

    #[test]
    fn test_natural_pause() {
        let config = SpeechConfig {
            sentence_pause_ms: 300,
            pause_per_seven_words_ms: 200,
            ..SpeechConfig::default()
        };
        assert_eq!(natural_pause("Hi there.", &config), Duration::from_millis(300));
        assert_eq!(
            natural_pause("one two three four five six seven eight", &config),
            Duration::from_millis(500)
        );
        assert!(natural_pause("anything", &SpeechConfig::default()).is_zero());
    }

    #[tokio::test]
    async fn test_thai_uses_networked_engine() {
        let (dispatcher, calls) = dispatcher(Some("th"));
        let outcome = dispatcher.speak("สวัสดีครับ").await;

        assert_eq!(outcome, SpeechOutcome::Spoken(Route::Networked(LanguageCode::from("th"))));
        assert_eq!(calls.take(), vec!["networked:th:สวัสดีครับ", "play:16000"]);
    }

    #[tokio::test]
    async fn test_english_uses_local_engine() {
        let (dispatcher, calls) = dispatcher(Some("en"));
        dispatcher.speak("Hi there.").await;
        assert_eq!(calls.take(), vec!["local:p225:Hi there.", "play:22050"]);
    }

    #[tokio::test]
    async fn test_french_is_skipped_silently() {
        let (dispatcher, calls) = dispatcher(Some("fr"));
        let outcome = dispatcher.speak("Bonjour tout le monde.").await;

        assert_eq!(outcome, SpeechOutcome::Unsupported(LanguageCode::from("fr")));
        assert!(calls.take().is_empty());
    }

    #[tokio::test]
    async fn test_detection_failure_uses_fallback() {
        let (dispatcher, calls) = dispatcher(None);
        dispatcher.speak("???").await;
        assert_eq!(calls.take(), vec!["local:p225:???", "play:22050"]);
    }

    #[tokio::test]
    async fn test_synthesis_failure_skips_playback() {
        let (dispatcher, calls) = dispatcher(Some("en"));
        let outcome = dispatcher.speak("fail now.").await;

        assert_eq!(outcome, SpeechOutcome::Failed(Route::Local("p225".to_string())));
        assert_eq!(calls.take(), vec!["local:p225:fail now."]);

        // Next sentence still goes through
        dispatcher.speak("Again.").await;
        assert_eq!(calls.take(), vec!["local:p225:Again.", "play:22050"]);
    }

    #[tokio::test]
    async fn test_short_english_replies_reach_local_engine() {
        let calls = Arc::new(Calls::default());
        let engines = Arc::new(Engines {
            calls: Arc::clone(&calls),
        });
        let dispatcher = SpeechDispatcher::new(
            SpeechConfig::default(),
            Arc::new(WhatlangIdentifier),
            Arc::clone(&engines) as Arc<dyn NetworkedSynthesizer>,
            engines,
            Arc::new(RecordingSink(Arc::clone(&calls))),
        );

        for sentence in ["Hi there.", "How can I help?", "Hello world.", "Sure."] {
            assert_eq!(
                route(&dispatcher.detect(sentence), &dispatcher.config),
                Route::Local("p225".to_string()),
                "{sentence}"
            );
            let outcome = dispatcher.speak(sentence).await;
            assert_eq!(outcome, SpeechOutcome::Spoken(Route::Local("p225".to_string())));
        }
        assert_eq!(calls.take().len(), 8);
    }

    #[tokio::test]
    async fn test_blank_sentence() {
        let (dispatcher, calls) = dispatcher(Some("en"));
        assert_eq!(dispatcher.speak("   ").await, SpeechOutcome::Empty);
        assert!(calls.take().is_empty());
    }
}
