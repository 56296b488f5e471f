//! Shared test utilities
//!
//! Mock capabilities that append to one shared event log, so tests can
//! assert on the global order of recognition, generation and playback.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use lookchill::config::SpeechConfig;
use lookchill::conversation::Turn;
use lookchill::language::LanguageCode;
use lookchill::recognition::{RecognitionOutcome, SpeechRecognizer};
use lookchill::speech::{
    LanguageIdentifier, LocalSynthesizer, NetworkedSynthesizer, SpeechDispatcher,
};
use lookchill::voice::{AudioSink, Utterance, Waveform};
use lookchill::{Error, ResponseGenerator, Result, Session};

/// Ordered log of everything the mocks were asked to do
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().expect("events lock").push(event.into());
    }

    #[must_use]
    pub fn all(&self) -> Vec<String> {
        self.0.lock().expect("events lock").clone()
    }

    /// Position of the first event starting with `prefix`
    #[must_use]
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.all().iter().position(|e| e.starts_with(prefix))
    }
}

/// Understands only `language`; utterance N is heard as `transcripts[N]`
pub struct MockRecognizer {
    pub events: Events,
    pub language: LanguageCode,
    pub transcripts: Vec<&'static str>,
    pub latency: Duration,
}

#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    async fn recognize(
        &self,
        utterance: &Utterance,
        language: &LanguageCode,
    ) -> Result<RecognitionOutcome> {
        self.events
            .push(format!("recognize:{}:{language}", utterance.sequence));
        tokio::time::sleep(self.latency).await;

        if language != &self.language {
            return Ok(RecognitionOutcome::NotUnderstood);
        }
        let index = usize::try_from(utterance.sequence).unwrap_or(usize::MAX);
        self.transcripts.get(index).map_or_else(
            || Err(Error::Recognition("no transcript scripted".to_string())),
            |text| Ok(RecognitionOutcome::Understood((*text).to_string())),
        )
    }
}

/// Streams a fixed reply, one fragment every few milliseconds
pub struct MockGenerator {
    pub events: Events,
    pub fragments: Vec<&'static str>,
}

impl ResponseGenerator for MockGenerator {
    fn generate(&self, turns: &[Turn]) -> BoxStream<'static, String> {
        let last = turns.last().map(|t| t.text.clone()).unwrap_or_default();
        self.events.push(format!("generate:{last}"));

        stream::iter(self.fragments.clone())
            .then(|fragment| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                fragment.to_string()
            })
            .boxed()
    }
}

/// Thai script → `th`, text mentioning "Bonjour" → `fr`, "???" fails,
/// anything else `en`
pub struct MockIdentifier;

impl LanguageIdentifier for MockIdentifier {
    fn detect(&self, text: &str) -> Result<LanguageCode> {
        if text.contains("???") {
            return Err(Error::LanguageDetection("undetectable".to_string()));
        }
        let code = if text.chars().any(|c| ('\u{0E00}'..='\u{0E7F}').contains(&c)) {
            "th"
        } else if text.contains("Bonjour") {
            "fr"
        } else {
            "en"
        };
        Ok(LanguageCode::from(code))
    }
}

/// Both synthesis engines, returning silence
pub struct MockSynthesizer {
    pub events: Events,
}

#[async_trait]
impl NetworkedSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str, language: &LanguageCode) -> Result<Waveform> {
        self.events.push(format!("networked:{language}:{text}"));
        Ok(Waveform::new(vec![0.0; 2400], 24000))
    }
}

#[async_trait]
impl LocalSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Waveform> {
        self.events.push(format!("local:{voice}:{text}"));
        Ok(Waveform::new(vec![0.0; 2205], 22050))
    }
}

/// Records each playback and takes a little time to "play"
pub struct MockSink {
    pub events: Events,
}

#[async_trait]
impl AudioSink for MockSink {
    async fn play(&self, waveform: Waveform) -> Result<()> {
        self.events.push(format!("play:{}", waveform.sample_rate));
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.events.push("played");
        Ok(())
    }
}

/// Dispatcher wired to the mocks with default routing (`th` networked,
/// `en` local)
#[must_use]
pub fn mock_dispatcher(events: &Events) -> SpeechDispatcher {
    SpeechDispatcher::new(
        SpeechConfig::default(),
        Arc::new(MockIdentifier),
        Arc::new(MockSynthesizer {
            events: events.clone(),
        }),
        Arc::new(MockSynthesizer {
            events: events.clone(),
        }),
        Arc::new(MockSink {
            events: events.clone(),
        }),
    )
}

/// Session over the mocks, understanding English only
#[must_use]
pub fn mock_session(
    events: &Events,
    transcripts: Vec<&'static str>,
    fragments: Vec<&'static str>,
) -> Session {
    Session::new(
        Arc::new(MockRecognizer {
            events: events.clone(),
            language: LanguageCode::from("en-US"),
            transcripts,
            latency: Duration::from_millis(5),
        }),
        Arc::new(MockGenerator {
            events: events.clone(),
            fragments,
        }),
        Arc::new(mock_dispatcher(events)),
        vec![LanguageCode::from("th-TH"), LanguageCode::from("en-US")],
    )
}

/// Half a second of a quiet tone
#[must_use]
pub fn utterance(sequence: u64) -> Utterance {
    Utterance::new(sequence, vec![0.1; 8000], 16000)
}
