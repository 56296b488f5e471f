//! Processing context: one utterance from recognition to spoken reply
//!
//! A [`Session`] owns the conversation state (language preference and
//! history) and is driven by exactly one task, so turns are appended
//! without locking.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;

use crate::conversation::{Actor, ConversationHistory, TranscriptLog};
use crate::generation::ResponseGenerator;
use crate::language::{LanguageCode, LanguagePreference};
use crate::recognition::{self, Recognized, SpeechRecognizer};
use crate::segmentation::{SentenceSink, stream_sentences};
use crate::voice::Utterance;

/// Width of the console separator printed after each exchange
const SEPARATOR_WIDTH: usize = 60;

/// Consumes utterances one at a time
#[async_trait]
pub trait UtteranceHandler: Send {
    /// Fully process one utterance before returning
    async fn handle(&mut self, utterance: Utterance);
}

/// How one utterance ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    /// Recognized, answered and spoken
    Completed {
        /// Recognized user text
        user: String,
        /// Language it was recognized in
        language: LanguageCode,
        /// Full assistant reply
        reply: String,
    },
    /// No candidate language understood the audio
    NotUnderstood,
    /// Recognition failed hard; the utterance was dropped
    Failed,
}

/// Conversation state plus the capabilities one exchange needs
pub struct Session {
    recognizer: Arc<dyn SpeechRecognizer>,
    generator: Arc<dyn ResponseGenerator>,
    speaker: Arc<dyn SentenceSink>,
    preference: LanguagePreference,
    history: ConversationHistory,
    transcript: Option<TranscriptLog>,
    echo: bool,
}

impl Session {
    /// Create a session trying `languages` in order until one succeeds
    #[must_use]
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        generator: Arc<dyn ResponseGenerator>,
        speaker: Arc<dyn SentenceSink>,
        languages: Vec<LanguageCode>,
    ) -> Self {
        Self {
            recognizer,
            generator,
            speaker,
            preference: LanguagePreference::new(languages),
            history: ConversationHistory::new(),
            transcript: None,
            echo: false,
        }
    }

    /// Append every completed exchange to `log`
    #[must_use]
    pub fn with_transcript(mut self, log: TranscriptLog) -> Self {
        self.transcript = Some(log);
        self
    }

    /// Print exchanges to stdout as they happen
    #[must_use]
    pub const fn with_console(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Conversation so far
    #[must_use]
    pub const fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Language preference state
    #[must_use]
    pub const fn preference(&self) -> &LanguagePreference {
        &self.preference
    }

    /// Recognize, answer and speak one utterance
    pub async fn process(&mut self, utterance: &Utterance) -> Exchange {
        let recognized = recognition::recognize(
            self.recognizer.as_ref(),
            &mut self.preference,
            utterance,
        )
        .await;

        match recognized {
            Ok(Some(Recognized { text, language })) => {
                let reply = self.respond(&text).await;
                Exchange::Completed {
                    user: text,
                    language,
                    reply,
                }
            }
            Ok(None) => {
                tracing::info!(sequence = utterance.sequence, "could not understand audio");
                Exchange::NotUnderstood
            }
            Err(e) => {
                tracing::error!(
                    sequence = utterance.sequence,
                    error = %e,
                    "recognition failed, dropping utterance"
                );
                Exchange::Failed
            }
        }
    }

    /// Answer recognized user text, speaking the reply sentence by sentence
    ///
    /// Returns the full reply. Generation failures arrive as sentinel text
    /// and are spoken like any other reply.
    pub async fn respond(&mut self, text: &str) -> String {
        self.history.push(Actor::User, text);

        if self.echo {
            println!(
                "\n[{}]\n{}: {text}",
                chrono::Local::now().format("%H:%M:%S"),
                Actor::User
            );
            print!("{}: ", Actor::Assistant);
            let _ = std::io::stdout().flush();
        }

        let stream = self.generator.generate(self.history.turns());
        let echo = self.echo;
        let reply = stream_sentences(stream, self.speaker.as_ref(), |fragment| {
            if echo {
                print!("{fragment}");
                let _ = std::io::stdout().flush();
            }
        })
        .await;

        self.history.push(Actor::Assistant, reply.trim());

        if let Some(log) = &self.transcript {
            if let Err(e) = log.append(self.history.last(2)) {
                tracing::error!(error = %e, "failed to write transcript");
            }
        }

        if self.echo {
            println!("\n{}", "-".repeat(SEPARATOR_WIDTH));
        }

        reply
    }
}

#[async_trait]
impl UtteranceHandler for Session {
    async fn handle(&mut self, utterance: Utterance) {
        let exchange = self.process(&utterance).await;
        tracing::debug!(
            sequence = utterance.sequence,
            since_speech_ms = utterance.started_at.elapsed().as_millis(),
            completed = matches!(exchange, Exchange::Completed { .. }),
            "utterance processed"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::stream::{self, BoxStream, StreamExt};

    use super::*;
    use crate::conversation::Turn;
    use crate::recognition::RecognitionOutcome;
    use crate::{Error, Result};

    struct Scripted {
        outcome: fn(&LanguageCode) -> Result<RecognitionOutcome>,
    }

    #[async_trait]
    impl SpeechRecognizer for Scripted {
        async fn recognize(
            &self,
            _utterance: &Utterance,
            language: &LanguageCode,
        ) -> Result<RecognitionOutcome> {
            (self.outcome)(language)
        }
    }

    /// Replies with fixed fragments and records the turns it was given
    struct Reply {
        fragments: Vec<&'static str>,
        seen: Mutex<Vec<Vec<Turn>>>,
    }

    impl ResponseGenerator for Reply {
        fn generate(&self, turns: &[Turn]) -> BoxStream<'static, String> {
            self.seen.lock().unwrap().push(turns.to_vec());
            stream::iter(self.fragments.iter().map(ToString::to_string).collect::<Vec<_>>()).boxed()
        }
    }

    #[derive(Default)]
    struct Spoken(Mutex<Vec<String>>);

    #[async_trait]
    impl SentenceSink for Spoken {
        async fn sentence(&self, sentence: &str) {
            self.0.lock().unwrap().push(sentence.to_string());
        }
    }

    fn english_only(language: &LanguageCode) -> Result<RecognitionOutcome> {
        if language.as_str() == "en-US" {
            Ok(RecognitionOutcome::Understood("Hi".to_string()))
        } else {
            Ok(RecognitionOutcome::NotUnderstood)
        }
    }

    fn session(
        outcome: fn(&LanguageCode) -> Result<RecognitionOutcome>,
    ) -> (Session, Arc<Reply>, Arc<Spoken>) {
        let generator = Arc::new(Reply {
            fragments: vec!["Hi there. ", "How can I help?"],
            seen: Mutex::new(Vec::new()),
        });
        let spoken = Arc::new(Spoken::default());
        let session = Session::new(
            Arc::new(Scripted { outcome }),
            Arc::clone(&generator) as Arc<dyn ResponseGenerator>,
            Arc::clone(&spoken) as Arc<dyn SentenceSink>,
            vec![LanguageCode::from("th-TH"), LanguageCode::from("en-US")],
        );
        (session, generator, spoken)
    }

    fn utterance() -> Utterance {
        Utterance::new(0, vec![0.0; 1600], 16000)
    }

    #[tokio::test]
    async fn test_completed_exchange() {
        let (mut session, generator, spoken) = session(english_only);

        let exchange = session.process(&utterance()).await;
        assert_eq!(
            exchange,
            Exchange::Completed {
                user: "Hi".to_string(),
                language: LanguageCode::from("en-US"),
                reply: "Hi there. How can I help?".to_string(),
            }
        );

        assert_eq!(*spoken.0.lock().unwrap(), vec!["Hi there.", "How can I help?"]);
        assert_eq!(
            session.history().turns(),
            &[
                Turn::new(Actor::User, "Hi"),
                Turn::new(Actor::Assistant, "Hi there. How can I help?"),
            ]
        );

        // Backend saw the user turn before the reply existed
        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen[0], vec![Turn::new(Actor::User, "Hi")]);
        assert_eq!(
            session.preference().last_success(),
            Some(&LanguageCode::from("en-US"))
        );
    }

    #[tokio::test]
    async fn test_not_understood_leaves_history_alone() {
        let (mut session, generator, spoken) = session(|_| Ok(RecognitionOutcome::NotUnderstood));

        assert_eq!(session.process(&utterance()).await, Exchange::NotUnderstood);
        assert!(session.history().is_empty());
        assert!(generator.seen.lock().unwrap().is_empty());
        assert!(spoken.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recognition_failure_drops_utterance() {
        let (mut session, _, spoken) =
            session(|_| Err(Error::Recognition("service unavailable".to_string())));

        assert_eq!(session.process(&utterance()).await, Exchange::Failed);
        assert!(session.history().is_empty());
        assert!(spoken.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transcript_gets_both_turns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversation_log.txt");
        let (session, _, _) = session(english_only);
        let mut session = session.with_transcript(TranscriptLog::new(&path));

        session.process(&utterance()).await;
        session.process(&utterance()).await;

        let log = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            log,
            "User: Hi\nAI: Hi there. How can I help?\nUser: Hi\nAI: Hi there. How can I help?\n"
        );
    }

    #[tokio::test]
    async fn test_transcript_failure_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _, _) = session(english_only);
        // A directory cannot be opened for append
        let mut session = session.with_transcript(TranscriptLog::new(dir.path()));

        session.process(&utterance()).await;
        assert_eq!(session.history().len(), 2);
    }
}
