//! Conversation history and its append-only transcript log

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Who spoke a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// The person at the microphone
    User,
    /// The generation backend
    Assistant,
}

impl Actor {
    /// Label used in prompts and in the transcript log
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "AI",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One turn of the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Speaker
    pub actor: Actor,
    /// What was said
    pub text: String,
}

impl Turn {
    /// Create a turn
    #[must_use]
    pub fn new(actor: Actor, text: impl Into<String>) -> Self {
        Self {
            actor,
            text: text.into(),
        }
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.actor, self.text)
    }
}

/// Ordered, append-only sequence of turns
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    /// Create an empty history
    #[must_use]
    pub const fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Append a turn
    pub fn push(&mut self, actor: Actor, text: impl Into<String>) {
        self.turns.push(Turn::new(actor, text));
    }

    /// All turns in order
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The last `n` turns (fewer if the history is shorter)
    #[must_use]
    pub fn last(&self, n: usize) -> &[Turn] {
        &self.turns[self.turns.len().saturating_sub(n)..]
    }

    /// Number of turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no turn has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Build the single prompt string sent to the generation backend
///
/// Each turn becomes `"{actor}: {text}"`, newline-joined, followed by the
/// assistant cue so the model continues as the assistant.
#[must_use]
pub fn build_prompt(system_prompt: &str, turns: &[Turn]) -> String {
    let conversation = turns
        .iter()
        .map(|t| format!("{}: {}", t.actor, t.text.trim()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{system_prompt}\n\n{conversation}\n{}:",
        Actor::Assistant.label()
    )
}

/// Append-only text log with one `"{actor}: {text}"` line per turn
#[derive(Debug, Clone)]
pub struct TranscriptLog {
    path: PathBuf,
}

impl TranscriptLog {
    /// Log that appends to `path`, creating it on first write
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the log file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append turns and flush
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or written
    pub fn append(&self, turns: &[Turn]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::Transcript(format!("{}: {e}", self.path.display())))?;

        let mut lines = String::new();
        for turn in turns {
            lines.push_str(&turn.to_string());
            lines.push('\n');
        }

        file.write_all(lines.as_bytes())?;
        file.flush()?;

        tracing::debug!(path = %self.path.display(), turns = turns.len(), "transcript appended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_ordered() {
        let mut history = ConversationHistory::new();
        history.push(Actor::User, "Hi");
        history.push(Actor::Assistant, "Hello!");
        history.push(Actor::User, "Bye");

        assert_eq!(history.len(), 3);
        assert_eq!(history.turns()[0], Turn::new(Actor::User, "Hi"));
        assert_eq!(history.last(2)[0], Turn::new(Actor::Assistant, "Hello!"));
        assert_eq!(history.last(10).len(), 3);
    }

    #[test]
    fn test_build_prompt() {
        let turns = vec![
            Turn::new(Actor::User, " Hi "),
            Turn::new(Actor::Assistant, "Hello!"),
            Turn::new(Actor::User, "How are you?"),
        ];

        let prompt = build_prompt("", &turns);
        assert_eq!(prompt, "\n\nUser: Hi\nAI: Hello!\nUser: How are you?\nAI:");

        let prompt = build_prompt("Be brief.", &turns[..1]);
        assert_eq!(prompt, "Be brief.\n\nUser: Hi\nAI:");
    }

    #[test]
    fn test_transcript_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path().join("conversation_log.txt"));

        log.append(&[Turn::new(Actor::User, "Hi"), Turn::new(Actor::Assistant, "Yo.")])
            .unwrap();
        log.append(&[Turn::new(Actor::User, "สวัสดี")]).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content, "User: Hi\nAI: Yo.\nUser: สวัสดี\n");
    }

    #[test]
    fn test_transcript_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path().join("missing").join("log.txt"));

        assert!(matches!(
            log.append(&[Turn::new(Actor::User, "Hi")]),
            Err(Error::Transcript(_))
        ));
    }
}
