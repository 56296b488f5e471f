//! Streaming response segmentation
//!
//! Generated text arrives in fragments. Complete sentences are cut out of
//! the accumulated buffer as soon as their terminator is known and handed
//! to a [`SentenceSink`] one at a time, so speech can start before the
//! whole reply exists.

use std::sync::LazyLock;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use regex::Regex;

/// Runs of Latin terminators plus Thai `ฯ` (U+0E2F) and `ๆ` (U+0E46)
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?\x{0E2F}\x{0E46}]+").expect("valid regex"));

/// Receives complete sentences in order
#[async_trait]
pub trait SentenceSink: Send + Sync {
    /// Handle one sentence; must not return before it is fully handled
    async fn sentence(&self, sentence: &str);
}

/// Accumulates fragments of one assistant turn and extracts sentences
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
    response: String,
}

impl SentenceSegmenter {
    /// Create an empty segmenter
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: String::new(),
            response: String::new(),
        }
    }

    /// Add a fragment and return every sentence it completed, in order
    ///
    /// A terminator run that touches the end of the buffer is held back
    /// until more text arrives, since the next fragment may extend it
    /// (`"Wait."` followed by `".."`).
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.response.push_str(chunk);
        self.buffer.push_str(chunk);

        let mut sentences = Vec::new();
        loop {
            let Some(end) = SENTENCE_END
                .find(&self.buffer)
                .map(|m| m.end())
                .filter(|&end| end < self.buffer.len())
            else {
                break;
            };

            let rest = self.buffer.split_off(end);
            let sentence = std::mem::replace(&mut self.buffer, rest);
            if let Some(sentence) = clean(&sentence) {
                sentences.push(sentence);
            }
        }

        sentences
    }

    /// Flush whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        let remaining = std::mem::take(&mut self.buffer);
        clean(&remaining)
    }

    /// Text buffered but not yet emitted
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// The full response received so far
    #[must_use]
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Consume the segmenter, returning the full response
    #[must_use]
    pub fn into_response(self) -> String {
        self.response
    }
}

fn clean(sentence: &str) -> Option<String> {
    let trimmed = sentence.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Split a complete text into sentences in one pass
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for m in SENTENCE_END.find_iter(text) {
        if let Some(sentence) = clean(&text[start..m.end()]) {
            sentences.push(sentence);
        }
        start = m.end();
    }

    if let Some(sentence) = clean(&text[start..]) {
        sentences.push(sentence);
    }

    sentences
}

/// Whether `text` still holds a sentence that should have been emitted
///
/// A buffer may legitimately keep one sentence whose terminator run ends
/// the text, since [`SentenceSegmenter::push`] holds that run back until
/// the next fragment or [`SentenceSegmenter::finish`]. Only a terminator
/// followed by more text counts as complete.
#[must_use]
pub fn has_complete_sentence(text: &str) -> bool {
    SENTENCE_END.find(text).is_some_and(|m| m.end() < text.len())
}

/// Drive a fragment stream through segmentation into `sink`
///
/// `on_fragment` sees every fragment as it arrives (console echo). Each
/// sentence is awaited in `sink` before the stream is polled again.
/// Returns the full response text.
pub async fn stream_sentences<S, F>(stream: S, sink: &dyn SentenceSink, mut on_fragment: F) -> String
where
    S: Stream<Item = String>,
    F: FnMut(&str),
{
    let mut segmenter = SentenceSegmenter::new();
    futures::pin_mut!(stream);

    while let Some(fragment) = stream.next().await {
        on_fragment(&fragment);
        for sentence in segmenter.push(&fragment) {
            sink.sentence(&sentence).await;
        }
    }

    if let Some(tail) = segmenter.finish() {
        sink.sentence(&tail).await;
    }

    segmenter.into_response()
}
