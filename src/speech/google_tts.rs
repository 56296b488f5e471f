//! Networked synthesis via the Google Translate TTS endpoint

use async_trait::async_trait;

use crate::language::LanguageCode;
use crate::voice::{Waveform, decode_mp3};
use crate::{Error, Result};

/// Longest text the endpoint accepts per request, in characters
const MAX_CHUNK_CHARS: usize = 100;

/// Speech synthesis that needs the network, keyed by language
#[async_trait]
pub trait NetworkedSynthesizer: Send + Sync {
    /// Synthesize `text` spoken in `language`
    async fn synthesize(&self, text: &str, language: &LanguageCode) -> Result<Waveform>;
}

/// Google Translate TTS client returning decoded MP3 audio
pub struct GoogleTranslateTts {
    client: reqwest::Client,
    endpoint: String,
}

impl GoogleTranslateTts {
    /// Create a client for `endpoint`
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    async fn fetch(
        &self,
        chunk: &str,
        language: &LanguageCode,
        index: usize,
        total: usize,
    ) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", language.as_str()),
                ("q", chunk),
                ("idx", &index.to_string()),
                ("total", &total.to_string()),
                ("textlen", &chunk.chars().count().to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("Google TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl NetworkedSynthesizer for GoogleTranslateTts {
    async fn synthesize(&self, text: &str, language: &LanguageCode) -> Result<Waveform> {
        let chunks = split_text(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(Error::Tts("nothing to synthesize".to_string()));
        }

        let mut waveform = Waveform::new(Vec::new(), 0);
        for (index, chunk) in chunks.iter().enumerate() {
            let mp3 = self.fetch(chunk, language, index, chunks.len()).await?;
            waveform.append(decode_mp3(&mp3)?)?;
        }

        tracing::debug!(
            language = %language,
            chunks = chunks.len(),
            duration_ms = waveform.duration().as_millis(),
            "networked synthesis complete"
        );
        Ok(waveform)
    }
}

/// Split text into pieces of at most `max_chars` characters
///
/// Breaks at the last whitespace inside the limit. Text with no whitespace
/// (Thai is written without spaces between words) is cut at the limit.
#[must_use]
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        if rest.chars().count() <= max_chars {
            chunks.push(rest.to_string());
            break;
        }

        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map_or(rest.len(), |(i, _)| i);
        let cut = rest[..limit]
            .rfind(char::is_whitespace)
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        rest = rest[cut..].trim_start();
    }

    chunks
}
