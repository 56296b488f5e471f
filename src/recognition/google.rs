//! Google web speech API client

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{RecognitionOutcome, SpeechRecognizer};
use crate::language::LanguageCode;
use crate::voice::Utterance;
use crate::{Error, Result};

/// One line of the newline-delimited recognition response
#[derive(serde::Deserialize)]
struct SpeechResponse {
    #[serde(default)]
    result: Vec<SpeechResult>,
}

#[derive(serde::Deserialize)]
struct SpeechResult {
    #[serde(default)]
    alternative: Vec<SpeechAlternative>,
}

#[derive(serde::Deserialize)]
struct SpeechAlternative {
    transcript: String,
    confidence: Option<f64>,
}

/// Recognizes speech through the Google web speech endpoint
pub struct GoogleSpeechRecognizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
}

impl GoogleSpeechRecognizer {
    /// Create a recognizer for `endpoint`
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(endpoint: String, api_key: SecretString) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "Google speech API key required for recognition".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl SpeechRecognizer for GoogleSpeechRecognizer {
    async fn recognize(
        &self,
        utterance: &Utterance,
        language: &LanguageCode,
    ) -> Result<RecognitionOutcome> {
        let audio = utterance.to_pcm16_le();
        tracing::debug!(
            audio_bytes = audio.len(),
            language = %language,
            "starting Google speech recognition"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[
                ("client", "chromium"),
                ("lang", language.as_str()),
                ("key", self.api_key.expose_secret()),
                ("pFilter", "0"),
            ])
            .header(
                "Content-Type",
                format!("audio/l16; rate={}", utterance.sample_rate),
            )
            .body(audio)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "speech request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "speech API error");
            return Err(Error::Recognition(format!(
                "speech API error {status}: {body}"
            )));
        }

        let body = response.text().await?;
        parse_response(&body)
    }
}

/// Parse a newline-delimited recognition response
///
/// The service sends an empty `{"result":[]}` line first; the first line
/// with results carries the transcription.
///
/// # Errors
///
/// Returns error if a non-empty line is not valid JSON
pub fn parse_response(body: &str) -> Result<RecognitionOutcome> {
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let parsed: SpeechResponse = serde_json::from_str(line)
            .map_err(|e| Error::Recognition(format!("malformed speech response: {e}")))?;

        let Some(result) = parsed.result.into_iter().next() else {
            continue;
        };

        let best = if result.alternative.iter().any(|a| a.confidence.is_some()) {
            result.alternative.into_iter().max_by(|a, b| {
                a.confidence
                    .unwrap_or(0.0)
                    .total_cmp(&b.confidence.unwrap_or(0.0))
            })
        } else {
            result.alternative.into_iter().next()
        };

        return Ok(best
            .map(|a| a.transcript.trim().to_string())
            .filter(|t| !t.is_empty())
            .map_or(RecognitionOutcome::NotUnderstood, RecognitionOutcome::Understood));
    }

    Ok(RecognitionOutcome::NotUnderstood)
}
