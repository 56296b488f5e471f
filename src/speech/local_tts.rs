//! Local synthesis via a Coqui TTS server

use async_trait::async_trait;

use crate::voice::{Waveform, decode_wav};
use crate::{Error, Result};

/// Speech synthesis running on this machine, keyed by voice
#[async_trait]
pub trait LocalSynthesizer: Send + Sync {
    /// Synthesize `text` with the given voice identity
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Waveform>;
}

/// Client for `tts-server` (`GET /api/tts`) returning WAV audio
pub struct CoquiTts {
    client: reqwest::Client,
    base_url: String,
}

impl CoquiTts {
    /// Create a client for the server at `base_url`
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl LocalSynthesizer for CoquiTts {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Waveform> {
        let response = self
            .client
            .get(format!("{}/api/tts", self.base_url))
            .query(&[("text", text), ("speaker_id", voice)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("local TTS error {status}: {body}")));
        }

        let wav = response.bytes().await?;
        let waveform = decode_wav(&wav)?;

        tracing::debug!(
            voice,
            sample_rate = waveform.sample_rate,
            duration_ms = waveform.duration().as_millis(),
            "local synthesis complete"
        );
        Ok(waveform)
    }
}
