//! Error types for Lookchill

use thiserror::Error;

/// Result type alias for Lookchill operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice conversation loop
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or codec error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech recognition service failure (not a "not understood" miss)
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Language identification error
    #[error("language detection error: {0}")]
    LanguageDetection(String),

    /// Transcript log error
    #[error("transcript error: {0}")]
    Transcript(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
