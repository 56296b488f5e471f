//! Configuration management for Lookchill
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! environment variables.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;

use crate::language::LanguageCode;
use crate::{Error, Result};

/// Default Google web speech endpoint
const DEFAULT_SPEECH_ENDPOINT: &str = "http://www.google.com/speech-api/v2/recognize";

/// Default Google Translate TTS endpoint
const DEFAULT_TTS_ENDPOINT: &str = "https://translate.google.com/translate_tts";

/// Lookchill configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Speech recognition
    pub recognition: RecognitionConfig,

    /// Microphone listening and endpointing
    pub listener: ListenerConfig,

    /// Text generation backend
    pub generation: GenerationConfig,

    /// Speech synthesis routing
    pub speech: SpeechConfig,

    /// Transcript log
    pub transcript: TranscriptConfig,

    /// Data directory (transcript default location)
    #[serde(skip)]
    pub data_dir: PathBuf,
}

/// Speech recognition configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Candidate languages, tried in this order until one has succeeded
    pub languages: Vec<LanguageCode>,

    /// Recognition endpoint URL
    pub endpoint: String,

    /// API key (from `GOOGLE_SPEECH_API_KEY`)
    #[serde(skip)]
    pub api_key: Option<SecretString>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            languages: vec![LanguageCode::from("th-TH"), LanguageCode::from("en-US")],
            endpoint: DEFAULT_SPEECH_ENDPOINT.to_string(),
            api_key: None,
        }
    }
}

/// Microphone listening configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Seconds of quiet that end an utterance
    pub pause_threshold_secs: f32,

    /// Minimum seconds of speech for an utterance to count
    pub phrase_threshold_secs: f32,

    /// Seconds of silence kept around each utterance
    pub non_speaking_duration_secs: f32,

    /// Force an utterance to end after this many seconds
    pub phrase_time_limit_secs: Option<f32>,

    /// Seconds of ambient audio sampled at start
    pub calibration_secs: f32,

    /// Track ambient noise while waiting for speech
    pub dynamic_energy_threshold: bool,

    /// Lowest RMS energy treated as speech
    pub energy_threshold: f32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            pause_threshold_secs: 0.8,
            phrase_threshold_secs: 0.3,
            non_speaking_duration_secs: 0.5,
            phrase_time_limit_secs: None,
            calibration_secs: 1.0,
            dynamic_energy_threshold: true,
            energy_threshold: 0.03,
        }
    }
}

/// Generation backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Ollama base URL
    pub url: String,

    /// Model name
    pub model: String,

    /// Text placed before the conversation in every prompt
    pub system_prompt: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            system_prompt: String::new(),
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Language spoken by the networked engine
    pub networked_language: LanguageCode,

    /// Language spoken by the local engine
    pub local_language: LanguageCode,

    /// Language assumed when detection fails
    pub fallback_language: LanguageCode,

    /// Networked TTS endpoint
    pub networked_endpoint: String,

    /// Local TTS server URL
    pub local_url: String,

    /// Local engine voice (speaker id)
    pub local_voice: String,

    /// Pause after every sentence, in milliseconds
    pub sentence_pause_ms: u64,

    /// Extra pause per seven words of a sentence, in milliseconds
    pub pause_per_seven_words_ms: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            networked_language: LanguageCode::from("th"),
            local_language: LanguageCode::from("en"),
            fallback_language: LanguageCode::from("en"),
            networked_endpoint: DEFAULT_TTS_ENDPOINT.to_string(),
            local_url: "http://localhost:5002".to_string(),
            local_voice: "p225".to_string(),
            sentence_pause_ms: 0,
            pause_per_seven_words_ms: 0,
        }
    }
}

/// Transcript log configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    /// Log file path; defaults to `conversation_log.txt` in the data dir
    pub path: Option<PathBuf>,
}

/// Default config file location (`~/.config/lookchill/config.toml` on Linux)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "lookchill", "lookchill")
        .map(|d| d.config_dir().join("config.toml"))
}

/// Data directory, created if needed
#[must_use]
pub fn data_dir() -> PathBuf {
    let data_dir = directories::ProjectDirs::from("dev", "lookchill", "lookchill")
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().to_path_buf());

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::warn!(
            path = %data_dir.display(),
            error = %e,
            "failed to create data directory"
        );
    }

    data_dir
}

impl Config {
    /// Load configuration
    ///
    /// An explicit `path` must exist. Without one, the default config file
    /// is read if present.
    ///
    /// # Errors
    ///
    /// Returns error if a config file cannot be read or parsed
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.data_dir = data_dir();
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML config file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("GOOGLE_SPEECH_API_KEY") {
            self.recognition.api_key = Some(SecretString::from(key));
        }
        if let Some(langs) = lookup("LOOKCHILL_LANGUAGES") {
            self.recognition.languages = langs
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(LanguageCode::from)
                .collect();
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            self.generation.url = url;
        }
        if let Some(model) = lookup("LOOKCHILL_MODEL") {
            self.generation.model = model;
        }
        if let Some(url) = lookup("LOOKCHILL_LOCAL_TTS_URL") {
            self.speech.local_url = url;
        }
        if let Some(voice) = lookup("LOOKCHILL_LOCAL_VOICE") {
            self.speech.local_voice = voice;
        }
        if let Some(path) = lookup("LOOKCHILL_TRANSCRIPT") {
            self.transcript.path = Some(PathBuf::from(path));
        }
    }

    /// Check values that would make the loop misbehave
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.recognition.languages.is_empty() {
            return Err(Error::Config(
                "at least one recognition language is required".to_string(),
            ));
        }
        let listener = &self.listener;
        if listener.pause_threshold_secs <= 0.0 {
            return Err(Error::Config("pause threshold must be positive".to_string()));
        }
        if listener.phrase_threshold_secs < 0.0 || listener.non_speaking_duration_secs < 0.0 {
            return Err(Error::Config(
                "phrase threshold and non-speaking duration must not be negative".to_string(),
            ));
        }
        if listener.non_speaking_duration_secs > listener.pause_threshold_secs {
            return Err(Error::Config(
                "non-speaking duration cannot exceed the pause threshold".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved transcript log path
    #[must_use]
    pub fn transcript_path(&self) -> PathBuf {
        self.transcript
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("conversation_log.txt"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn test_defaults_match_listening_behaviour() {
        let config = Config::default();
        assert_eq!(
            config.recognition.languages,
            vec![LanguageCode::from("th-TH"), LanguageCode::from("en-US")]
        );
        assert!((config.listener.pause_threshold_secs - 0.8).abs() < f32::EPSILON);
        assert!((config.listener.phrase_threshold_secs - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.generation.model, "llama3");
        assert_eq!(config.speech.local_voice, "p225");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [recognition]
            languages = ["en-US", "ja-JP"]

            [speech]
            networked_language = "ja"
            sentence_pause_ms = 300
            "#,
        )
        .unwrap();

        assert_eq!(config.recognition.languages.len(), 2);
        assert_eq!(config.speech.networked_language, LanguageCode::from("ja"));
        assert_eq!(config.speech.local_language, LanguageCode::from("en"));
        assert_eq!(config.speech.sentence_pause_ms, 300);
        assert_eq!(config.generation.url, "http://localhost:11434");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("GOOGLE_SPEECH_API_KEY", "secret"),
            ("LOOKCHILL_LANGUAGES", "en-US, th-TH ,"),
            ("OLLAMA_URL", "http://gpu-box:11434"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(ToString::to_string));

        assert_eq!(
            config.recognition.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("secret".to_string())
        );
        assert_eq!(
            config.recognition.languages,
            vec![LanguageCode::from("en-US"), LanguageCode::from("th-TH")]
        );
        assert_eq!(config.generation.url, "http://gpu-box:11434");
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.recognition.languages.clear();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.listener.non_speaking_duration_secs = 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[transcript]\npath = \"/tmp/log.txt\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.transcript_path(), PathBuf::from("/tmp/log.txt"));

        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
