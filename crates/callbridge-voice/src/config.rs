use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// How the model service decides that the caller finished a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDetection {
    /// The service runs voice-activity detection and ends turns itself.
    #[default]
    ServerVad,
    /// Turns end only when the client commits the input buffer.
    None,
}

fn default_url() -> String {
    "wss://api.openai.com/v1/realtime".to_string()
}

fn default_model() -> String {
    "gpt-realtime".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_instructions() -> String {
    "You are the phone assistant for an event venue. Keep answers short and \
     conversational. Use the tools for event dates, ticket prices, purchases, \
     messages and questions about the venue; never guess facts the tools do \
     not give you."
        .to_string()
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_commit_threshold_bytes() -> usize {
    // One second of 16 kHz PCM16 mono.
    32_000
}

fn default_keepalive_secs() -> u64 {
    20
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_connect_attempts() -> u32 {
    3
}

fn default_reconnect_backoff_ms() -> u64 {
    500
}

/// Connection and session settings for the speech model service.
#[derive(Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Appended to the URL as `?model=` when not empty.
    #[serde(default = "default_model")]
    pub model: String,
    /// Default voice; a call may override it.
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_instructions")]
    pub instructions: String,
    #[serde(default)]
    pub turn_detection: TurnDetection,
    #[serde(default = "default_sample_rate")]
    pub input_sample_rate: u32,
    #[serde(default = "default_sample_rate")]
    pub output_sample_rate: u32,
    /// Uncommitted input after which the client commits on its own.
    /// Zero disables the backstop.
    #[serde(default = "default_commit_threshold_bytes")]
    pub commit_threshold_bytes: usize,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Connect attempts per call before the caller is handed to a human.
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    /// Linear backoff step between attempts.
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            api_key: String::new(),
            model: default_model(),
            voice: default_voice(),
            instructions: default_instructions(),
            turn_detection: TurnDetection::default(),
            input_sample_rate: default_sample_rate(),
            output_sample_rate: default_sample_rate(),
            commit_threshold_bytes: default_commit_threshold_bytes(),
            keepalive_secs: default_keepalive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_connect_attempts: default_max_connect_attempts(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

impl fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("turn_detection", &self.turn_detection)
            .field("input_sample_rate", &self.input_sample_rate)
            .field("output_sample_rate", &self.output_sample_rate)
            .field("commit_threshold_bytes", &self.commit_threshold_bytes)
            .field("keepalive_secs", &self.keepalive_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("max_connect_attempts", &self.max_connect_attempts)
            .field("reconnect_backoff_ms", &self.reconnect_backoff_ms)
            .finish()
    }
}

impl RealtimeConfig {
    /// The WebSocket URL to dial, including the model selector.
    pub fn endpoint(&self) -> String {
        if self.model.is_empty() || self.url.contains("model=") {
            return self.url.clone();
        }
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}model={}", self.url, sep, self.model)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }

    /// Delay before connect attempt `attempt` (1-based). The first attempt
    /// is immediate.
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms * attempt.saturating_sub(1) as u64)
    }
}

fn default_stt_timeout_secs() -> u64 {
    120
}

/// Settings for the offline speech-to-text binary used on voicemails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Path to the model file. Empty disables transcription.
    #[serde(default)]
    pub model_path: PathBuf,
    #[serde(default)]
    pub binary_path: PathBuf,
    #[serde(default = "default_stt_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            binary_path: PathBuf::new(),
            timeout_secs: default_stt_timeout_secs(),
        }
    }
}
