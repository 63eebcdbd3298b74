//! Server configuration loading from file and environment variables.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use callbridge_types::{ConfidencePolicy, Language};
use callbridge_voice::{RealtimeConfig, SttConfig};
use serde::Deserialize;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Speech model service.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Telephony gateway REST API and call handoff.
    #[serde(default)]
    pub telephony: TelephonyConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    /// Starting confidence policy. A policy saved through the admin API
    /// takes precedence on restart.
    #[serde(default)]
    pub policy: ConfidencePolicy,

    #[serde(default)]
    pub admin: AdminConfig,

    /// Voicemail transcription.
    #[serde(default)]
    pub stt: SttConfig,

    #[serde(default)]
    pub languages: LanguagesConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL, used to build media-stream and
    /// callback URLs handed to the gateway.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "callbridge_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Clone, Deserialize)]
pub struct TelephonyConfig {
    #[serde(default = "default_telephony_api_base")]
    pub api_base: String,

    #[serde(default)]
    pub account_sid: String,

    #[serde(default)]
    pub auth_token: String,

    /// Number dialled when a caller is handed to a person.
    #[serde(default)]
    pub human_transfer_number: String,

    #[serde(default = "default_voicemail_max_secs")]
    pub voicemail_max_secs: u32,

    /// Extra time after `voicemail_max_secs` for the recording callback to
    /// arrive before the call is written off.
    #[serde(default = "default_voicemail_grace_secs")]
    pub voicemail_grace_secs: u64,

    /// Timeout for each call-control request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeConfig {
    /// Search endpoint. Empty means every question is gated.
    #[serde(default)]
    pub search_url: String,

    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationsConfig {
    /// Chat webhook for staff notifications. Empty logs them instead.
    #[serde(default)]
    pub webhook_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// Deadline for each external call made inside a tool.
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,

    /// Tools offered to the model at startup. Empty enables all.
    #[serde(default)]
    pub enabled: Vec<String>,
}

#[derive(Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Bearer token for the admin API. Empty disables the admin API.
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LanguagesConfig {
    #[serde(default)]
    pub default_language: Language,

    /// Voice used when neither the stream nor the language picks one.
    #[serde(default)]
    pub default_voice: Option<String>,

    /// Voice used for Spanish-language calls.
    #[serde(default)]
    pub spanish_voice: Option<String>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_db_path() -> String {
    "callbridge.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_telephony_api_base() -> String {
    "https://api.twilio.com".to_string()
}

fn default_voicemail_max_secs() -> u32 {
    120
}

fn default_voicemail_grace_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_candidates() -> usize {
    5
}

fn default_tool_timeout_secs() -> u64 {
    8
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            api_base: default_telephony_api_base(),
            account_sid: String::new(),
            auth_token: String::new(),
            human_transfer_number: String::new(),
            voicemail_max_secs: default_voicemail_max_secs(),
            voicemail_grace_secs: default_voicemail_grace_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            search_url: String::new(),
            max_candidates: default_max_candidates(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout_secs(),
            enabled: Vec::new(),
        }
    }
}

impl Default for LanguagesConfig {
    fn default() -> Self {
        Self {
            default_language: Language::English,
            default_voice: None,
            spanish_voice: None,
        }
    }
}

impl fmt::Debug for TelephonyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelephonyConfig")
            .field("api_base", &self.api_base)
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("human_transfer_number", &self.human_transfer_number)
            .field("voicemail_max_secs", &self.voicemail_max_secs)
            .field("voicemail_grace_secs", &self.voicemail_grace_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminConfig")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl Config {
    /// The voice for a call in `language` when the stream did not name one.
    pub fn voice_for(&self, language: Language) -> String {
        let configured = match language {
            Language::Spanish => self
                .languages
                .spanish_voice
                .as_ref()
                .or(self.languages.default_voice.as_ref()),
            Language::English => self.languages.default_voice.as_ref(),
        };
        configured
            .cloned()
            .unwrap_or_else(|| self.realtime.voice.clone())
    }

    /// `wss://` URL of the media-stream endpoint derived from
    /// `server.public_url`.
    pub fn media_stream_url(&self) -> String {
        let base = self.server.public_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("wss://{base}")
        };
        format!("{base}/media-stream")
    }

    /// Absolute URL for a path on this server, for gateway callbacks.
    pub fn callback_url(&self, path: &str) -> String {
        format!("{}{}", self.server.public_url.trim_end_matches('/'), path)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CALLBRIDGE_HOST`, `CALLBRIDGE_PORT`, `CALLBRIDGE_PUBLIC_URL`
/// - `CALLBRIDGE_DB_PATH`
/// - `CALLBRIDGE_LOG_LEVEL`, `CALLBRIDGE_LOG_JSON` ("true" or "1")
/// - `CALLBRIDGE_REALTIME_URL`, `CALLBRIDGE_REALTIME_API_KEY`
/// - `CALLBRIDGE_TELEPHONY_ACCOUNT_SID`, `CALLBRIDGE_TELEPHONY_AUTH_TOKEN`
/// - `CALLBRIDGE_TRANSFER_NUMBER`
/// - `CALLBRIDGE_KNOWLEDGE_URL`
/// - `CALLBRIDGE_NOTIFY_WEBHOOK_URL`
/// - `CALLBRIDGE_ADMIN_TOKEN`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if the confidence threshold is outside `[0, 1]`.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    config
        .policy
        .validate()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("CALLBRIDGE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("CALLBRIDGE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(url) = var("CALLBRIDGE_PUBLIC_URL") {
        config.server.public_url = url;
    }
    if let Some(db_path) = var("CALLBRIDGE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("CALLBRIDGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("CALLBRIDGE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(url) = var("CALLBRIDGE_REALTIME_URL") {
        config.realtime.url = url;
    }
    if let Some(key) = var("CALLBRIDGE_REALTIME_API_KEY") {
        config.realtime.api_key = key;
    }
    if let Some(sid) = var("CALLBRIDGE_TELEPHONY_ACCOUNT_SID") {
        config.telephony.account_sid = sid;
    }
    if let Some(token) = var("CALLBRIDGE_TELEPHONY_AUTH_TOKEN") {
        config.telephony.auth_token = token;
    }
    if let Some(number) = var("CALLBRIDGE_TRANSFER_NUMBER") {
        config.telephony.human_transfer_number = number;
    }
    if let Some(url) = var("CALLBRIDGE_KNOWLEDGE_URL") {
        config.knowledge.search_url = url;
    }
    if let Some(url) = var("CALLBRIDGE_NOTIFY_WEBHOOK_URL") {
        config.notifications.webhook_url = url;
    }
    if let Some(token) = var("CALLBRIDGE_ADMIN_TOKEN") {
        config.admin.token = token;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn file_values_and_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8080
            public_url = "https://voice.example.org/"

            [realtime]
            voice = "verse"
            max_connect_attempts = 5

            [policy]
            min_confidence = 0.7
            low_confidence_action = "transfer"

            [languages]
            default_language = "es"
            spanish_voice = "sol"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, "callbridge.db");
        assert_eq!(config.realtime.max_connect_attempts, 5);
        assert_eq!(config.realtime.commit_threshold_bytes, 32_000);
        assert_eq!(config.policy.min_confidence, 0.7);
        assert_eq!(config.languages.default_language, Language::Spanish);
        assert_eq!(config.voice_for(Language::Spanish), "sol");
        assert_eq!(config.voice_for(Language::English), "verse");
        assert_eq!(
            config.media_stream_url(),
            "wss://voice.example.org/media-stream"
        );
        assert_eq!(
            config.callback_url("/voice/recording"),
            "https://voice.example.org/voice/recording"
        );
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CALLBRIDGE_PORT", "9000"),
            ("CALLBRIDGE_LOG_JSON", "1"),
            ("CALLBRIDGE_REALTIME_API_KEY", "sk-test"),
            ("CALLBRIDGE_ADMIN_TOKEN", "admin-secret"),
            ("CALLBRIDGE_HOST", "not-an-ip"),
        ]);
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9000);
        assert!(config.logging.json);
        assert_eq!(config.realtime.api_key, "sk-test");
        assert_eq!(config.admin.token, "admin-secret");
        // Unparseable values keep the default.
        assert_eq!(config.server.host, default_host());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = Config::default();
        config.telephony.auth_token = "tw-secret".to_string();
        config.admin.token = "admin-secret".to_string();
        config.realtime.api_key = "sk-secret".to_string();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("tw-secret"));
        assert!(!debug.contains("admin-secret"));
        assert!(!debug.contains("sk-secret"));
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = load_config(Some("/nonexistent/callbridge.toml")).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[policy]\nmin_confidence = 1.5\n").unwrap();
        assert!(matches!(
            load_config(path.to_str()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
