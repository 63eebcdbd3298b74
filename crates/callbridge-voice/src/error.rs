use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Model service connect failed: {0}")]
    Connect(String),

    #[error("Model service connect timed out after {}s", .0.as_secs())]
    ConnectTimeout(Duration),

    #[error("Model session is closed")]
    SessionClosed,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Invalid audio: {0}")]
    Audio(String),

    #[error("STT error: {0}")]
    Stt(String),
}
