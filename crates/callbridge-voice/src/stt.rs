//! Offline transcription of recorded voicemails.
//!
//! Runs a whisper.cpp-style binary: the recording is piped to stdin and the
//! transcript read from stdout.

use crate::config::SttConfig;
use crate::error::VoiceError;
use callbridge_types::Language;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Recordings larger than this are refused (10 MiB).
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SttService {
    model_path: PathBuf,
    binary_path: PathBuf,
    timeout: Duration,
}

impl SttService {
    pub fn new(model_path: impl Into<PathBuf>, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            binary_path: binary_path.into(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn from_config(config: &SttConfig) -> Self {
        Self {
            model_path: config.model_path.clone(),
            binary_path: config.binary_path.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    /// Whether a binary is configured at all.
    pub fn is_configured(&self) -> bool {
        !self.binary_path.as_os_str().is_empty()
    }

    /// Transcribes a recording (any container the binary accepts).
    pub async fn transcribe(&self, audio: &[u8], language: Language) -> Result<String, VoiceError> {
        if !self.is_configured() {
            return Err(VoiceError::Stt("no transcription binary configured".to_string()));
        }
        if audio.is_empty() {
            return Err(VoiceError::Stt("recording is empty".to_string()));
        }
        if audio.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::Stt(format!(
                "recording exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        // -m <model> -l <lang> -f - : read the recording from stdin.
        let mut child = Command::new(&self.binary_path)
            .arg("-m")
            .arg(&self.model_path)
            .arg("-l")
            .arg(language.tag())
            .arg("-f")
            .arg("-")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VoiceError::Stt(format!("failed to spawn STT binary: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Stt("failed to open stdin".to_string()))?;
        stdin
            .write_all(audio)
            .await
            .map_err(|e| VoiceError::Stt(format!("failed to write recording: {}", e)))?;
        drop(stdin);

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Stt(format!(
                    "STT process timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Stt(format!("failed to read transcript: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Stt(format!("STT binary failed: {}", stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
