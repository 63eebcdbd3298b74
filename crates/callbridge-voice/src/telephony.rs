//! Envelopes of the telephony gateway's media-stream WebSocket.
//!
//! Every message is a JSON object discriminated by `event`. Inbound audio
//! arrives base64-encoded in `media.payload`; outbound envelopes must echo
//! the `streamSid` announced by the `start` event.

use std::collections::HashMap;

use callbridge_types::{AudioEncoding, AudioFormat, Language};
use serde::{Deserialize, Serialize};

use crate::error::VoiceError;
use crate::frame::AudioFrame;

/// A message received from the gateway.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    /// Preamble sent once the socket opens.
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Start {
        #[serde(default)]
        stream_sid: Option<String>,
        start: StreamStart,
    },
    #[serde(rename_all = "camelCase")]
    Media {
        #[serde(default)]
        stream_sid: Option<String>,
        media: MediaPayload,
    },
    /// Playback of a previously sent mark reached the caller.
    #[serde(rename_all = "camelCase")]
    Mark {
        #[serde(default)]
        stream_sid: Option<String>,
        #[serde(default)]
        mark: Option<MarkLabel>,
    },
    /// A keypad press.
    #[serde(rename_all = "camelCase")]
    Dtmf {
        #[serde(default)]
        stream_sid: Option<String>,
        dtmf: DtmfDigit,
    },
    #[serde(rename_all = "camelCase")]
    Stop {
        #[serde(default)]
        stream_sid: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Body of the `start` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub stream_sid: String,
    pub call_sid: String,
    /// Parameters attached when the stream was requested.
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

impl StreamStart {
    /// Caller language requested for this stream, if any.
    pub fn language(&self) -> Option<Language> {
        self.custom_parameters
            .get("language")
            .and_then(|l| Language::parse(l))
    }

    pub fn voice(&self) -> Option<&str> {
        self.custom_parameters
            .get("voice")
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn caller(&self) -> Option<&str> {
        self.custom_parameters
            .get("from")
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Format of inbound payloads. Narrowband µ-law unless announced
    /// otherwise.
    pub fn audio_format(&self) -> AudioFormat {
        let Some(fmt) = &self.media_format else {
            return AudioFormat::TELEPHONY;
        };
        let encoding = if fmt.encoding.contains("l16") {
            AudioEncoding::Pcm16
        } else {
            AudioEncoding::Mulaw
        };
        AudioFormat {
            encoding,
            sample_rate: if fmt.sample_rate == 0 {
                8_000
            } else {
                fmt.sample_rate
            },
            channels: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    #[serde(default)]
    pub sample_rate: u32,
    #[serde(default)]
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkLabel {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DtmfDigit {
    pub digit: String,
}

/// Parses one text frame from the gateway.
pub fn parse_inbound(text: &str) -> Result<InboundEvent, VoiceError> {
    serde_json::from_str(text).map_err(|e| VoiceError::MalformedFrame(e.to_string()))
}

/// A message sent to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent {
    #[serde(rename_all = "camelCase")]
    Media {
        stream_sid: String,
        media: OutboundMedia,
    },
    /// Drops audio queued at the gateway but not yet played (barge-in).
    #[serde(rename_all = "camelCase")]
    Clear { stream_sid: String },
    #[serde(rename_all = "camelCase")]
    Mark { stream_sid: String, mark: MarkLabel },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundEvent {
    /// Wraps a telephony-format frame for playback.
    pub fn media(stream_sid: &str, frame: &AudioFrame) -> Self {
        Self::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: frame.to_base64(),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        Self::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    pub fn mark(stream_sid: &str, name: impl Into<String>) -> Self {
        Self::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkLabel { name: name.into() },
        }
    }

    pub fn to_json(&self) -> String {
        // Plain strings only; serialisation cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
