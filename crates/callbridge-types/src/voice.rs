//! Audio format and caller language definitions.

use serde::{Deserialize, Serialize};

/// Sample encodings carried on the two call legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// G.711 µ-law, one byte per sample (telephony leg).
    Mulaw,
    /// Signed 16-bit little-endian linear PCM (model leg).
    Pcm16,
}

/// Sample rate, bit depth and channel count of an audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Narrowband telephony audio: µ-law, 8 kHz, mono.
    pub const TELEPHONY: AudioFormat = AudioFormat {
        encoding: AudioEncoding::Mulaw,
        sample_rate: 8_000,
        channels: 1,
    };

    /// Linear PCM16 mono at the given rate.
    pub const fn pcm16(sample_rate: u32) -> Self {
        Self {
            encoding: AudioEncoding::Pcm16,
            sample_rate,
            channels: 1,
        }
    }

    pub fn bits_per_sample(&self) -> u16 {
        match self.encoding {
            AudioEncoding::Mulaw => 8,
            AudioEncoding::Pcm16 => 16,
        }
    }

    /// Bytes of payload per second of audio.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * (self.bits_per_sample() as usize / 8)
    }
}

/// Languages the assistant can hold a call in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en")]
    English,
    #[serde(rename = "es")]
    Spanish,
}

impl Language {
    /// The BCP-47 primary tag.
    pub fn tag(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Spanish => "es",
        }
    }

    /// Leniently parses tags like `es`, `es-MX`, `Spanish` or `español`.
    pub fn parse(value: &str) -> Option<Self> {
        let lowered = value.trim().to_ascii_lowercase();
        let primary = lowered.split(['-', '_']).next().unwrap_or("");
        match primary {
            "en" | "eng" | "english" => Some(Self::English),
            "es" | "spa" | "spanish" | "español" | "espanol" => Some(Self::Spanish),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}
