//! Tagged audio payloads.

use base64::Engine;
use callbridge_types::{AudioEncoding, AudioFormat};

use crate::codec::{decode_mulaw, encode_mulaw, pcm16_from_bytes, pcm16_to_bytes};
use crate::error::VoiceError;
use crate::resample::StreamResampler;

/// A chunk of mono audio together with the format it is encoded in.
///
/// Frames are transient: created from a wire payload, converted, and sent
/// on. Nothing stores them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    format: AudioFormat,
    data: Vec<u8>,
}

impl AudioFrame {
    /// Wraps raw bytes, rejecting payloads that are not a whole number of
    /// samples or are not mono.
    pub fn new(format: AudioFormat, data: Vec<u8>) -> Result<Self, VoiceError> {
        if format.channels != 1 {
            return Err(VoiceError::Audio(format!(
                "only mono audio is supported, got {} channels",
                format.channels
            )));
        }
        let width = (format.bits_per_sample() / 8) as usize;
        if data.len() % width != 0 {
            return Err(VoiceError::Audio(format!(
                "{} bytes is not a whole number of {}-byte samples",
                data.len(),
                width
            )));
        }
        Ok(Self { format, data })
    }

    /// Decodes a base64 wire payload.
    pub fn from_base64(format: AudioFormat, payload: &str) -> Result<Self, VoiceError> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| VoiceError::Audio(format!("invalid base64 payload: {e}")))?;
        Self::new(format, data)
    }

    /// Encodes linear samples into `format`. The samples must already be at
    /// `format.sample_rate`.
    pub fn from_samples(format: AudioFormat, samples: &[i16]) -> Self {
        let data = match format.encoding {
            AudioEncoding::Mulaw => encode_mulaw(samples),
            AudioEncoding::Pcm16 => pcm16_to_bytes(samples),
        };
        Self {
            format: AudioFormat {
                channels: 1,
                ..format
            },
            data,
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / (self.format.bits_per_sample() / 8) as usize
    }

    pub fn duration_ms(&self) -> u64 {
        if self.format.sample_rate == 0 {
            return 0;
        }
        self.sample_count() as u64 * 1000 / self.format.sample_rate as u64
    }

    /// Decodes to linear samples at the frame's own rate.
    pub fn samples(&self) -> Vec<i16> {
        match self.format.encoding {
            AudioEncoding::Mulaw => decode_mulaw(&self.data),
            AudioEncoding::Pcm16 => pcm16_from_bytes(&self.data),
        }
    }
}

/// Converts one direction of a call's audio between two formats.
///
/// The resampler keeps its state from frame to frame, so a converter must
/// not be shared between calls or directions. Output may be shorter or
/// longer than a single input frame while the resampler fills its chunk.
#[derive(Debug)]
pub struct FrameConverter {
    from: AudioFormat,
    to: AudioFormat,
    resampler: StreamResampler,
}

impl FrameConverter {
    pub fn new(from: AudioFormat, to: AudioFormat) -> Result<Self, VoiceError> {
        for format in [from, to] {
            if format.channels != 1 {
                return Err(VoiceError::Audio(format!(
                    "only mono audio is supported, got {} channels",
                    format.channels
                )));
            }
        }
        Ok(Self {
            from,
            to,
            resampler: StreamResampler::new(from.sample_rate, to.sample_rate)?,
        })
    }

    pub fn source(&self) -> AudioFormat {
        self.from
    }

    pub fn target(&self) -> AudioFormat {
        self.to
    }

    /// Re-encodes and resamples `frame`. An empty result means the
    /// resampler is still waiting for a full chunk.
    pub fn convert(&mut self, frame: &AudioFrame) -> Result<AudioFrame, VoiceError> {
        if frame.format != self.from {
            return Err(VoiceError::Audio(format!(
                "expected {:?} audio, got {:?}",
                self.from, frame.format
            )));
        }
        if self.from == self.to {
            return Ok(frame.clone());
        }
        let resampled = self.resampler.process(&frame.samples())?;
        Ok(AudioFrame::from_samples(self.to, &resampled))
    }

    /// Forgets buffered audio, e.g. when playback is cleared.
    pub fn reset(&mut self) -> Result<(), VoiceError> {
        self.resampler.reset()
    }
}
