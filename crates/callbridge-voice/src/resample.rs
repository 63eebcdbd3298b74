//! Streaming sample-rate conversion for mono PCM16.
//!
//! A [`StreamResampler`] belongs to one direction of one call. Wire frames
//! and model deltas arrive in arbitrary sizes; they are buffered into the
//! resampler's fixed input chunk, so the filter state carries across frame
//! boundaries and the output is the same however the input was split.

use rubato::{FftFixedIn, Resampler};

use crate::error::VoiceError;

/// Input chunk length, as a fraction of a second (20 ms).
const CHUNKS_PER_SECOND: usize = 50;

/// FFT sub-chunks per input chunk.
const SUB_CHUNKS: usize = 1;

pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    /// `None` when the rates match.
    inner: Option<FftFixedIn<f64>>,
    pending: Vec<f64>,
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("from_rate", &self.from_rate)
            .field("to_rate", &self.to_rate)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, VoiceError> {
        if from_rate == 0 || to_rate == 0 {
            return Err(VoiceError::Config(format!(
                "cannot resample {from_rate} Hz to {to_rate} Hz"
            )));
        }
        Ok(Self {
            from_rate,
            to_rate,
            inner: build(from_rate, to_rate)?,
            pending: Vec::new(),
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Input samples held back until the next full chunk.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feeds `samples` and returns every output sample that is complete.
    /// Equal rates pass through untouched.
    pub fn process(&mut self, samples: &[i16]) -> Result<Vec<i16>, VoiceError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };
        self.pending.extend(samples.iter().map(|&s| s as f64 / 32768.0));

        let mut out = Vec::new();
        loop {
            let needed = inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk = vec![self.pending.drain(..needed).collect::<Vec<f64>>()];
            let waves = inner
                .process(&chunk, None)
                .map_err(|e| VoiceError::Audio(format!("resampling failed: {e}")))?;
            out.extend(waves[0].iter().map(|&s| to_i16(s)));
        }
        Ok(out)
    }

    /// Drops buffered input and filter history, as after a barge-in.
    pub fn reset(&mut self) -> Result<(), VoiceError> {
        self.pending.clear();
        self.inner = build(self.from_rate, self.to_rate)?;
        Ok(())
    }
}

fn build(from_rate: u32, to_rate: u32) -> Result<Option<FftFixedIn<f64>>, VoiceError> {
    if from_rate == to_rate {
        return Ok(None);
    }
    let chunk = (from_rate as usize / CHUNKS_PER_SECOND).max(1);
    FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk, SUB_CHUNKS, 1)
        .map(Some)
        .map_err(|e| {
            VoiceError::Config(format!(
                "cannot resample {from_rate} Hz to {to_rate} Hz: {e}"
            ))
        })
}

fn to_i16(sample: f64) -> i16 {
    (sample * 32768.0).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}
