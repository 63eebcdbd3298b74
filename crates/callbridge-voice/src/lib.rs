//! Voice plumbing for the callbridge service.
//!
//! The telephony gateway streams narrowband µ-law audio; the speech model
//! speaks linear PCM16 at a wider rate. This crate holds everything needed
//! to move audio between the two:
//!
//! - [`codec`]: G.711 µ-law companding and PCM16 byte packing.
//! - [`resample`]: streaming sample-rate conversion.
//! - [`AudioFrame`]: a tagged audio payload, and [`FrameConverter`] to move
//!   one direction of a call between formats.
//! - [`telephony`]: the media-stream WebSocket envelopes.
//! - [`realtime`]: the per-call model session client.
//! - [`SttService`]: offline transcription of stored voicemails.

pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod realtime;
pub mod resample;
pub mod stt;
pub mod telephony;

pub use config::{RealtimeConfig, SttConfig, TurnDetection};
pub use error::VoiceError;
pub use frame::{AudioFrame, FrameConverter};
pub use realtime::{ModelEvent, RealtimeSession, SessionSettings, ToolHandler};
pub use stt::SttService;
