//! Audio processing module
//!
//! Handles microphone capture, chunking, rate conversion, PCM transport
//! encoding, and gapless playback of inbound audio.

pub mod capture;
pub mod pcm;
pub mod playback;
pub mod resample;

pub use capture::{CapturePipeline, Chunker, PolledCapture, StreamCapture};
pub use playback::{PlaybackPipeline, QueuedPlayback, SampleBank, StreamPlayback};
pub use resample::resample;

/// Sample rate the remote endpoint requires for outbound audio (16kHz mono)
pub const TRANSPORT_INPUT_RATE: u32 = 16000;

/// Sample rate of inbound audio from the remote endpoint (24kHz mono)
pub const TRANSPORT_OUTPUT_RATE: u32 = 24000;

/// Bit depth of wire-format PCM
pub const TRANSPORT_BITS: u16 = 16;

/// Channel count of wire-format PCM
pub const TRANSPORT_CHANNELS: u16 = 1;

/// One bounded-duration unit of transport-encoded audio
///
/// Immutable once produced; created by the capture pipeline (outbound) or
/// decoded from a server message (inbound), consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Base64-wrapped little-endian PCM16
    pub data: String,
    /// Sample rate of the encoded payload
    pub sample_rate: u32,
    /// Bit depth of the encoded payload
    pub bits_per_sample: u16,
    /// Channel count of the encoded payload
    pub channels: u16,
}

impl AudioChunk {
    /// MIME type string the transport expects for this chunk
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}
