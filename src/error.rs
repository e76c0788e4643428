//! Error types for the halo voice client

use thiserror::Error;

/// Result type alias for halo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credential, bad tunable)
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access denied by the platform
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable audio device (missing hardware, unsupported format)
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Audio processing error (encode/decode, container framing)
    #[error("audio error: {0}")]
    Audio(String),

    /// Remote connection error (failed open, runtime transport fault)
    #[error("connection error: {0}")]
    Connection(String),

    /// Tool execution error
    #[error("tool error: {0}")]
    Tool(String),

    /// Session lifecycle error
    #[error("session error: {0}")]
    Session(String),

    /// IO error; host `LiveTransport` implementations convert socket and
    /// file failures through this variant
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error; host `LiveTransport` implementations convert
    /// wire encode/decode failures through this variant
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
