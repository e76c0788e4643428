//! Halo Voice - live bidirectional voice client for generative AI endpoints
//!
//! This library provides the core of a live voice conversation:
//! - Capture pipeline (microphone → chunked, rate-converted, encoded audio)
//! - Playback pipeline (gapless rendering of inbound synthesized speech)
//! - Voice session state machine (connection lifecycle, turn tracking,
//!   tool-call round trips, UI-visible status)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Host application                  │
//! │   UI status  │  tool executors  │  credentials      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Voice session                       │
//! │   Capture ──chunks──▶ transport ──events──▶ Playback │
//! │                  └── tool dispatch ──┘               │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │        Remote generative-audio endpoint              │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The concrete wire client is supplied by the host through the
//! [`transport::LiveTransport`] trait; everything else lives here.

pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use audio::{AudioChunk, CapturePipeline, Chunker, PlaybackPipeline, SampleBank};
pub use config::{AudioConfig, Config, CONTEXT_PREFIX};
pub use error::{Error, Result};
pub use session::{
    Installed, SessionRegistry, SessionStatus, StatusWatch, ToolHandler, ToolRegistry, TurnMode,
    VoiceSession, TOOL_ERROR_SENTINEL,
};
pub use transport::{
    ClientContent, LiveConnection, LiveTransport, RealtimeInput, ResponseModality, ServerMessage,
    SessionSetup, ToolCall, ToolDeclaration, ToolResponse, ToolResult, TransportEvent, Turn,
};
