//! Voice session module
//!
//! The state machine owning the remote connection, the tool dispatcher, the
//! single-slot registry, and the UI-facing status observable.

pub mod machine;
pub mod registry;
pub mod status;
pub mod tools;

pub use machine::VoiceSession;
pub use registry::{Installed, SessionRegistry};
pub use status::{SessionStatus, StatusPublisher, StatusWatch, TurnMode};
pub use tools::{ToolHandler, ToolRegistry, TOOL_ERROR_SENTINEL};
