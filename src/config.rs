//! Configuration for the halo voice client
//!
//! Everything is environment-driven (`HALO_*`) with sensible defaults; the
//! only value without a default is the API key, which is validated when a
//! session starts rather than at load time so utility commands (mic/speaker
//! tests) work without credentials.

use crate::transport::ToolDeclaration;

/// Default model identifier for the live audio endpoint
pub const DEFAULT_MODEL: &str = "models/live-audio-preview";

/// Default synthesized voice
pub const DEFAULT_VOICE: &str = "aura";

/// Marker prepended to contextual updates so the remote endpoint can tell
/// them apart from user utterances
pub const CONTEXT_PREFIX: &str = "[context update] ";

/// Default system instruction sent at connection open
const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful voice assistant. \
Keep responses short and conversational; you are being spoken aloud.";

/// Voice client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the remote endpoint (from `HALO_API_KEY`)
    pub api_key: Option<String>,

    /// Model identifier (from `HALO_MODEL`)
    pub model_id: String,

    /// Synthesized voice selection (from `HALO_VOICE`)
    pub voice: String,

    /// System instruction sent when the connection opens
    pub system_instruction: String,

    /// Tool declarations advertised to the remote endpoint
    pub tools: Vec<ToolDeclaration>,

    /// Audio pipeline tunables
    pub audio: AudioConfig,
}

/// Audio pipeline tunables
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Target capture chunk duration in milliseconds
    pub chunk_duration_ms: u32,

    /// Poll interval for segment-based capture, in milliseconds
    pub capture_poll_interval_ms: u64,

    /// Poll interval for queued-playback completion checks, in milliseconds
    pub playback_poll_interval_ms: u64,
}

impl AudioConfig {
    /// Clamp tunables to usable minimums; a zero duration or interval is
    /// treated as 1ms
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.chunk_duration_ms = self.chunk_duration_ms.max(1);
        self.capture_poll_interval_ms = self.capture_poll_interval_ms.max(1);
        self.playback_poll_interval_ms = self.playback_poll_interval_ms.max(1);
        self
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            chunk_duration_ms: 100,
            capture_poll_interval_ms: 20,
            playback_poll_interval_ms: 50,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model_id: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            tools: Vec::new(),
            audio: AudioConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    #[must_use]
    pub fn load() -> Self {
        let defaults = Self::default();

        Self {
            api_key: std::env::var("HALO_API_KEY").ok().filter(|k| !k.is_empty()),
            model_id: env_or("HALO_MODEL", defaults.model_id),
            voice: env_or("HALO_VOICE", defaults.voice),
            system_instruction: env_or("HALO_SYSTEM_INSTRUCTION", defaults.system_instruction),
            tools: Vec::new(),
            audio: AudioConfig {
                chunk_duration_ms: env_parse(
                    "HALO_CHUNK_MS",
                    defaults.audio.chunk_duration_ms,
                ),
                capture_poll_interval_ms: env_parse(
                    "HALO_CAPTURE_POLL_MS",
                    defaults.audio.capture_poll_interval_ms,
                ),
                playback_poll_interval_ms: env_parse(
                    "HALO_PLAYBACK_POLL_MS",
                    defaults.audio.playback_poll_interval_ms,
                ),
            }
            .sanitized(),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
