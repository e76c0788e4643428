//! Single-slot session registry
//!
//! Binds the one active voice session process-wide. Explicitly owned by the
//! application's top-level controller rather than hidden in a global;
//! installing over a live session hands the previous one back so the caller
//! can end it, instead of silently stacking.

use uuid::Uuid;

use crate::session::machine::VoiceSession;

/// Outcome of installing a session into the slot
pub enum Installed {
    /// The slot was empty
    Fresh,
    /// A live session was displaced; the caller owns ending it
    Replaced {
        /// The session that was in the slot
        previous: Box<VoiceSession>,
    },
}

/// Holds exactly one active session
#[derive(Default)]
pub struct SessionRegistry {
    slot: Option<Box<VoiceSession>>,
}

impl SessionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session, displacing any current one
    pub fn install(&mut self, session: VoiceSession) -> Installed {
        let replacement = session.id();
        match self.slot.replace(Box::new(session)) {
            Some(previous) => {
                tracing::warn!(
                    previous = %previous.id(),
                    replacement = %replacement,
                    "replacing active voice session"
                );
                Installed::Replaced { previous }
            }
            None => Installed::Fresh,
        }
    }

    /// Identifier of the active session, if any
    #[must_use]
    pub fn active_id(&self) -> Option<Uuid> {
        self.slot.as_ref().map(|s| s.id())
    }

    /// Borrow the active session
    #[must_use]
    pub fn active(&self) -> Option<&VoiceSession> {
        self.slot.as_deref()
    }

    /// Mutably borrow the active session
    pub fn active_mut(&mut self) -> Option<&mut VoiceSession> {
        self.slot.as_deref_mut()
    }

    /// Remove and return the active session
    pub fn take(&mut self) -> Option<Box<VoiceSession>> {
        self.slot.take()
    }

    /// Whether a session currently occupies the slot
    #[must_use]
    pub fn is_occupied(&self) -> bool {
        self.slot.is_some()
    }
}
