//! UI-visible session status
//!
//! The session machine only ever writes status; observers subscribe through
//! `tokio::sync::watch` receivers and never feed anything back.

use tokio::sync::watch;

/// Connection lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// No session running
    #[default]
    Idle,
    /// Connection open in progress
    Connecting,
    /// Live connection established
    Connected,
    /// Fatal fault; the caller decides whether to retry
    Error,
    /// Connection closed
    Disconnected,
}

/// Turn sub-state while connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnMode {
    /// Waiting for the endpoint
    #[default]
    Idle,
    /// The endpoint is speaking
    Speaking,
}

/// Write side of the status observable, owned by the session machine
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    status_tx: watch::Sender<SessionStatus>,
    turn_tx: watch::Sender<TurnMode>,
}

/// Read side handed to the UI layer
#[derive(Debug, Clone)]
pub struct StatusWatch {
    status_rx: watch::Receiver<SessionStatus>,
    turn_rx: watch::Receiver<TurnMode>,
}

impl StatusPublisher {
    /// Create a publisher/watch pair starting at `Idle`/`Idle`
    #[must_use]
    pub fn new() -> (Self, StatusWatch) {
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let (turn_tx, turn_rx) = watch::channel(TurnMode::default());
        (
            Self { status_tx, turn_tx },
            StatusWatch { status_rx, turn_rx },
        )
    }

    /// Publish a status transition
    pub fn set_status(&self, status: SessionStatus) {
        if *self.status_tx.borrow() != status {
            tracing::debug!(?status, "session status");
            let _ = self.status_tx.send(status);
        }
    }

    /// Publish a turn-mode transition
    ///
    /// Non-forced transitions only apply while the session is connected;
    /// teardown paths pass `forced` to drive the mode back to idle
    /// regardless of connection state.
    pub fn set_turn_mode(&self, mode: TurnMode, forced: bool) {
        if !forced && *self.status_tx.borrow() != SessionStatus::Connected {
            return;
        }
        if *self.turn_tx.borrow() != mode {
            tracing::debug!(?mode, forced, "turn mode");
            let _ = self.turn_tx.send(mode);
        }
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    /// Current turn mode
    #[must_use]
    pub fn turn_mode(&self) -> TurnMode {
        *self.turn_tx.borrow()
    }
}

impl StatusWatch {
    /// Current status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status_rx.borrow()
    }

    /// Current turn mode
    #[must_use]
    pub fn turn_mode(&self) -> TurnMode {
        *self.turn_rx.borrow()
    }

    /// Wait for the next status transition
    ///
    /// # Errors
    ///
    /// Returns an error when the publisher has been dropped
    pub async fn status_changed(&mut self) -> Result<SessionStatus, watch::error::RecvError> {
        self.status_rx.changed().await?;
        Ok(*self.status_rx.borrow())
    }

    /// Wait for the next turn-mode transition
    ///
    /// # Errors
    ///
    /// Returns an error when the publisher has been dropped
    pub async fn turn_changed(&mut self) -> Result<TurnMode, watch::error::RecvError> {
        self.turn_rx.changed().await?;
        Ok(*self.turn_rx.borrow())
    }
}
