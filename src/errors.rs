//! Error handling.
//!
//! Nothing in this crate treats an audio failure as fatal to the emulated
//! machine: a program that cannot reach a synthesizer keeps running without
//! one. Errors therefore surface at the point of reconfiguration and are
//! logged, never propagated into the emulation loop.

use thiserror::Error;

use crate::config::BackendKind;

/// Errors that can occur while selecting or driving a MIDI backend.
#[derive(Debug, Error)]
pub enum MidiError {
    /// The name does not map to any known backend.
    #[error("unknown MIDI backend '{0}'")]
    UnknownBackend(String),

    /// The requested backend is not compiled in or not registered.
    #[error("no MIDI backend registered for '{0}'")]
    UnsupportedBackend(BackendKind),

    /// The host has no MIDI destination matching the request.
    #[error("no MIDI destination matching '{0}'")]
    NoDestination(String),

    /// The backend exists but failed to initialize.
    #[error("MIDI backend failed to initialize: {0}")]
    InitFailed(String),

    /// An attached device rejected a message.
    #[error("MIDI device rejected message: {0}")]
    SendFailed(String),
}

impl MidiError {
    /// Wraps a backend's connection error.
    pub fn init(err: impl std::fmt::Display) -> MidiError {
        MidiError::InitFailed(err.to_string())
    }

    /// Wraps a backend's send error.
    pub fn send(err: impl std::fmt::Display) -> MidiError {
        MidiError::SendFailed(err.to_string())
    }
}
