//! MIDI backend selection.
//!
//! An emulation session describes the MIDI setup it wants with a
//! [`MidiRequest`]: which backend to drive, which host destination to bind,
//! and whether sysex delivery needs pacing for a real MT-32. The request is
//! an owned value handed to the router at reconfiguration time; nothing here
//! is process-global.

use std::fmt;
use std::str::FromStr;

use derive_more::Display;
use log::*;

use crate::errors::MidiError;

/// The family of MIDI backend a session asks for.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Pick the best backend the host offers.
    #[display(fmt = "auto")]
    Auto,

    /// Drive an external port or software synthesizer on the host.
    #[display(fmt = "port")]
    Port,

    /// Prefer a destination that understands MT-32 music natively.
    #[display(fmt = "mt32")]
    Mt32,

    /// Record messages instead of playing them.
    #[display(fmt = "capture")]
    Capture,

    /// No MIDI output at all.
    #[display(fmt = "none")]
    Disabled,
}

impl BackendKind {
    /// Canonical names, for help output.
    pub const NAMES: [&'static str; 5] = ["auto", "port", "mt32", "capture", "none"];

    /// Maps a configuration token to a backend, accepting the aliases DOS
    /// configuration files have accumulated over the years.
    pub fn from_name(name: &str) -> Option<BackendKind> {
        match name.to_ascii_lowercase().as_str() {
            "" | "auto" | "default" => Some(BackendKind::Auto),
            "port" | "external" | "coreaudio" | "coremidi" | "win32" | "alsa" | "oss" => {
                Some(BackendKind::Port)
            }
            "mt32" => Some(BackendKind::Mt32),
            "capture" => Some(BackendKind::Capture),
            "none" | "off" => Some(BackendKind::Disabled),
            _ => None,
        }
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Auto
    }
}

impl FromStr for BackendKind {
    type Err = MidiError;

    fn from_str(s: &str) -> Result<BackendKind, MidiError> {
        BackendKind::from_name(s).ok_or_else(|| MidiError::UnknownBackend(s.to_string()))
    }
}

/// Everything the router needs to reconfigure MIDI output.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MidiRequest {
    /// The backend to drive.
    pub backend: BackendKind,

    /// Substring match against host destination names, for backends that bind
    /// to one.
    pub destination: Option<String>,

    /// Pace sysex delivery at the MT-32's wire rate so a first-revision
    /// module is not overrun.
    pub delay_sysex: bool,
}

impl MidiRequest {
    /// A request for the given backend with no destination preference.
    pub fn new(backend: BackendKind) -> MidiRequest {
        MidiRequest {
            backend,
            ..MidiRequest::default()
        }
    }

    /// Binds the request to host destinations whose names contain
    /// `destination`.
    pub fn with_destination(mut self, destination: impl Into<String>) -> MidiRequest {
        self.destination = Some(destination.into());
        self
    }

    /// Enables or disables sysex pacing.
    pub fn with_delay_sysex(mut self, delay_sysex: bool) -> MidiRequest {
        self.delay_sysex = delay_sysex;
        self
    }

    /// Parses the two DOS-style configuration strings: the device token and
    /// its free-form parameter list.
    ///
    /// Unrecognized device tokens are reported and treated as `auto`, so a
    /// stale configuration file never silences music outright. Within the
    /// parameter list, `delaysysex` is recognized as a flag; the remaining
    /// tokens name the destination.
    pub fn from_config(device: &str, params: &str) -> MidiRequest {
        let device = device.trim();
        let backend = match BackendKind::from_name(device) {
            Some(backend) => backend,
            None => {
                warn!("unknown MIDI device '{}' in configuration, using auto", device);
                BackendKind::Auto
            }
        };

        let mut request = MidiRequest::new(backend);
        let mut destination = Vec::new();

        for token in params.split_whitespace() {
            if token.eq_ignore_ascii_case("delaysysex") {
                request.delay_sysex = true;
            } else {
                destination.push(token);
            }
        }

        if !destination.is_empty() {
            request.destination = Some(destination.join(" "));
        }

        request
    }
}

impl fmt::Display for MidiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.backend)?;

        if let Some(destination) = &self.destination {
            write!(f, " ({})", destination)?;
        }

        if self.delay_sysex {
            write!(f, " [delaysysex]")?;
        }

        Ok(())
    }
}
