//! The capture backend.
//!
//! Records everything the emulation sends instead of playing it. The
//! diagnostic binary uses it to inspect a program's MIDI traffic; tests use
//! it as a scriptable stand-in for real hardware. Recorded events live behind
//! a shared [`CaptureLog`] handle so they stay reachable after the device
//! itself has been boxed up inside a router.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use itertools::Itertools;
use smallvec::SmallVec;

use crate::errors::MidiError;
use crate::midi::message::ShortMessage;
use crate::midi::{MidiDevice, MusicSupport};

/// One recorded event, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum CapturedEvent {
    /// A short channel message, padding bytes included.
    Message(ShortMessage),

    /// A framed system exclusive message.
    Sysex(SmallVec<[u8; 32]>),

    /// A volume change pushed down from the host mixer.
    Volume(f32),

    /// The device was released by its router.
    Closed,
}

impl fmt::Display for CapturedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapturedEvent::Message(message) => write!(f, "message {}", message),
            CapturedEvent::Sysex(bytes) => write!(
                f,
                "sysex {:02X} ({} bytes)",
                bytes.iter().format(" "),
                bytes.len()
            ),
            CapturedEvent::Volume(volume) => write!(f, "volume {:.2}", volume),
            CapturedEvent::Closed => write!(f, "closed"),
        }
    }
}

/// Shared handle to the events a capture device has recorded.
#[derive(Debug, Clone, Default)]
pub struct CaptureLog {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CaptureLog {
    pub fn new() -> CaptureLog {
        CaptureLog::default()
    }

    /// A snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn push(&self, event: CapturedEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CapturedEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A device that records traffic into a [`CaptureLog`].
#[derive(Debug)]
pub struct CaptureDevice {
    support: MusicSupport,
    log: CaptureLog,
}

impl CaptureDevice {
    /// A capture device claiming to render every flavor of music, recording
    /// into its own fresh log.
    pub fn new() -> CaptureDevice {
        CaptureDevice {
            support: MusicSupport::all(),
            log: CaptureLog::new(),
        }
    }

    /// Overrides what the device claims to render well. Useful for acting
    /// the part of a less capable synthesizer.
    pub fn with_support(mut self, support: MusicSupport) -> CaptureDevice {
        self.support = support;
        self
    }

    /// Records into `log` instead of the device's own.
    pub fn with_log(mut self, log: CaptureLog) -> CaptureDevice {
        self.log = log;
        self
    }

    /// A handle to the log this device records into.
    pub fn log(&self) -> CaptureLog {
        self.log.clone()
    }
}

impl Default for CaptureDevice {
    fn default() -> CaptureDevice {
        CaptureDevice::new()
    }
}

impl MidiDevice for CaptureDevice {
    fn name(&self) -> &str {
        "capture"
    }

    fn supports(&self) -> MusicSupport {
        self.support
    }

    fn handle_message(&mut self, message: &ShortMessage) -> Result<(), MidiError> {
        self.log.push(CapturedEvent::Message(*message));
        Ok(())
    }

    fn handle_sysex(&mut self, sysex: &[u8]) -> Result<(), MidiError> {
        self.log.push(CapturedEvent::Sysex(SmallVec::from_slice(sysex)));
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) {
        self.log.push(CapturedEvent::Volume(volume));
    }

    fn close(&mut self) {
        self.log.push(CapturedEvent::Closed);
    }
}
