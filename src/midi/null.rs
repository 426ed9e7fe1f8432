//! The null backend.
//!
//! Attached when a session asks for no MIDI output, so the router always has
//! a device to hand traffic to. Swallows everything and reports itself as not
//! real, which keeps availability false while it is attached.

use log::*;

use crate::errors::MidiError;
use crate::midi::message::ShortMessage;
use crate::midi::{MidiDevice, MusicSupport};

#[derive(Debug, Default)]
pub struct NullDevice;

impl NullDevice {
    pub fn new() -> NullDevice {
        NullDevice
    }
}

impl MidiDevice for NullDevice {
    fn name(&self) -> &str {
        "none"
    }

    fn supports(&self) -> MusicSupport {
        MusicSupport::empty()
    }

    fn is_real(&self) -> bool {
        false
    }

    fn handle_message(&mut self, message: &ShortMessage) -> Result<(), MidiError> {
        trace!("discarding MIDI message {}", message);
        Ok(())
    }

    fn handle_sysex(&mut self, sysex: &[u8]) -> Result<(), MidiError> {
        trace!("discarding MIDI sysex ({} bytes)", sysex.len());
        Ok(())
    }

    fn silence(&mut self) {}
}
