//! MIDI wire format.
//!
//! Short channel messages arrive from the emulated MPU-401 as fixed
//! three-byte buffers, padded with zeroes when the status uses fewer data
//! bytes. System exclusive messages arrive separately as framed
//! `F0 .. F7` streams. This module knows how long each message really is on
//! the wire; what the bytes mean to a synthesizer is the backend's business.

use std::convert::TryFrom;
use std::fmt;

use derive_more::Display;
use itertools::Itertools;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// First byte of a system exclusive message.
pub const SYSEX_START: u8 = 0xF0;

/// Terminating byte of a system exclusive message.
pub const SYSEX_END: u8 = 0xF7;

/// Controller number that silences every sounding note on a channel.
pub const ALL_NOTES_OFF: u8 = 123;

/// Number of addressable MIDI channels.
pub const CHANNEL_COUNT: u8 = 16;

/// The category of a channel voice message, taken from the upper nibble of the
/// status byte.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Status {
    #[display(fmt = "note off")]
    NoteOff = 0x80,

    #[display(fmt = "note on")]
    NoteOn = 0x90,

    #[display(fmt = "key pressure")]
    KeyPressure = 0xA0,

    #[display(fmt = "control change")]
    ControlChange = 0xB0,

    #[display(fmt = "program change")]
    ProgramChange = 0xC0,

    #[display(fmt = "channel pressure")]
    ChannelPressure = 0xD0,

    #[display(fmt = "pitch bend")]
    PitchBend = 0xE0,
}

/// Returns the number of bytes a message with the given status byte occupies
/// on the wire.
///
/// Data bytes, sysex framing bytes, and undefined system statuses map to zero.
/// This is the same length table MPU-401 UARTs use to frame their output
/// stream.
pub fn wire_length(status: u8) -> usize {
    match status {
        0x80..=0xBF | 0xE0..=0xEF => 3,
        0xC0..=0xDF => 2,
        0xF2 => 3,
        0xF1 | 0xF3 => 2,
        0xF6 | 0xF8 | 0xFA..=0xFC | 0xFE | 0xFF => 1,
        _ => 0,
    }
}

/// A three-byte MIDI message as delivered by an emulated MPU-401 port.
///
/// All three bytes are kept verbatim, padding included. Backends that write to
/// a real wire trim the padding with [`wire_bytes`](ShortMessage::wire_bytes).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShortMessage {
    bytes: [u8; 3],
}

impl ShortMessage {
    /// Wraps a raw three-byte buffer without validation.
    pub fn new(bytes: [u8; 3]) -> ShortMessage {
        ShortMessage { bytes }
    }

    /// A note on message. The channel is masked to 4 bits, the data bytes to
    /// 7.
    pub fn note_on(channel: u8, key: u8, velocity: u8) -> ShortMessage {
        ShortMessage::new([
            u8::from(Status::NoteOn) | (channel & 0x0F),
            key & 0x7F,
            velocity & 0x7F,
        ])
    }

    /// A note off message.
    pub fn note_off(channel: u8, key: u8, velocity: u8) -> ShortMessage {
        ShortMessage::new([
            u8::from(Status::NoteOff) | (channel & 0x0F),
            key & 0x7F,
            velocity & 0x7F,
        ])
    }

    /// A control change message.
    pub fn control_change(channel: u8, controller: u8, value: u8) -> ShortMessage {
        ShortMessage::new([
            u8::from(Status::ControlChange) | (channel & 0x0F),
            controller & 0x7F,
            value & 0x7F,
        ])
    }

    /// A program change message. The unused third byte is zero padding.
    pub fn program_change(channel: u8, program: u8) -> ShortMessage {
        ShortMessage::new([
            u8::from(Status::ProgramChange) | (channel & 0x0F),
            program & 0x7F,
            0x00,
        ])
    }

    /// The "all notes off" controller message for a channel.
    pub fn all_notes_off(channel: u8) -> ShortMessage {
        ShortMessage::control_change(channel, ALL_NOTES_OFF, 0)
    }

    /// The raw status byte.
    pub fn status(&self) -> u8 {
        self.bytes[0]
    }

    /// The channel voice category of this message, if it has one.
    pub fn kind(&self) -> Option<Status> {
        Status::try_from(self.bytes[0] & 0xF0).ok()
    }

    /// The channel this message addresses, if it is a channel voice message.
    pub fn channel(&self) -> Option<u8> {
        self.kind().map(|_| self.bytes[0] & 0x0F)
    }

    /// All three bytes, padding included.
    pub fn bytes(&self) -> [u8; 3] {
        self.bytes
    }

    /// The bytes this message occupies on a real wire, with padding trimmed.
    ///
    /// Empty for buffers whose status byte is not a wire message at all.
    pub fn wire_bytes(&self) -> &[u8] {
        &self.bytes[..wire_length(self.bytes[0])]
    }
}

impl fmt::Display for ShortMessage {
    /// Prints the message as space-separated hex bytes, trimmed to its wire
    /// length. Buffers with no wire length are dumped whole.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = match self.wire_bytes() {
            [] => &self.bytes[..],
            bytes => bytes,
        };

        write!(f, "{:02X}", bytes.iter().format(" "))
    }
}
