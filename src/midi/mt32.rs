//! Roland MT-32 sysex handling.
//!
//! The MT-32 and its relatives are configured through Roland's DT1 (data set)
//! and RQ1 (data request) system exclusive commands. Recognizing those
//! commands is how the router tells MT-32 music apart from General MIDI, and
//! how it mirrors the module's front-panel display for the host UI.

use crate::midi::message::{SYSEX_END, SYSEX_START};
use crate::midi::MusicType;

/// Roland's manufacturer ID.
pub const MANUFACTURER_ROLAND: u8 = 0x41;

/// Model ID of the MT-32 and compatible modules.
pub const MODEL_MT32: u8 = 0x16;

/// Model ID of Roland's GS sound modules.
pub const MODEL_GS: u8 = 0x42;

/// Data request (read) command.
pub const COMMAND_RQ1: u8 = 0x11;

/// Data set (write) command.
pub const COMMAND_DT1: u8 = 0x12;

/// Device ID Roland modules listen on out of the box.
pub const DEFAULT_DEVICE_ID: u8 = 0x10;

/// Parameter address of the MT-32's front-panel display.
pub const DISPLAY_ADDRESS: [u8; 3] = [0x20, 0x00, 0x00];

/// Width of the MT-32's front-panel display in characters.
pub const DISPLAY_WIDTH: usize = 20;

/// A decoded Roland sysex command.
#[derive(Debug, Copy, Clone)]
pub struct RolandSysex<'a> {
    pub device_id: u8,
    pub model: u8,
    pub command: u8,
    pub address: [u8; 3],
    pub data: &'a [u8],
    pub checksum: u8,
}

impl<'a> RolandSysex<'a> {
    /// Decodes a framed sysex if it is a
    /// Roland DT1/RQ1-style command.
    ///
    /// Returns `None` for non-Roland traffic and for messages too short to
    /// carry a parameter address.
    pub fn parse(sysex: &'a [u8]) -> Option<RolandSysex<'a>> {
        match sysex {
            [SYSEX_START, MANUFACTURER_ROLAND, device_id, model, command, rest @ .., checksum, SYSEX_END]
                if rest.len() >= 3 =>
            {
                Some(RolandSysex {
                    device_id: *device_id,
                    model: *model,
                    command: *command,
                    address: [rest[0], rest[1], rest[2]],
                    data: &rest[3..],
                    checksum: *checksum,
                })
            }
            _ => None,
        }
    }

    /// The checksum the message should carry for its address and data.
    pub fn expected_checksum(&self) -> u8 {
        checksum(self.address.iter().chain(self.data).copied())
    }

    /// Whether the carried checksum matches the address and data bytes.
    ///
    /// Games get this wrong often enough that nothing downstream refuses a
    /// bad checksum; it is surfaced for diagnostics only.
    pub fn checksum_valid(&self) -> bool {
        self.checksum == self.expected_checksum()
    }
}

/// Computes a Roland sysex checksum over address and data bytes.
///
/// The checksum is the 7-bit value that brings the sum of the covered bytes
/// to a multiple of 0x80.
pub fn checksum(bytes: impl IntoIterator<Item = u8>) -> u8 {
    let sum: u32 = bytes.into_iter().map(u32::from).sum();

    ((0x80 - (sum % 0x80)) & 0x7F) as u8
}

/// Guesses the flavor of synthesizer a sysex is written for.
///
/// A Roland command addressed to the MT-32 implies MT-32 music. A General
/// MIDI reset or a Roland GS command implies General MIDI music. Anything
/// else is inconclusive.
pub fn classify(sysex: &[u8]) -> Option<MusicType> {
    if is_general_midi_reset(sysex) {
        return Some(MusicType::GeneralMidi);
    }

    match RolandSysex::parse(sysex) {
        Some(roland)
            if roland.model == MODEL_MT32
                && (roland.command == COMMAND_DT1 || roland.command == COMMAND_RQ1) =>
        {
            Some(MusicType::Mt32)
        }
        Some(roland) if roland.model == MODEL_GS => Some(MusicType::GeneralMidi),
        _ => None,
    }
}

/// Whether a sysex is the universal General MIDI System On message.
pub fn is_general_midi_reset(sysex: &[u8]) -> bool {
    matches!(sysex, [SYSEX_START, 0x7E, _, 0x09, 0x01, SYSEX_END])
}

/// The universal General MIDI System On message, broadcast to all device IDs.
pub fn general_midi_reset() -> [u8; 6] {
    [SYSEX_START, 0x7E, 0x7F, 0x09, 0x01, SYSEX_END]
}

/// Extracts the text of an MT-32 front-panel display update.
///
/// Characters the display cannot draw are replaced with spaces.
pub fn display_text(sysex: &[u8]) -> Option<String> {
    let roland = RolandSysex::parse(sysex)?;

    if roland.model != MODEL_MT32
        || roland.command != COMMAND_DT1
        || roland.address != DISPLAY_ADDRESS
    {
        return None;
    }

    Some(roland.data.iter().map(|&byte| drawable(byte) as char).collect())
}

/// Builds a DT1 display update that shows `text` on the MT-32's front panel.
///
/// Text is truncated to the display width and padded with trailing spaces, as
/// the module itself would render it.
pub fn display_sysex(text: &str) -> Vec<u8> {
    let mut payload = [b' '; DISPLAY_WIDTH];
    for (cell, c) in payload.iter_mut().zip(text.chars()) {
        *cell = drawable_char(c);
    }

    let mut sysex = Vec::with_capacity(DISPLAY_WIDTH + 10);
    sysex.extend_from_slice(&[
        SYSEX_START,
        MANUFACTURER_ROLAND,
        DEFAULT_DEVICE_ID,
        MODEL_MT32,
        COMMAND_DT1,
    ]);
    sysex.extend_from_slice(&DISPLAY_ADDRESS);
    sysex.extend_from_slice(&payload);
    sysex.push(checksum(DISPLAY_ADDRESS.iter().chain(&payload).copied()));
    sysex.push(SYSEX_END);

    sysex
}

fn drawable(byte: u8) -> u8 {
    // The LCD's character set covers the printable ASCII range starting
    // at '!'.
    if byte.is_ascii_graphic() || byte == b' ' {
        byte
    } else {
        b' '
    }
}

fn drawable_char(c: char) -> u8 {
    // One cell per character, however many bytes its encoding takes.
    if c.is_ascii() {
        drawable(c as u8)
    } else {
        b' '
    }
}

/// A model of the MT-32's 20-character front-panel display.
///
/// Tracks the last text written by a display update so a host UI can mirror
/// what a real module would show.
#[derive(Debug, Clone)]
pub struct Mt32Display {
    cells: [u8; DISPLAY_WIDTH],
}

impl Mt32Display {
    pub fn new() -> Mt32Display {
        Mt32Display::default()
    }

    /// Replaces the display contents, truncating and padding to the display
    /// width. One cell per character.
    pub fn show(&mut self, text: &str) {
        self.cells = [b' '; DISPLAY_WIDTH];

        for (cell, c) in self.cells.iter_mut().zip(text.chars()) {
            *cell = drawable_char(c);
        }
    }

    /// Blanks the display.
    pub fn clear(&mut self) {
        self.cells = [b' '; DISPLAY_WIDTH];
    }

    /// The currently displayed line, always exactly the display width.
    pub fn line(&self) -> String {
        self.cells.iter().map(|&byte| byte as char).collect()
    }
}

impl Default for Mt32Display {
    fn default() -> Mt32Display {
        Mt32Display {
            cells: [b' '; DISPLAY_WIDTH],
        }
    }
}
