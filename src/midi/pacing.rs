//! Sysex pacing.
//!
//! A first-revision MT-32 chokes on bulk sysex uploads unless the sender
//! leaves the gaps a real 31250 baud wire would have left. The pacer tracks,
//! per sysex, how long the module stays busy and how long a sender must hold
//! off before the next one.

use std::time::Duration;

use instant::Instant;

use crate::midi::mt32::{RolandSysex, COMMAND_DT1, MODEL_MT32};

/// MIDI wire rate in bytes per second: 31250 baud, 10 bits per byte.
const WIRE_BYTES_PER_SEC: u64 = 3125;

/// Settling margin on top of the raw transfer time.
const SETTLE_MARGIN: Duration = Duration::from_millis(2);

/// Time an MT-32 needs to recover from an All Parameters Reset.
const RESET_SETTLE: Duration = Duration::from_millis(290);

/// How long an MT-32 stays busy after receiving `sysex`.
///
/// Transfer time is the wire time padded by 25%. Resets take far longer than
/// their byte count suggests.
pub fn busy_time(sysex: &[u8]) -> Duration {
    if is_parameter_reset(sysex) {
        return RESET_SETTLE;
    }

    let micros = sysex.len() as u64 * 1_250_000 / WIRE_BYTES_PER_SEC;

    Duration::from_micros(micros) + SETTLE_MARGIN
}

fn is_parameter_reset(sysex: &[u8]) -> bool {
    match RolandSysex::parse(sysex) {
        Some(roland) => {
            roland.model == MODEL_MT32
                && roland.command == COMMAND_DT1
                && roland.address[0] == 0x7F
        }
        None => false,
    }
}

/// Spaces sysex sends far enough apart for a first-revision MT-32.
#[derive(Debug)]
pub struct SysexPacer {
    ready_at: Instant,
}

impl SysexPacer {
    pub fn new() -> SysexPacer {
        SysexPacer {
            ready_at: Instant::now(),
        }
    }

    /// How much longer the device will be busy with previous traffic.
    pub fn remaining(&self) -> Duration {
        let now = Instant::now();

        if now < self.ready_at {
            self.ready_at - now
        } else {
            Duration::from_secs(0)
        }
    }

    /// Records that `sysex` was just sent and starts its busy window.
    pub fn note_sent(&mut self, sysex: &[u8]) {
        self.ready_at = Instant::now() + busy_time(sysex);
    }
}

impl Default for SysexPacer {
    fn default() -> SysexPacer {
        SysexPacer::new()
    }
}
