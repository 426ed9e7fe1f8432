//! The external port backend.
//!
//! Drives a real MIDI destination on the host through `midir`: a hardware
//! synthesizer behind an interface, or a software synth exposing a virtual
//! port. Only compiled with the `external-midi` feature, since it drags in
//! platform MIDI libraries.

use std::thread;
use std::time::Duration;

use log::*;
use midir::{MidiOutput, MidiOutputConnection};

use crate::config::MidiRequest;
use crate::errors::MidiError;
use crate::midi::message::ShortMessage;
use crate::midi::pacing::SysexPacer;
use crate::midi::{MidiDevice, MusicSupport};

/// Client name registered with the host MIDI system.
const CLIENT_NAME: &str = "soundbridge";

/// A connection to one host MIDI destination.
pub struct ExternalDevice {
    connection: Option<MidiOutputConnection>,
    name: String,
    support: MusicSupport,
    pacer: Option<SysexPacer>,
}

impl ExternalDevice {
    /// Connects to the first destination matching the request, assuming it
    /// renders General MIDI.
    pub fn connect(request: &MidiRequest) -> Result<ExternalDevice, MidiError> {
        ExternalDevice::connect_with_support(request, MusicSupport::GENERAL_MIDI)
    }

    /// Connects for MT-32 music: the same port binding, but the destination
    /// is taken to render MT-32 music natively.
    pub fn connect_mt32(request: &MidiRequest) -> Result<ExternalDevice, MidiError> {
        ExternalDevice::connect_with_support(request, MusicSupport::MT32)
    }

    fn connect_with_support(
        request: &MidiRequest,
        support: MusicSupport,
    ) -> Result<ExternalDevice, MidiError> {
        let output = MidiOutput::new(CLIENT_NAME).map_err(MidiError::init)?;
        let ports = output.ports();

        let port = match &request.destination {
            // A bare number picks a port by position, the way DOSBox config
            // files traditionally do.
            Some(pattern) => match pattern.parse::<usize>() {
                Ok(index) => ports.get(index),
                Err(_) => {
                    let pattern = pattern.to_lowercase();
                    ports.iter().find(|port| {
                        output
                            .port_name(port)
                            .map(|name| name.to_lowercase().contains(&pattern))
                            .unwrap_or(false)
                    })
                }
            },
            None => ports.first(),
        };
        let port = port.ok_or_else(|| {
            MidiError::NoDestination(request.destination.clone().unwrap_or_else(|| "*".into()))
        })?;

        let name = output.port_name(port).map_err(MidiError::init)?;
        let connection = output.connect(port, CLIENT_NAME).map_err(MidiError::init)?;

        info!("connected to MIDI destination '{}'", name);

        let pacer = if request.delay_sysex {
            Some(SysexPacer::new())
        } else {
            None
        };

        Ok(ExternalDevice {
            connection: Some(connection),
            name,
            support,
            pacer,
        })
    }

    /// The names of every MIDI destination the host offers, in port order.
    pub fn destinations() -> Result<Vec<String>, MidiError> {
        let output = MidiOutput::new(CLIENT_NAME).map_err(MidiError::init)?;

        Ok(output
            .ports()
            .iter()
            .filter_map(|port| output.port_name(port).ok())
            .collect())
    }
}

impl MidiDevice for ExternalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self) -> MusicSupport {
        self.support
    }

    fn handle_message(&mut self, message: &ShortMessage) -> Result<(), MidiError> {
        let bytes = message.wire_bytes();

        // Never write padding or garbage statuses to a real wire.
        if bytes.is_empty() {
            return Ok(());
        }

        match &mut self.connection {
            Some(connection) => connection.send(bytes).map_err(MidiError::send),
            None => Ok(()),
        }
    }

    fn handle_sysex(&mut self, sysex: &[u8]) -> Result<(), MidiError> {
        if let Some(pacer) = &self.pacer {
            let wait = pacer.remaining();
            if wait > Duration::from_secs(0) {
                trace!("pacing sysex, waiting {:?}", wait);
                thread::sleep(wait);
            }
        }

        let result = match &mut self.connection {
            Some(connection) => connection.send(sysex).map_err(MidiError::send),
            None => Ok(()),
        };

        if let Some(pacer) = &mut self.pacer {
            pacer.note_sent(sysex);
        }

        result
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            debug!("closed MIDI destination '{}'", self.name);
        }
    }
}
