//! Host audio services for a DOS emulator core.
//!
//! An [`AudioBridge`] owns everything audio on the host side of an emulation
//! session: the mixer's volume store, read lock-free by the audio callback,
//! and the MIDI router that carries the emulated MPU-401's traffic to
//! whichever backend the session asked for. The core calls a handful of
//! narrow methods; the host configures the bridge up front and otherwise
//! leaves it alone.

pub mod config;
pub mod errors;
pub mod midi;
pub mod mixer;

use std::fmt::{self, Debug, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::midi::{DeviceRegistry, MidiRouter, MusicType, ShortMessage};
use crate::mixer::Mixer;

pub use crate::config::{BackendKind, MidiRequest};
pub use crate::mixer::Channel;

/// The bridge between an emulator core's audio output and the host.
///
/// All methods take `&self`: the bridge is meant to be shared, typically
/// behind an `Arc`, between the emulation thread, the audio callback, and the
/// host UI. Volume reads stay lock-free; MIDI traffic serializes on an
/// internal lock.
#[derive(Debug)]
pub struct AudioBridge {
    mixer: Mixer,
    midi: Mutex<MidiRouter>,
}

impl AudioBridge {
    /// A bridge with the standard backends for this build and no MIDI device
    /// attached yet.
    pub fn new() -> AudioBridge {
        AudioBridge::builder().build()
    }

    pub fn builder() -> AudioBridgeBuilder {
        AudioBridgeBuilder::default()
    }

    /// Sets the master volume for one side of the stereo field.
    pub fn set_volume(&self, channel: Channel, gain: f32) {
        self.mixer.set_volume(channel, gain);
    }

    /// The master volume for one side of the stereo field. Safe to call from
    /// the audio callback.
    pub fn volume(&self, channel: Channel) -> f32 {
        self.mixer.volume(channel)
    }

    /// Sets both sides of the master volume as one atomic pair.
    pub fn set_stereo_volume(&self, left: f32, right: f32) {
        self.mixer.set_stereo_volume(left, right);
    }

    /// Both sides of the master volume. Safe to call from the audio callback.
    pub fn stereo_volume(&self) -> (f32, f32) {
        self.mixer.stereo_volume()
    }

    /// Pushes the current master volume out to every active mixer channel and
    /// to the attached MIDI device.
    pub fn update_volumes(&self) {
        self.mixer.update_volumes();

        let (left, right) = self.mixer.stereo_volume();
        self.midi().set_device_volume((left + right) / 2.0);
    }

    /// The mixer's channel registry, for emulated sound devices.
    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    /// Reconfigures MIDI output. Returns whether a real backend is attached
    /// afterwards.
    pub fn suggest_midi_backend(&self, request: MidiRequest) -> bool {
        self.midi().suggest(request)
    }

    /// Reconfigures MIDI output from DOS-style configuration strings.
    pub fn suggest_midi_from_config(&self, device: &str, params: &str) -> bool {
        self.suggest_midi_backend(MidiRequest::from_config(device, params))
    }

    /// Whether MIDI messages currently reach a real backend.
    pub fn midi_available(&self) -> bool {
        self.midi().is_available()
    }

    /// Forwards a short message from the emulated MPU-401.
    pub fn send_midi_message(&self, message: &ShortMessage) {
        self.midi().send_message(message);
    }

    /// Forwards a raw three-byte buffer from the emulated MPU-401.
    pub fn send_midi_bytes(&self, bytes: [u8; 3]) {
        self.send_midi_message(&ShortMessage::new(bytes));
    }

    /// Forwards a framed system exclusive message from the emulated MPU-401.
    pub fn send_midi_sysex(&self, sysex: &[u8]) {
        self.midi().send_sysex(sysex);
    }

    /// Cuts every sounding MIDI note, for pause and shutdown.
    pub fn pause_midi(&self) {
        self.midi().pause();
    }

    /// The flavor of music the router believes the program is writing.
    pub fn midi_music_type(&self) -> Option<MusicType> {
        self.midi().music_type()
    }

    /// The current MT-32 front-panel display line.
    pub fn midi_display(&self) -> String {
        self.midi().display_line()
    }

    /// The name of the attached MIDI device, if any.
    pub fn midi_device_name(&self) -> Option<String> {
        self.midi().device_name().map(String::from)
    }

    fn midi(&self) -> MutexGuard<'_, MidiRouter> {
        // MIDI state stays consistent across a panicking backend, so a
        // poisoned lock is recovered rather than propagated.
        self.midi.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AudioBridge {
    fn default() -> AudioBridge {
        AudioBridge::new()
    }
}

/// Configures an [`AudioBridge`] before it is built.
#[derive(Default)]
pub struct AudioBridgeBuilder {
    registry: Option<DeviceRegistry>,
    request: Option<MidiRequest>,
    display_hook: Option<midi::DisplayHook>,
}

impl AudioBridgeBuilder {
    /// Replaces the standard backend registry.
    pub fn with_registry(mut self, registry: DeviceRegistry) -> AudioBridgeBuilder {
        self.registry = Some(registry);
        self
    }

    /// Attaches a MIDI backend immediately instead of starting silent.
    pub fn with_midi_request(mut self, request: MidiRequest) -> AudioBridgeBuilder {
        self.request = Some(request);
        self
    }

    /// Installs a callback fired when the MT-32 front-panel display changes.
    pub fn with_display_hook(
        mut self,
        hook: impl Fn(&str) + Send + 'static,
    ) -> AudioBridgeBuilder {
        self.display_hook = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> AudioBridge {
        let registry = self.registry.unwrap_or_default();
        let mut router = MidiRouter::new(registry);

        if let Some(hook) = self.display_hook {
            router.set_display_hook(hook);
        }

        if let Some(request) = self.request {
            router.suggest(request);
        }

        AudioBridge {
            mixer: Mixer::new(),
            midi: Mutex::new(router),
        }
    }
}

impl Debug for AudioBridgeBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBridgeBuilder")
            .field("registry", &self.registry)
            .field("request", &self.request)
            .field("display_hook", &self.display_hook.as_ref().map(|_| ".."))
            .finish()
    }
}
