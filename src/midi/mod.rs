//! MIDI routing.
//!
//! The emulated MPU-401 writes short messages and sysexes into a
//! [`MidiRouter`]. The router owns whichever backend device the session asked
//! for, sniffs sysex traffic to tell MT-32 music from General MIDI, and
//! mirrors the MT-32's front-panel display for the host UI. Nothing that goes
//! wrong with MIDI is allowed to take the emulation down: failures degrade to
//! silence and a log line, and a later reconfiguration can recover.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};

use bitflags::bitflags;
use derive_more::Display;
use log::*;

use crate::config::{BackendKind, MidiRequest};
use crate::errors::MidiError;

pub mod message;
pub mod mt32;
pub mod pacing;

mod capture;
#[cfg(feature = "external-midi")]
mod external;
mod null;

pub use self::capture::{CaptureDevice, CaptureLog, CapturedEvent};
#[cfg(feature = "external-midi")]
pub use self::external::ExternalDevice;
pub use self::message::{wire_length, ShortMessage, Status, CHANNEL_COUNT};
pub use self::mt32::Mt32Display;
pub use self::null::NullDevice;

bitflags! {
    /// The flavors of MIDI music a device can render well.
    #[derive(Default)]
    pub struct MusicSupport: u8 {
        /// General MIDI and Roland GS music.
        const GENERAL_MIDI = 1 << 0;

        /// Roland MT-32 music.
        const MT32 = 1 << 1;
    }
}

/// The flavor of MIDI music a program appears to be writing.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
pub enum MusicType {
    #[display(fmt = "MT-32")]
    Mt32,

    #[display(fmt = "General MIDI")]
    GeneralMidi,
}

impl MusicType {
    /// The support flag a device needs to render this music well.
    pub fn needed_support(self) -> MusicSupport {
        match self {
            MusicType::Mt32 => MusicSupport::MT32,
            MusicType::GeneralMidi => MusicSupport::GENERAL_MIDI,
        }
    }
}

/// A destination for MIDI messages.
///
/// Implementations mirror the surface a hardware module presents: messages
/// in, an output volume, and a read on what music it renders well.
pub trait MidiDevice: Send {
    /// A short name for logs and diagnostics.
    fn name(&self) -> &str;

    /// The flavors of music this device renders well.
    fn supports(&self) -> MusicSupport;

    /// Whether messages sent here reach anything. The null device is the one
    /// implementation that answers no.
    fn is_real(&self) -> bool {
        true
    }

    /// Handles a short channel message.
    fn handle_message(&mut self, message: &ShortMessage) -> Result<(), MidiError>;

    /// Handles a framed system exclusive message.
    fn handle_sysex(&mut self, sysex: &[u8]) -> Result<(), MidiError>;

    /// Scales the device's output volume. `1.0` is unity. Most devices
    /// inherit their volume from the mixer channel they play into, so the
    /// default does nothing.
    fn set_volume(&mut self, _volume: f32) {}

    /// Cuts every sounding note, for pause and shutdown.
    fn silence(&mut self) {
        for channel in 0..CHANNEL_COUNT {
            let _ = self.handle_message(&ShortMessage::all_notes_off(channel));
        }
    }

    /// Releases the device. Called once, before the router drops it.
    fn close(&mut self) {}
}

/// Builds a device for a request.
pub type DeviceFactory = Box<dyn Fn(&MidiRequest) -> Result<Box<dyn MidiDevice>, MidiError> + Send>;

/// Callback fired when the MT-32 front-panel display changes.
pub type DisplayHook = Box<dyn Fn(&str) + Send>;

/// The set of backends a router can draw from.
///
/// The default registry always offers the null and capture backends; the
/// external port backends join it when the `external-midi` feature is
/// compiled in.
pub struct DeviceRegistry {
    factories: HashMap<BackendKind, DeviceFactory>,
}

impl DeviceRegistry {
    /// A registry with no backends at all.
    pub fn empty() -> DeviceRegistry {
        DeviceRegistry {
            factories: HashMap::new(),
        }
    }

    /// Registers or replaces the factory for a backend.
    pub fn register(&mut self, kind: BackendKind, factory: DeviceFactory) {
        self.factories.insert(kind, factory);
    }

    /// Whether a factory is registered for a backend.
    pub fn contains(&self, kind: BackendKind) -> bool {
        self.factories.contains_key(&kind)
    }

    fn open(
        &self,
        kind: BackendKind,
        request: &MidiRequest,
    ) -> Result<Box<dyn MidiDevice>, MidiError> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or(MidiError::UnsupportedBackend(kind))?;

        factory(request)
    }
}

impl Default for DeviceRegistry {
    /// The standard backend set for this build.
    fn default() -> DeviceRegistry {
        let mut registry = DeviceRegistry::empty();

        registry.register(
            BackendKind::Disabled,
            Box::new(|_request| Ok(Box::new(NullDevice::new()) as Box<dyn MidiDevice>)),
        );

        registry.register(
            BackendKind::Capture,
            Box::new(|_request| Ok(Box::new(CaptureDevice::new()) as Box<dyn MidiDevice>)),
        );

        #[cfg(feature = "external-midi")]
        {
            registry.register(
                BackendKind::Port,
                Box::new(|request| {
                    ExternalDevice::connect(request)
                        .map(|device| Box::new(device) as Box<dyn MidiDevice>)
                }),
            );

            registry.register(
                BackendKind::Mt32,
                Box::new(|request| {
                    ExternalDevice::connect_mt32(request)
                        .map(|device| Box::new(device) as Box<dyn MidiDevice>)
                }),
            );
        }

        registry
    }
}

impl Debug for DeviceRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("backends", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Routes MIDI traffic from the emulated MPU-401 to a backend device.
///
/// A fresh router has no device: every send is a silent no-op until
/// [`suggest`](MidiRouter::suggest) attaches one.
pub struct MidiRouter {
    registry: DeviceRegistry,
    request: MidiRequest,
    device: Option<Box<dyn MidiDevice>>,
    detected: Option<MusicType>,
    autodetect: bool,
    reattach_warned: bool,
    display: Mt32Display,
    display_hook: Option<DisplayHook>,
}

impl MidiRouter {
    pub fn new(registry: DeviceRegistry) -> MidiRouter {
        MidiRouter {
            registry,
            request: MidiRequest::default(),
            device: None,
            detected: None,
            // Sniffing starts with the first configured session.
            autodetect: false,
            reattach_warned: false,
            display: Mt32Display::new(),
            display_hook: None,
        }
    }

    /// Tears down the current backend and attaches the one the request asks
    /// for. Returns whether a real backend is attached afterwards.
    ///
    /// Attach failures are logged here, once, and leave the router in its
    /// silent no-op state; a later call can recover.
    pub fn suggest(&mut self, request: MidiRequest) -> bool {
        if let Some(mut device) = self.device.take() {
            debug!("closing MIDI device '{}'", device.name());
            device.close();
        }

        info!("MIDI backend requested: {}", request);

        self.detected = match request.backend {
            BackendKind::Mt32 => Some(MusicType::Mt32),
            _ => None,
        };
        self.autodetect = !matches!(
            request.backend,
            BackendKind::Mt32 | BackendKind::Disabled
        );
        self.reattach_warned = false;
        self.display.clear();
        self.notify_display();
        self.request = request;

        let kind = match self.request.backend {
            BackendKind::Auto => BackendKind::Port,
            other => other,
        };

        self.device = match self.registry.open(kind, &self.request) {
            Ok(device) => {
                if device.is_real() {
                    info!("MIDI: attached '{}' backend", device.name());
                } else {
                    info!("MIDI output disabled");
                }
                Some(device)
            }
            Err(err) => match self.request.backend {
                BackendKind::Auto => {
                    info!("MIDI output unavailable: {}", err);
                    None
                }
                BackendKind::Mt32 => {
                    warn!("MT-32 backend unavailable: {}", err);
                    self.open_fallback(BackendKind::Port)
                }
                _ => {
                    warn!("failed to attach MIDI backend: {}", err);
                    None
                }
            },
        };

        self.is_available()
    }

    fn open_fallback(&self, kind: BackendKind) -> Option<Box<dyn MidiDevice>> {
        match self.registry.open(kind, &self.request) {
            Ok(device) => {
                info!("MIDI: attached '{}' backend instead", device.name());
                Some(device)
            }
            Err(err) => {
                warn!("fallback MIDI backend also unavailable: {}", err);
                None
            }
        }
    }

    /// Whether messages currently reach a real backend.
    pub fn is_available(&self) -> bool {
        self.device.as_ref().map_or(false, |device| device.is_real())
    }

    /// Forwards a short message to the attached device, verbatim.
    ///
    /// Without a device this does nothing. Device errors are logged and
    /// swallowed; by the time a message is in flight there is nobody left to
    /// hand an error to.
    pub fn send_message(&mut self, message: &ShortMessage) {
        if let Some(device) = &mut self.device {
            trace!("MIDI message {}", message);

            if let Err(err) = device.handle_message(message) {
                warn!("MIDI device '{}' rejected message {}: {}", device.name(), message, err);
            }
        }
    }

    /// Forwards a framed sysex to the attached device.
    ///
    /// Display mirroring and music sniffing happen before delivery, so a
    /// backend swapped in by autodetection still receives the message that
    /// triggered the swap.
    pub fn send_sysex(&mut self, sysex: &[u8]) {
        if let Some(text) = mt32::display_text(sysex) {
            self.display.show(&text);
            debug!("MT-32 display: \"{}\"", self.display.line());
            self.notify_display();
        }

        if self.autodetect {
            if let Some(music) = mt32::classify(sysex) {
                self.note_music(music);
            }
        }

        if let Some(device) = &mut self.device {
            trace!("MIDI sysex ({} bytes)", sysex.len());

            if let Err(err) = device.handle_sysex(sysex) {
                warn!("MIDI device '{}' rejected sysex: {}", device.name(), err);
            }
        }
    }

    fn note_music(&mut self, music: MusicType) {
        if self.detected == Some(music) {
            return;
        }

        self.detected = Some(music);
        info!("MIDI music detected: {}", music);

        if let Some(device) = &self.device {
            if device.supports().contains(music.needed_support()) {
                return;
            }
        }

        let kind = match music {
            MusicType::Mt32 => BackendKind::Mt32,
            MusicType::GeneralMidi => BackendKind::Port,
        };

        match self.registry.open(kind, &self.request) {
            Ok(device) => {
                if let Some(mut old) = self.device.take() {
                    old.close();
                }

                info!("MIDI: switched to '{}' backend for {} music", device.name(), music);
                self.device = Some(device);
            }
            Err(err) => {
                if !self.reattach_warned {
                    self.reattach_warned = true;
                    warn!("no {} capable MIDI backend: {}", music, err);
                }
            }
        }
    }

    /// Cuts every sounding note on the attached device.
    pub fn pause(&mut self) {
        if let Some(device) = &mut self.device {
            debug!("silencing MIDI device '{}'", device.name());
            device.silence();
        }
    }

    /// Forwards the host's master volume to the attached device.
    pub fn set_device_volume(&mut self, volume: f32) {
        if let Some(device) = &mut self.device {
            device.set_volume(volume.max(0.0).min(1.0));
        }
    }

    /// The flavor of music the router believes the program is writing.
    pub fn music_type(&self) -> Option<MusicType> {
        self.detected
    }

    /// The current MT-32 front-panel display line.
    pub fn display_line(&self) -> String {
        self.display.line()
    }

    /// Installs a callback fired whenever the display line changes.
    pub fn set_display_hook(&mut self, hook: DisplayHook) {
        self.display_hook = Some(hook);
    }

    /// The request behind the current configuration.
    pub fn request(&self) -> &MidiRequest {
        &self.request
    }

    /// The name of the attached device, if any.
    pub fn device_name(&self) -> Option<&str> {
        self.device.as_ref().map(|device| device.name())
    }

    fn notify_display(&self) {
        if let Some(hook) = &self.display_hook {
            hook(&self.display.line());
        }
    }
}

impl Default for MidiRouter {
    fn default() -> MidiRouter {
        MidiRouter::new(DeviceRegistry::default())
    }
}

impl Debug for MidiRouter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MidiRouter")
            .field("request", &self.request)
            .field("device", &self.device_name())
            .field("music", &self.detected)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A registry whose only backend is a capture device with the given
    /// support, registered under `kind`.
    fn capture_registry(kind: BackendKind, support: MusicSupport, log: &CaptureLog) -> DeviceRegistry {
        let mut registry = DeviceRegistry::empty();
        register_capture(&mut registry, kind, support, log);
        registry
    }

    fn register_capture(
        registry: &mut DeviceRegistry,
        kind: BackendKind,
        support: MusicSupport,
        log: &CaptureLog,
    ) {
        let log = log.clone();
        registry.register(
            kind,
            Box::new(move |_request| {
                Ok(Box::new(CaptureDevice::new().with_support(support).with_log(log.clone()))
                    as Box<dyn MidiDevice>)
            }),
        );
    }

    struct RejectingDevice;

    impl MidiDevice for RejectingDevice {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn supports(&self) -> MusicSupport {
            MusicSupport::all()
        }

        fn handle_message(&mut self, _message: &ShortMessage) -> Result<(), MidiError> {
            Err(MidiError::SendFailed("device unplugged".into()))
        }

        fn handle_sysex(&mut self, _sysex: &[u8]) -> Result<(), MidiError> {
            Err(MidiError::SendFailed("device unplugged".into()))
        }
    }

    #[test]
    fn fresh_router_swallows_traffic() {
        let mut router = MidiRouter::new(DeviceRegistry::empty());

        assert!(!router.is_available());
        router.send_message(&ShortMessage::note_on(0, 60, 100));
        router.send_sysex(&mt32::general_midi_reset());
        router.send_sysex(&mt32::display_sysex("NOBODY HOME"));
        router.pause();

        // Traffic before the first suggest call is inert: nothing is
        // forwarded and nothing is sniffed.
        assert_eq!(router.music_type(), None);
    }

    #[test]
    fn suggest_attaches_and_reports_availability() {
        let log = CaptureLog::default();
        let registry = capture_registry(BackendKind::Capture, MusicSupport::all(), &log);
        let mut router = MidiRouter::new(registry);

        assert!(router.suggest(MidiRequest::new(BackendKind::Capture)));
        assert!(router.is_available());
        assert_eq!(router.device_name(), Some("capture"));
        assert_eq!(router.request().backend, BackendKind::Capture);
    }

    #[test]
    fn unavailable_backend_degrades_and_recovers() {
        let log = CaptureLog::default();
        let registry = capture_registry(BackendKind::Capture, MusicSupport::all(), &log);
        let mut router = MidiRouter::new(registry);

        // Auto wants a port backend, which this registry does not offer.
        assert!(!router.suggest(MidiRequest::default()));
        assert!(!router.is_available());
        router.send_message(&ShortMessage::note_on(0, 60, 100));
        assert!(log.is_empty());

        // A later reconfiguration recovers.
        assert!(router.suggest(MidiRequest::new(BackendKind::Capture)));
        router.send_message(&ShortMessage::note_on(0, 60, 100));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn factory_errors_degrade_to_silence() {
        let log = CaptureLog::default();
        let mut registry = capture_registry(BackendKind::Capture, MusicSupport::all(), &log);
        registry.register(
            BackendKind::Port,
            Box::new(|_request| Err(MidiError::init("port went away"))),
        );
        let mut router = MidiRouter::new(registry);

        // The factory exists; the device behind it does not.
        assert!(!router.suggest(MidiRequest::new(BackendKind::Port)));
        assert!(!router.is_available());
        router.send_message(&ShortMessage::note_on(0, 60, 100));
        router.send_sysex(&mt32::general_midi_reset());
        assert!(log.is_empty());

        assert!(router.suggest(MidiRequest::new(BackendKind::Capture)));
        router.send_message(&ShortMessage::note_on(0, 60, 100));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn messages_forward_verbatim_padding_included() {
        let log = CaptureLog::default();
        let registry = capture_registry(BackendKind::Capture, MusicSupport::all(), &log);
        let mut router = MidiRouter::new(registry);
        router.suggest(MidiRequest::new(BackendKind::Capture));

        // A program change with a nonzero padding byte must arrive untouched.
        let message = ShortMessage::new([0xC0, 0x10, 0x7F]);
        router.send_message(&message);

        assert_eq!(log.events(), vec![CapturedEvent::Message(message)]);
    }

    #[test]
    fn device_errors_are_swallowed() {
        let mut registry = DeviceRegistry::empty();
        registry.register(
            BackendKind::Capture,
            Box::new(|_request| Ok(Box::new(RejectingDevice) as Box<dyn MidiDevice>)),
        );
        let mut router = MidiRouter::new(registry);
        router.suggest(MidiRequest::new(BackendKind::Capture));

        router.send_message(&ShortMessage::note_on(0, 60, 100));
        router.send_sysex(&mt32::display_sysex("STILL ALIVE"));

        // The device stays attached; an unplugged synth is not fatal.
        assert!(router.is_available());
        assert_eq!(router.display_line(), "STILL ALIVE         ");
    }

    #[test]
    fn reconfiguring_closes_the_old_device() {
        let log = CaptureLog::default();
        let registry = capture_registry(BackendKind::Capture, MusicSupport::all(), &log);
        let mut router = MidiRouter::new(registry);

        router.suggest(MidiRequest::new(BackendKind::Capture));
        router.suggest(MidiRequest::new(BackendKind::Capture));

        assert_eq!(log.events(), vec![CapturedEvent::Closed]);
    }

    #[test]
    fn autodetect_switches_to_mt32_capable_backend() {
        let general = CaptureLog::default();
        let mt32_log = CaptureLog::default();
        let mut registry = DeviceRegistry::empty();
        register_capture(&mut registry, BackendKind::Capture, MusicSupport::GENERAL_MIDI, &general);
        register_capture(&mut registry, BackendKind::Mt32, MusicSupport::MT32, &mt32_log);

        let mut router = MidiRouter::new(registry);
        router.suggest(MidiRequest::new(BackendKind::Capture));

        let sysex = mt32::display_sysex("ROLAND MT-32");
        router.send_sysex(&sysex);

        assert_eq!(router.music_type(), Some(MusicType::Mt32));
        // The triggering sysex reaches the new device, not the old one.
        assert_eq!(general.events(), vec![CapturedEvent::Closed]);
        assert_eq!(mt32_log.events(), vec![CapturedEvent::Sysex(sysex.into())]);
        assert_eq!(router.display_line(), "ROLAND MT-32        ");
    }

    #[test]
    fn autodetect_without_better_backend_keeps_current_device() {
        let log = CaptureLog::default();
        let registry = capture_registry(BackendKind::Capture, MusicSupport::GENERAL_MIDI, &log);
        let mut router = MidiRouter::new(registry);
        router.suggest(MidiRequest::new(BackendKind::Capture));

        router.send_sysex(&mt32::display_sysex("NO MT-32 HERE"));

        assert_eq!(router.music_type(), Some(MusicType::Mt32));
        assert!(router.is_available());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn forced_mt32_disables_sniffing() {
        let log = CaptureLog::default();
        let registry = capture_registry(BackendKind::Mt32, MusicSupport::MT32, &log);
        let mut router = MidiRouter::new(registry);
        router.suggest(MidiRequest::new(BackendKind::Mt32));

        assert_eq!(router.music_type(), Some(MusicType::Mt32));

        router.send_sysex(&mt32::general_midi_reset());
        assert_eq!(router.music_type(), Some(MusicType::Mt32));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn pause_sends_all_notes_off_on_every_channel() {
        let log = CaptureLog::default();
        let registry = capture_registry(BackendKind::Capture, MusicSupport::all(), &log);
        let mut router = MidiRouter::new(registry);
        router.suggest(MidiRequest::new(BackendKind::Capture));

        router.pause();

        let events = log.events();
        assert_eq!(events.len(), usize::from(CHANNEL_COUNT));

        for (channel, event) in events.iter().enumerate() {
            assert_eq!(
                *event,
                CapturedEvent::Message(ShortMessage::all_notes_off(channel as u8))
            );
        }
    }

    #[test]
    fn device_volume_is_clamped() {
        let log = CaptureLog::default();
        let registry = capture_registry(BackendKind::Capture, MusicSupport::all(), &log);
        let mut router = MidiRouter::new(registry);
        router.suggest(MidiRequest::new(BackendKind::Capture));

        router.set_device_volume(1.5);
        router.set_device_volume(0.25);

        assert_eq!(
            log.events(),
            vec![CapturedEvent::Volume(1.0), CapturedEvent::Volume(0.25)]
        );
    }

    #[test]
    fn null_backend_attaches_but_is_not_available() {
        let mut router = MidiRouter::new(DeviceRegistry::default());

        assert!(!router.suggest(MidiRequest::new(BackendKind::Disabled)));
        assert!(!router.is_available());
        assert_eq!(router.device_name(), Some("none"));

        // Traffic is swallowed, but the display still mirrors what the
        // program tried to show.
        router.send_message(&ShortMessage::note_on(0, 60, 100));
        router.send_sysex(&mt32::display_sysex("INSERT DISK 2"));
        assert_eq!(router.display_line(), "INSERT DISK 2       ");
    }

    #[test]
    fn display_hook_fires_on_updates_and_reset() {
        use std::sync::{Arc, Mutex};

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let log = CaptureLog::default();
        let registry = capture_registry(BackendKind::Capture, MusicSupport::all(), &log);
        let mut router = MidiRouter::new(registry);
        router.set_display_hook(Box::new(move |line| {
            sink.lock().unwrap().push(line.to_string());
        }));

        router.suggest(MidiRequest::new(BackendKind::Capture));
        router.send_sysex(&mt32::display_sysex("HELLO"));

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![" ".repeat(mt32::DISPLAY_WIDTH), format!("HELLO{}", " ".repeat(15))]
        );
    }
}
