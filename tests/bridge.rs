//! Exercises the audio bridge facade the way an emulator core would.

use std::sync::Arc;
use std::thread;

use indoc::indoc;
use rand::Rng;

use soundbridge::midi::{
    mt32, CaptureDevice, CaptureLog, CapturedEvent, DeviceRegistry, MidiDevice, ShortMessage,
    CHANNEL_COUNT,
};
use soundbridge::{AudioBridge, BackendKind, Channel, MidiRequest};

/// Creates a bridge whose only backend is a capture device recording into
/// `log`.
fn capture_bridge(log: &CaptureLog) -> AudioBridge {
    let mut registry = DeviceRegistry::empty();

    let shared = log.clone();
    registry.register(
        BackendKind::Capture,
        Box::new(move |_request| {
            Ok(Box::new(CaptureDevice::new().with_log(shared.clone())) as Box<dyn MidiDevice>)
        }),
    );

    AudioBridge::builder().with_registry(registry).build()
}

/// Renders the captured events as one line per event.
fn transcript(log: &CaptureLog) -> String {
    log.events().iter().map(|event| format!("{}\n", event)).collect()
}

#[test]
fn volumes_default_to_unity() {
    let bridge = AudioBridge::new();

    assert_eq!(bridge.stereo_volume(), (1.0, 1.0));
    assert_eq!(bridge.volume(Channel::Left), 1.0);
    assert_eq!(bridge.volume(Channel::Right), 1.0);
}

#[test]
fn volume_changes_round_trip() {
    let bridge = AudioBridge::new();

    bridge.set_volume(Channel::Left, 0.5);
    assert_eq!(bridge.stereo_volume(), (0.5, 1.0));

    // The store does not validate; hosts clamp at their control surface.
    bridge.set_stereo_volume(0.0, 2.0);
    assert_eq!(bridge.stereo_volume(), (0.0, 2.0));
}

#[test]
fn a_session_leaves_a_faithful_transcript() {
    let log = CaptureLog::new();
    let bridge = capture_bridge(&log);

    assert!(bridge.suggest_midi_backend(MidiRequest::new(BackendKind::Capture)));
    assert!(bridge.midi_available());
    assert_eq!(bridge.midi_device_name().as_deref(), Some("capture"));

    bridge.send_midi_message(&ShortMessage::note_on(0, 0x3C, 0x64));
    bridge.send_midi_bytes([0xC0, 0x10, 0x7F]);
    bridge.send_midi_sysex(&mt32::general_midi_reset());
    bridge.set_stereo_volume(1.0, 0.5);
    bridge.update_volumes();
    bridge.suggest_midi_backend(MidiRequest::new(BackendKind::Disabled));

    // The program change keeps its padding byte even though only two bytes
    // would reach a wire.
    assert_eq!(
        log.events()[1],
        CapturedEvent::Message(ShortMessage::new([0xC0, 0x10, 0x7F]))
    );

    assert_eq!(
        transcript(&log),
        indoc! {"
            message 90 3C 64
            message C0 10
            sysex F0 7E 7F 09 01 F7 (6 bytes)
            volume 0.75
            closed
        "}
    );
}

#[test]
fn without_a_backend_every_send_is_a_quiet_no_op() {
    let log = CaptureLog::new();
    let bridge = capture_bridge(&log);

    // Auto resolves to a port backend, which this registry does not offer.
    assert!(!bridge.suggest_midi_backend(MidiRequest::default()));
    assert!(!bridge.midi_available());
    assert_eq!(bridge.midi_device_name(), None);

    bridge.send_midi_bytes([0x90, 0x3C, 0x64]);
    bridge.send_midi_sysex(&mt32::general_midi_reset());
    bridge.pause_midi();
    bridge.update_volumes();
    assert!(log.is_empty());

    // A later reconfiguration picks everything back up.
    assert!(bridge.suggest_midi_backend(MidiRequest::new(BackendKind::Capture)));
    bridge.send_midi_bytes([0x90, 0x3C, 0x64]);
    assert_eq!(log.len(), 1);
}

#[test]
fn pause_cuts_every_channel() {
    let log = CaptureLog::new();
    let bridge = capture_bridge(&log);
    bridge.suggest_midi_backend(MidiRequest::new(BackendKind::Capture));

    bridge.send_midi_message(&ShortMessage::note_on(3, 72, 90));
    bridge.pause_midi();

    let sweep: Vec<_> = log.events().into_iter().skip(1).collect();
    assert_eq!(sweep.len(), usize::from(CHANNEL_COUNT));

    for (channel, event) in sweep.iter().enumerate() {
        assert_eq!(
            *event,
            CapturedEvent::Message(ShortMessage::all_notes_off(channel as u8))
        );
    }
}

#[test]
fn config_strings_drive_the_backend() {
    let bridge = AudioBridge::new();

    // 'none' attaches the null device: configured, but nothing to hear.
    assert!(!bridge.suggest_midi_from_config("none", ""));
    assert_eq!(bridge.midi_device_name().as_deref(), Some("none"));

    assert!(bridge.suggest_midi_from_config("capture", ""));
    assert!(bridge.midi_available());
    assert_eq!(bridge.midi_device_name().as_deref(), Some("capture"));
}

#[test]
fn mixer_channels_follow_the_master() {
    let bridge = AudioBridge::new();
    let channel = bridge.mixer().register_channel("sb16");

    channel.set_gain(0.5, 0.5);
    bridge.set_stereo_volume(0.5, 1.0);
    bridge.update_volumes();

    assert_eq!(channel.effective_gain(), (0.25, 0.5));
    assert_eq!(bridge.mixer().channel_names(), vec!["sb16".to_string()]);
}

#[test]
fn concurrent_volume_writes_are_never_torn() {
    let bridge = Arc::new(AudioBridge::new());
    bridge.set_stereo_volume(1.0, 0.0);

    let writer = Arc::clone(&bridge);
    let handle = thread::spawn(move || {
        let mut rng = rand::thread_rng();
        let pairs = [(1.0, 0.0), (0.75, 0.25), (0.5, 0.5), (0.0, 1.0)];

        for _ in 0..5_000 {
            let (left, right) = pairs[rng.gen_range(0, pairs.len())];
            writer.set_stereo_volume(left, right);
        }
    });

    // Every pair the writer stores sums to exactly 1.0, so a torn read is
    // the only way this assertion can fail.
    for _ in 0..5_000 {
        let (left, right) = bridge.stereo_volume();
        assert_eq!(left + right, 1.0, "torn volume pair: ({}, {})", left, right);
    }

    handle.join().unwrap();
}

#[test]
fn bridges_are_shared_between_threads() {
    let log = CaptureLog::new();
    let bridge = Arc::new(capture_bridge(&log));
    assert!(bridge.suggest_midi_backend(MidiRequest::new(BackendKind::Capture)));

    let worker = Arc::clone(&bridge);
    let handle = thread::spawn(move || {
        for key in 60..72 {
            worker.send_midi_message(&ShortMessage::note_on(0, key, 100));
        }
    });

    handle.join().unwrap();
    assert_eq!(log.len(), 12);
}
