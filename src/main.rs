use std::str;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use log::*;
use regex::Regex;
use rustyline::error::ReadlineError;
use rustyline::Editor;
use structopt::StructOpt;

use soundbridge::midi::message::{SYSEX_END, SYSEX_START};
use soundbridge::midi::mt32::{self, RolandSysex};
use soundbridge::midi::{CaptureDevice, CaptureLog, DeviceRegistry, MidiDevice, ShortMessage};
use soundbridge::{AudioBridge, BackendKind, MidiRequest};

lazy_static! {
    /// Matches a string of whole hex bytes, whitespace already removed.
    static ref HEX_RE: Regex = Regex::new("^([0-9A-Fa-f]{2})+$").unwrap();
}

/// Inspect and exercise the host's MIDI setup.
#[derive(Debug, StructOpt)]
#[structopt(name = "soundbridge")]
struct Opt {
    /// The backend to attach.
    #[structopt(
        long,
        default_value = "auto",
        possible_values = &BackendKind::NAMES,
    )]
    backend: BackendKind,

    /// Bind to the first destination whose name contains this string.
    #[structopt(long)]
    destination: Option<String>,

    /// Pace sysex delivery for a first-revision MT-32.
    #[structopt(long)]
    delay_sysex: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Attach the backend, report what happened, and play a test note.
    Probe {
        /// Skip the audible test note.
        #[structopt(long)]
        silent: bool,
    },

    /// List the host's MIDI destinations.
    Ports,

    /// Send messages and sysexes, then exit.
    Send {
        /// A short message as hex bytes, e.g. '90 3C 64'. Repeatable.
        #[structopt(long = "message", number_of_values = 1)]
        messages: Vec<String>,

        /// A framed sysex as hex bytes, e.g. 'F0 7E 7F 09 01 F7'. Repeatable.
        #[structopt(long = "sysex", number_of_values = 1)]
        sysexes: Vec<String>,

        /// Show text on an MT-32's front panel.
        #[structopt(long)]
        lcd: Option<String>,

        /// Send a General MIDI reset first.
        #[structopt(long)]
        gm_reset: bool,
    },

    /// Interactive console for poking at the bridge.
    Console,
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let opt = Opt::from_args();

    let mut request = MidiRequest::new(opt.backend).with_delay_sysex(opt.delay_sysex);
    if let Some(destination) = opt.destination {
        request = request.with_destination(destination);
    }

    match opt.command {
        Command::Probe { silent } => {
            let bridge = AudioBridge::new();
            probe(&bridge, request, silent)
        }
        Command::Ports => list_ports(),
        Command::Send {
            messages,
            sysexes,
            lcd,
            gm_reset,
        } => {
            let bridge = AudioBridge::new();
            if !bridge.suggest_midi_backend(request) {
                warn!("no MIDI backend attached; everything below goes nowhere");
            }
            send(&bridge, &messages, &sysexes, lcd.as_deref(), gm_reset)
        }
        Command::Console => {
            let log = CaptureLog::new();
            let bridge = AudioBridge::builder()
                .with_registry(console_registry(&log))
                .with_display_hook(|line| println!("display: [{}]", line))
                .with_midi_request(request)
                .build();

            console(&bridge, &log)
        }
    }
}

fn probe(bridge: &AudioBridge, request: MidiRequest, silent: bool) -> Result<()> {
    let available = bridge.suggest_midi_backend(request);

    match bridge.midi_device_name() {
        Some(name) => println!("backend: {}", name),
        None => println!("backend: (none attached)"),
    }
    println!("available: {}", available);

    if available && !silent {
        bridge.send_midi_message(&ShortMessage::program_change(0, 0));
        bridge.send_midi_message(&ShortMessage::note_on(0, 60, 100));
        thread::sleep(Duration::from_millis(400));
        bridge.send_midi_message(&ShortMessage::note_off(0, 60, 0));
    }

    Ok(())
}

#[cfg(feature = "external-midi")]
fn list_ports() -> Result<()> {
    use soundbridge::midi::ExternalDevice;

    let destinations = ExternalDevice::destinations()?;

    if destinations.is_empty() {
        println!("no MIDI destinations");
    } else {
        for (index, name) in destinations.iter().enumerate() {
            println!("{}: {}", index, name);
        }
    }

    Ok(())
}

#[cfg(not(feature = "external-midi"))]
fn list_ports() -> Result<()> {
    bail!("this build has no external MIDI support; rebuild with the 'external-midi' feature");
}

fn send(
    bridge: &AudioBridge,
    messages: &[String],
    sysexes: &[String],
    lcd: Option<&str>,
    gm_reset: bool,
) -> Result<()> {
    if gm_reset {
        bridge.send_midi_sysex(&mt32::general_midi_reset());
    }

    if let Some(text) = lcd {
        bridge.send_midi_sysex(&mt32::display_sysex(text));
    }

    for raw in sysexes {
        bridge.send_midi_sysex(&parse_sysex(raw)?);
    }

    for raw in messages {
        bridge.send_midi_bytes(parse_message(raw)?);
    }

    Ok(())
}

fn console_registry(log: &CaptureLog) -> DeviceRegistry {
    let mut registry = DeviceRegistry::default();

    // The console's capture backend records into a log the `log` command can
    // print, instead of a private one.
    let shared = log.clone();
    registry.register(
        BackendKind::Capture,
        Box::new(move |_request| {
            Ok(Box::new(CaptureDevice::new().with_log(shared.clone())) as Box<dyn MidiDevice>)
        }),
    );

    registry
}

fn console(bridge: &AudioBridge, log: &CaptureLog) -> Result<()> {
    let mut editor = Editor::<()>::new();

    println!("soundbridge console, ? for help");

    loop {
        match editor.readline("midi> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line);

                match execute(bridge, log, line) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => println!("error: {:#}", err),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}

/// Parses and runs one console command. Returns `false` when the console
/// should exit.
fn execute(bridge: &AudioBridge, log: &CaptureLog, line: &str) -> Result<bool> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match command {
        "suggest" => {
            let mut tokens = rest.split_whitespace();
            let backend: BackendKind = tokens
                .next()
                .context("`suggest` takes a backend name")?
                .parse()?;

            let mut request = MidiRequest::new(backend);
            let destination = tokens.collect::<Vec<_>>().join(" ");
            if !destination.is_empty() {
                request = request.with_destination(destination);
            }

            println!("available: {}", bridge.suggest_midi_backend(request));
        }
        "status" => {
            let name = bridge.midi_device_name();
            println!("backend: {}", name.as_deref().unwrap_or("(none)"));
            println!("available: {}", bridge.midi_available());

            match bridge.midi_music_type() {
                Some(music) => println!("music: {}", music),
                None => println!("music: unknown"),
            }

            let (left, right) = bridge.stereo_volume();
            println!("volume: {:.2} {:.2}", left, right);
            println!("display: [{}]", bridge.midi_display());
        }
        "volume" => {
            let mut tokens = rest.split_whitespace();
            let left: f32 = tokens
                .next()
                .context("`volume` takes one or two gains")?
                .parse()
                .context("could not parse gain")?;
            let right: f32 = match tokens.next() {
                Some(token) => token.parse().context("could not parse gain")?,
                None => left,
            };

            bridge.set_stereo_volume(left, right);
            bridge.update_volumes();
        }
        "send" => bridge.send_midi_bytes(parse_message(rest)?),
        "note" => {
            let mut tokens = rest.split_whitespace();
            let key: u8 = tokens
                .next()
                .context("`note` takes a key number")?
                .parse()
                .context("the key must be a number from 0 to 127")?;
            let velocity: u8 = match tokens.next() {
                Some(token) => token
                    .parse()
                    .context("the velocity must be a number from 0 to 127")?,
                None => 100,
            };

            bridge.send_midi_message(&ShortMessage::note_on(0, key, velocity));
            thread::sleep(Duration::from_millis(250));
            bridge.send_midi_message(&ShortMessage::note_off(0, key, 0));
        }
        "sysex" => bridge.send_midi_sysex(&parse_sysex(rest)?),
        "lcd" => bridge.send_midi_sysex(&mt32::display_sysex(rest)),
        "reset" => bridge.send_midi_sysex(&mt32::general_midi_reset()),
        "pause" => bridge.pause_midi(),
        "log" => {
            let events = log.events();
            if events.is_empty() {
                println!("no captured events");
            }
            for event in events {
                println!("{}", event);
            }
        }
        "clear" => log.clear(),
        "q" | "quit" => return Ok(false),
        "?" | "help" => {
            println!("suggest <backend> [destination]: reconfigure MIDI output");
            println!("status: show backend, music type, volume, and display");
            println!("volume <left> [right]: set master volume and update");
            println!("send <hex bytes>: send a short message");
            println!("note <key> [velocity]: play a short note");
            println!("sysex <hex bytes>: send a framed sysex");
            println!("lcd <text>: show text on an MT-32 front panel");
            println!("reset: send a General MIDI reset");
            println!("pause: cut all sounding notes");
            println!("log: print events captured by the capture backend");
            println!("clear: discard captured events");
            println!("q: quit");
        }
        _ => println!("unknown command, ? for help"),
    }

    Ok(true)
}

/// Parses '90 3C 64' or '903C64' into bytes.
fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input.split_whitespace().collect();

    if !HEX_RE.is_match(&cleaned) {
        bail!("expected whole hex bytes, got '{}'", input);
    }

    cleaned
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let token = str::from_utf8(pair).context("hex input was not ASCII")?;
            u8::from_str_radix(token, 16).context("invalid hex byte")
        })
        .collect()
}

/// Parses a short message, padding it out to the three bytes an MPU-401
/// would deliver.
fn parse_message(raw: &str) -> Result<[u8; 3]> {
    let bytes = parse_hex(raw)?;

    if bytes.is_empty() || bytes.len() > 3 {
        bail!("a short message is 1 to 3 bytes, got {}", bytes.len());
    }

    let mut buffer = [0u8; 3];
    buffer[..bytes.len()].copy_from_slice(&bytes);

    Ok(buffer)
}

/// Parses and sanity-checks a framed sysex.
fn parse_sysex(raw: &str) -> Result<Vec<u8>> {
    let bytes = parse_hex(raw)?;

    if bytes.first() != Some(&SYSEX_START) || bytes.last() != Some(&SYSEX_END) {
        bail!("a sysex must be framed F0 .. F7");
    }

    if let Some(roland) = RolandSysex::parse(&bytes) {
        if !roland.checksum_valid() {
            warn!(
                "sysex carries checksum {:02X}, expected {:02X}",
                roland.checksum,
                roland.expected_checksum()
            );
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::{parse_hex, parse_message, parse_sysex};

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex("90 3C 64").unwrap(), vec![0x90, 0x3C, 0x64]);
        assert_eq!(parse_hex("903c64").unwrap(), vec![0x90, 0x3C, 0x64]);
        assert!(parse_hex("90 3").is_err());
        assert!(parse_hex("hello").is_err());
    }

    #[test]
    fn messages_are_padded() {
        assert_eq!(parse_message("C0 10").unwrap(), [0xC0, 0x10, 0x00]);
        assert!(parse_message("90 3C 64 00").is_err());
        assert!(parse_message("").is_err());
    }

    #[test]
    fn sysexes_must_be_framed() {
        assert!(parse_sysex("F0 7E 7F 09 01 F7").is_ok());
        assert!(parse_sysex("7E 7F 09 01").is_err());
    }
}
