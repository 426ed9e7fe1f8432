//! Host-side volume control.
//!
//! Contains the volume store shared between the emulation and the host UI: a
//! master gain pair plus a registry of per-device mixer channels. The mixing
//! callback reads effective gains on every audio buffer, so reads take no
//! locks; reconfiguration happens on the main thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use derive_more::Display;

/// One side of the stereo field.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
pub enum Channel {
    #[display(fmt = "left")]
    Left,

    #[display(fmt = "right")]
    Right,
}

/// A stereo gain pair packed into a single atomic word.
///
/// Both sides live in one `AtomicU64` so that a reader on the mixing thread
/// can never observe a half-updated pair.
#[derive(Debug)]
struct AtomicGainPair(AtomicU64);

impl AtomicGainPair {
    fn new(left: f32, right: f32) -> AtomicGainPair {
        AtomicGainPair(AtomicU64::new(pack(left, right)))
    }

    fn load(&self) -> (f32, f32) {
        unpack(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, left: f32, right: f32) {
        self.0.store(pack(left, right), Ordering::Relaxed);
    }

    fn store_side(&self, channel: Channel, gain: f32) {
        let _ = self.0.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            let (left, right) = unpack(bits);

            Some(match channel {
                Channel::Left => pack(gain, right),
                Channel::Right => pack(left, gain),
            })
        });
    }

    fn side(&self, channel: Channel) -> f32 {
        let (left, right) = self.load();

        match channel {
            Channel::Left => left,
            Channel::Right => right,
        }
    }
}

fn pack(left: f32, right: f32) -> u64 {
    (u64::from(left.to_bits()) << 32) | u64::from(right.to_bits())
}

fn unpack(bits: u64) -> (f32, f32) {
    (f32::from_bits((bits >> 32) as u32), f32::from_bits(bits as u32))
}

#[derive(Debug)]
struct ChannelState {
    name: String,

    /// The channel's own gain, set by the emulated device.
    gain: AtomicGainPair,

    /// Master gain folded into the channel gain. This is the value the
    /// mixing callback actually applies to samples.
    effective: AtomicGainPair,

    active: AtomicBool,

    master: Arc<AtomicGainPair>,
}

impl ChannelState {
    fn refresh(&self) {
        let (master_left, master_right) = self.master.load();
        let (left, right) = self.gain.load();

        self.effective.store(left * master_left, right * master_right);
    }
}

/// A handle to one registered mixer channel.
///
/// The emulated device keeps the handle for as long as the channel exists;
/// dropping it unregisters the channel.
#[derive(Debug, Clone)]
pub struct MixerChannel {
    state: Arc<ChannelState>,
}

impl MixerChannel {
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Sets the channel's own gain pair and folds the current master gain in
    /// immediately.
    pub fn set_gain(&self, left: f32, right: f32) {
        self.state.gain.store(left, right);
        self.state.refresh();
    }

    /// The channel's own gain pair, before the master gain is applied.
    pub fn gain(&self) -> (f32, f32) {
        self.state.gain.load()
    }

    /// The gain pair the mixing callback should apply to this channel's
    /// samples. Lock-free.
    pub fn effective_gain(&self) -> (f32, f32) {
        self.state.effective.load()
    }

    /// Marks the channel active or idle. Idle channels are skipped by update
    /// passes; reactivating refreshes the effective gain so no stale value is
    /// ever mixed.
    pub fn set_active(&self, active: bool) {
        self.state.active.store(active, Ordering::Relaxed);

        if active {
            self.state.refresh();
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Relaxed)
    }
}

/// The volume store shared between the emulation and the host UI.
#[derive(Debug)]
pub struct Mixer {
    master: Arc<AtomicGainPair>,
    channels: Mutex<Vec<Weak<ChannelState>>>,
}

impl Mixer {
    /// Creates a mixer with master gain at unity and no channels.
    pub fn new() -> Mixer {
        Mixer {
            master: Arc::new(AtomicGainPair::new(1.0, 1.0)),
            channels: Mutex::new(Vec::new()),
        }
    }

    /// Sets the master gain for one side of the stereo field. The other side
    /// is untouched. The value is stored as given; this layer does not
    /// validate ranges.
    ///
    /// Registered channels keep their previous effective gains until the next
    /// [`update_volumes`](Mixer::update_volumes) pass.
    pub fn set_volume(&self, channel: Channel, gain: f32) {
        self.master.store_side(channel, gain);
    }

    /// The master gain for one side of the stereo field. Lock-free.
    pub fn volume(&self, channel: Channel) -> f32 {
        self.master.side(channel)
    }

    /// Sets both sides of the master gain in one atomic store, so a
    /// concurrent reader sees either the old pair or the new one.
    pub fn set_stereo_volume(&self, left: f32, right: f32) {
        self.master.store(left, right);
    }

    /// Both sides of the master gain. Lock-free.
    pub fn stereo_volume(&self) -> (f32, f32) {
        self.master.load()
    }

    /// Registers a named channel at unity gain, active, with the current
    /// master gain already folded in.
    pub fn register_channel(&self, name: impl Into<String>) -> MixerChannel {
        let state = Arc::new(ChannelState {
            name: name.into(),
            gain: AtomicGainPair::new(1.0, 1.0),
            effective: AtomicGainPair::new(1.0, 1.0),
            active: AtomicBool::new(true),
            master: Arc::clone(&self.master),
        });
        state.refresh();

        self.lock_channels().push(Arc::downgrade(&state));

        MixerChannel { state }
    }

    /// Recomputes the effective gain of every active channel from the current
    /// master gain, and prunes channels whose handles have been dropped.
    pub fn update_volumes(&self) {
        let mut channels = self.lock_channels();

        channels.retain(|channel| match channel.upgrade() {
            Some(channel) => {
                if channel.active.load(Ordering::Relaxed) {
                    channel.refresh();
                }
                true
            }
            None => false,
        });
    }

    /// The names of all live channels, in registration order.
    pub fn channel_names(&self) -> Vec<String> {
        self.lock_channels()
            .iter()
            .filter_map(|channel| channel.upgrade())
            .map(|channel| channel.name.clone())
            .collect()
    }

    fn lock_channels(&self) -> std::sync::MutexGuard<'_, Vec<Weak<ChannelState>>> {
        // A panic while holding this lock leaves nothing inconsistent, so a
        // poisoned mutex is recovered rather than propagated.
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Mixer {
    fn default() -> Mixer {
        Mixer::new()
    }
}
