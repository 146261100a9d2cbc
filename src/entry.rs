// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Per-song playback state and its per-tick state machine.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::track::TrackSink;

/// The number of logical channels a song can reference, and the number of
/// device channels a synthesizer exposes.
pub const CHANNELS: usize = 16;

/// The maximum song volume.
pub const MAX_VOLUME: u8 = 127;

/// An entry reverb of this value defers to the scheduler's global reverb.
pub const REVERB_USE_GLOBAL: u8 = 127;

/// Playback status of a sound entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Stopped,
    Initialized,
    Paused,
    Playing,
}

/// Allocation attributes of one logical channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelAttrs {
    /// Allocation priority. 0 means essential: the channel must be placed
    /// or the whole song is rolled back for the tick.
    pub priority: u8,
    /// How many hardware voices the channel consumes.
    pub voices: u8,
    /// Never place this channel on a device channel.
    pub dont_map: bool,
    /// If placed at all, the channel must sit on the device channel with
    /// its own logical number.
    pub dont_remap: bool,
    /// Muted channels are not placed.
    pub mute: bool,
}

/// One logical song or sound effect currently known to the scheduler.
///
/// Owned by the entry arena while active; freed only by an explicit kill.
pub struct SoundEntry {
    /// The opaque engine object this entry was requested for.
    pub identity: u64,
    /// The sound resource this entry plays.
    pub resource_id: u32,
    /// Insertion timestamp, the priority tie-breaker. Monotonically
    /// increasing, assigned by the scheduler.
    pub timestamp: u64,
    /// Playback priority. Higher is more important.
    pub priority: u8,
    pub status: Status,
    /// Digital sample rather than MIDI. Samples are never channel-mapped
    /// and are not ticked here; they belong to the mixer.
    pub is_sample: bool,
    /// Bed songs pin all their channels to their own numbers.
    pub play_bed: bool,
    pub looping: bool,
    /// Hold point for loop control in the track layer.
    pub hold: i16,
    /// Requested reverb level, or [`REVERB_USE_GLOBAL`].
    pub reverb: u8,
    pub volume: u8,
    /// Set when the volume changed off the timer thread; the next tick
    /// pushes it to the track layer.
    pub volume_dirty: bool,
    /// Pause nesting depth. Only the transition back to zero resumes.
    pub pause_counter: u32,
    /// Fade target volume.
    pub fade_to: u8,
    /// Signed volume step per fade advance; 0 when not fading.
    pub fade_step: i8,
    /// Ticks remaining until the next fade advance.
    pub fade_ticker: u16,
    /// Tick interval between fade advances.
    pub fade_ticker_step: u16,
    /// Set once a fade reaches its target.
    pub fade_completed: bool,
    /// Stop the song when the fade completes.
    pub stop_after_fade: bool,
    /// The pending signal, if any. Later signals queue FIFO behind it.
    pub signal: Option<u16>,
    signal_queue: VecDeque<u16>,
    /// Logical channel slots: `used_channels[i]` is the channel number the
    /// song's track data uses in slot `i`, or `None` for an unused slot.
    pub used_channels: [Option<u8>; CHANNELS],
    /// Per-channel allocation attributes, indexed by channel number.
    pub chan: [ChannelAttrs; CHANNELS],
    /// The track layer for MIDI entries. Samples have none.
    pub track: Option<Arc<dyn TrackSink>>,
    /// The track position read back after the last tick.
    pub tick: u64,
}

impl SoundEntry {
    /// Creates an entry in the `Initialized` state with full volume and
    /// global reverb.
    pub fn new(identity: u64, resource_id: u32, timestamp: u64) -> SoundEntry {
        SoundEntry {
            identity,
            resource_id,
            timestamp,
            priority: 0,
            status: Status::Initialized,
            is_sample: false,
            play_bed: false,
            looping: false,
            hold: -1,
            reverb: REVERB_USE_GLOBAL,
            volume: MAX_VOLUME,
            volume_dirty: false,
            pause_counter: 0,
            fade_to: 0,
            fade_step: 0,
            fade_ticker: 0,
            fade_ticker_step: 0,
            fade_completed: false,
            stop_after_fade: false,
            signal: None,
            signal_queue: VecDeque::new(),
            used_channels: [None; CHANNELS],
            chan: [ChannelAttrs::default(); CHANNELS],
            track: None,
            tick: 0,
        }
    }

    /// Sets a signal for the engine to pick up. If one is already pending,
    /// the new signal queues behind it and is popped on a later tick.
    pub fn set_signal(&mut self, signal: u16) {
        if self.signal.is_none() && self.signal_queue.is_empty() {
            self.signal = Some(signal);
        } else {
            self.signal_queue.push_back(signal);
        }
    }

    /// Takes the pending signal, if any.
    pub fn take_signal(&mut self) -> Option<u16> {
        self.signal.take()
    }

    /// Programs a fade toward `to`, stepping by `step_size` every
    /// `ticker_step` ticks. The first step lands on the next tick.
    pub fn fade_setup(&mut self, to: u8, step_size: u8, ticker_step: u16, stop_after: bool) {
        self.fade_to = to.min(MAX_VOLUME);
        self.fade_ticker = 0;
        self.fade_ticker_step = ticker_step;
        self.fade_completed = false;
        self.stop_after_fade = stop_after;
        if self.volume == self.fade_to {
            self.fade_step = 0;
            self.fade_completed = true;
            if stop_after {
                self.status = Status::Stopped;
            }
            return;
        }
        let step = step_size.clamp(1, i8::MAX as u8) as i8;
        self.fade_step = if self.volume > self.fade_to { -step } else { step };
    }

    /// Returns true while a fade is in progress.
    pub fn is_fading(&self) -> bool {
        self.fade_step != 0
    }

    /// Advances the entry by one dispatcher tick: pops a queued signal,
    /// advances an active fade, and delegates to the track layer for MIDI
    /// entries. Returns true if the entry's channel occupancy may have
    /// changed (a fade-out stopped the song), in which case the caller
    /// must schedule a remap.
    pub fn on_timer(&mut self, master_volume: u8) -> bool {
        if self.signal.is_none() {
            if let Some(next) = self.signal_queue.pop_front() {
                self.signal = Some(next);
            }
        }

        if self.status != Status::Playing {
            return false;
        }

        let mut occupancy_changed = false;
        if self.fade_step != 0 {
            if self.fade_ticker > 0 {
                self.fade_ticker -= 1;
            } else {
                self.fade_ticker = self.fade_ticker_step;
                let next = i16::from(self.volume) + i16::from(self.fade_step);
                let reached = if self.fade_step > 0 {
                    next >= i16::from(self.fade_to)
                } else {
                    next <= i16::from(self.fade_to)
                };
                if reached {
                    self.volume = self.fade_to;
                    self.fade_step = 0;
                    self.fade_completed = true;
                    debug!(
                        resource_id = self.resource_id,
                        volume = self.volume,
                        "Fade complete."
                    );
                    if self.stop_after_fade {
                        self.status = Status::Stopped;
                        occupancy_changed = true;
                    }
                } else {
                    self.volume = next.clamp(0, i16::from(MAX_VOLUME)) as u8;
                }
                self.volume_dirty = true;
            }
        }

        // Samples are not ticked here; the mixer owns their playback.
        if !self.is_sample {
            if let Some(track) = self.track.clone() {
                if self.volume_dirty {
                    track.set_volume(scaled_volume(self.volume, master_volume));
                    self.volume_dirty = false;
                }
                if self.status == Status::Playing {
                    track.on_timer();
                    self.tick = track.current_tick();
                }
            }
        }

        occupancy_changed
    }
}

/// Scales an entry volume by the master volume.
pub(crate) fn scaled_volume(volume: u8, master_volume: u8) -> u8 {
    (u16::from(volume) * u16::from(master_volume) / u16::from(MAX_VOLUME)) as u8
}
