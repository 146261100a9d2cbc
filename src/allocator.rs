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

//! Channel and voice allocation.
//!
//! [`determine_channel_map`] computes the desired assignment of logical
//! channels to device channels for the current tick: a priority-ordered
//! solver over the playlist that drops non-essential channels under
//! pressure and rolls a song back atomically when an essential channel
//! cannot be placed. [`remap_channels`] then reconciles that desired map
//! against what the synthesizer is actually configured to, touching as few
//! device channels as possible, since every reassignment or reset is an
//! audible hiccup.

use midly::live::LiveEvent;
use midly::MidiMessage;
use tracing::{debug, trace};

use crate::arena::{EntryArena, EntryHandle};
use crate::driver::Driver;
use crate::entry::{Status, CHANNELS};
use crate::playlist::PlayList;
use crate::queue::CommandQueue;

/// Sustain pedal controller.
const CTRL_SUSTAIN: u8 = 0x40;
/// Voice allocation controller; value 0 releases all of a channel's voices.
const CTRL_CHANNEL_VOICES: u8 = 0x4B;
/// All-notes-off controller.
const CTRL_ALL_NOTES_OFF: u8 = 0x7B;

/// Allocator behavior knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocatorPolicy {
    /// Treat all channels of a bed song as non-essential for the voice
    /// budget only: instead of evicting other songs' channels to make
    /// voices available, the bed channel is silently skipped. Matches the
    /// observed behavior of some early interpreters.
    pub bed_voice_exemption: bool,
}

/// The occupant of one device channel: which entry, and which of its
/// logical channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceChannelUsage {
    pub entry: EntryHandle,
    pub channel: u8,
}

/// The authoritative current hardware assignment, one slot per device
/// channel. Persists across ticks.
pub type DeviceUsage = [Option<DeviceChannelUsage>; CHANNELS];

/// A candidate assignment of logical channels to device channels, plus the
/// remaining voice budget. Built fresh by [`determine_channel_map`] each
/// time and discarded after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRemapping {
    map: DeviceUsage,
    priority: [i32; CHANNELS],
    voices: [u8; CHANNELS],
    dont_remap: [bool; CHANNELS],
    free_voices: u8,
    reverb: u8,
}

impl ChannelRemapping {
    fn new(free_voices: u8, reverb: u8) -> ChannelRemapping {
        ChannelRemapping {
            map: [None; CHANNELS],
            priority: [0; CHANNELS],
            voices: [0; CHANNELS],
            dont_remap: [false; CHANNELS],
            free_voices,
            reverb,
        }
    }

    /// The occupant of a device channel slot.
    pub fn slot(&self, device_channel: usize) -> Option<DeviceChannelUsage> {
        self.map[device_channel]
    }

    /// The voices committed to a device channel slot.
    pub fn voices(&self, device_channel: usize) -> u8 {
        self.voices[device_channel]
    }

    /// True if the occupant of the slot is pinned there.
    pub fn is_pinned(&self, device_channel: usize) -> bool {
        self.dont_remap[device_channel]
    }

    /// The unspent voice budget.
    pub fn free_voices(&self) -> u8 {
        self.free_voices
    }

    /// The reverb level the reconciled hardware should use.
    pub fn reverb(&self) -> u8 {
        self.reverb
    }

    /// True if the given (entry, logical channel) pair is placed anywhere.
    pub fn contains(&self, usage: DeviceChannelUsage) -> bool {
        self.map.iter().any(|slot| *slot == Some(usage))
    }

    fn is_free(&self, device_channel: usize) -> bool {
        self.map[device_channel].is_none()
    }

    /// Frees a slot, returning its voices to the budget.
    fn evict(&mut self, device_channel: usize) {
        self.free_voices += self.voices[device_channel];
        self.map[device_channel] = None;
        self.priority[device_channel] = 0;
        self.voices[device_channel] = 0;
        self.dont_remap[device_channel] = false;
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.map.swap(a, b);
        self.priority.swap(a, b);
        self.voices.swap(a, b);
        self.dont_remap.swap(a, b);
    }

    /// The occupied slot with the numerically highest effective priority,
    /// i.e. the least important evictable occupant. Essential occupants
    /// (priority 0) are never evictable.
    fn lowest_priority_slot(&self) -> Option<usize> {
        let mut lowest: Option<usize> = None;
        for i in 0..CHANNELS {
            if self.map[i].is_none() || self.priority[i] == 0 {
                continue;
            }
            if lowest.is_none_or(|l| self.priority[i] > self.priority[l]) {
                lowest = Some(i);
            }
        }
        lowest
    }

    fn commit(&mut self, device_channel: usize, usage: DeviceChannelUsage, priority: i32, voices: u8, dont_remap: bool) {
        self.map[device_channel] = Some(usage);
        self.priority[device_channel] = priority;
        self.voices[device_channel] = voices;
        self.dont_remap[device_channel] = dont_remap;
        self.free_voices -= voices;
    }
}

/// Computes the desired device-channel occupancy for the current tick.
///
/// Songs are visited in playlist (priority) order; each song either gets
/// all its essential channels placed or is rolled back entirely for this
/// tick. Non-essential channels are dropped silently under pressure. The
/// result is independent of what is currently programmed into hardware.
pub fn determine_channel_map(
    arena: &EntryArena,
    playlist: &PlayList,
    policy: AllocatorPolicy,
    polyphony: u8,
    first_channel: u8,
    last_channel: u8,
    global_reverb: u8,
) -> ChannelRemapping {
    // The hardware reverb follows the highest-priority playing song, or
    // the global level if no song overrides it.
    let reverb = playlist
        .find_first_with_status(arena, Status::Playing)
        .and_then(|h| arena.get(h))
        .map(|e| e.reverb)
        .filter(|r| *r != crate::entry::REVERB_USE_GLOBAL)
        .unwrap_or(global_reverb);

    let mut map = ChannelRemapping::new(polyphony, reverb);
    let first = first_channel as usize;
    let last = (last_channel as usize).min(CHANNELS - 1);

    let mut song_index: i32 = 0;
    for &handle in playlist.handles() {
        let Some(song) = arena.get(handle) else {
            continue;
        };
        if song.status != Status::Playing || song.is_sample {
            continue;
        }

        // Snapshot so a song that fails to map can be rolled back whole.
        let backup = map.clone();
        let mut song_mapped = true;

        for slot in 0..CHANNELS {
            let Some(channel) = song.used_channels[slot] else {
                continue;
            };
            let channel = channel as usize;
            let attrs = song.chan[channel];
            if attrs.dont_map || attrs.mute {
                continue;
            }
            let dont_remap = attrs.dont_remap || song.play_bed;

            // Essential channels keep effective priority 0. The rest are
            // rescaled so every channel of a higher-priority song outranks
            // every non-essential channel of a lower-priority one, while
            // channels within one song keep their relative order.
            let priority: i32 = if attrs.priority == 0 {
                0
            } else {
                (16 - i32::from(attrs.priority)) + 16 * song_index
            };

            // Find a target device channel.
            let mut device = None;
            if dont_remap && map.is_free(channel) {
                device = Some(channel);
            }
            if device.is_none() {
                device = (first..=last).find(|&i| map.is_free(i));
            }
            let device = match device {
                Some(d) => d,
                // Droppable and nowhere to go: skip it silently.
                None if priority > 0 => continue,
                // Essential: evict the least important occupant, if any.
                None => match map.lowest_priority_slot() {
                    Some(evictee) => {
                        map.evict(evictee);
                        evictee
                    }
                    None => {
                        song_mapped = false;
                        break;
                    }
                },
            };

            // Voice budget.
            if map.free_voices < attrs.voices {
                let bed_exempt = policy.bed_voice_exemption && song.play_bed;
                if priority > 0 || bed_exempt {
                    continue;
                }
                let mut freed = true;
                while map.free_voices < attrs.voices {
                    match map.lowest_priority_slot() {
                        Some(evictee) => map.evict(evictee),
                        None => {
                            freed = false;
                            break;
                        }
                    }
                }
                if !freed {
                    song_mapped = false;
                    break;
                }
            }

            let usage = DeviceChannelUsage {
                entry: handle,
                channel: channel as u8,
            };
            map.commit(device, usage, priority, attrs.voices, dont_remap);

            // A pinned channel that landed elsewhere must still end up on
            // its own numbered slot.
            if dont_remap && device != channel {
                let occupant_pinned = !map.is_free(channel) && map.dont_remap[channel];
                if !occupant_pinned {
                    map.swap(device, channel);
                } else if map.priority[channel] > 0
                    && (priority == 0 || priority < map.priority[channel])
                {
                    // The occupant is pinned too, but less important.
                    map.evict(channel);
                    map.swap(device, channel);
                } else if priority > 0 {
                    // We lose; drop this channel.
                    map.evict(device);
                } else {
                    // Two essential channels pinned to the same slot.
                    song_mapped = false;
                    break;
                }
            }
        }

        if !song_mapped {
            debug!(
                resource_id = song.resource_id,
                "Song could not be mapped; rolling it back for this tick."
            );
            map = backup;
        }
        song_index += 1;
    }

    map
}

/// Reconciles the desired map against the current hardware assignment.
///
/// Channels that are already placed correctly are left completely alone.
/// Device channels whose occupant changes or disappears are reset with a
/// sustain-off / all-notes-off / release-voices sequence. All driver
/// traffic is queued unless `main_thread` indicates the caller is already
/// the dispatcher, in which case it is sent directly.
pub fn remap_channels(
    arena: &EntryArena,
    playlist: &PlayList,
    map: &ChannelRemapping,
    device_usage: &mut DeviceUsage,
    queue: &mut CommandQueue,
    driver: &dyn Driver,
    main_thread: bool,
) {
    let snapshot = *device_usage;
    *device_usage = [None; CHANNELS];

    // Tell every track layer which of its channels are about to lose
    // their device channel, before any reassignment below, so it stops
    // emitting note data for them.
    for &handle in playlist.handles() {
        let Some(entry) = arena.get(handle) else {
            continue;
        };
        let Some(track) = entry.track.clone() else {
            continue;
        };
        for slot in 0..CHANNELS {
            let Some(channel) = entry.used_channels[slot] else {
                continue;
            };
            let usage = DeviceChannelUsage {
                entry: handle,
                channel,
            };
            if !map.contains(usage) {
                track.remap_channel(channel, None);
            }
        }
    }

    let mut placed = [false; CHANNELS];

    // Pass A: pinned entries go to their own numbered slot unconditionally.
    for i in 0..CHANNELS {
        let Some(usage) = map.slot(i) else {
            continue;
        };
        if !map.is_pinned(i) {
            continue;
        }
        // The solver guarantees pinned occupants sit on their own number.
        debug_assert_eq!(usage.channel as usize, i);
        device_usage[i] = Some(usage);
        placed[i] = true;
        if snapshot[i] == Some(usage) {
            continue;
        }
        if snapshot[i].is_some() {
            reset_device_channel(i as u8, queue, driver, main_thread);
        }
        notify_track(arena, usage, Some(i as u8));
    }

    // Pass B: keep everything that is already where the snapshot has it.
    // No driver traffic at all for these.
    for i in 0..CHANNELS {
        let Some(usage) = map.slot(i) else {
            continue;
        };
        if placed[i] {
            continue;
        }
        for (k, snap) in snapshot.iter().enumerate() {
            if *snap == Some(usage) && device_usage[k].is_none() {
                device_usage[k] = Some(usage);
                placed[i] = true;
                break;
            }
        }
    }

    // Pass C: place the rest, scanning from the top of the usable range
    // down.
    let first = driver.first_channel() as usize;
    let last = (driver.last_channel() as usize).min(CHANNELS - 1);
    for i in 0..CHANNELS {
        let Some(usage) = map.slot(i) else {
            continue;
        };
        if placed[i] {
            continue;
        }
        let Some(k) = (first..=last).rev().find(|&k| device_usage[k].is_none()) else {
            // No room; the channel goes silent this tick.
            trace!(
                channel = usage.channel,
                "No free device channel during reconciliation."
            );
            continue;
        };
        device_usage[k] = Some(usage);
        placed[i] = true;
        if snapshot[k].is_some() && snapshot[k] != Some(usage) {
            reset_device_channel(k as u8, queue, driver, main_thread);
        }
        notify_track(arena, usage, Some(k as u8));
    }

    // Pass D: reset device channels that lost their occupant.
    for i in 0..CHANNELS {
        if device_usage[i].is_none() && snapshot[i].is_some() {
            reset_device_channel(i as u8, queue, driver, main_thread);
        }
    }

    // Reverb is a driver-level setting, not a channel message, so it is
    // applied directly; level sets are idempotent.
    if driver.reverb() != map.reverb() {
        driver.set_reverb(map.reverb());
    }
}

/// Silences a device channel: sustain off, all notes off, release all
/// voices, in that order.
fn reset_device_channel(channel: u8, queue: &mut CommandQueue, driver: &dyn Driver, main_thread: bool) {
    trace!(channel, "Resetting device channel.");
    for controller in [CTRL_SUSTAIN, CTRL_ALL_NOTES_OFF, CTRL_CHANNEL_VOICES] {
        let event = LiveEvent::Midi {
            channel: channel.into(),
            message: MidiMessage::Controller {
                controller: controller.into(),
                value: 0.into(),
            },
        };
        if main_thread {
            driver.send(event);
        } else {
            queue.enqueue_message(event);
        }
    }
}

fn notify_track(arena: &EntryArena, usage: DeviceChannelUsage, device_channel: Option<u8>) {
    if let Some(track) = arena.get(usage.entry).and_then(|e| e.track.clone()) {
        track.remap_channel(usage.channel, device_channel);
    }
}
