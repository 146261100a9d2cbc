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

//! The scheduler context and its two-sided API.
//!
//! Producer threads (the script/engine side) mutate playback state through
//! the methods on [`Scheduler`]; every such call takes the scheduler lock,
//! updates the playlist and flags a remap, and returns immediately. The
//! single consumer is the timer callback driving [`Scheduler::on_timer`],
//! which drains the command queue, reconciles channel assignments, and
//! ticks every entry, in that fixed order.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, span, Level, Span};

use crate::allocator::{determine_channel_map, remap_channels, AllocatorPolicy, DeviceUsage};
use crate::arena::{EntryArena, EntryHandle};
use crate::driver::Driver;
use crate::entry::{scaled_volume, SoundEntry, Status, CHANNELS, MAX_VOLUME};
use crate::mixer::SampleMixer;
use crate::playlist::PlayList;
use crate::queue::CommandQueue;

/// Errors surfaced by the producer API. Allocation itself never errors;
/// its failures are audible, not reported.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The entry handle no longer refers to a live entry.
    #[error("sound entry is no longer alive")]
    DeadEntry,
}

/// Everything the scheduler lock protects.
struct SchedulerState {
    arena: EntryArena,
    playlist: PlayList,
    queue: CommandQueue,
    device_usage: DeviceUsage,
    needs_remap: bool,
    next_timestamp: u64,
    master_volume: u8,
    global_reverb: u8,
}

/// The playback scheduler: decides, every timer tick, which logical
/// channels of which active songs occupy the synthesizer's device
/// channels.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    /// The synthesizer backend. Only the dispatcher talks to it directly;
    /// producer-side traffic goes through the command queue.
    driver: Arc<dyn Driver>,
    /// The digital sample mixer, if samples are in use.
    mixer: Option<Arc<dyn SampleMixer>>,
    policy: AllocatorPolicy,
    /// The logging span.
    span: Span,
}

impl Scheduler {
    /// Creates a scheduler for the given driver backend.
    pub fn new(
        driver: Arc<dyn Driver>,
        mixer: Option<Arc<dyn SampleMixer>>,
        policy: AllocatorPolicy,
    ) -> Scheduler {
        info!(driver = %driver, "Creating scheduler.");
        Scheduler {
            state: Mutex::new(SchedulerState {
                arena: EntryArena::new(),
                playlist: PlayList::new(),
                queue: CommandQueue::new(),
                device_usage: [None; CHANNELS],
                needs_remap: false,
                next_timestamp: 0,
                master_volume: MAX_VOLUME,
                global_reverb: 0,
            }),
            driver,
            mixer,
            policy,
            span: span!(Level::INFO, "scheduler"),
        }
    }

    /// Adds an entry to the playlist in the `Initialized` state and
    /// returns its handle. If an entry already exists for the same
    /// identity, that entry's handle is returned instead; the playlist
    /// never holds duplicates for one engine object.
    pub fn add(&self, mut entry: SoundEntry) -> EntryHandle {
        let _enter = self.span.enter();
        let mut state = self.state.lock();
        if let Some(existing) = state.playlist.find_by_identity(&state.arena, entry.identity) {
            debug!(
                identity = entry.identity,
                "Entry already exists for identity."
            );
            return existing;
        }
        entry.timestamp = state.next_timestamp;
        state.next_timestamp += 1;
        debug!(
            identity = entry.identity,
            resource_id = entry.resource_id,
            "Adding sound entry."
        );
        let handle = state.arena.insert(entry);
        let state = &mut *state;
        state.playlist.insert(&state.arena, handle);
        handle
    }

    /// Starts (or restarts) playback of an entry. Hardware effects are
    /// realized on the next dispatcher tick.
    pub fn play(&self, handle: EntryHandle) -> Result<(), SchedulerError> {
        let _enter = self.span.enter();
        let mut state = self.state.lock();
        let entry = state.arena.get_mut(handle).ok_or(SchedulerError::DeadEntry)?;
        entry.status = Status::Playing;
        let is_midi = !entry.is_sample;
        info!(resource_id = entry.resource_id, "Playing sound entry.");
        if is_midi {
            state.queue.enqueue_track_init(handle);
        }
        state.needs_remap = true;
        Ok(())
    }

    /// Stops playback. The entry stays in the playlist until killed.
    pub fn stop(&self, handle: EntryHandle) -> Result<(), SchedulerError> {
        let _enter = self.span.enter();
        let sample = {
            let mut state = self.state.lock();
            let entry = state.arena.get_mut(handle).ok_or(SchedulerError::DeadEntry)?;
            entry.status = Status::Stopped;
            entry.fade_step = 0;
            info!(resource_id = entry.resource_id, "Stopping sound entry.");
            let sample = entry.is_sample.then_some(entry.resource_id);
            state.needs_remap = true;
            sample
        };
        // The mixer takes its own locks; never call it while holding ours.
        if let (Some(resource_id), Some(mixer)) = (sample, &self.mixer) {
            mixer.stop(resource_id);
        }
        Ok(())
    }

    /// Pauses playback. Pauses nest; each one needs a matching resume.
    pub fn pause(&self, handle: EntryHandle) -> Result<(), SchedulerError> {
        let _enter = self.span.enter();
        let sample = {
            let mut state = self.state.lock();
            let entry = state.arena.get_mut(handle).ok_or(SchedulerError::DeadEntry)?;
            entry.pause_counter += 1;
            let sample = entry.is_sample.then_some(entry.resource_id);
            if entry.status == Status::Playing {
                entry.status = Status::Paused;
                state.needs_remap = true;
            }
            sample
        };
        if let (Some(resource_id), Some(mixer)) = (sample, &self.mixer) {
            mixer.pause(resource_id, true);
        }
        Ok(())
    }

    /// Undoes one pause. Playback resumes only when the last nested pause
    /// is released.
    pub fn resume(&self, handle: EntryHandle) -> Result<(), SchedulerError> {
        let _enter = self.span.enter();
        let sample = {
            let mut state = self.state.lock();
            let entry = state.arena.get_mut(handle).ok_or(SchedulerError::DeadEntry)?;
            if entry.pause_counter == 0 {
                return Ok(());
            }
            entry.pause_counter -= 1;
            if entry.pause_counter > 0 || entry.status != Status::Paused {
                return Ok(());
            }
            entry.status = Status::Playing;
            let sample = entry.is_sample.then_some(entry.resource_id);
            state.needs_remap = true;
            sample
        };
        if let (Some(resource_id), Some(mixer)) = (sample, &self.mixer) {
            mixer.pause(resource_id, false);
        }
        Ok(())
    }

    /// Removes and destroys an entry. Any of its pending track-init
    /// commands are purged first so a later drain cannot touch the freed
    /// entry, and its device channels are released for the next remap.
    pub fn kill(&self, handle: EntryHandle) -> Result<(), SchedulerError> {
        let _enter = self.span.enter();
        let removed = {
            let mut state = self.state.lock();
            state.playlist.remove(handle);
            state.queue.remove_track_init_for(handle);
            for slot in state.device_usage.iter_mut() {
                if slot.is_some_and(|usage| usage.entry == handle) {
                    *slot = None;
                }
            }
            let removed = state.arena.remove(handle).ok_or(SchedulerError::DeadEntry)?;
            state.needs_remap = true;
            info!(resource_id = removed.resource_id, "Killed sound entry.");
            removed
        };
        // The mixer takes its own locks; never call it while holding ours.
        if removed.is_sample {
            if let Some(mixer) = &self.mixer {
                mixer.stop(removed.resource_id);
            }
        }
        Ok(())
    }

    /// Changes an entry's priority and re-sorts the playlist.
    pub fn set_priority(&self, handle: EntryHandle, priority: u8) -> Result<(), SchedulerError> {
        let _enter = self.span.enter();
        let mut state = self.state.lock();
        let entry = state.arena.get_mut(handle).ok_or(SchedulerError::DeadEntry)?;
        if entry.priority == priority {
            return Ok(());
        }
        entry.priority = priority;
        let state = &mut *state;
        state.playlist.sort(&state.arena);
        state.needs_remap = true;
        Ok(())
    }

    /// Sets an entry's volume. MIDI entries pick the change up on the
    /// next tick; sample volume goes to the mixer immediately.
    pub fn set_volume(&self, handle: EntryHandle, volume: u8) -> Result<(), SchedulerError> {
        let _enter = self.span.enter();
        let sample = {
            let mut state = self.state.lock();
            let master_volume = state.master_volume;
            let entry = state.arena.get_mut(handle).ok_or(SchedulerError::DeadEntry)?;
            entry.volume = volume.min(MAX_VOLUME);
            entry.volume_dirty = true;
            entry
                .is_sample
                .then_some((entry.resource_id, scaled_volume(entry.volume, master_volume)))
        };
        if let (Some((resource_id, volume)), Some(mixer)) = (sample, &self.mixer) {
            mixer.set_volume(resource_id, volume);
        }
        Ok(())
    }

    /// Sets the master volume scaling every entry.
    pub fn set_master_volume(&self, volume: u8) {
        let _enter = self.span.enter();
        let samples = {
            let mut state = self.state.lock();
            state.master_volume = volume.min(MAX_VOLUME);
            let master_volume = state.master_volume;
            info!(volume = master_volume, "Setting master volume.");
            let state = &mut *state;
            let mut samples = Vec::new();
            for &handle in state.playlist.handles() {
                if let Some(entry) = state.arena.get_mut(handle) {
                    entry.volume_dirty = true;
                    if entry.is_sample {
                        samples.push((
                            entry.resource_id,
                            scaled_volume(entry.volume, master_volume),
                        ));
                    }
                }
            }
            samples
        };
        if let Some(mixer) = &self.mixer {
            for (resource_id, volume) in samples {
                mixer.set_volume(resource_id, volume);
            }
        }
    }

    /// Sets the reverb level used when no playing song overrides it.
    pub fn set_global_reverb(&self, level: u8) {
        let _enter = self.span.enter();
        let mut state = self.state.lock();
        state.global_reverb = level;
        state.needs_remap = true;
    }

    /// Programs a fade on an entry, optionally stopping it on completion.
    pub fn fade(
        &self,
        handle: EntryHandle,
        to: u8,
        step_size: u8,
        ticker_step: u16,
        stop_after: bool,
    ) -> Result<(), SchedulerError> {
        let _enter = self.span.enter();
        let mut state = self.state.lock();
        let entry = state.arena.get_mut(handle).ok_or(SchedulerError::DeadEntry)?;
        entry.fade_setup(to, step_size, ticker_step, stop_after);
        if entry.status == Status::Stopped {
            // A zero-length fade can stop the song immediately.
            state.needs_remap = true;
        }
        Ok(())
    }

    /// Takes the entry's pending signal, if any.
    pub fn take_signal(&self, handle: EntryHandle) -> Result<Option<u16>, SchedulerError> {
        let mut state = self.state.lock();
        let entry = state.arena.get_mut(handle).ok_or(SchedulerError::DeadEntry)?;
        Ok(entry.take_signal())
    }

    /// The entry's current status.
    pub fn status(&self, handle: EntryHandle) -> Result<Status, SchedulerError> {
        let state = self.state.lock();
        state
            .arena
            .get(handle)
            .map(|e| e.status)
            .ok_or(SchedulerError::DeadEntry)
    }

    /// The entry's track position as of the last tick.
    pub fn current_tick(&self, handle: EntryHandle) -> Result<u64, SchedulerError> {
        let state = self.state.lock();
        state
            .arena
            .get(handle)
            .map(|e| e.tick)
            .ok_or(SchedulerError::DeadEntry)
    }

    /// Finds the live entry for an engine object.
    pub fn find_by_identity(&self, identity: u64) -> Option<EntryHandle> {
        let state = self.state.lock();
        state.playlist.find_by_identity(&state.arena, identity)
    }

    /// The dispatcher tick, invoked from the timer callback. This is the
    /// single consumer: it drains the command queue, reconciles channel
    /// assignments if anything changed, then ticks every entry. The order
    /// is load-bearing and must not change.
    pub fn on_timer(&self) {
        let mut state = self.state.lock();
        let state = &mut *state;

        state.queue.drain_and_dispatch(&state.arena, self.driver.as_ref());

        if state.needs_remap {
            state.needs_remap = false;
            let map = determine_channel_map(
                &state.arena,
                &state.playlist,
                self.policy,
                self.driver.polyphony(),
                self.driver.first_channel(),
                self.driver.last_channel(),
                state.global_reverb,
            );
            remap_channels(
                &state.arena,
                &state.playlist,
                &map,
                &mut state.device_usage,
                &mut state.queue,
                self.driver.as_ref(),
                true,
            );
        }

        // Tick against a snapshot of the playlist so an entry stopping
        // itself cannot invalidate the iteration.
        let handles: Vec<EntryHandle> = state.playlist.handles().to_vec();
        let master_volume = state.master_volume;
        for handle in handles {
            if let Some(entry) = state.arena.get_mut(handle) {
                if entry.on_timer(master_volume) {
                    state.needs_remap = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{Scheduler, SchedulerError};
    use crate::allocator::AllocatorPolicy;
    use crate::driver::test::MockDriver;
    use crate::driver::Driver;
    use crate::entry::{ChannelAttrs, SoundEntry, Status};
    use crate::mixer::SampleMixer;
    use crate::track::test::MockTrackSink;

    /// A mock mixer that records which sample resources were touched.
    #[derive(Default)]
    struct MockMixer {
        stopped: Mutex<Vec<u32>>,
        paused: Mutex<Vec<(u32, bool)>>,
        volumes: Mutex<Vec<(u32, u8)>>,
    }

    impl SampleMixer for MockMixer {
        fn stop(&self, resource_id: u32) {
            self.stopped.lock().push(resource_id);
        }

        fn pause(&self, resource_id: u32, paused: bool) {
            self.paused.lock().push((resource_id, paused));
        }

        fn set_volume(&self, resource_id: u32, volume: u8) {
            self.volumes.lock().push((resource_id, volume));
        }
    }

    fn midi_entry(identity: u64, priority: u8, channels: &[(u8, u8, u8)]) -> (SoundEntry, Arc<MockTrackSink>) {
        let track = Arc::new(MockTrackSink::new());
        let mut entry = SoundEntry::new(identity, identity as u32, 0);
        entry.priority = priority;
        entry.track = Some(track.clone());
        for &(channel, chan_priority, voices) in channels {
            entry.used_channels[channel as usize] = Some(channel);
            entry.chan[channel as usize] = ChannelAttrs {
                priority: chan_priority,
                voices,
                ..Default::default()
            };
        }
        (entry, track)
    }

    fn scheduler(driver: Arc<MockDriver>) -> Scheduler {
        let _ = tracing_subscriber::fmt::try_init();
        Scheduler::new(driver, None, AllocatorPolicy::default())
    }

    #[test]
    fn test_play_initializes_and_maps_on_tick() {
        let driver = Arc::new(MockDriver::new(16));
        let scheduler = scheduler(driver.clone());

        let (entry, track) = midi_entry(1, 5, &[(0, 0, 4)]);
        let handle = scheduler.add(entry);
        scheduler.play(handle).unwrap();

        // Nothing happens until the dispatcher runs.
        assert_eq!(track.init_calls(), 0);

        scheduler.on_timer();
        assert_eq!(track.init_calls(), 1);
        assert_eq!(track.init_command_calls(), 1);
        assert!(track.mapping_of(0).is_some());
        assert_eq!(track.timer_calls(), 1);

        // A steady state tick produces no further driver traffic.
        driver.clear_sent();
        scheduler.on_timer();
        assert_eq!(driver.sent_count(), 0);
        assert_eq!(track.timer_calls(), 2);
    }

    #[test]
    fn test_add_deduplicates_by_identity() {
        let driver = Arc::new(MockDriver::new(16));
        let scheduler = scheduler(driver);

        let (entry, _track) = midi_entry(7, 5, &[(0, 0, 4)]);
        let first = scheduler.add(entry);
        let (entry, _track) = midi_entry(7, 9, &[(1, 0, 4)]);
        let second = scheduler.add(entry);
        assert_eq!(first, second);
    }

    #[test]
    fn test_kill_purges_pending_track_init() {
        let driver = Arc::new(MockDriver::new(16));
        let scheduler = scheduler(driver);

        let (entry, track) = midi_entry(1, 5, &[(0, 0, 4)]);
        let handle = scheduler.add(entry);
        scheduler.play(handle).unwrap();
        scheduler.kill(handle).unwrap();

        // The queued init must not resolve the dead entry.
        scheduler.on_timer();
        assert_eq!(track.init_calls(), 0);
        assert_eq!(scheduler.status(handle), Err(SchedulerError::DeadEntry));
    }

    #[test]
    fn test_stop_resets_device_channels() {
        let driver = Arc::new(MockDriver::new(16));
        let scheduler = scheduler(driver.clone());

        let (entry, _track) = midi_entry(1, 5, &[(0, 0, 4)]);
        let handle = scheduler.add(entry);
        scheduler.play(handle).unwrap();
        scheduler.on_timer();
        driver.clear_sent();

        scheduler.stop(handle).unwrap();
        scheduler.on_timer();
        assert_eq!(driver.reset_message_count(), 3);
        assert_eq!(scheduler.status(handle), Ok(Status::Stopped));
    }

    #[test]
    fn test_pause_nesting() {
        let driver = Arc::new(MockDriver::new(16));
        let scheduler = scheduler(driver);

        let (entry, _track) = midi_entry(1, 5, &[(0, 0, 4)]);
        let handle = scheduler.add(entry);
        scheduler.play(handle).unwrap();

        scheduler.pause(handle).unwrap();
        scheduler.pause(handle).unwrap();
        assert_eq!(scheduler.status(handle), Ok(Status::Paused));

        scheduler.resume(handle).unwrap();
        assert_eq!(scheduler.status(handle), Ok(Status::Paused));
        scheduler.resume(handle).unwrap();
        assert_eq!(scheduler.status(handle), Ok(Status::Playing));

        // An unbalanced resume is a no-op.
        scheduler.resume(handle).unwrap();
        assert_eq!(scheduler.status(handle), Ok(Status::Playing));
    }

    #[test]
    fn test_priority_change_remaps_contested_voices() {
        let driver = Arc::new(MockDriver::new(8));
        let scheduler = scheduler(driver);

        let (entry, track_a) = midi_entry(1, 10, &[(0, 0, 8)]);
        let a = scheduler.add(entry);
        let (entry, track_b) = midi_entry(2, 1, &[(1, 0, 8)]);
        let b = scheduler.add(entry);
        scheduler.play(a).unwrap();
        scheduler.play(b).unwrap();
        scheduler.on_timer();

        // Only the high-priority song fits.
        assert!(track_a.mapping_of(0).is_some());
        assert!(track_b.mapping_of(1).is_none());

        scheduler.set_priority(b, 20).unwrap();
        scheduler.on_timer();
        assert!(track_b.mapping_of(1).is_some());
        assert!(track_a.mapping_of(0).is_none());
    }

    #[test]
    fn test_fade_out_frees_channels() {
        let driver = Arc::new(MockDriver::new(16));
        let scheduler = scheduler(driver.clone());

        let (entry, _track) = midi_entry(1, 5, &[(0, 0, 4)]);
        let handle = scheduler.add(entry);
        scheduler.play(handle).unwrap();
        scheduler.on_timer();
        scheduler.fade(handle, 0, 64, 0, true).unwrap();

        // Two steps from full volume reach zero; the tick after that
        // notices the stop and resets the channel.
        scheduler.on_timer();
        scheduler.on_timer();
        assert_eq!(scheduler.status(handle), Ok(Status::Stopped));
        driver.clear_sent();
        scheduler.on_timer();
        assert_eq!(driver.reset_message_count(), 3);
    }

    #[test]
    fn test_master_volume_scales_track_volume() {
        let driver = Arc::new(MockDriver::new(16));
        let scheduler = scheduler(driver);

        let (entry, track) = midi_entry(1, 5, &[(0, 0, 4)]);
        let handle = scheduler.add(entry);
        scheduler.play(handle).unwrap();
        scheduler.set_volume(handle, 100).unwrap();
        scheduler.set_master_volume(64);
        scheduler.on_timer();

        let volumes = track.volumes();
        assert_eq!(volumes.last(), Some(&50));
    }

    #[test]
    fn test_global_reverb_applies_on_tick() {
        let driver = Arc::new(MockDriver::new(16));
        let scheduler = scheduler(driver.clone());

        let (entry, _track) = midi_entry(1, 5, &[(0, 0, 4)]);
        let handle = scheduler.add(entry);
        scheduler.play(handle).unwrap();
        scheduler.on_timer();

        scheduler.set_global_reverb(11);
        scheduler.on_timer();
        assert_eq!(driver.reverb(), 11);
    }

    #[test]
    fn test_sample_entries_go_to_the_mixer() {
        let _ = tracing_subscriber::fmt::try_init();
        let driver = Arc::new(MockDriver::new(16));
        let mixer = Arc::new(MockMixer::default());
        let scheduler = Scheduler::new(driver, Some(mixer.clone()), AllocatorPolicy::default());

        let mut entry = SoundEntry::new(1, 77, 0);
        entry.is_sample = true;
        let handle = scheduler.add(entry);
        scheduler.play(handle).unwrap();

        scheduler.pause(handle).unwrap();
        scheduler.resume(handle).unwrap();
        scheduler.set_volume(handle, 64).unwrap();
        scheduler.kill(handle).unwrap();

        assert_eq!(mixer.paused.lock().as_slice(), &[(77, true), (77, false)]);
        assert_eq!(mixer.volumes.lock().as_slice(), &[(77, 64)]);
        assert_eq!(mixer.stopped.lock().as_slice(), &[77]);
    }

    #[test]
    fn test_dead_handle_errors() {
        let driver = Arc::new(MockDriver::new(16));
        let scheduler = scheduler(driver);

        let (entry, _track) = midi_entry(1, 5, &[(0, 0, 4)]);
        let handle = scheduler.add(entry);
        scheduler.kill(handle).unwrap();

        assert_eq!(scheduler.play(handle), Err(SchedulerError::DeadEntry));
        assert_eq!(scheduler.stop(handle), Err(SchedulerError::DeadEntry));
        assert_eq!(scheduler.kill(handle), Err(SchedulerError::DeadEntry));
    }
}
