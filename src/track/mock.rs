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

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::TrackSink;

/// A mock track layer. Records every call for assertions.
#[derive(Default)]
pub struct MockTrackSink {
    remaps: Mutex<Vec<(u8, Option<u8>)>>,
    volumes: Mutex<Vec<u8>>,
    init_calls: AtomicU64,
    init_command_calls: AtomicU64,
    timer_calls: AtomicU64,
    tick: AtomicU64,
}

impl MockTrackSink {
    /// Creates a new mock track sink.
    pub fn new() -> MockTrackSink {
        MockTrackSink::default()
    }

    /// Every remap_channel call in order.
    pub fn remaps(&self) -> Vec<(u8, Option<u8>)> {
        self.remaps.lock().clone()
    }

    /// The device channel the given logical channel was last mapped to.
    pub fn mapping_of(&self, logical_channel: u8) -> Option<u8> {
        self.remaps
            .lock()
            .iter()
            .rev()
            .find(|(logical, _)| *logical == logical_channel)
            .and_then(|(_, device)| *device)
    }

    /// Every set_volume call in order.
    pub fn volumes(&self) -> Vec<u8> {
        self.volumes.lock().clone()
    }

    /// The number of init_track calls.
    pub fn init_calls(&self) -> u64 {
        self.init_calls.load(Ordering::Relaxed)
    }

    /// The number of send_init_commands calls.
    pub fn init_command_calls(&self) -> u64 {
        self.init_command_calls.load(Ordering::Relaxed)
    }

    /// The number of on_timer calls.
    pub fn timer_calls(&self) -> u64 {
        self.timer_calls.load(Ordering::Relaxed)
    }

    /// Clears the recorded remap calls.
    pub fn reset_remaps(&self) {
        self.remaps.lock().clear();
    }
}

impl TrackSink for MockTrackSink {
    fn remap_channel(&self, logical_channel: u8, device_channel: Option<u8>) {
        self.remaps.lock().push((logical_channel, device_channel));
    }

    fn init_track(&self) {
        self.init_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn send_init_commands(&self) {
        self.init_command_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn set_volume(&self, volume: u8) {
        self.volumes.lock().push(volume);
    }

    fn on_timer(&self) {
        self.timer_calls.fetch_add(1, Ordering::Relaxed);
        self.tick.fetch_add(1, Ordering::Relaxed);
    }

    fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }
}
