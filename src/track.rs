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

//! The capability interface to the track/parser layer.

#[cfg(test)]
mod mock;

/// The track layer of one MIDI entry: the component that turns track data
/// into note events. The scheduler tells it which device channel each of
/// its logical channels currently owns and ticks it from the dispatcher.
///
/// All calls arrive on the dispatcher thread.
pub trait TrackSink: Send + Sync {
    /// Informs the track layer which device channel a logical channel now
    /// uses, or that it has none and must go quiet.
    fn remap_channel(&self, logical_channel: u8, device_channel: Option<u8>);

    /// (Re)initializes track state for playback from the start.
    fn init_track(&self);

    /// Sends the track's channel setup commands to the device.
    fn send_init_commands(&self);

    /// Sets the playback volume, already scaled by the master volume.
    fn set_volume(&self, volume: u8);

    /// Advances tick-driven event processing.
    fn on_timer(&self);

    /// The current tick position within the track.
    fn current_tick(&self) -> u64;
}
