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

//! The boundary to the digital sample mixer.

/// Playback control for digital-sample entries. Decoding and mixing live
/// elsewhere; the scheduler only starts, stops and adjusts samples.
///
/// The mixer may take its own locks, so the scheduler always releases its
/// lock before calling in here.
pub trait SampleMixer: Send + Sync {
    /// Stops playback of the sample resource.
    fn stop(&self, resource_id: u32);

    /// Pauses or resumes playback of the sample resource.
    fn pause(&self, resource_id: u32, paused: bool);

    /// Sets the playback volume, already scaled by the master volume.
    fn set_volume(&self, resource_id: u32, volume: u8);
}
