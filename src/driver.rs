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

//! The narrow facade to a synthesizer driver backend.

use std::fmt;

use midly::live::LiveEvent;

#[cfg(test)]
mod mock;

/// A synthesizer driver backend (AdLib, MT-32, and friends). This is the
/// entire surface the scheduler needs; everything else about a backend is
/// its own business.
///
/// `send` must be safe to call from the dispatcher thread. Most emulated
/// backends are *only* safe to drive from there, which is why producer-side
/// traffic goes through the command queue instead of calling this directly.
pub trait Driver: fmt::Display + Send + Sync {
    /// Transmits one MIDI channel message.
    fn send(&self, event: LiveEvent<'static>);

    /// The hardware polyphony: how many voices the backend can sound at
    /// once.
    fn polyphony(&self) -> u8;

    /// The first usable device channel.
    fn first_channel(&self) -> u8;

    /// The last usable device channel.
    fn last_channel(&self) -> u8;

    /// Sets the reverb level.
    fn set_reverb(&self, level: u8);

    /// The current reverb level.
    fn reverb(&self) -> u8;
}
