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

//! The queue of pending hardware commands.
//!
//! Emulated synthesizer backends expect all state transitions serialized
//! through their own callback, so producer threads never talk to the
//! driver directly. They append here under the scheduler lock, and the
//! dispatcher drains the queue exactly once per tick.

use midly::live::LiveEvent;
use tracing::trace;

use crate::arena::{EntryArena, EntryHandle};
use crate::driver::Driver;

/// One pending command.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuedCommand {
    /// A MIDI message to send to the driver verbatim.
    Message(LiveEvent<'static>),
    /// (Re)initialize the track of the given entry.
    TrackInit(EntryHandle),
}

/// Append-only buffer of pending commands, drained once per tick.
#[derive(Default)]
pub struct CommandQueue {
    commands: Vec<QueuedCommand>,
}

impl CommandQueue {
    /// Creates an empty queue.
    pub fn new() -> CommandQueue {
        CommandQueue::default()
    }

    /// Appends a raw driver message.
    pub fn enqueue_message(&mut self, event: LiveEvent<'static>) {
        self.commands.push(QueuedCommand::Message(event));
    }

    /// Appends a track-initialization token for the given entry.
    pub fn enqueue_track_init(&mut self, handle: EntryHandle) {
        self.commands.push(QueuedCommand::TrackInit(handle));
    }

    /// Removes pending track-init commands targeting a doomed entry, so a
    /// later drain cannot touch it after it is freed.
    pub fn remove_track_init_for(&mut self, handle: EntryHandle) {
        self.commands
            .retain(|command| !matches!(command, QueuedCommand::TrackInit(h) if *h == handle));
    }

    /// Drains the queue in FIFO order. Messages go to the driver verbatim;
    /// track-init tokens re-initialize the entry's track, or are silently
    /// skipped if the entry has died since they were queued. Called only
    /// by the dispatcher.
    pub fn drain_and_dispatch(&mut self, arena: &EntryArena, driver: &dyn Driver) {
        if self.commands.is_empty() {
            return;
        }
        trace!(commands = self.commands.len(), "Draining command queue.");
        for command in self.commands.drain(..) {
            match command {
                QueuedCommand::Message(event) => driver.send(event),
                QueuedCommand::TrackInit(handle) => {
                    let Some(entry) = arena.get(handle) else {
                        continue;
                    };
                    if let Some(track) = &entry.track {
                        track.init_track();
                        track.send_init_commands();
                    }
                }
            }
        }
    }

    /// The number of pending commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
