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

//! The ordered list of active sound entries.
//!
//! The list holds arena handles, not entries, and is kept sorted by
//! (priority desc, timestamp desc) so the channel allocator can walk it in
//! eviction order. Callers must re-sort after changing an entry's priority.
//! All operations here expect the scheduler lock to be held.

use crate::arena::{EntryArena, EntryHandle};
use crate::entry::Status;

/// An ordered collection of handles to active sound entries.
#[derive(Default)]
pub struct PlayList {
    entries: Vec<EntryHandle>,
}

impl PlayList {
    /// Creates an empty playlist.
    pub fn new() -> PlayList {
        PlayList::default()
    }

    /// Inserts a handle and re-sorts. No-op if the handle is already
    /// present.
    pub fn insert(&mut self, arena: &EntryArena, handle: EntryHandle) {
        if self.entries.contains(&handle) {
            return;
        }
        self.entries.push(handle);
        self.sort(arena);
    }

    /// Removes a handle. No-op if absent; removal never changes the
    /// relative order of the remaining entries.
    pub fn remove(&mut self, handle: EntryHandle) {
        self.entries.retain(|h| *h != handle);
    }

    /// Sorts by priority (descending), breaking ties by timestamp
    /// (descending, so newer songs win). The sort is stable.
    pub fn sort(&mut self, arena: &EntryArena) {
        self.entries.sort_by(|a, b| {
            let ka = arena.get(*a).map(|e| (e.priority, e.timestamp));
            let kb = arena.get(*b).map(|e| (e.priority, e.timestamp));
            kb.cmp(&ka)
        });
    }

    /// Finds the entry playing for the given engine object.
    pub fn find_by_identity(&self, arena: &EntryArena, identity: u64) -> Option<EntryHandle> {
        self.entries
            .iter()
            .copied()
            .find(|h| arena.get(*h).is_some_and(|e| e.identity == identity))
    }

    /// Finds the first entry (in priority order) with the given status.
    pub fn find_first_with_status(
        &self,
        arena: &EntryArena,
        status: Status,
    ) -> Option<EntryHandle> {
        self.entries
            .iter()
            .copied()
            .find(|h| arena.get(*h).is_some_and(|e| e.status == status))
    }

    /// The handles in priority order.
    pub fn handles(&self) -> &[EntryHandle] {
        &self.entries
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are active.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
