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

//! Generational arena that owns every sound entry.
//!
//! The playlist, the device channel table and queued commands all refer to
//! entries by handle. A handle to a killed entry resolves to `None` even if
//! its slot has since been reused, so a stale handle can never observe an
//! unrelated entry.

use crate::entry::SoundEntry;

/// A stable reference to a sound entry in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    entry: Option<SoundEntry>,
}

/// Owns all sound entries known to the scheduler. Entries are freed only by
/// an explicit remove, never implicitly.
#[derive(Default)]
pub struct EntryArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl EntryArena {
    /// Creates an empty arena.
    pub fn new() -> EntryArena {
        EntryArena::default()
    }

    /// Inserts an entry and returns its handle.
    pub fn insert(&mut self, entry: SoundEntry) -> EntryHandle {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                EntryHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                EntryHandle {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Removes the entry for the given handle, returning it if the handle
    /// was still live. The slot's generation is bumped so outstanding
    /// handles to the removed entry go dead.
    pub fn remove(&mut self, handle: EntryHandle) -> Option<SoundEntry> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation || slot.entry.is_none() {
            return None;
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        slot.entry.take()
    }

    /// Resolves a handle to a shared reference, or `None` if it is stale.
    pub fn get(&self, handle: EntryHandle) -> Option<&SoundEntry> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    /// Resolves a handle to an exclusive reference, or `None` if it is stale.
    pub fn get_mut(&mut self, handle: EntryHandle) -> Option<&mut SoundEntry> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Returns true if the handle still refers to a live entry.
    pub fn contains(&self, handle: EntryHandle) -> bool {
        self.get(handle).is_some()
    }

    /// The number of live entries.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Returns true if no entries are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
