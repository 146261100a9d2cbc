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

//! A priority-based channel scheduler for polyphonic MIDI playback.
//!
//! Several songs and sound effects can be active at once, but a
//! synthesizer has at most 16 device channels and a fixed voice budget.
//! Every timer tick this crate decides which logical channels of which
//! songs get hardware, reconciles that decision against what the hardware
//! is already doing with as few audible disruptions as possible, and
//! advances each song's fade/signal state machine.
//!
//! The [`scheduler::Scheduler`] is the entry point: producer threads call
//! its playback operations, and the audio/timer callback drives
//! [`scheduler::Scheduler::on_timer`] as the single consumer.

pub mod allocator;
pub mod arena;
pub mod driver;
pub mod entry;
pub mod mixer;
pub mod playlist;
pub mod queue;
pub mod scheduler;
pub mod track;

pub use arena::EntryHandle;
pub use scheduler::{Scheduler, SchedulerError};
