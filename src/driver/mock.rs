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

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use midly::live::LiveEvent;
use midly::MidiMessage;
use parking_lot::Mutex;

use super::Driver;

/// A mock driver. Doesn't actually synthesize anything; records every
/// message so tests can assert on the traffic.
pub struct MockDriver {
    polyphony: u8,
    first_channel: u8,
    last_channel: u8,
    reverb: AtomicU8,
    sent: Mutex<Vec<LiveEvent<'static>>>,
}

impl MockDriver {
    /// Creates a mock with the given polyphony, using all 16 channels.
    pub fn new(polyphony: u8) -> MockDriver {
        MockDriver::with_channel_range(polyphony, 0, 15)
    }

    /// Creates a mock with the given polyphony and channel range.
    pub fn with_channel_range(polyphony: u8, first_channel: u8, last_channel: u8) -> MockDriver {
        MockDriver {
            polyphony,
            first_channel,
            last_channel,
            reverb: AtomicU8::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Every message sent, in order.
    pub fn sent(&self) -> Vec<LiveEvent<'static>> {
        self.sent.lock().clone()
    }

    /// The number of messages sent.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// The number of channel-reset controller messages sent (sustain off,
    /// all notes off, release voices).
    pub fn reset_message_count(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    LiveEvent::Midi {
                        message: MidiMessage::Controller { controller, .. },
                        ..
                    } if matches!(controller.as_int(), 0x40 | 0x4B | 0x7B)
                )
            })
            .count()
    }

    /// Clears the recorded messages.
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }
}

impl Driver for MockDriver {
    fn send(&self, event: LiveEvent<'static>) {
        self.sent.lock().push(event);
    }

    fn polyphony(&self) -> u8 {
        self.polyphony
    }

    fn first_channel(&self) -> u8 {
        self.first_channel
    }

    fn last_channel(&self) -> u8 {
        self.last_channel
    }

    fn set_reverb(&self, level: u8) {
        self.reverb.store(level, Ordering::Relaxed);
    }

    fn reverb(&self) -> u8 {
        self.reverb.load(Ordering::Relaxed)
    }
}

impl fmt::Display for MockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mock driver ({} voices, channels {}-{})",
            self.polyphony, self.first_channel, self.last_channel
        )
    }
}
