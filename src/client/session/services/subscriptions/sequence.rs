// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Notification sequence numbers of a subscription. Numbers start at 1, wrap after `u32::MAX`
//! and never take the value 0.

/// Gaps wider than this are not republished number by number
pub(crate) const MAX_REPUBLISH_GAP: u32 = 64;

/// The number following `n`
pub(crate) fn next_sequence_number(n: u32) -> u32 {
    if n == u32::MAX {
        1
    } else {
        n + 1
    }
}

/// Steps from `from` to `to` going forward, skipping 0.
fn distance(from: u32, to: u32) -> u32 {
    if to >= from {
        to - from
    } else {
        // from -> u32::MAX, then one step to 1, then 1 -> to
        (u32::MAX - from) + to
    }
}

/// How a notification relates to what was delivered before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Arrival {
    /// The first notification, or the one right after the last delivered
    Next,
    /// The notifications with these numbers are missing and can be republished
    Gap(Vec<u32>),
    /// Too many are missing to republish
    Lost { first_missing: u32, count: u32 },
    /// Already delivered or older than the last delivered
    Stale,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SequenceTracker {
    last_delivered: Option<u32>,
}

impl SequenceTracker {
    pub fn last_delivered(&self) -> Option<u32> {
        self.last_delivered
    }

    pub fn classify(&self, sequence_number: u32) -> Arrival {
        let Some(last) = self.last_delivered else {
            return Arrival::Next;
        };
        let d = distance(last, sequence_number);
        if d == 0 || d > u32::MAX / 2 {
            Arrival::Stale
        } else if d == 1 {
            Arrival::Next
        } else if d - 1 > MAX_REPUBLISH_GAP {
            Arrival::Lost {
                first_missing: next_sequence_number(last),
                count: d - 1,
            }
        } else {
            let mut missing = Vec::with_capacity((d - 1) as usize);
            let mut n = next_sequence_number(last);
            while n != sequence_number {
                missing.push(n);
                n = next_sequence_number(n);
            }
            Arrival::Gap(missing)
        }
    }

    /// True for numbers at or before the last delivered one.
    pub fn is_delivered(&self, sequence_number: u32) -> bool {
        self.last_delivered.is_some() && self.classify(sequence_number) == Arrival::Stale
    }

    /// Records a delivered, republished or lost number. Older numbers do not move the tracker back.
    pub fn advance(&mut self, sequence_number: u32) {
        if sequence_number == 0 {
            return;
        }
        if !self.is_delivered(sequence_number) {
            self.last_delivered = Some(sequence_number);
        }
    }

    /// A recreated subscription starts numbering again.
    pub fn reset(&mut self) {
        self.last_delivered = None;
    }
}
