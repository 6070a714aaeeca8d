// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out increasing numbers from any task. After `u32::MAX` it starts over at the first
/// number, never at zero unless that is where it started.
#[derive(Debug)]
pub struct AtomicHandle {
    next: AtomicU32,
    first: u32,
}

impl AtomicHandle {
    pub fn new(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
            first,
        }
    }

    pub fn next(&self) -> u32 {
        let advance = |v: u32| Some(v.checked_add(1).unwrap_or(self.first));
        match self.next.fetch_update(Ordering::AcqRel, Ordering::Acquire, advance) {
            Ok(v) | Err(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_up_from_first() {
        let h = AtomicHandle::new(1000);
        assert_eq!((h.next(), h.next(), h.next()), (1000, 1001, 1002));
    }

    #[test]
    fn wraps_to_first() {
        let h = AtomicHandle::new(u32::MAX - 1);
        assert_eq!(h.next(), u32::MAX - 1);
        assert_eq!(h.next(), u32::MAX);
        assert_eq!(h.next(), u32::MAX - 1);
    }

    #[test]
    fn handles_are_unique_across_threads() {
        let h = std::sync::Arc::new(AtomicHandle::new(1));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let h = h.clone();
                std::thread::spawn(move || (0..250).map(|_| h.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u32> = threads
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }
}
