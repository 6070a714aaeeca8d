// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::collections::VecDeque;

use crate::types::DataValue;

/// Values received for a monitored item that the caller has not taken yet, bounded by the
/// revised queue size of the item.
#[derive(Debug, Clone)]
pub(crate) struct ItemCache {
    queue: VecDeque<DataValue>,
    capacity: usize,
    discard_oldest: bool,
    last_value: Option<DataValue>,
    overflow_count: u64,
}

impl ItemCache {
    pub fn new(capacity: usize, discard_oldest: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            discard_oldest,
            last_value: None,
            overflow_count: 0,
        }
    }

    /// Queues a value. When full, discard oldest drops the head of the queue and discard
    /// newest overwrites the most recent entry, the way a server queue overflows.
    pub fn push(&mut self, value: DataValue) {
        self.last_value = Some(value.clone());
        if self.queue.len() < self.capacity {
            self.queue.push_back(value);
            return;
        }
        self.overflow_count += 1;
        if self.discard_oldest {
            self.queue.pop_front();
            self.queue.push_back(value);
        } else if let Some(last) = self.queue.back_mut() {
            *last = value;
        }
    }

    /// Takes every queued value, oldest first. The last value is kept.
    pub fn drain(&mut self) -> Vec<DataValue> {
        self.queue.drain(..).collect()
    }

    pub fn last_value(&self) -> Option<&DataValue> {
        self.last_value.as_ref()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Applies a revised queue size and discard policy, trimming values that no longer fit.
    pub fn reconfigure(&mut self, capacity: usize, discard_oldest: bool) {
        self.capacity = capacity.max(1);
        self.discard_oldest = discard_oldest;
        while self.queue.len() > self.capacity {
            if self.discard_oldest {
                self.queue.pop_front();
            } else {
                self.queue.pop_back();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ItemCache;
    use crate::types::{DataValue, Variant};

    fn values(cache: &mut ItemCache) -> Vec<i32> {
        cache
            .drain()
            .into_iter()
            .filter_map(|v| v.value.and_then(|v| v.as_i32()))
            .collect()
    }

    #[test]
    fn discard_oldest_keeps_latest() {
        let mut cache = ItemCache::new(2, true);
        for i in 1..=5 {
            cache.push(DataValue::value_only(Variant::Int32(i)));
        }
        assert_eq!(cache.overflow_count(), 3);
        assert_eq!(values(&mut cache), vec![4, 5]);
    }

    #[test]
    fn discard_newest_replaces_last_entry() {
        let mut cache = ItemCache::new(2, false);
        for i in 1..=5 {
            cache.push(DataValue::value_only(Variant::Int32(i)));
        }
        assert_eq!(values(&mut cache), vec![1, 5]);
    }

    #[test]
    fn last_value_survives_drain() {
        let mut cache = ItemCache::new(3, true);
        cache.push(DataValue::value_only(Variant::Int32(7)));
        assert_eq!(cache.len(), 1);
        let _ = cache.drain();
        assert_eq!(cache.len(), 0);
        assert_eq!(
            cache.last_value().and_then(|v| v.value.as_ref()).and_then(|v| v.as_i32()),
            Some(7)
        );
    }

    #[test]
    fn zero_capacity_holds_one_value() {
        let mut cache = ItemCache::new(0, true);
        assert_eq!(cache.capacity(), 1);
        cache.push(DataValue::value_only(Variant::Int32(1)));
        cache.push(DataValue::value_only(Variant::Int32(2)));
        assert_eq!(values(&mut cache), vec![2]);
    }

    #[test]
    fn shrinking_trims_by_policy() {
        let mut cache = ItemCache::new(4, true);
        for i in 1..=4 {
            cache.push(DataValue::value_only(Variant::Int32(i)));
        }
        cache.reconfigure(2, true);
        assert_eq!(values(&mut cache), vec![3, 4]);

        for i in 1..=2 {
            cache.push(DataValue::value_only(Variant::Int32(i)));
        }
        cache.reconfigure(1, false);
        assert_eq!(values(&mut cache), vec![1]);
    }
}
