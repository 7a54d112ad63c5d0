//! Reusable frame buffer arena.
//!
//! A free-list of byte buffers keyed by size class, so steady-state
//! conversion does not hit the allocator at camera frame rates. Both
//! operations take `&mut self`: the arena has exactly one owner, the
//! capture-processing thread, and is never shared.

use std::collections::BTreeMap;

/// Buffers retained per size class.
const DEFAULT_RETAIN_PER_CLASS: usize = 4;
/// Distinct size classes kept before the smallest is evicted. Frame
/// dimensions rarely change, so in practice one class stays hot.
const DEFAULT_MAX_CLASSES: usize = 4;

pub struct BufferArena {
    classes: BTreeMap<usize, Vec<Vec<u8>>>,
    retain_per_class: usize,
    max_classes: usize,
}

impl Default for BufferArena {
    fn default() -> Self {
        Self::new(DEFAULT_RETAIN_PER_CLASS, DEFAULT_MAX_CLASSES)
    }
}

impl BufferArena {
    pub fn new(retain_per_class: usize, max_classes: usize) -> Self {
        Self {
            classes: BTreeMap::new(),
            retain_per_class: retain_per_class.max(1),
            max_classes: max_classes.max(1),
        }
    }

    /// Hand out an empty buffer with capacity for at least `len` bytes,
    /// reusing the smallest sufficient recycled buffer when one exists.
    pub fn acquire(&mut self, len: usize) -> Vec<u8> {
        let class = self
            .classes
            .range_mut(len..)
            .find_map(|(size, pool)| pool.pop().map(|buf| (*size, buf)));
        match class {
            Some((size, buf)) => {
                if self.classes.get(&size).is_some_and(Vec::is_empty) {
                    self.classes.remove(&size);
                }
                buf
            }
            None => Vec::with_capacity(len),
        }
    }

    /// Return a buffer for reuse. Growing a buffer elsewhere effectively
    /// retires its old class; retention is bounded in both directions.
    pub fn recycle(&mut self, mut buf: Vec<u8>) {
        let capacity = buf.capacity();
        if capacity == 0 {
            return;
        }
        buf.clear();

        let pool = self.classes.entry(capacity).or_default();
        if pool.len() < self.retain_per_class {
            pool.push(buf);
        }

        // Evict the smallest class once dimensions have churned too often.
        while self.classes.len() > self.max_classes {
            let smallest = *self.classes.keys().next().expect("non-empty map");
            self.classes.remove(&smallest);
        }
    }

    pub fn pooled_buffers(&self) -> usize {
        self.classes.values().map(Vec::len).sum()
    }
}
