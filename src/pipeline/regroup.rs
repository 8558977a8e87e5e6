/// Regrouping of decoded sub-reads per parent read and in-order emission
use std::collections::BTreeMap;

use dashmap::DashMap;

use crate::decode::DecodedSubRead;

/// Thread-safe completion barrier for sub-reads of the same parent read.
///
/// Decode workers finish sub-reads in any order. Each part is parked under its
/// parent's admission number; the worker that delivers the last missing index
/// takes all parts and finishes the read.
#[derive(Default)]
pub struct SubReadAssembler {
    parts: DashMap<u64, Vec<DecodedSubRead>>,
}

impl SubReadAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a decoded sub-read; returns every part of its parent once complete.
    pub fn add(&self, part: DecodedSubRead) -> Option<Vec<DecodedSubRead>> {
        let parent = part.tag.parent;
        let total = part.tag.total;
        if total <= 1 {
            return Some(vec![part]);
        }
        let complete = {
            let mut entry = self.parts.entry(parent).or_insert_with(|| Vec::with_capacity(total));
            if !entry.iter().any(|p| p.tag.index == part.tag.index) {
                entry.push(part);
            }
            entry.len() == total
        };
        if complete {
            self.parts.remove(&parent).map(|(_, parts)| parts)
        } else {
            None
        }
    }

    /// Parents with at least one parked sub-read.
    pub fn pending(&self) -> usize {
        self.parts.len()
    }
}

/// Reorder buffer restoring admission order of completed reads.
#[derive(Debug)]
pub struct OrderedEmitter<T> {
    next: u64,
    buffer: BTreeMap<u64, T>,
}

impl<T> Default for OrderedEmitter<T> {
    fn default() -> Self {
        Self {
            next: 0,
            buffer: BTreeMap::new(),
        }
    }
}

impl<T> OrderedEmitter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept item `seq`; returns the run of items now ready in order.
    pub fn push(&mut self, seq: u64, item: T) -> Vec<T> {
        self.buffer.insert(seq, item);
        let mut ready = Vec::new();
        while let Some(item) = self.buffer.remove(&self.next) {
            ready.push(item);
            self.next += 1;
        }
        ready
    }

    /// Everything still buffered, in order, skipping any gaps.
    pub fn drain(&mut self) -> Vec<T> {
        let buffer = std::mem::take(&mut self.buffer);
        if let Some(&last) = buffer.keys().next_back() {
            self.next = self.next.max(last + 1);
        }
        buffer.into_values().collect()
    }

    /// Items waiting for an earlier one.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
