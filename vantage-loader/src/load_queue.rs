use std::cmp::Ordering;
use std::collections::BinaryHeap;
use vantage_base::LoadHandle;

#[derive(Copy, Clone, Debug)]
pub(crate) struct QueuedLoad {
    pub(crate) handle: LoadHandle,
    pub(crate) priority: f64,
    // Arrival order, earlier wins on equal priority
    pub(crate) sequence: u64,
}

impl PartialEq for QueuedLoad {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedLoad {}

impl PartialOrd for QueuedLoad {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedLoad {
    // BinaryHeap is a max-heap: higher priority is greater, and for equal priorities the lower
    // sequence is greater
    fn cmp(
        &self,
        other: &Self,
    ) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Pending loads, highest priority first. Cancelled resources are taken out with `remove`. The
/// manager still checks each popped entry against the resource's current state and sequence and
/// skips stale ones.
#[derive(Default)]
pub(crate) struct LoadQueue {
    heap: BinaryHeap<QueuedLoad>,
    next_sequence: u64,
}

impl LoadQueue {
    // Returns the sequence number the entry was queued with
    pub(crate) fn push(
        &mut self,
        handle: LoadHandle,
        priority: f64,
    ) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueuedLoad {
            handle,
            priority,
            sequence,
        });
        sequence
    }

    pub(crate) fn pop(&mut self) -> Option<QueuedLoad> {
        self.heap.pop()
    }

    // Drops every entry for the handle
    pub(crate) fn remove(
        &mut self,
        handle: LoadHandle,
    ) {
        self.heap.retain(|queued| queued.handle != handle);
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }
}
