/// Fixed-capacity FIFO queue. Pushing onto a full buffer overwrites the oldest item, it never
/// grows.
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    // Index of the oldest item
    head: usize,
    // Index the next push writes to
    tail: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            log::warn!("RingBuffer created with capacity 0, using a capacity of 1 instead");
            1
        } else {
            capacity
        };

        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(None);
        }

        RingBuffer {
            slots,
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Appends an item, returning the oldest item if it had to be overwritten
    pub fn push(
        &mut self,
        item: T,
    ) -> Option<T> {
        let overwritten = self.slots[self.tail].replace(item);
        self.tail = (self.tail + 1) % self.slots.len();
        if overwritten.is_some() {
            // We were full, the oldest item is gone so the head moves along with the tail
            self.head = self.tail;
        } else {
            self.len += 1;
        }

        overwritten
    }

    /// Removes and returns the oldest item
    pub fn shift(&mut self) -> Option<T> {
        let item = self.slots[self.head].take()?;
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        Some(item)
    }

    pub fn peek_front(&self) -> Option<&T> {
        self.slots[self.head].as_ref()
    }

    pub fn peek_back(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }

        let index = (self.tail + self.slots.len() - 1) % self.slots.len();
        self.slots[index].as_ref()
    }

    /// Iterates from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let capacity = self.slots.len();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % capacity].as_ref())
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for RingBuffer<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shift_on_empty_is_none() {
        let mut ring_buffer = RingBuffer::<u32>::new(3);
        assert_eq!(ring_buffer.shift(), None);
        assert_eq!(ring_buffer.peek_front(), None);
        assert_eq!(ring_buffer.peek_back(), None);
    }

    #[test]
    fn fifo_order() {
        let mut ring_buffer = RingBuffer::new(3);
        ring_buffer.push(1);
        ring_buffer.push(2);
        assert_eq!(ring_buffer.shift(), Some(1));
        ring_buffer.push(3);
        ring_buffer.push(4);
        assert_eq!(ring_buffer.len(), 3);
        assert_eq!(ring_buffer.shift(), Some(2));
        assert_eq!(ring_buffer.shift(), Some(3));
        assert_eq!(ring_buffer.shift(), Some(4));
        assert_eq!(ring_buffer.shift(), None);
    }

    #[test]
    fn overflow_drops_oldest() {
        let capacity = 4;
        let mut ring_buffer = RingBuffer::new(capacity);
        for i in 0..capacity {
            assert_eq!(ring_buffer.push(i), None);
        }
        assert!(ring_buffer.is_full());

        // Overflow by one, the oldest item is returned
        assert_eq!(ring_buffer.push(capacity), Some(0));
        assert_eq!(ring_buffer.len(), capacity);
        assert_eq!(ring_buffer.peek_front(), Some(&1));
        assert_eq!(ring_buffer.peek_back(), Some(&capacity));

        let mut shifted = Vec::new();
        for _ in 0..capacity {
            shifted.push(ring_buffer.shift().unwrap());
        }
        assert_eq!(shifted, vec![1, 2, 3, 4]);
        assert!(ring_buffer.is_empty());
    }

    #[test]
    fn iter_is_oldest_first_after_wrapping() {
        let mut ring_buffer = RingBuffer::new(3);
        for i in 0..7 {
            ring_buffer.push(i);
        }
        let items: Vec<_> = ring_buffer.iter().copied().collect();
        assert_eq!(items, vec![4, 5, 6]);

        ring_buffer.clear();
        assert_eq!(ring_buffer.iter().count(), 0);
        ring_buffer.push(9);
        assert_eq!(ring_buffer.shift(), Some(9));
    }
}
