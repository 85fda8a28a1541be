use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

// Lets a pool recognize its own objects, 0 is never handed out
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// An object on loan from an [`ObjectPool`]. Hand it back with [`ObjectPool::release`] to have it
/// reset and reused, or take it for good with [`ObjectPool::forget`]. Dropping it instead leaves
/// its slot counted as in use.
pub struct Pooled<T> {
    pool_id: u64,
    // None if the pool was at capacity when this was created. Such objects are not retained.
    slot: Option<u32>,
    value: T,
}

impl<T> Pooled<T> {
    pub fn is_retained(&self) -> bool {
        self.slot.is_some()
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("pool_id", &self.pool_id)
            .field("slot", &self.slot)
            .field("value", &self.value)
            .finish()
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum SlotState {
    // Nothing is tracked in this slot, it can be filled by the factory
    Free,
    // The slot's object is sitting in `available`
    Available,
    // The slot's object is on loan
    InUse,
}

/// Reuses objects to avoid allocating on hot paths.
///
/// Up to `max_size` objects are tracked. Every tracked slot is either available (its object is
/// sitting in the pool) or in use (its object is on loan), never both. When all tracked slots are
/// in use, `acquire` still succeeds by calling the factory, but that object is dropped rather than
/// retained when released.
pub struct ObjectPool<T> {
    pool_id: u64,
    max_size: usize,
    factory: Box<dyn FnMut() -> T>,
    reset: Box<dyn FnMut(&mut T)>,

    // Objects ready to be handed out, paired with their slot
    available: Vec<(u32, T)>,
    slots: Vec<SlotState>,
}

impl<T> ObjectPool<T> {
    pub fn new(
        max_size: usize,
        factory: impl FnMut() -> T + 'static,
        reset: impl FnMut(&mut T) + 'static,
    ) -> Self {
        ObjectPool {
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            max_size,
            factory: Box::new(factory),
            reset: Box::new(reset),
            available: Vec::default(),
            slots: Vec::default(),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|x| **x == SlotState::InUse)
            .count()
    }

    /// Number of objects the pool is tracking, whether available or on loan
    pub fn retained_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|x| **x != SlotState::Free)
            .count()
    }

    fn claim_free_slot(&mut self) -> Option<u32> {
        if let Some(index) = self.slots.iter().position(|x| *x == SlotState::Free) {
            self.slots[index] = SlotState::InUse;
            return Some(index as u32);
        }

        if self.slots.len() < self.max_size {
            self.slots.push(SlotState::InUse);
            return Some((self.slots.len() - 1) as u32);
        }

        None
    }

    /// Take an object from the pool, creating one if none are available.
    ///
    /// The result must go back through [`release`](Self::release) or
    /// [`forget`](Self::forget). A `Pooled` that is simply dropped keeps its slot marked in use
    /// for the life of the pool, and once `max_size` slots are lost that way the pool stops
    /// retaining anything.
    pub fn acquire(&mut self) -> Pooled<T> {
        if let Some((slot, value)) = self.available.pop() {
            self.slots[slot as usize] = SlotState::InUse;
            return Pooled {
                pool_id: self.pool_id,
                slot: Some(slot),
                value,
            };
        }

        let value = (self.factory)();
        let slot = self.claim_free_slot();
        if slot.is_none() {
            // Either everything really is on loan, or some Pooled were dropped without release
            log::debug!(
                "ObjectPool {} has all {} slots in use, handing out an untracked object",
                self.pool_id,
                self.max_size
            );
        }

        Pooled {
            pool_id: self.pool_id,
            slot,
            value,
        }
    }

    pub fn release(
        &mut self,
        pooled: Pooled<T>,
    ) {
        if pooled.pool_id != self.pool_id {
            log::warn!(
                "ObjectPool {} was handed an object from pool {}, ignoring it",
                self.pool_id,
                pooled.pool_id
            );
            return;
        }

        let slot = match pooled.slot {
            Some(slot) => slot,
            // Overflow object, let it drop
            None => return,
        };

        match self.slots.get_mut(slot as usize) {
            Some(state) if *state == SlotState::InUse => {
                *state = SlotState::Available;
                let mut value = pooled.value;
                (self.reset)(&mut value);
                self.available.push((slot, value));
            }
            _ => {
                log::warn!(
                    "ObjectPool {} released slot {} which is not in use, ignoring it",
                    self.pool_id,
                    slot
                );
            }
        }
    }

    /// Drops every available object. Objects on loan are unaffected and still count against
    /// `max_size` until they are released.
    pub fn clear_available(&mut self) {
        for (slot, _) in self.available.drain(..) {
            self.slots[slot as usize] = SlotState::Free;
        }
    }

    /// Forget an object on loan without returning it, freeing its slot for the factory
    pub fn forget(
        &mut self,
        pooled: Pooled<T>,
    ) -> T {
        if pooled.pool_id == self.pool_id {
            if let Some(slot) = pooled.slot {
                if let Some(state) = self.slots.get_mut(slot as usize) {
                    if *state == SlotState::InUse {
                        *state = SlotState::Free;
                    }
                }
            }
        }

        pooled.value
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("pool_id", &self.pool_id)
            .field("max_size", &self.max_size)
            .field("available", &self.available.len())
            .field("in_use", &self.in_use_count())
            .finish()
    }
}
