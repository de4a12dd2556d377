//! Bounded index lists with an atomic head.
//!
//! The alive and dead lists are arrays of particle slot indices whose length
//! is an atomic counter. Many invocations push or pop concurrently; each one
//! claims a unique position from the head and then touches only that
//! position. This is the host form of the `atomicAdd`/`atomicSub` pattern
//! the kernels use on the counter buffer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// A fixed-capacity stack of `u32` indices.
#[derive(Debug)]
pub struct IndexList {
    head: AtomicU32,
    slots: Box<[AtomicU32]>,
}

impl IndexList {
    /// An empty list able to hold `capacity` indices.
    pub fn empty(capacity: u32) -> Self {
        Self {
            head: AtomicU32::new(0),
            slots: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// A full list holding every slot `0..capacity`, arranged so that pops
    /// hand out the lowest slots first.
    pub fn full(capacity: u32) -> Self {
        Self {
            head: AtomicU32::new(capacity),
            slots: (0..capacity).rev().map(AtomicU32::new).collect(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Current number of indices.
    pub fn len(&self) -> u32 {
        self.head.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an index. Returns the position it landed at, or `None` when
    /// the list is full.
    pub fn push(&self, index: u32) -> Option<u32> {
        let position = self
            .head
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |head| {
                (head < self.capacity()).then_some(head + 1)
            })
            .ok()?;
        self.slots[position as usize].store(index, Ordering::Release);
        Some(position)
    }

    /// Remove the top index, or `None` when empty.
    pub fn pop(&self) -> Option<u32> {
        let previous = self
            .head
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |head| head.checked_sub(1))
            .ok()?;
        Some(self.slots[(previous - 1) as usize].load(Ordering::Acquire))
    }

    /// Index stored at `position`. Positions at or past `len()` hold stale data.
    pub fn get(&self, position: u32) -> u32 {
        self.slots[position as usize].load(Ordering::Acquire)
    }

    /// Drop every index.
    pub fn clear(&self) {
        self.head.store(0, Ordering::Release);
    }

    /// Copy of the live indices.
    pub fn to_vec(&self) -> Vec<u32> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }
}

/// Per-slot storage that many invocations may write at once, each to a
/// distinct slot.
#[derive(Debug)]
pub struct SlotBuffer<T> {
    slots: Box<[Mutex<T>]>,
}

impl<T: Copy + Default> SlotBuffer<T> {
    pub fn new(len: u32) -> Self {
        Self {
            slots: (0..len).map(|_| Mutex::new(T::default())).collect(),
        }
    }

    pub fn load(&self, index: u32) -> T {
        *lock(&self.slots[index as usize])
    }

    pub fn store(&self, index: u32, value: T) {
        *lock(&self.slots[index as usize]) = value;
    }

    pub fn len(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Copy of the first `count` slots.
    pub fn prefix(&self, count: u32) -> Vec<T> {
        (0..count.min(self.len())).map(|i| self.load(i)).collect()
    }
}

// A poisoned slot only means another invocation panicked mid-store; the
// value is plain data, so keep using it.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn full_list_contains_each_slot_once() {
        let list = IndexList::full(64);
        let mut items = list.to_vec();
        items.sort_unstable();
        assert_eq!(items, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn pops_hand_out_low_slots_first() {
        let list = IndexList::full(4);
        assert_eq!(list.pop(), Some(0));
        assert_eq!(list.pop(), Some(1));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn bounded_at_both_ends() {
        let list = IndexList::empty(2);
        assert_eq!(list.pop(), None);
        assert_eq!(list.push(7), Some(0));
        assert_eq!(list.push(8), Some(1));
        assert_eq!(list.push(9), None);
        assert_eq!(list.len(), 2);
        assert_eq!(list.pop(), Some(8));
    }

    #[test]
    fn concurrent_pops_never_duplicate() {
        let list = IndexList::full(4096);
        let mut popped: Vec<u32> = (0..5000).into_par_iter().filter_map(|_| list.pop()).collect();
        assert_eq!(popped.len(), 4096);
        popped.sort_unstable();
        popped.dedup();
        assert_eq!(popped.len(), 4096);
        assert!(list.is_empty());
    }

    #[test]
    fn concurrent_pushes_claim_unique_positions() {
        let list = IndexList::empty(1000);
        (0..1000u32).into_par_iter().for_each(|i| {
            list.push(i);
        });
        let mut items = list.to_vec();
        items.sort_unstable();
        assert_eq!(items, (0..1000).collect::<Vec<_>>());
    }
}
