//! Concurrency-slot bitmap
//!
//! A transaction's cid indexes its row in the wait-for-graph, so cids are
//! small dense integers below `max_tasks` and are reused as soon as the
//! transaction owning one finishes.

const WORD_BITS: usize = u64::BITS as usize;

/// Lowest-free-first allocator over `capacity` slots
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    capacity: usize,
    words: Vec<u64>,
}

impl SlotAllocator {
    /// Create an allocator with every slot free
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            words: vec![0; (capacity + WORD_BITS - 1) / WORD_BITS],
        }
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently taken
    pub fn in_use(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True if `slot` is taken
    pub fn is_taken(&self, slot: usize) -> bool {
        slot < self.capacity && self.words[slot / WORD_BITS] & (1 << (slot % WORD_BITS)) != 0
    }

    /// Take the lowest free slot, `None` if all are taken
    pub fn acquire(&mut self) -> Option<usize> {
        for (w, word) in self.words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let slot = w * WORD_BITS + bit;
            if slot >= self.capacity {
                return None;
            }
            *word |= 1 << bit;
            return Some(slot);
        }
        None
    }

    /// Give `slot` back
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not taken.
    pub fn release(&mut self, slot: usize) {
        assert!(self.is_taken(slot), "slot {} released but not taken", slot);
        self.words[slot / WORD_BITS] &= !(1 << (slot % WORD_BITS));
    }
}
