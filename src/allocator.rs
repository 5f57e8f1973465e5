//! Free-block allocator. Smallest-index-first allocation, deterministic
//! for tests. Not thread-safe on its own; serialized by the owning
//! Container.

use log::warn;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AllocatorError {
    #[error("no free blocks remain")]
    OutOfSpace,
}

#[derive(Debug, Clone, Default)]
pub struct FreeBlockAllocator {
    free: BTreeSet<u64>,
}

impl FreeBlockAllocator {
    pub fn new(free: BTreeSet<u64>) -> Self {
        Self { free }
    }

    /// Removes and returns the smallest free index.
    pub fn allocate(&mut self) -> Result<u64, AllocatorError> {
        let index = *self.free.iter().next().ok_or(AllocatorError::OutOfSpace)?;
        self.free.remove(&index);
        Ok(index)
    }

    /// Returns `index` to the free set. A double-free is logged and
    /// otherwise ignored rather than corrupting the free set.
    pub fn free(&mut self, index: u64) {
        if !self.free.insert(index) {
            warn!("double-free of block {index} ignored");
        }
    }

    /// Marks `indices` as not free, used at container creation to reserve
    /// block 0 and the initial metadata head.
    pub fn reserve(&mut self, indices: impl IntoIterator<Item = u64>) {
        for i in indices {
            self.free.remove(&i);
        }
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn free_blocks(&self) -> Vec<u64> {
        self.free.iter().copied().collect()
    }
}
