use std::collections::HashSet;
use std::sync::Mutex;

use domain::common::error::DatapathError;

/// Attempts before giving up on finding an unused id. The id space is
/// 16 bits and a host runs a handful of bridges, so collisions beyond
/// a few draws indicate a broken random source.
const MAX_ALLOCATION_ATTEMPTS: usize = 128;

/// Allocator for OpenFlow controller ids.
///
/// Every bridge session gets a fresh random 16-bit id, redrawn until
/// unique within the process.
#[derive(Debug, Default)]
pub struct ControllerIdAllocator {
    allocated: Mutex<HashSet<u16>>,
}

impl ControllerIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> Result<u16, DatapathError> {
        let mut allocated = self
            .allocated
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let id: u16 = rand::random();
            if allocated.insert(id) {
                return Ok(id);
            }
        }

        Err(DatapathError::ControllerIdsExhausted {
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }

    /// Release an id, e.g. when session construction fails after
    /// allocation.
    pub fn release(&self, id: u16) {
        self.allocated
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&id);
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_ids_are_unique() {
        let alloc = ControllerIdAllocator::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..256 {
            let id = alloc.allocate().unwrap();
            assert!(seen.insert(id), "duplicate controller id {id}");
        }
        assert_eq!(alloc.allocated_count(), 256);
    }

    #[test]
    fn release_makes_id_reusable() {
        let alloc = ControllerIdAllocator::new();
        let id = alloc.allocate().unwrap();
        alloc.release(id);
        assert_eq!(alloc.allocated_count(), 0);
    }
}
