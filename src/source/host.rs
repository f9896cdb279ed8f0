//! Host heap source with explicit alignment

use std::alloc::Layout;
use std::collections::HashMap;

use super::{Chunk, MemorySource};

/// Default source backed by aligned host allocation.
///
/// Grants exactly the requested size. An outstanding-chunk ledger keeps the
/// `Layout` of every live allocation so release can rebuild it and foreign
/// chunks are detected instead of corrupting the heap.
#[derive(Debug)]
pub struct HostSource {
    align: usize,
    outstanding: HashMap<usize, Layout>,
}

impl HostSource {
    /// Create a host source granting chunks aligned to `align` bytes.
    /// `align` must be a power of two.
    pub fn new(align: usize) -> Self {
        debug_assert!(align.is_power_of_two());
        HostSource {
            align,
            outstanding: HashMap::new(),
        }
    }

    /// Number of chunks currently granted and not yet released
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}

impl MemorySource for HostSource {
    fn alloc(&mut self, size: usize) -> Option<Chunk> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, self.align).ok()?;
        // SAFETY: layout has non-zero size, checked above.
        let ptr = unsafe { std::alloc::alloc(layout) };
        if ptr.is_null() {
            tracing::error!("host allocation of {} bytes refused", size);
            return None;
        }
        self.outstanding.insert(ptr as usize, layout);
        tracing::trace!("host source granted {} bytes at 0x{:x}", size, ptr as usize);
        Some(Chunk::new(ptr as usize, size))
    }

    fn release(&mut self, chunk: Chunk) {
        match self.outstanding.remove(&chunk.base) {
            Some(layout) => {
                // SAFETY: base came out of alloc() with this exact layout and
                // has not been released since (the ledger entry was live).
                unsafe { std::alloc::dealloc(chunk.base as *mut u8, layout) };
                tracing::trace!("host source released {} bytes at 0x{:x}", chunk.size, chunk.base);
            }
            None => {
                tracing::warn!(
                    "release of unknown chunk base=0x{:x} size={} ignored",
                    chunk.base,
                    chunk.size
                );
            }
        }
    }
}

impl Drop for HostSource {
    fn drop(&mut self) {
        for (base, layout) in self.outstanding.drain() {
            // SAFETY: every ledger entry is a live allocation made by this
            // source with the recorded layout.
            unsafe { std::alloc::dealloc(base as *mut u8, layout) };
        }
    }
}
