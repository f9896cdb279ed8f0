//! Underlying memory sources
//!
//! Everything above this module works in opaque `(base, size)` pairs; a
//! [`MemorySource`] is the only component that touches real memory. Two
//! factory modes mirror the two deployment shapes: [`HostSource`] backed by
//! aligned heap allocation, and [`RecurseSource`] whose acquire/release
//! delegate to a parent pool so nested allocators appear as clients of an
//! outer one.

use std::sync::{Arc, Mutex};

mod host;
mod recurse;

pub use host::HostSource;
pub use recurse::RecurseSource;

/// A contiguous byte extent handed out by a source.
///
/// `base` is an opaque address token; the pool never dereferences it, so the
/// same machinery serves host memory, device buffers, or image handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Chunk {
    pub base: usize,
    pub size: usize,
}

impl Chunk {
    pub fn new(base: usize, size: usize) -> Self {
        Chunk { base, size }
    }

    /// One-past-the-end address of the extent
    pub fn end(&self) -> usize {
        self.base + self.size
    }
}

/// Minimal two-operation contract over raw memory.
///
/// `alloc` may grant more than requested; `None` means the source is out of
/// memory and the pool surfaces that to the caller. `release` takes back a
/// chunk previously granted by the same source.
pub trait MemorySource: Send {
    fn alloc(&mut self, size: usize) -> Option<Chunk>;
    fn release(&mut self, chunk: Chunk);
}

/// Sources are shared behind a mutex so that source-level calls made from
/// concurrent groups during a barrier region are serialized explicitly.
pub type SharedSource = Arc<Mutex<dyn MemorySource>>;

/// Wrap a concrete source for use by one or more pools.
pub fn shared<S: MemorySource + 'static>(source: S) -> SharedSource {
    Arc::new(Mutex::new(source))
}
