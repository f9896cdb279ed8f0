//! Recursive source delegating to a parent pool

use std::sync::{Arc, Mutex};

use super::{Chunk, MemorySource};
use crate::pool::BufferAllocator;

/// Source whose acquire/release delegate to a parent [`BufferAllocator`].
///
/// A pool constructed over a `RecurseSource` draws its roots from the parent
/// pool's free list instead of the OS, so nested allocators (for example a
/// per-graph pool inside a per-session pool) stack without double-owning
/// memory. The parent must outlive the child.
pub struct RecurseSource {
    parent: Arc<Mutex<BufferAllocator>>,
}

impl RecurseSource {
    pub fn new(parent: Arc<Mutex<BufferAllocator>>) -> Self {
        RecurseSource { parent }
    }
}

impl MemorySource for RecurseSource {
    fn alloc(&mut self, size: usize) -> Option<Chunk> {
        let mut parent = match self.parent.lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::error!("parent pool mutex poisoned, refusing allocation");
                return None;
            }
        };
        parent.alloc(size, false).ok()
    }

    fn release(&mut self, chunk: Chunk) {
        match self.parent.lock() {
            Ok(mut parent) => {
                if let Err(e) = parent.free(chunk) {
                    tracing::warn!(
                        "parent pool refused returned chunk base=0x{:x} size={}: {}",
                        chunk.base,
                        chunk.size,
                        e
                    );
                }
            }
            Err(_) => tracing::error!("parent pool mutex poisoned, chunk leaked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{shared, HostSource};

    #[test]
    fn test_child_roots_come_from_parent() {
        let parent = Arc::new(Mutex::new(BufferAllocator::new(shared(HostSource::new(
            64,
        )))));
        let child_source = shared(RecurseSource::new(Arc::clone(&parent)));
        let mut child = BufferAllocator::new(child_source);

        let chunk = child.alloc(1024, false).unwrap();
        {
            let parent = parent.lock().unwrap();
            assert_eq!(parent.used_size(), 1024);
            assert_eq!(parent.total_size(), 1024);
        }

        child.free(chunk).unwrap();
        // The child pools the range; the parent still counts it as in use.
        assert_eq!(parent.lock().unwrap().used_size(), 1024);

        child.release(true).unwrap();
        assert_eq!(parent.lock().unwrap().used_size(), 0);
    }
}
