//! The buffer pool allocation engine

use std::collections::HashMap;

use crate::plan::PlacementPlan;
use crate::pool::heuristic::HeuristicPlacement;
use crate::pool::node::{insert_free, migrate, take_free, FreeList, Node, NodeId, NodeStore};
use crate::pool::{align_up, PoolError, PoolResult, RepackedTensor};
use crate::source::{Chunk, SharedSource};
use crate::tensor::TensorDesc;

/// Memory-reusing pool over a [`crate::source::MemorySource`].
///
/// Serves aligned requests by best-fit over a size-indexed free list with
/// optional splitting, returns ranges with optional coalescing, and scopes
/// reuse into per-group free lists under the barrier protocol. One pool
/// instance owns its free list, used list, and node store exclusively;
/// callers serialize access (a mutex around the pool) when groups run on
/// separate threads.
pub struct BufferAllocator {
    source: SharedSource,
    align: usize,
    store: NodeStore,
    free_list: FreeList,
    used_list: HashMap<Chunk, NodeId>,
    groups: Vec<FreeList>,
    in_barrier: bool,
    total_size: usize,
    used_size: usize,
    name: String,
    heuristic: Option<HeuristicPlacement>,
}

impl BufferAllocator {
    /// Default pointer alignment, a power of two
    pub const ALIGN_DEFAULT: usize = 64;

    /// Create a pool with the default alignment.
    pub fn new(source: SharedSource) -> Self {
        match Self::with_align(source, Self::ALIGN_DEFAULT) {
            Ok(pool) => pool,
            // ALIGN_DEFAULT is a power of two, with_align cannot refuse it
            Err(_) => unreachable!(),
        }
    }

    /// Create a pool with an explicit power-of-two alignment.
    pub fn with_align(source: SharedSource, align: usize) -> PoolResult<Self> {
        if !align.is_power_of_two() {
            return Err(PoolError::InvalidAlignment(align));
        }
        Ok(BufferAllocator {
            source,
            align,
            store: NodeStore::default(),
            free_list: FreeList::default(),
            used_list: HashMap::new(),
            groups: Vec::new(),
            in_barrier: false,
            total_size: 0,
            used_size: 0,
            name: "pool".to_string(),
            heuristic: None,
        })
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn align(&self) -> usize {
        self.align
    }

    /// Total bytes obtained from the source and still held by the pool
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Bytes currently handed out to callers
    pub fn used_size(&self) -> usize {
        self.used_size
    }

    /// Number of distinct ranges on the main free list
    pub fn free_range_count(&self) -> usize {
        self.free_list.len()
    }

    /// Sizes of the ranges on the main free list, ascending
    pub fn free_range_sizes(&self) -> Vec<usize> {
        self.free_list
            .entries()
            .into_iter()
            .map(|(size, _)| size)
            .collect()
    }

    fn check_barrier_discipline(&self) -> PoolResult<()> {
        if self.in_barrier && self.groups.is_empty() {
            return Err(PoolError::ContractViolation(
                "pool operation inside a barrier but outside any group".to_string(),
            ));
        }
        Ok(())
    }

    /// Allocate an aligned chunk. With `separate`, the free list is skipped
    /// entirely and a fresh root is obtained from the source.
    pub fn alloc(&mut self, size: usize, separate: bool) -> PoolResult<Chunk> {
        if size == 0 {
            return Err(PoolError::ContractViolation(
                "zero-size allocation requested".to_string(),
            ));
        }
        self.check_barrier_discipline()?;
        let size = align_up(size, self.align);

        if !separate {
            // Group-scoped reuse first (taken whole), then the main list
            // (split permitted).
            if let Some(group) = self.groups.last_mut() {
                if let Some(id) = take_free(&mut self.store, group, size, false, self.align) {
                    return Ok(self.hand_out(id));
                }
            }
            if let Some(id) = take_free(&mut self.store, &mut self.free_list, size, true, self.align)
            {
                return Ok(self.hand_out(id));
            }
        }

        let granted = self
            .source
            .lock()?
            .alloc(size)
            .ok_or(PoolError::OutOfMemory { size })?;
        let id = self.store.insert(Node::root(granted));
        self.total_size += granted.size;
        tracing::trace!(
            "{}: fresh root of {} bytes at 0x{:x} (total {})",
            self.name,
            granted.size,
            granted.base,
            self.total_size
        );
        Ok(self.hand_out(id))
    }

    fn hand_out(&mut self, id: NodeId) -> Chunk {
        let chunk = self.store.get(id).chunk;
        self.used_list.insert(chunk, id);
        self.used_size += chunk.size;
        chunk
    }

    /// Return a chunk to the pool. The `(base, size)` pair must match a
    /// previous `alloc` exactly.
    pub fn free(&mut self, chunk: Chunk) -> PoolResult<()> {
        self.check_barrier_discipline()?;
        let id = self
            .used_list
            .remove(&chunk)
            .ok_or(PoolError::UnknownRange {
                base: chunk.base,
                size: chunk.size,
            })?;
        self.used_size -= chunk.size;
        let list = match self.groups.last_mut() {
            Some(group) => group,
            None => &mut self.free_list,
        };
        insert_free(&mut self.store, list, id, true);
        Ok(())
    }

    /// Release memory back to the source. With `all`, every root (and the
    /// heuristic arena) goes back and all pool state is cleared; otherwise
    /// only fully merged roots sitting on the main free list are returned,
    /// leaving outstanding ranges intact.
    pub fn release(&mut self, all: bool) -> PoolResult<()> {
        if all {
            {
                let mut source = self.source.lock()?;
                for id in self.store.ids() {
                    let node = self.store.get(id);
                    if node.from_source {
                        source.release(node.chunk);
                    }
                }
            }
            if let Some(heuristic) = self.heuristic.as_mut() {
                heuristic.release_arena(&self.source);
            }
            self.store.clear();
            self.free_list.clear();
            self.groups.clear();
            self.used_list.clear();
            self.total_size = 0;
            self.used_size = 0;
            tracing::debug!("{}: released all", self.name);
        } else {
            let entries = self.free_list.entries();
            let mut source = self.source.lock()?;
            for (size, id) in entries {
                if self.store.get(id).parent.is_none() {
                    self.free_list.remove(size, id);
                    let node = self.store.remove(id);
                    source.release(node.chunk);
                    self.total_size -= size;
                }
            }
            tracing::debug!(
                "{}: trimmed free roots, {} bytes still accounted",
                self.name,
                self.total_size
            );
        }
        Ok(())
    }

    // ---- barrier and group protocol ---------------------------------------

    /// Enter a multi-thread region. Until `barrier_end`, every allocation
    /// and free must happen inside a `begin_group`/`end_group` bracket.
    pub fn barrier_begin(&mut self) -> PoolResult<()> {
        if self.in_barrier {
            return Err(PoolError::ContractViolation(
                "barrier already begun".to_string(),
            ));
        }
        self.in_barrier = true;
        Ok(())
    }

    pub fn barrier_end(&mut self) -> PoolResult<()> {
        if !self.in_barrier {
            return Err(PoolError::ContractViolation(
                "barrier end without begin".to_string(),
            ));
        }
        if !self.groups.is_empty() {
            return Err(PoolError::ContractViolation(
                "barrier end with open groups".to_string(),
            ));
        }
        self.in_barrier = false;
        Ok(())
    }

    /// Push a group-local free list; frees inside the group land on it and
    /// reuse consults it first.
    pub fn begin_group(&mut self) -> PoolResult<()> {
        if !self.in_barrier {
            return Err(PoolError::ContractViolation(
                "group opened outside a barrier".to_string(),
            ));
        }
        self.groups.push(FreeList::default());
        Ok(())
    }

    /// Pop the current group and merge its free list into the enclosing
    /// scope (outer group or the main list).
    pub fn end_group(&mut self) -> PoolResult<()> {
        let group = self.groups.pop().ok_or_else(|| {
            PoolError::ContractViolation("group ended without begin".to_string())
        })?;
        let target = match self.groups.last_mut() {
            Some(outer) => outer,
            None => &mut self.free_list,
        };
        migrate(&mut self.store, group, target);
        Ok(())
    }

    // ---- heuristic placement ----------------------------------------------

    /// Arm plan-guided placement for `(model, batch, budget)`. With
    /// `need_alloc` the arena is obtained from the source immediately,
    /// otherwise on first heuristic allocation.
    pub fn set_heuristic_strategy(
        &mut self,
        plan: &PlacementPlan,
        model: &str,
        batch: usize,
        budget: usize,
        align_bottom: bool,
        need_alloc: bool,
    ) -> PoolResult<()> {
        let entry = plan
            .find(model, batch, budget)
            .ok_or_else(|| PoolError::PlanMiss {
                id: format!("{}@{}/{}", model, batch, budget),
            })?;
        let offsets = entry
            .offsets
            .iter()
            .map(|(name, &offset)| (name.clone(), offset))
            .collect();
        let mut placement = HeuristicPlacement::new(self.align, offsets, budget, align_bottom);
        if need_alloc {
            placement.ensure_arena(&self.source)?;
        }
        tracing::debug!(
            "{}: heuristic strategy armed for model '{}' batch {} budget {}",
            self.name,
            model,
            batch,
            budget
        );
        self.heuristic = Some(placement);
        Ok(())
    }

    pub fn has_heuristic_strategy(&self) -> bool {
        self.heuristic.is_some()
    }

    /// Base address of the heuristic arena, once obtained
    pub fn heuristic_base(&self) -> Option<usize> {
        self.heuristic.as_ref().and_then(|h| h.arena_base())
    }

    pub fn heuristic_budget(&self) -> Option<usize> {
        self.heuristic.as_ref().map(|h| h.budget())
    }

    fn heuristic_mut(&mut self) -> PoolResult<&mut HeuristicPlacement> {
        self.heuristic.as_mut().ok_or_else(|| {
            PoolError::ContractViolation("no heuristic strategy armed".to_string())
        })
    }

    /// Serve a tensor from its planned offset inside the arena.
    pub fn alloc_heuristically(&mut self, id: &str, size: usize) -> PoolResult<Chunk> {
        let source = self.source.clone();
        self.heuristic_mut()?.alloc(&source, id, size)
    }

    /// Drop a tensor from the allocated-size map. The arena itself stays
    /// until `release`.
    pub fn free_heuristically(&mut self, id: &str, chunk: Chunk) -> PoolResult<()> {
        self.heuristic_mut()?.free(id, chunk)
    }

    /// Phase one of shrink-with-adapt; see
    /// [`RepackedTensor`] for what the caller receives.
    pub fn move_tensors_to_bottom(
        &mut self,
        tensors: &[TensorDesc],
        new_budget: usize,
    ) -> PoolResult<Vec<RepackedTensor>> {
        self.heuristic_mut()?.move_tensors_to_bottom(tensors, new_budget)
    }

    /// Phase two of shrink-with-adapt: publish the new bindings.
    pub fn adapt_tensors_to_new_address(
        &mut self,
        tensors: &mut [TensorDesc],
    ) -> PoolResult<()> {
        self.heuristic_mut()?.adapt_tensors_to_new_address(tensors)
    }
}

impl Drop for BufferAllocator {
    fn drop(&mut self) {
        if let Err(e) = self.release(true) {
            tracing::warn!("{}: release on drop failed: {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for BufferAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferAllocator")
            .field("name", &self.name)
            .field("align", &self.align)
            .field("total_size", &self.total_size)
            .field("used_size", &self.used_size)
            .field("free_ranges", &self.free_list.len())
            .field("groups", &self.groups.len())
            .finish()
    }
}
