//! Plan-guided arena placement and shrink-with-adapt
//!
//! When a placement plan is armed, tensors named by the plan are carved out
//! of one arena at precomputed offsets instead of going through the general
//! free list. Shrinking the arena mid-execution is a two-phase protocol:
//! `move_tensors_to_bottom` computes a compact re-packing (and blocks
//! interleaved heuristic traffic), the caller copies the data, and
//! `adapt_tensors_to_new_address` publishes the new bindings.

use std::collections::HashMap;

use crate::pool::{align_up, PoolError, PoolResult};
use crate::source::{Chunk, SharedSource};
use crate::tensor::TensorDesc;

/// One live tensor's move in a shrink re-packing, in ascending order of the
/// old offset. The caller uses this to copy tensor data before adapting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepackedTensor {
    pub name: String,
    pub old_offset: usize,
    pub new_offset: usize,
    pub size: usize,
}

#[derive(Debug)]
struct PendingShrink {
    budget: usize,
    /// tensor -> (edge-relative plan offset, actual byte offset from base)
    offsets: HashMap<String, (usize, usize)>,
    order: Vec<String>,
    watermark: usize,
}

/// Heuristic placement state owned by one `BufferAllocator`.
#[derive(Debug)]
pub(crate) struct HeuristicPlacement {
    align: usize,
    /// Planned offset per tensor, measured from the packing edge
    offsets: HashMap<String, usize>,
    /// Actually allocated size per live tensor
    allocated: HashMap<String, usize>,
    arena: Option<Chunk>,
    budget: usize,
    /// Pack against the high end of the arena instead of the low end
    align_bottom: bool,
    pending: Option<PendingShrink>,
    repack_order: Vec<String>,
    shrink_watermark: usize,
}

impl HeuristicPlacement {
    pub fn new(
        align: usize,
        offsets: HashMap<String, usize>,
        budget: usize,
        align_bottom: bool,
    ) -> Self {
        HeuristicPlacement {
            align,
            offsets,
            allocated: HashMap::new(),
            arena: None,
            budget,
            align_bottom,
            pending: None,
            repack_order: Vec::new(),
            shrink_watermark: 0,
        }
    }

    pub fn arena_base(&self) -> Option<usize> {
        self.arena.map(|chunk| chunk.base)
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn adapting(&self) -> bool {
        self.pending.is_some()
    }

    pub fn ensure_arena(&mut self, source: &SharedSource) -> PoolResult<Chunk> {
        if let Some(arena) = self.arena {
            return Ok(arena);
        }
        let arena = source
            .lock()?
            .alloc(self.budget)
            .ok_or(PoolError::OutOfMemory { size: self.budget })?;
        tracing::debug!(
            "heuristic arena of {} bytes obtained at 0x{:x}",
            arena.size,
            arena.base
        );
        self.arena = Some(arena);
        Ok(arena)
    }

    /// Byte offset from the arena base for a planned tensor of `size` bytes
    /// at edge-relative offset `edge`.
    fn actual_offset(&self, edge: usize, size: usize, budget: usize) -> usize {
        if self.align_bottom {
            budget - edge - size
        } else {
            edge
        }
    }

    pub fn alloc(&mut self, source: &SharedSource, id: &str, size: usize) -> PoolResult<Chunk> {
        if self.adapting() {
            return Err(PoolError::ContractViolation(
                "heuristic allocation while a shrink is pending".to_string(),
            ));
        }
        let edge = *self
            .offsets
            .get(id)
            .ok_or_else(|| PoolError::PlanMiss { id: id.to_string() })?;
        let end = edge
            .checked_add(size)
            .ok_or(PoolError::BudgetExceeded {
                needed: usize::MAX,
                budget: self.budget,
            })?;
        if end > self.budget {
            return Err(PoolError::BudgetExceeded {
                needed: end,
                budget: self.budget,
            });
        }
        let arena = self.ensure_arena(source)?;
        let offset = self.actual_offset(edge, size, self.budget);
        self.allocated.insert(id.to_string(), size);
        tracing::trace!("heuristic placement '{}': {} bytes at offset {}", id, size, offset);
        Ok(Chunk::new(arena.base + offset, size))
    }

    pub fn free(&mut self, id: &str, chunk: Chunk) -> PoolResult<()> {
        if self.adapting() {
            return Err(PoolError::ContractViolation(
                "heuristic release while a shrink is pending".to_string(),
            ));
        }
        match self.allocated.remove(id) {
            Some(_) => Ok(()),
            None => Err(PoolError::UnknownRange {
                base: chunk.base,
                size: chunk.size,
            }),
        }
    }

    /// Phase one of shrink-with-adapt: compute the compact re-packing.
    ///
    /// All-or-nothing: on `BudgetExceeded` no binding, plan entry, or budget
    /// has been touched.
    pub fn move_tensors_to_bottom(
        &mut self,
        tensors: &[TensorDesc],
        new_budget: usize,
    ) -> PoolResult<Vec<RepackedTensor>> {
        if self.adapting() {
            return Err(PoolError::ContractViolation(
                "shrink already pending".to_string(),
            ));
        }
        if new_budget == 0 || new_budget > self.budget {
            return Err(PoolError::ContractViolation(format!(
                "shrink target {} is not below the current budget {}",
                new_budget, self.budget
            )));
        }

        let mut live = Vec::with_capacity(tensors.len());
        for tensor in tensors {
            let binding = tensor.binding.as_ref().ok_or_else(|| {
                PoolError::ContractViolation(format!(
                    "tensor '{}' has no binding to re-pack",
                    tensor.name
                ))
            })?;
            live.push((tensor.name.clone(), binding.offset, binding.size));
        }
        live.sort_by_key(|&(_, offset, _)| offset);

        let mut repacked = Vec::with_capacity(live.len());
        let mut offsets = HashMap::with_capacity(live.len());
        let mut order = Vec::with_capacity(live.len());
        let mut cursor = 0usize;
        for (name, old_offset, size) in live {
            let edge = align_up(cursor, self.align);
            let end = edge + size;
            if end > new_budget {
                return Err(PoolError::BudgetExceeded {
                    needed: end,
                    budget: new_budget,
                });
            }
            let new_offset = self.actual_offset(edge, size, new_budget);
            repacked.push(RepackedTensor {
                name: name.clone(),
                old_offset,
                new_offset,
                size,
            });
            offsets.insert(name.clone(), (edge, new_offset));
            order.push(name);
            cursor = end;
        }

        tracing::debug!(
            "shrink to {} bytes re-packs {} tensors, watermark {}",
            new_budget,
            repacked.len(),
            cursor
        );
        self.pending = Some(PendingShrink {
            budget: new_budget,
            offsets,
            order,
            watermark: cursor,
        });
        Ok(repacked)
    }

    /// Phase two: publish the pending bindings onto the tensors and the plan.
    pub fn adapt_tensors_to_new_address(
        &mut self,
        tensors: &mut [TensorDesc],
    ) -> PoolResult<()> {
        let pending = self.pending.take().ok_or_else(|| {
            PoolError::ContractViolation("no shrink pending to adapt to".to_string())
        })?;

        for tensor in tensors.iter_mut() {
            if let Some(&(_, new_offset)) = pending.offsets.get(&tensor.name) {
                match tensor.binding.as_mut() {
                    Some(binding) => binding.offset = new_offset,
                    None => tracing::warn!(
                        "tensor '{}' lost its binding between shrink and adapt",
                        tensor.name
                    ),
                }
            }
        }
        for (name, (edge, _)) in &pending.offsets {
            self.offsets.insert(name.clone(), *edge);
        }
        self.budget = pending.budget;
        self.shrink_watermark = pending.watermark;
        self.repack_order = pending.order;
        Ok(())
    }

    /// Tear down the arena; the plan itself survives so the placement can be
    /// re-armed lazily.
    pub fn release_arena(&mut self, source: &SharedSource) {
        if let Some(arena) = self.arena.take() {
            if let Ok(mut source) = source.lock() {
                source.release(arena);
            }
        }
        self.allocated.clear();
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{shared, HostSource};
    use crate::tensor::{BindingKind, DeviceBinding, DType};
    use crate::backend::BufferType;

    fn plan_of(entries: &[(&str, usize)]) -> HashMap<String, usize> {
        entries
            .iter()
            .map(|&(name, offset)| (name.to_string(), offset))
            .collect()
    }

    fn bound_tensor(name: &str, base: usize, offset: usize, size: usize) -> TensorDesc {
        let mut tensor = TensorDesc::new(name, vec![size / 4], DType::F32);
        tensor.binding = Some(DeviceBinding {
            device: 0,
            base,
            offset,
            size,
            kind: BindingKind::Heuristic(BufferType::DynamicOther),
        });
        tensor
    }

    #[test]
    fn test_planned_addresses() {
        let source = shared(HostSource::new(64));
        let mut placement = HeuristicPlacement::new(
            64,
            plan_of(&[("x", 0), ("y", 1024), ("z", 2048)]),
            4096,
            false,
        );

        let x = placement.alloc(&source, "x", 1024).unwrap();
        let y = placement.alloc(&source, "y", 1024).unwrap();
        let z = placement.alloc(&source, "z", 1024).unwrap();
        let base = placement.arena_base().unwrap();
        assert_eq!(x.base, base);
        assert_eq!(y.base, base + 1024);
        assert_eq!(z.base, base + 2048);

        // Plan fidelity: a repeated allocation lands on the same address.
        let y_again = placement.alloc(&source, "y", 1024).unwrap();
        assert_eq!(y_again, y);
    }

    #[test]
    fn test_plan_miss() {
        let source = shared(HostSource::new(64));
        let mut placement = HeuristicPlacement::new(64, plan_of(&[("x", 0)]), 4096, false);
        let err = placement.alloc(&source, "missing", 64).unwrap_err();
        assert!(matches!(err, PoolError::PlanMiss { .. }));
    }

    #[test]
    fn test_entry_beyond_budget_rejected() {
        let source = shared(HostSource::new(64));
        let mut placement = HeuristicPlacement::new(64, plan_of(&[("x", 3584)]), 4096, false);
        let err = placement.alloc(&source, "x", 1024).unwrap_err();
        assert!(matches!(err, PoolError::BudgetExceeded { .. }));
    }

    #[test]
    fn test_align_bottom_mirrors_offsets() {
        let source = shared(HostSource::new(64));
        let mut placement =
            HeuristicPlacement::new(64, plan_of(&[("x", 0), ("y", 1024)]), 4096, true);

        let x = placement.alloc(&source, "x", 1024).unwrap();
        let y = placement.alloc(&source, "y", 1024).unwrap();
        let base = placement.arena_base().unwrap();
        // Packed against the high end of the arena.
        assert_eq!(x.base, base + 4096 - 1024);
        assert_eq!(y.base, base + 4096 - 2048);
    }

    #[test]
    fn test_free_unknown_id() {
        let source = shared(HostSource::new(64));
        let mut placement = HeuristicPlacement::new(64, plan_of(&[("x", 0)]), 4096, false);
        let chunk = placement.alloc(&source, "x", 64).unwrap();
        placement.free("x", chunk).unwrap();
        let err = placement.free("x", chunk).unwrap_err();
        assert!(matches!(err, PoolError::UnknownRange { .. }));
        placement.release_arena(&source);
    }

    #[test]
    fn test_shrink_repacks_in_offset_order() {
        let source = shared(HostSource::new(64));
        let mut placement = HeuristicPlacement::new(
            64,
            plan_of(&[("x", 0), ("y", 1024), ("z", 2048)]),
            4096,
            false,
        );
        let _ = placement.alloc(&source, "x", 1024).unwrap();
        let _ = placement.alloc(&source, "y", 1024).unwrap();
        let _ = placement.alloc(&source, "z", 1024).unwrap();
        let base = placement.arena_base().unwrap();

        let mut tensors = vec![
            bound_tensor("z", base, 2048, 1024),
            bound_tensor("x", base, 0, 1024),
            bound_tensor("y", base, 1024, 1024),
        ];
        let repacked = placement.move_tensors_to_bottom(&tensors, 3072).unwrap();
        assert_eq!(repacked.len(), 3);
        assert_eq!(repacked[0].name, "x");
        assert_eq!(repacked[0].new_offset, 0);
        assert_eq!(repacked[1].name, "y");
        assert_eq!(repacked[1].new_offset, 1024);
        assert_eq!(repacked[2].name, "z");
        assert_eq!(repacked[2].new_offset, 2048);

        // Heuristic traffic is blocked until the adapt lands.
        let err = placement.alloc(&source, "x", 1024).unwrap_err();
        assert!(matches!(err, PoolError::ContractViolation(_)));

        placement.adapt_tensors_to_new_address(&mut tensors).unwrap();
        assert_eq!(placement.budget(), 3072);
        for tensor in &tensors {
            let binding = tensor.binding.as_ref().unwrap();
            assert!(binding.offset + binding.size <= 3072);
        }
    }

    #[test]
    fn test_shrink_over_budget_is_all_or_nothing() {
        let source = shared(HostSource::new(64));
        let mut placement =
            HeuristicPlacement::new(64, plan_of(&[("x", 0), ("y", 1024), ("z", 2048)]), 4096, false);
        let _ = placement.alloc(&source, "x", 1024).unwrap();
        let _ = placement.alloc(&source, "y", 1024).unwrap();
        let _ = placement.alloc(&source, "z", 1024).unwrap();
        let base = placement.arena_base().unwrap();

        let tensors = vec![
            bound_tensor("x", base, 0, 1024),
            bound_tensor("y", base, 1024, 1024),
            bound_tensor("z", base, 2048, 1024),
        ];
        let err = placement.move_tensors_to_bottom(&tensors, 2048).unwrap_err();
        assert!(matches!(
            err,
            PoolError::BudgetExceeded { needed: 3072, budget: 2048 }
        ));
        assert!(!placement.adapting());
        assert_eq!(placement.budget(), 4096);
        // Bindings were never touched.
        for (tensor, expected) in tensors.iter().zip([0usize, 1024, 2048]) {
            assert_eq!(tensor.binding.as_ref().unwrap().offset, expected);
        }
    }

    #[test]
    fn test_adapt_without_shrink_rejected() {
        let mut placement = HeuristicPlacement::new(64, plan_of(&[]), 4096, false);
        let err = placement.adapt_tensors_to_new_address(&mut []).unwrap_err();
        assert!(matches!(err, PoolError::ContractViolation(_)));
    }
}
