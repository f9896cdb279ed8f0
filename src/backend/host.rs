//! Host backend: buffer pools wired to the adapter contract
//!
//! One static pool plus three parallel dynamic pools (one per
//! [`BufferType`]) over aligned host sources. The copy path moves bytes
//! between bound tensors directly when they live on the same backend and
//! through a lazily grown host bounce buffer when they do not.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::backend::{
    Backend, BackendError, BackendResult, BufferType, Runtime, RuntimeCreator, StorageType,
    HYBRID_THRESHOLD,
};
use crate::plan::PlacementPlan;
use crate::pool::{BufferAllocator, PoolError, RepackedTensor};
use crate::source::{shared, Chunk, HostSource};
use crate::tensor::{BindingKind, DeviceBinding, TensorDesc};

static NEXT_DEVICE_ID: AtomicUsize = AtomicUsize::new(0);

fn host_pool(name: &str) -> BufferAllocator {
    let mut pool = BufferAllocator::new(shared(HostSource::new(BufferAllocator::ALIGN_DEFAULT)));
    pool.set_name(name);
    pool
}

/// Backend over host memory.
pub struct HostBackend {
    device_id: usize,
    static_pool: BufferAllocator,
    dynamic_pools: [BufferAllocator; 3],
    current: BufferType,
    hybrid_threshold: usize,
    /// `(capacity, buffer)`: grown on demand, never shrunk
    bounce: (usize, Option<Vec<u8>>),
}

impl HostBackend {
    pub fn new() -> Self {
        HostBackend {
            device_id: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed),
            static_pool: host_pool("static"),
            dynamic_pools: [
                host_pool("dynamic:other"),
                host_pool("dynamic:output"),
                host_pool("dynamic:resize"),
            ],
            current: BufferType::DynamicOther,
            hybrid_threshold: HYBRID_THRESHOLD,
            bounce: (0, None),
        }
    }

    /// Override the hybrid threshold (default 4 MiB).
    pub fn with_hybrid_threshold(mut self, threshold: usize) -> Self {
        self.hybrid_threshold = threshold;
        self
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    /// Total bytes the pools currently hold from their sources
    pub fn total_size(&self) -> usize {
        self.static_pool.total_size()
            + self
                .dynamic_pools
                .iter()
                .map(BufferAllocator::total_size)
                .sum::<usize>()
    }

    fn current_pool_mut(&mut self) -> &mut BufferAllocator {
        &mut self.dynamic_pools[self.current.index()]
    }

    fn armed_pool_mut(&mut self) -> BackendResult<&mut BufferAllocator> {
        let index = self
            .dynamic_pools
            .iter()
            .position(BufferAllocator::has_heuristic_strategy)
            .ok_or_else(|| {
                BackendError::Pool(PoolError::ContractViolation(
                    "no heuristic strategy armed on any dynamic pool".to_string(),
                ))
            })?;
        Ok(&mut self.dynamic_pools[index])
    }

    fn bind(&self, tensor: &mut TensorDesc, chunk: Chunk, kind: BindingKind) {
        if tensor.binding.is_some() {
            tracing::warn!("tensor '{}' re-bound without release", tensor.name);
        }
        tensor.binding = Some(DeviceBinding {
            device: self.device_id,
            base: chunk.base,
            offset: 0,
            size: chunk.size,
            kind,
        });
    }

    fn bounce_buffer(&mut self, len: usize) -> &mut [u8] {
        if self.bounce.0 < len || self.bounce.1.is_none() {
            let capacity = self.bounce.0.max(len);
            self.bounce = (capacity, Some(vec![0u8; capacity]));
        }
        match self.bounce.1.as_mut() {
            Some(buffer) => buffer,
            // The arm above always fills the buffer in
            None => unreachable!(),
        }
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for HostBackend {
    fn on_acquire_buffer(
        &mut self,
        tensor: &mut TensorDesc,
        storage: StorageType,
    ) -> BackendResult<()> {
        let size = tensor.byte_size();
        match storage {
            StorageType::Static => {
                let chunk = self.static_pool.alloc(size, false)?;
                self.bind(tensor, chunk, BindingKind::Static);
            }
            StorageType::DynamicSeparate => {
                let buffer_type = self.current;
                let chunk = self.current_pool_mut().alloc(size, true)?;
                self.bind(tensor, chunk, BindingKind::Pooled(buffer_type));
            }
            StorageType::Dynamic => {
                let buffer_type = self.current;
                let device = self.device_id;
                let threshold = self.hybrid_threshold;
                let pool = self.current_pool_mut();
                if pool.has_heuristic_strategy() {
                    match pool.alloc_heuristically(&tensor.name, size) {
                        Ok(chunk) => {
                            let base = pool.heuristic_base().unwrap_or(chunk.base);
                            let offset = chunk.base - base;
                            if tensor.binding.is_some() {
                                tracing::warn!(
                                    "tensor '{}' re-bound without release",
                                    tensor.name
                                );
                            }
                            tensor.binding = Some(DeviceBinding {
                                device,
                                base,
                                offset,
                                size: chunk.size,
                                kind: BindingKind::Heuristic(buffer_type),
                            });
                            return Ok(());
                        }
                        // The plan is a hint; uncovered tensors fall through
                        // to the general pool.
                        Err(PoolError::PlanMiss { .. }) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                let separate = buffer_type == BufferType::DynamicOutput && size >= threshold;
                let chunk = pool.alloc(size, separate)?;
                self.bind(tensor, chunk, BindingKind::Pooled(buffer_type));
            }
        }
        Ok(())
    }

    fn on_release_buffer(
        &mut self,
        tensor: &mut TensorDesc,
        storage: StorageType,
    ) -> BackendResult<()> {
        let binding = tensor
            .binding
            .clone()
            .ok_or_else(|| BackendError::NotBound(tensor.name.clone()))?;
        if binding.device != self.device_id {
            return Err(BackendError::ForeignTensor(tensor.name.clone()));
        }
        match storage {
            // One-shot and separate buffers stay put until clear/teardown.
            StorageType::Static | StorageType::DynamicSeparate => Ok(()),
            StorageType::Dynamic => match binding.kind {
                BindingKind::Static => Ok(()),
                BindingKind::Pooled(buffer_type) => {
                    let chunk = Chunk::new(binding.base, binding.size);
                    self.dynamic_pools[buffer_type.index()].free(chunk)?;
                    tensor.binding = None;
                    Ok(())
                }
                BindingKind::Heuristic(buffer_type) => {
                    let chunk = Chunk::new(binding.base + binding.offset, binding.size);
                    let name = tensor.name.clone();
                    self.dynamic_pools[buffer_type.index()]
                        .free_heuristically(&name, chunk)?;
                    tensor.binding = None;
                    Ok(())
                }
            },
        }
    }

    fn on_clear_buffer(&mut self) -> BackendResult<()> {
        for pool in self.dynamic_pools.iter_mut() {
            pool.release(true)?;
        }
        Ok(())
    }

    fn on_copy_buffer(&mut self, src: &TensorDesc, dst: &mut TensorDesc) -> BackendResult<()> {
        let len = src.byte_size();
        if len != dst.byte_size() {
            return Err(BackendError::SizeMismatch {
                src: len,
                dst: dst.byte_size(),
            });
        }

        match (&src.binding, &dst.binding) {
            // host -> device
            (None, Some(dst_binding)) => {
                let staged = src
                    .host
                    .as_ref()
                    .ok_or_else(|| BackendError::NoHostData(src.name.clone()))?;
                if staged.len() < len {
                    return Err(BackendError::SizeMismatch {
                        src: staged.len(),
                        dst: len,
                    });
                }
                // SAFETY: the binding addresses `size >= len` bytes inside a
                // live chunk owned by one of the pools.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        staged.as_ptr(),
                        dst_binding.address() as *mut u8,
                        len,
                    );
                }
            }
            // device -> host
            (Some(src_binding), None) => {
                let mut staged = vec![0u8; len];
                // SAFETY: as above, the bound range covers `len` bytes.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        src_binding.address() as *const u8,
                        staged.as_mut_ptr(),
                        len,
                    );
                }
                dst.host = Some(staged);
            }
            // device -> device, same backend
            (Some(src_binding), Some(dst_binding))
                if src_binding.device == dst_binding.device =>
            {
                // SAFETY: both ranges are live; they may overlap inside one
                // heuristic arena, so this is a memmove.
                unsafe {
                    std::ptr::copy(
                        src_binding.address() as *const u8,
                        dst_binding.address() as *mut u8,
                        len,
                    );
                }
            }
            // device -> device, different backends: bounce through the host
            (Some(src_binding), Some(dst_binding)) => {
                let src_addr = src_binding.address();
                let dst_addr = dst_binding.address();
                let bounce = self.bounce_buffer(len);
                // SAFETY: both bound ranges are live and distinct from the
                // freshly sized bounce buffer.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        src_addr as *const u8,
                        bounce.as_mut_ptr(),
                        len,
                    );
                    std::ptr::copy_nonoverlapping(
                        bounce.as_ptr(),
                        dst_addr as *mut u8,
                        len,
                    );
                }
            }
            // host -> host
            (None, None) => {
                let staged = src
                    .host
                    .as_ref()
                    .ok_or_else(|| BackendError::NoHostData(src.name.clone()))?;
                if staged.len() < len {
                    return Err(BackendError::SizeMismatch {
                        src: staged.len(),
                        dst: len,
                    });
                }
                dst.host = Some(staged[..len].to_vec());
            }
        }
        Ok(())
    }

    fn change_buffer_type(&mut self, buffer_type: BufferType) {
        self.current = buffer_type;
    }

    fn set_heuristic_strategy(
        &mut self,
        plan: &PlacementPlan,
        model: &str,
        batch: usize,
        budget: usize,
        align_bottom: bool,
        need_alloc: bool,
    ) -> BackendResult<()> {
        self.current_pool_mut()
            .set_heuristic_strategy(plan, model, batch, budget, align_bottom, need_alloc)?;
        Ok(())
    }

    fn move_tensors_to_bottom(
        &mut self,
        tensors: &[TensorDesc],
        new_budget: usize,
    ) -> BackendResult<Vec<RepackedTensor>> {
        Ok(self.armed_pool_mut()?.move_tensors_to_bottom(tensors, new_budget)?)
    }

    fn adapt_tensors_to_new_address(&mut self, tensors: &mut [TensorDesc]) -> BackendResult<()> {
        Ok(self.armed_pool_mut()?.adapt_tensors_to_new_address(tensors)?)
    }

    fn used_size(&self) -> usize {
        self.static_pool.used_size()
            + self
                .dynamic_pools
                .iter()
                .map(BufferAllocator::used_size)
                .sum::<usize>()
    }
}

/// Runtime over host backends. The cache holds the placement plan blob.
#[derive(Debug, Default)]
pub struct HostRuntime {
    plan: PlacementPlan,
}

impl HostRuntime {
    pub fn new() -> Self {
        HostRuntime {
            plan: PlacementPlan::new(),
        }
    }

    pub fn plan(&self) -> &PlacementPlan {
        &self.plan
    }

    pub fn set_plan(&mut self, plan: PlacementPlan) {
        self.plan = plan;
    }
}

impl Runtime for HostRuntime {
    fn on_create(&self) -> Box<dyn Backend> {
        Box::new(HostBackend::new())
    }

    fn on_garbage_collect(&mut self, level: i32) {
        if level > 50 {
            self.plan = PlacementPlan::new();
        }
    }

    fn on_set_cache(&mut self, blob: &[u8]) -> bool {
        match PlacementPlan::from_bytes(blob) {
            Ok(plan) => {
                self.plan = plan;
                true
            }
            Err(e) => {
                tracing::warn!("cache blob rejected: {}", e);
                false
            }
        }
    }

    fn on_get_cache(&self) -> Option<Vec<u8>> {
        if self.plan.is_empty() {
            return None;
        }
        self.plan.to_bytes().ok()
    }
}

pub struct HostRuntimeCreator;

impl RuntimeCreator for HostRuntimeCreator {
    fn on_create(&self) -> Box<dyn Runtime> {
        Box::new(HostRuntime::new())
    }
}
