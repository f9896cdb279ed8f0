//! Backend adapter contracts
//!
//! The adapter is what tensors see: acquire/release/clear with three storage
//! disciplines, buffer-type routing between parallel dynamic pools, the
//! cross-device copy path, and the runtime layer with its cache interface.
//! Concrete backends plug in through a global creator registry, queried by
//! name.

use thiserror::Error;

use crate::plan::PlacementPlan;
use crate::pool::{PoolError, RepackedTensor};
use crate::tensor::TensorDesc;

mod host;
mod registry;

pub use host::{HostBackend, HostRuntime, HostRuntimeCreator};
pub use registry::{create_runtime, register_runtime};

/// Threshold of hybrid dynamic allocation, used only for ops' outputs.
/// Requests at or above it bypass reuse and go straight to the source.
pub const HYBRID_THRESHOLD: usize = 4 * 1024 * 1024;

/// Storage discipline of a tensor buffer. Each case carries its own
/// lifecycle rules; the adapter enforces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Never reused. Acquire allocates from the static pool; release does
    /// nothing before backend teardown.
    Static,
    /// Reusable. Acquire prefers the free list; release returns the range;
    /// clear releases every root.
    Dynamic,
    /// Not reusable within a graph, reclaimed together on clear. Acquire
    /// obtains a fresh range; release does nothing.
    DynamicSeparate,
}

/// Which of the parallel dynamic pools serves an acquisition, so outputs of
/// one pipeline stage do not evict transients of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferType {
    DynamicOther,
    DynamicOutput,
    DynamicResize,
}

impl BufferType {
    pub(crate) fn index(self) -> usize {
        match self {
            BufferType::DynamicOther => 0,
            BufferType::DynamicOutput => 1,
            BufferType::DynamicResize => 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("tensor '{0}' is not bound to a device buffer")]
    NotBound(String),

    #[error("tensor '{0}' has no host data staged")]
    NoHostData(String),

    #[error("copy size mismatch: src {src} bytes, dst {dst} bytes")]
    SizeMismatch { src: usize, dst: usize },

    #[error("tensor '{0}' is bound to another backend")]
    ForeignTensor(String),

    #[error("runtime not registered: {0}")]
    RuntimeNotFound(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Abstract backend: the buffer-pool mechanism behind tensor storage.
pub trait Backend {
    /// Compute the tensor's byte size, route to the matching pool per the
    /// storage discipline, and bind `(base, offset)` onto the tensor.
    fn on_acquire_buffer(
        &mut self,
        tensor: &mut TensorDesc,
        storage: StorageType,
    ) -> BackendResult<()>;

    /// Reverse of acquire, per the storage discipline rules.
    fn on_release_buffer(
        &mut self,
        tensor: &mut TensorDesc,
        storage: StorageType,
    ) -> BackendResult<()>;

    /// Release every dynamic pool root. Static buffers stay.
    fn on_clear_buffer(&mut self) -> BackendResult<()>;

    /// Copy between tensors; handles host->device, device->host, and both
    /// same- and cross-backend device->device directions.
    fn on_copy_buffer(&mut self, src: &TensorDesc, dst: &mut TensorDesc) -> BackendResult<()>;

    /// Select which dynamic pool serves subsequent acquisitions.
    fn change_buffer_type(&mut self, buffer_type: BufferType);

    /// Arm plan-guided placement on the active dynamic pool.
    fn set_heuristic_strategy(
        &mut self,
        plan: &PlacementPlan,
        model: &str,
        batch: usize,
        budget: usize,
        align_bottom: bool,
        need_alloc: bool,
    ) -> BackendResult<()>;

    /// Phase one of shrink-with-adapt on the armed pool.
    fn move_tensors_to_bottom(
        &mut self,
        tensors: &[TensorDesc],
        new_budget: usize,
    ) -> BackendResult<Vec<RepackedTensor>>;

    /// Phase two: publish the new bindings onto the tensors.
    fn adapt_tensors_to_new_address(&mut self, tensors: &mut [TensorDesc]) -> BackendResult<()>;

    /// Bytes currently handed out across this backend's pools
    fn used_size(&self) -> usize;
}

/// Each backend belongs to a runtime. The runtime creates backends and owns
/// the cache used by higher layers to persist compiled placement plans.
pub trait Runtime: Send + Sync + std::fmt::Debug {
    fn on_create(&self) -> Box<dyn Backend>;

    /// Drop cached resources. `level` 0-100; bigger means clear more.
    fn on_garbage_collect(&mut self, level: i32);

    /// Memory accounted by this runtime, in MiB
    fn on_get_memory_mb(&self) -> f32 {
        0.0
    }

    /// Persist a cache blob. Returns false when the blob is not understood.
    fn on_set_cache(&mut self, blob: &[u8]) -> bool {
        let _ = blob;
        false
    }

    /// Serialize the runtime cache, if there is anything to persist.
    fn on_get_cache(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Registered factory for a runtime, keyed by backend name.
pub trait RuntimeCreator: Send + Sync {
    fn on_create(&self) -> Box<dyn Runtime>;
}
