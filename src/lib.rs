//! MemForge - tensor-buffer pool allocator
//!
//! The memory subsystem beneath a neural-network inference/training runtime.
//! Graph preparation and execution produce a large, predictable stream of
//! tensor-buffer requests; MemForge serves them with aggressive reuse to keep
//! the peak footprint low:
//!
//! - aligned allocations backed by a pluggable [`source::MemorySource`]
//!   (host heap, device memory, or a parent pool for nested allocators)
//! - free-range recycling by exact match and by splitting larger free ranges,
//!   with coalescing of adjacent siblings on free
//! - group-scoped free lists so multi-threaded graph preparation can draw
//!   from one pool without handing the same range to two owners
//! - plan-guided ("heuristic") placement that pins tensors to precomputed
//!   offsets inside a single arena, including a mid-execution shrink that
//!   re-packs live tensors and re-binds their addresses

pub mod backend;
pub mod error;
pub mod logging;
pub mod plan;
pub mod pool;
pub mod source;
pub mod tensor;

pub use backend::{Backend, BackendError, BufferType, HostBackend, HostRuntime, Runtime, StorageType};
pub use error::{ErrorCategory, ForgeResult, MemForgeError};
pub use plan::{PlacementPlan, PlanEntry};
pub use pool::{BufferAllocator, PoolError, PoolResult, RepackedTensor};
pub use source::{Chunk, HostSource, MemorySource, RecurseSource, SharedSource};
pub use tensor::{BindingKind, DType, DeviceBinding, TensorDesc};
