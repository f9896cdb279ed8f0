//! Buffer pool: split/merge allocation engine with group-scoped reuse
//!
//! The pool tracks every range obtained from its source as a tree of nodes.
//! Serving a request smaller than a free range splits it into two sibling
//! children; freeing both siblings merges them back. A size-indexed free
//! list gives best-fit reuse, and per-group free lists let concurrent graph
//! preparation threads draw from one pool without handing the same range to
//! two owners.

use thiserror::Error;

mod allocator;
mod heuristic;
mod node;

pub use allocator::BufferAllocator;
pub use heuristic::RepackedTensor;

#[derive(Debug, Error)]
pub enum PoolError {
    /// The source refused a fresh range and no free range fits
    #[error("out of memory: source refused {size} bytes")]
    OutOfMemory { size: usize },

    /// A free or release named a `(base, size)` pair not in the used list
    #[error("unknown range: base=0x{base:x} size={size}")]
    UnknownRange { base: usize, size: usize },

    /// Heuristic allocation for a tensor the armed plan does not cover
    #[error("no placement for tensor '{id}' in the armed plan")]
    PlanMiss { id: String },

    /// Shrink target smaller than the re-packed live footprint
    #[error("budget exceeded: need {needed} bytes, budget is {budget}")]
    BudgetExceeded { needed: usize, budget: usize },

    /// Misuse of the pool protocol (barrier/group sequencing, zero-size
    /// request, heuristic traffic while an adapt is pending, ...)
    #[error("allocator contract violated: {0}")]
    ContractViolation(String),

    #[error("alignment must be a power of two, got {0}")]
    InvalidAlignment(usize),

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for PoolError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PoolError::LockPoisoned(err.to_string())
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Round `value` up to the next multiple of `align` (a power of two).
pub(crate) fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
