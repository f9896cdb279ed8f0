//! Unified error handling for MemForge
//!
//! Every subsystem carries its own error enum (`PoolError`, `BackendError`,
//! `PlanError`); this module consolidates them into a single crate-level type
//! with category classification so callers can decide between retrying,
//! fixing their input, or reporting a bug.

use std::fmt;

use crate::backend::BackendError;
use crate::plan::PlanError;
use crate::pool::PoolError;

/// Unified error type for MemForge
#[derive(Debug, thiserror::Error)]
pub enum MemForgeError {
    /// Buffer pool error (out-of-memory, unknown range, contract violation)
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Backend adapter error
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Placement plan error (serialization, file I/O)
    #[error(transparent)]
    Plan(#[from] PlanError),
}

impl MemForgeError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            MemForgeError::Pool(e) => pool_category(e),
            MemForgeError::Backend(e) => match e {
                BackendError::Pool(inner) => pool_category(inner),
                BackendError::NotBound(_)
                | BackendError::NoHostData(_)
                | BackendError::SizeMismatch { .. }
                | BackendError::ForeignTensor(_) => ErrorCategory::User,
                BackendError::RuntimeNotFound(_) => ErrorCategory::Backend,
            },
            MemForgeError::Plan(_) => ErrorCategory::User,
        }
    }

    /// Check if this error is a temporary condition the caller may retry
    /// after reducing batch size or budget.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Recoverable)
    }

    /// Check if this error is actionable by the caller (bad input, bad
    /// sequencing of pool operations).
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller error - bad input or call sequencing
    User,
    /// Recoverable error - temporary resource condition
    Recoverable,
    /// Internal error - indicates a bug
    Internal,
    /// Backend error - missing or failed backend
    Backend,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Recoverable => write!(f, "Recoverable"),
            ErrorCategory::Internal => write!(f, "Internal"),
            ErrorCategory::Backend => write!(f, "Backend"),
        }
    }
}

fn pool_category(e: &PoolError) -> ErrorCategory {
    match e {
        // Temporary conditions: shrink the batch or budget and retry
        PoolError::OutOfMemory { .. } | PoolError::BudgetExceeded { .. } => {
            ErrorCategory::Recoverable
        }
        // Caller named a range or tensor the pool does not know, or broke
        // the barrier/group call sequencing
        PoolError::UnknownRange { .. }
        | PoolError::PlanMiss { .. }
        | PoolError::ContractViolation(_)
        | PoolError::InvalidAlignment(_) => ErrorCategory::User,
        PoolError::LockPoisoned(_) => ErrorCategory::Internal,
    }
}

/// Helper type alias for Results using MemForgeError
pub type ForgeResult<T> = std::result::Result<T, MemForgeError>;
