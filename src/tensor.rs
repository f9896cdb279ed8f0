//! Tensor descriptors - the narrow tensor surface the allocator consumes
//!
//! The allocator never sees shapes' semantics or data layout; it needs a
//! stable identifier (for plan lookup), a byte size, and a slot to bind the
//! granted `(base, offset)` address into.

use crate::backend::BufferType;

/// Element type. Precision affects byte sizes, not pool behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    F32,
    F16,
}

impl DType {
    pub fn element_size(self) -> usize {
        match self {
            DType::F32 => std::mem::size_of::<f32>(),
            DType::F16 => std::mem::size_of::<half::f16>(),
        }
    }
}

/// Which pool discipline produced a binding. Release routes on this, not on
/// the caller's storage argument, so a tensor freed under the wrong active
/// buffer type still goes back to the pool that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// From the static pool; lives until backend teardown
    Static,
    /// From one of the dynamic pools
    Pooled(BufferType),
    /// Carved out of the heuristic arena of a dynamic pool
    Heuristic(BufferType),
}

/// A device address bound onto a tensor: `base + offset` addresses `size`
/// bytes inside a chunk the owning pool is responsible for.
///
/// Handing out a binding transfers use rights, not ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBinding {
    /// Identifier of the backend instance that bound this tensor
    pub device: usize,
    pub base: usize,
    pub offset: usize,
    pub size: usize,
    pub kind: BindingKind,
}

impl DeviceBinding {
    /// Concrete address of the first byte
    pub fn address(&self) -> usize {
        self.base + self.offset
    }
}

/// Minimal tensor descriptor: identifier, shape, element type, optional
/// staged host data, and the device binding the backend adapter fills in.
#[derive(Debug, Clone)]
pub struct TensorDesc {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
    /// Host-side staging buffer; present on tensors that upload to or
    /// download from a device binding
    pub host: Option<Vec<u8>>,
    pub binding: Option<DeviceBinding>,
}

impl TensorDesc {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, dtype: DType) -> Self {
        TensorDesc {
            name: name.into(),
            shape,
            dtype,
            host: None,
            binding: None,
        }
    }

    /// Attach host-side data for upload through the copy path
    pub fn with_host_data(mut self, bytes: Vec<u8>) -> Self {
        self.host = Some(bytes);
        self
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn byte_size(&self) -> usize {
        self.element_count().saturating_mul(self.dtype.element_size())
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }
}
