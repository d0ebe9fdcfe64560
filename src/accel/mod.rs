//! GPU compute for the stress engine.
//!
//! The capability probe runs once at startup and yields a [`GpuCapability`]
//! that is handed to the orchestrator. With no usable adapter (or a build
//! without the `gpu` feature) the GPU session is skipped, never failed.

pub mod manager;
#[cfg(feature = "gpu")]
pub mod wgpu_backend;

use std::sync::{Arc, Mutex};

use thiserror::Error;

pub use manager::probe;

/// Elements in the device-resident stress buffer.
pub const DEFAULT_ELEMENTS: usize = 10_000_000;

/// Transform applications per element per dispatch.
pub const DEFAULT_INNER_ITERATIONS: u32 = 1000;

/// Threads per workgroup; must match `@workgroup_size` in the shader.
pub const WORKGROUP_SIZE: u32 = 256;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no compatible GPU adapter: {0}")]
    NoAdapter(String),

    #[error("failed to open GPU device: {0}")]
    Device(String),

    #[error("buffer of {requested} bytes exceeds device limit of {limit} bytes")]
    BufferTooLarge { requested: u64, limit: u64 },

    #[error("{workgroups} workgroups exceed the per-dimension dispatch limit of {limit}")]
    DispatchTooLarge { workgroups: u32, limit: u32 },

    #[error("device synchronization failed: {0}")]
    Sync(String),
}

/// Shape of the stress kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelParams {
    pub elements: usize,
    pub inner_iterations: u32,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            elements: DEFAULT_ELEMENTS,
            inner_iterations: DEFAULT_INNER_ITERATIONS,
        }
    }
}

impl KernelParams {
    pub fn buffer_bytes(&self) -> u64 {
        (self.elements as u64).saturating_mul(std::mem::size_of::<f32>() as u64)
    }

    /// Saturates at `u32::MAX` elements; larger buffers are rejected by the
    /// device limits before dispatch.
    pub fn workgroups(&self) -> u32 {
        u32::try_from(self.elements)
            .unwrap_or(u32::MAX)
            .div_ceil(WORKGROUP_SIZE)
    }
}

/// Errors the device reported outside of any call that could return them.
///
/// Only the first error is kept; later ones are usually follow-on failures.
#[derive(Debug, Clone, Default)]
pub struct DeviceErrors(Arc<Mutex<Option<String>>>);

impl DeviceErrors {
    pub fn record(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert_with(|| message.into());
        }
    }

    /// Take the recorded error, leaving the slot empty.
    pub fn take(&self) -> Option<String> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }

    /// `Err(GpuError::Sync)` if the device reported anything since the last
    /// check.
    pub fn check(&self) -> Result<(), GpuError> {
        match self.take() {
            Some(message) => Err(GpuError::Sync(message)),
            None => Ok(()),
        }
    }
}

/// A device able to host the stress kernel.
pub trait ComputeBackend: Send + Sync {
    fn name(&self) -> String;

    /// Allocate the device buffer and build the kernel. The buffer lives as
    /// long as the returned kernel.
    fn prepare(&self, params: KernelParams) -> Result<Box<dyn StressKernel>, GpuError>;
}

/// A prepared kernel bound to its device buffer.
pub trait StressKernel: Send {
    /// Submit one pass over the buffer and block until the device reports it
    /// complete.
    fn dispatch_and_wait(&mut self) -> Result<(), GpuError>;
}

/// Result of the startup capability probe.
#[derive(Clone)]
pub enum GpuCapability {
    Available(Arc<dyn ComputeBackend>),
    Unavailable { reason: String },
}

impl GpuCapability {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        GpuCapability::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, GpuCapability::Available(_))
    }
}

impl std::fmt::Debug for GpuCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuCapability::Available(backend) => {
                f.debug_tuple("Available").field(&backend.name()).finish()
            }
            GpuCapability::Unavailable { reason } => f
                .debug_struct("Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}
