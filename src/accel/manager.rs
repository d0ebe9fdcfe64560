use tracing::debug;

use super::GpuCapability;

/// Probe for a usable compute adapter. Called once at process start.
#[cfg(feature = "gpu")]
pub fn probe() -> GpuCapability {
    use super::ComputeBackend;

    match super::wgpu_backend::WgpuBackend::request() {
        Ok(backend) => {
            tracing::info!(adapter = %backend.name(), "GPU compute adapter available");
            GpuCapability::Available(std::sync::Arc::new(backend))
        }
        Err(e) => {
            debug!(error = %e, "GPU probe failed");
            GpuCapability::unavailable(e.to_string())
        }
    }
}

#[cfg(not(feature = "gpu"))]
pub fn probe() -> GpuCapability {
    debug!("built without the gpu feature");
    GpuCapability::unavailable("built without GPU compute support")
}
