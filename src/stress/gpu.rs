//! GPU load generator: repeated kernel dispatches against one device buffer.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};

use super::{
    Cadence, LoadGenerator, MetricSampler, ReadySignal, ResourceKind, SessionReport, StopSignal,
    StressConfig, StressError, StressSession, WorkerReport,
};
use crate::accel::{ComputeBackend, GpuCapability, KernelParams};

/// Outcome of a GPU stress run. A missing device is not an error.
#[derive(Debug, Clone, Serialize)]
pub enum GpuOutcome {
    Skipped { reason: String },
    Completed { iterations: u64, report: SessionReport },
}

/// Dispatches the stress kernel until stopped. The device buffer is
/// allocated once when the worker starts and released when it returns.
///
/// The stop flag is checked between dispatches, so stop latency is at most
/// one kernel pass.
pub struct GpuLoad {
    backend: Arc<dyn ComputeBackend>,
    params: KernelParams,
}

impl GpuLoad {
    pub fn new(backend: Arc<dyn ComputeBackend>, params: KernelParams) -> Self {
        Self { backend, params }
    }
}

impl LoadGenerator for GpuLoad {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Gpu
    }

    fn run(
        self: Box<Self>,
        ready: ReadySignal,
        stop: StopSignal,
    ) -> Result<WorkerReport, StressError> {
        let mut kernel = self.backend.prepare(self.params).map_err(|e| {
            error!(error = %e, "GPU buffer allocation failed");
            StressError::from(e)
        })?;
        ready.notify();

        let mut iterations: u64 = 0;
        while !stop.is_set() {
            if let Err(e) = kernel.dispatch_and_wait() {
                error!(error = %e, iterations, "GPU dispatch failed");
                return Err(e.into());
            }
            iterations += 1;
            info!("GPU kernel iteration completed");
        }
        Ok(WorkerReport::Gpu { iterations })
    }
}

/// Run the GPU session if the capability probe found a device.
///
/// Returns `Skipped` immediately, without touching any device, otherwise.
pub fn run(
    capability: &GpuCapability,
    config: StressConfig,
    params: KernelParams,
    heartbeat: Duration,
    sampler: &mut dyn MetricSampler,
) -> GpuOutcome {
    let backend = match capability {
        GpuCapability::Available(backend) => backend.clone(),
        GpuCapability::Unavailable { reason } => {
            info!("GPU stress test skipped: {}", reason);
            return GpuOutcome::Skipped {
                reason: reason.clone(),
            };
        }
    };

    info!(
        adapter = %backend.name(),
        "Starting GPU stress test for {} seconds...",
        config.duration.as_secs()
    );

    let mut session = StressSession::new(config, Cadence::Heartbeat(heartbeat));
    let report = session.run(
        |_| Box::new(GpuLoad::new(backend.clone(), params)),
        sampler,
    );

    let iterations = report
        .worker_reports
        .iter()
        .map(|r| match r {
            WorkerReport::Gpu { iterations } => *iterations,
            _ => 0,
        })
        .sum();

    info!("GPU stress test completed.");
    GpuOutcome::Completed { iterations, report }
}
