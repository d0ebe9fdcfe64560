//! The fixed run order: CPU, memory and GPU stress, then connectivity and
//! bandwidth.

use serde::Serialize;
use tracing::{error, info};

use crate::accel::GpuCapability;
use crate::config::HarnessConfig;
use crate::probes::{self, PingReport};
use crate::stress::gpu::GpuOutcome;
use crate::stress::{cpu, gpu, memory, MetricSampler, SessionReport};
use crate::throughput::provider::SpeedTestResult;
use crate::throughput::BandwidthChecker;

/// Outcome of one collaborator check.
#[derive(Debug, Clone, Serialize)]
pub enum CheckOutcome<T> {
    Completed(T),
    Failed(String),
    Disabled,
}

impl<T> CheckOutcome<T> {
    pub fn label(&self) -> &'static str {
        match self {
            CheckOutcome::Completed(_) => "completed",
            CheckOutcome::Failed(_) => "failed",
            CheckOutcome::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StressSummary {
    pub cpu: SessionReport,
    pub memory: SessionReport,
    pub gpu: GpuOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkSummary {
    pub connectivity: CheckOutcome<PingReport>,
    pub bandwidth: CheckOutcome<SpeedTestResult>,
}

/// Run the three stress sessions back to back on the calling thread.
///
/// A disabled GPU section is treated exactly like a missing device.
pub fn run_stress(
    config: &HarnessConfig,
    gpu_capability: &GpuCapability,
    sampler: &mut dyn MetricSampler,
) -> StressSummary {
    let cpu = cpu::run(config.cpu.stress_config(), sampler);

    let available = if config.memory.preflight {
        sampler.available_memory_bytes()
    } else {
        None
    };
    let memory = memory::run(
        config.memory.stress_config(),
        config.sampling.memory_interval(),
        sampler,
        available,
    );

    let disabled;
    let capability = if config.gpu.enabled {
        gpu_capability
    } else {
        disabled = GpuCapability::unavailable("disabled by configuration");
        &disabled
    };
    let gpu = gpu::run(
        capability,
        config.gpu.stress_config(),
        config.gpu.kernel_params(),
        config.sampling.gpu_heartbeat(),
        sampler,
    );

    StressSummary { cpu, memory, gpu }
}

/// Ping, then measure bandwidth. Failures are logged and recorded, never
/// propagated.
pub async fn run_network(config: &HarnessConfig) -> NetworkSummary {
    let connectivity = if config.connectivity.enabled {
        match probes::ping(&config.connectivity.host, config.connectivity.count).await {
            Ok(report) => {
                println!("{}", report.raw_output);
                if let Some(avg) = report.avg_rtt_ms {
                    info!(host = %report.host, "Average round-trip time: {:.1} ms", avg);
                }
                CheckOutcome::Completed(report)
            }
            Err(e) => {
                error!("Connectivity check failed: {:#}", e);
                CheckOutcome::Failed(format!("{:#}", e))
            }
        }
    } else {
        CheckOutcome::Disabled
    };

    let bandwidth = if config.bandwidth.enabled {
        let checker = BandwidthChecker::from_config(&config.bandwidth).await;
        match checker.run().await {
            Ok(result) => CheckOutcome::Completed(result),
            Err(e) => {
                error!(provider = checker.provider_id(), "Speed test failed: {:#}", e);
                CheckOutcome::Failed(format!("{:#}", e))
            }
        }
    } else {
        CheckOutcome::Disabled
    };

    NetworkSummary {
        connectivity,
        bandwidth,
    }
}

/// One-line recap of a finished run.
pub fn summary_line(stress: &StressSummary, network: &NetworkSummary) -> String {
    let gpu = match &stress.gpu {
        GpuOutcome::Skipped { .. } => "skipped".to_string(),
        GpuOutcome::Completed { iterations, .. } => format!("{} iterations", iterations),
    };
    let memory = if stress.memory.allocation_failed {
        "allocation failed".to_string()
    } else {
        format!("{} samples", stress.memory.samples_logged)
    };
    format!(
        "cpu: {} workers, {} samples | memory: {} | gpu: {} | ping: {} | speed test: {}",
        stress.cpu.workers_joined,
        stress.cpu.samples_logged,
        memory,
        gpu,
        network.connectivity.label(),
        network.bandwidth.label(),
    )
}
