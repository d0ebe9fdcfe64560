//! burncheck -- multi-resource burn-in and network check.
//!
//! This crate drives timed CPU, memory and GPU stress sessions while sampling
//! utilization, then checks connectivity and internet bandwidth.

pub mod accel;
pub mod config;
pub mod probes;
pub mod stress;
pub mod suite;
pub mod throughput;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, Instrument};
use uuid::Uuid;

use accel::GpuCapability;
use config::HarnessConfig;
use stress::SysinfoSampler;
use suite::{NetworkSummary, StressSummary};

pub const START_BANNER: &str = "=== System Stress and Network Test Start ===";
pub const COMPLETE_BANNER: &str = "=== All tests complete! ===";

/// Everything one invocation measured.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub stress: StressSummary,
    pub network: NetworkSummary,
}

/// Run the whole sequence: CPU, memory, GPU, ping, bandwidth.
///
/// The stress sessions block, so they run on the blocking pool. Network
/// failures are logged and recorded in the summary rather than returned.
pub async fn run(config: HarnessConfig, gpu: GpuCapability) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", %run_id);

    async move {
        info!("{}", START_BANNER);

        let stress_span = tracing::Span::current();
        let stress_config = config.clone();
        let stress = tokio::task::spawn_blocking(move || {
            let _enter = stress_span.enter();
            let mut sampler = SysinfoSampler::new(stress_config.sampling.cpu_window());
            suite::run_stress(&stress_config, &gpu, &mut sampler)
        })
        .await
        .context("stress sequence panicked")?;

        let network = suite::run_network(&config).await;

        info!("{}", COMPLETE_BANNER);
        info!("{}", suite::summary_line(&stress, &network));

        Ok(RunSummary {
            run_id,
            stress,
            network,
        })
    }
    .instrument(span)
    .await
}
