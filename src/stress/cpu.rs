//! CPU load generator: one busy-spinning thread per logical processor.

use std::hint::black_box;

use tracing::info;

use super::{
    Cadence, LoadGenerator, MetricSampler, ReadySignal, ResourceKind, SessionReport, StopSignal,
    StressConfig, StressError, StressSession, WorkerReport,
};

/// Burns one logical processor until the stop signal is set.
///
/// The flag is checked on every pass of the loop, so the worst-case stop
/// latency is one pass (a handful of arithmetic ops) plus the time for the
/// store to become visible to this core.
pub struct CpuLoad;

impl LoadGenerator for CpuLoad {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Cpu
    }

    fn run(
        self: Box<Self>,
        ready: ReadySignal,
        stop: StopSignal,
    ) -> Result<WorkerReport, StressError> {
        ready.notify();
        let mut spins: u64 = 0;
        let mut acc: u64 = 0x9E37_79B9_7F4A_7C15;
        while !stop.is_set() {
            acc = black_box(acc.rotate_left(5) ^ spins.wrapping_mul(0x2545_F491_4F6C_DD1D));
            spins = spins.wrapping_add(1);
        }
        black_box(acc);
        Ok(WorkerReport::Cpu { spins })
    }
}

/// Run the CPU stress session. `config.workers` must already be resolved
/// (auto-detection happens in the caller).
pub fn run(config: StressConfig, sampler: &mut dyn MetricSampler) -> SessionReport {
    info!(
        "Starting CPU stress test for {}s on {} threads...",
        config.duration.as_secs(),
        config.workers
    );

    let mut session = StressSession::new(config, Cadence::SamplerWindow);
    let report = session.run(|_| Box::new(CpuLoad), sampler);

    info!("CPU stress test completed.");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cpu_load_stops_on_signal() {
        let stop = StopSignal::new();
        let worker_stop = stop.clone();
        let handle =
            std::thread::spawn(move || Box::new(CpuLoad).run(ReadySignal::detached(), worker_stop));

        std::thread::sleep(Duration::from_millis(20));
        stop.trigger();

        let report = handle.join().unwrap().unwrap();
        match report {
            WorkerReport::Cpu { spins } => assert!(spins > 0),
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[test]
    fn test_cpu_load_returns_immediately_when_already_stopped() {
        let stop = StopSignal::new();
        stop.trigger();
        let report = Box::new(CpuLoad).run(ReadySignal::detached(), stop).unwrap();
        assert_eq!(report, WorkerReport::Cpu { spins: 0 });
    }
}
