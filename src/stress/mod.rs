//! Stress engine: load generators, metric sampling and the session that
//! binds them together under a wall-clock deadline.
//!
//! A session owns one [`StopSignal`], fans out one OS thread per load
//! generator, samples utilization from the calling thread until the deadline
//! passes, then sets the signal and joins every worker before returning.

pub mod cpu;
pub mod gpu;
pub mod memory;
pub mod sampler;
pub mod session;

use std::collections::TryReserveError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

pub use sampler::{MetricSampler, SampleError, SampleRecord, SysinfoSampler};
pub use session::{Cadence, SessionPhase, SessionReport, StressSession};

/// The resource a session puts under load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    Cpu,
    Memory,
    Gpu,
}

impl ResourceKind {
    /// Short label used in operator-facing log lines ("CPU Usage", "RAM Usage").
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "CPU",
            ResourceKind::Memory => "RAM",
            ResourceKind::Gpu => "GPU",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Cpu => write!(f, "cpu"),
            ResourceKind::Memory => write!(f, "memory"),
            ResourceKind::Gpu => write!(f, "gpu"),
        }
    }
}

/// Parameters of one stress session. Fixed once the session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StressConfig {
    pub kind: ResourceKind,
    pub duration: Duration,
    pub workers: usize,
    /// Bytes each worker allocates (memory block, device buffer). Zero for CPU.
    pub resource_size_bytes: u64,
}

impl StressConfig {
    pub fn cpu(duration: Duration, workers: usize) -> Self {
        Self {
            kind: ResourceKind::Cpu,
            duration,
            workers,
            resource_size_bytes: 0,
        }
    }

    pub fn memory(duration: Duration, size_bytes: u64) -> Self {
        Self {
            kind: ResourceKind::Memory,
            duration,
            workers: 1,
            resource_size_bytes: size_bytes,
        }
    }

    pub fn gpu(duration: Duration, elements: usize) -> Self {
        Self {
            kind: ResourceKind::Gpu,
            duration,
            workers: 1,
            resource_size_bytes: (elements as u64)
                .saturating_mul(std::mem::size_of::<f32>() as u64),
        }
    }
}

/// Number of logical processors, used when the configured CPU worker count is 0.
pub fn logical_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Shared stop flag for the workers of one session.
///
/// Single writer (the session), many readers (workers). Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` only for the call that actually set it.
    pub fn trigger(&self) -> bool {
        !self.flag.swap(true, Ordering::Release)
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep in `poll` slices until the flag is set. For workers that hold a
    /// resource rather than burn cycles.
    pub fn wait(&self, poll: Duration) {
        while !self.is_set() {
            std::thread::sleep(poll);
        }
    }
}

/// One-shot notice from a worker that its resource is committed and load is
/// running. Dropping it unsent tells the session the worker never got there.
#[derive(Debug, Clone)]
pub struct ReadySignal(mpsc::Sender<()>);

impl ReadySignal {
    /// A sender paired with a receiver, for the session to count ready workers.
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        (Self(tx), rx)
    }

    /// A signal nobody listens to, for running a generator outside a session.
    pub fn detached() -> Self {
        Self::channel().0
    }

    pub fn notify(self) {
        // The receiver is gone only when nobody is waiting.
        let _ = self.0.send(());
    }
}

/// Wall-clock deadline for a monitoring loop.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    duration: Duration,
}

impl Deadline {
    pub fn start(duration: Duration) -> Self {
        Self {
            start: Instant::now(),
            duration,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn expired(&self) -> bool {
        self.elapsed() >= self.duration
    }

    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.elapsed())
    }
}

/// What a worker reports back when it terminates cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WorkerReport {
    Cpu { spins: u64 },
    Memory { bytes_held: u64, held_for: Duration },
    Gpu { iterations: u64 },
}

/// Errors raised inside a stress session. None of these escape the session.
#[derive(Debug, Error)]
pub enum StressError {
    #[error("could not commit {requested_bytes} bytes: {source}")]
    Allocation {
        requested_bytes: u64,
        #[source]
        source: TryReserveError,
    },

    #[error("requested {requested_bytes} bytes but only {available_bytes} bytes are available")]
    InsufficientMemory {
        requested_bytes: u64,
        available_bytes: u64,
    },

    #[error("failed to spawn worker {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {index} panicked")]
    WorkerPanicked { index: usize },

    #[error("gpu worker failed: {0}")]
    Gpu(#[from] crate::accel::GpuError),
}

impl StressError {
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            self,
            StressError::Allocation { .. } | StressError::InsufficientMemory { .. }
        )
    }
}

/// A unit of sustained work on one resource, run on its own thread until the
/// stop signal is observed.
pub trait LoadGenerator: Send + 'static {
    fn kind(&self) -> ResourceKind;

    /// Acquire the resource, `notify` on `ready`, then load until `stop` is
    /// set. `ready` must be notified or dropped before waiting on `stop`;
    /// the session does not start its clock until every worker has done one
    /// or the other.
    fn run(
        self: Box<Self>,
        ready: ReadySignal,
        stop: StopSignal,
    ) -> Result<WorkerReport, StressError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_signal_sets_once() {
        let stop = StopSignal::new();
        let reader = stop.clone();
        assert!(!reader.is_set());
        assert!(stop.trigger());
        assert!(!stop.trigger());
        assert!(reader.is_set());
    }

    #[test]
    fn test_ready_signal_counts_and_closes() {
        let (ready, rx) = ReadySignal::channel();
        let second = ready.clone();
        ready.notify();
        drop(second);
        assert_eq!(rx.iter().count(), 1);
        ReadySignal::detached().notify();
    }

    #[test]
    fn test_deadline_expiry() {
        let deadline = Deadline::start(Duration::from_millis(20));
        assert!(!deadline.expired());
        std::thread::sleep(Duration::from_millis(30));
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_gpu_config_size() {
        let cfg = StressConfig::gpu(Duration::from_secs(1), 10_000_000);
        assert_eq!(cfg.resource_size_bytes, 40_000_000);
        assert_eq!(cfg.workers, 1);

        let cfg = StressConfig::gpu(Duration::from_secs(1), usize::MAX);
        assert_eq!(cfg.resource_size_bytes, (usize::MAX as u64).saturating_mul(4));
    }
}
