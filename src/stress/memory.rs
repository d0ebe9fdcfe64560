//! Memory load generator: commit a block, touch every page, hold it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use super::{
    Cadence, LoadGenerator, MetricSampler, ReadySignal, ResourceKind, SessionReport, StopSignal,
    StressConfig, StressError, StressSession, WorkerReport,
};

/// Stride used to touch the block. One write per page forces the OS to back
/// the allocation with physical memory.
pub const PAGE_STRIDE: usize = 4096;

const HOLD_POLL: Duration = Duration::from_millis(50);

/// Live count of bytes held by memory generators sharing this gauge.
#[derive(Debug, Clone, Default)]
pub struct HeldBytes(Arc<AtomicU64>);

impl HeldBytes {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// An allocated and touched block. Dropping it releases the memory and
/// updates the gauge.
struct TouchedBlock {
    data: Vec<u8>,
    gauge: HeldBytes,
}

impl TouchedBlock {
    fn commit(size: usize, gauge: HeldBytes) -> Result<Self, StressError> {
        let mut data: Vec<u8> = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|source| StressError::Allocation {
                requested_bytes: size as u64,
                source,
            })?;
        data.resize(size, 0);
        for i in (0..size).step_by(PAGE_STRIDE) {
            data[i] = 1;
        }
        gauge.0.fetch_add(size as u64, Ordering::SeqCst);
        Ok(Self { data, gauge })
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

impl Drop for TouchedBlock {
    fn drop(&mut self) {
        self.gauge.0.fetch_sub(self.data.len() as u64, Ordering::SeqCst);
        debug!(bytes = self.data.len(), "memory block released");
    }
}

/// Allocates `size_bytes`, touches it, and holds it until stopped.
pub struct MemoryLoad {
    size_bytes: u64,
    /// When set, requests above this many bytes are refused up front rather
    /// than risking the OOM killer.
    available_bytes: Option<u64>,
    gauge: HeldBytes,
}

impl MemoryLoad {
    pub fn new(size_bytes: u64, gauge: HeldBytes) -> Self {
        Self {
            size_bytes,
            available_bytes: None,
            gauge,
        }
    }

    pub fn with_available_limit(mut self, available_bytes: Option<u64>) -> Self {
        self.available_bytes = available_bytes;
        self
    }

    fn preflight(&self) -> Result<usize, StressError> {
        if let Some(available) = self.available_bytes {
            if self.size_bytes > available {
                return Err(StressError::InsufficientMemory {
                    requested_bytes: self.size_bytes,
                    available_bytes: available,
                });
            }
        }
        usize::try_from(self.size_bytes).map_err(|_| StressError::InsufficientMemory {
            requested_bytes: self.size_bytes,
            available_bytes: usize::MAX as u64,
        })
    }
}

impl LoadGenerator for MemoryLoad {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Memory
    }

    fn run(
        self: Box<Self>,
        ready: ReadySignal,
        stop: StopSignal,
    ) -> Result<WorkerReport, StressError> {
        let block = match self
            .preflight()
            .and_then(|size| TouchedBlock::commit(size, self.gauge.clone()))
        {
            Ok(block) => block,
            Err(e) => {
                error!(error = %e, "Memory allocation failed! Try smaller size.");
                return Err(e);
            }
        };

        info!("RAM allocated and touched.");
        let held_since = Instant::now();
        ready.notify();
        stop.wait(HOLD_POLL);

        let bytes_held = block.len() as u64;
        let held_for = held_since.elapsed();
        drop(block);
        Ok(WorkerReport::Memory {
            bytes_held,
            held_for,
        })
    }
}

/// Run the memory stress session with a single generator.
///
/// `available_bytes` enables the preflight check; `interval` is the sampling
/// cadence.
pub fn run(
    config: StressConfig,
    interval: Duration,
    sampler: &mut dyn MetricSampler,
    available_bytes: Option<u64>,
) -> SessionReport {
    let size = config.resource_size_bytes;
    info!(
        "Starting RAM stress test: allocating ~{}MB for {}s...",
        size / (1024 * 1024),
        config.duration.as_secs()
    );

    let gauge = HeldBytes::default();
    let mut session = StressSession::new(config, Cadence::Fixed(interval));
    let mut report = session.run(
        |_| Box::new(MemoryLoad::new(size, gauge.clone()).with_available_limit(available_bytes)),
        sampler,
    );

    let held = gauge.get();
    if held != 0 {
        error!(held, "memory still held after every worker joined");
    }
    report.held_bytes_after_join = Some(held);
    info!("RAM stress test completed, memory released.");
    report
}
