//! Utilization sampling backed by `sysinfo`.

use std::time::Duration;

use chrono::{DateTime, Local};
use sysinfo::System;
use thiserror::Error;

use super::ResourceKind;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SampleError {
    #[error("resource accounting is not supported on this platform")]
    UnsupportedPlatform,

    #[error("no utilization metric for {0}")]
    UnsupportedKind(ResourceKind),

    #[error("os reported zero total memory")]
    NoMemoryCounters,
}

/// One utilization reading. Logged immediately, never collected.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub timestamp: DateTime<Local>,
    pub kind: ResourceKind,
    pub percent: f32,
}

pub trait MetricSampler: Send {
    /// Return utilization in `[0, 100]`.
    ///
    /// CPU sampling blocks for the sampler's window and averages over it.
    /// Memory sampling returns immediately.
    fn sample(&mut self, kind: ResourceKind) -> Result<f32, SampleError>;

    /// The blocking window of a CPU sample, used to pace the monitoring loop
    /// when a sample fails.
    fn window(&self) -> Duration;

    /// Bytes currently available for new allocations, if the sampler can tell.
    fn available_memory_bytes(&mut self) -> Option<u64> {
        None
    }

    fn record(&mut self, kind: ResourceKind) -> Result<SampleRecord, SampleError> {
        let percent = self.sample(kind)?;
        Ok(SampleRecord {
            timestamp: Local::now(),
            kind,
            percent,
        })
    }
}

/// Samples the host through `sysinfo`.
pub struct SysinfoSampler {
    sys: System,
    window: Duration,
}

impl SysinfoSampler {
    /// `window` is raised to `sysinfo::MINIMUM_CPU_UPDATE_INTERVAL` if shorter.
    pub fn new(window: Duration) -> Self {
        let mut sys = System::new();
        // Prime the CPU counters so the first windowed sample has a baseline.
        sys.refresh_cpu_usage();
        Self {
            sys,
            window: window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl MetricSampler for SysinfoSampler {
    fn sample(&mut self, kind: ResourceKind) -> Result<f32, SampleError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(SampleError::UnsupportedPlatform);
        }
        match kind {
            ResourceKind::Cpu => {
                self.sys.refresh_cpu_usage();
                std::thread::sleep(self.window);
                self.sys.refresh_cpu_usage();
                Ok(clamp_percent(self.sys.global_cpu_usage()))
            }
            ResourceKind::Memory => {
                self.sys.refresh_memory();
                memory_percent(self.sys.total_memory(), self.sys.available_memory())
            }
            ResourceKind::Gpu => Err(SampleError::UnsupportedKind(kind)),
        }
    }

    fn window(&self) -> Duration {
        self.window
    }

    fn available_memory_bytes(&mut self) -> Option<u64> {
        self.sys.refresh_memory();
        match self.sys.available_memory() {
            0 => None,
            bytes => Some(bytes),
        }
    }
}

/// Used share of memory, counting everything not available as used.
pub fn memory_percent(total: u64, available: u64) -> Result<f32, SampleError> {
    if total == 0 {
        return Err(SampleError::NoMemoryCounters);
    }
    let used = total.saturating_sub(available);
    Ok(clamp_percent((used as f64 / total as f64 * 100.0) as f32))
}

fn clamp_percent(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_percent() {
        assert_eq!(memory_percent(1000, 250).unwrap(), 75.0);
        assert_eq!(memory_percent(1000, 2000).unwrap(), 0.0);
        assert_eq!(memory_percent(0, 0), Err(SampleError::NoMemoryCounters));
    }

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(f32::NAN), 0.0);
        assert_eq!(clamp_percent(130.0), 100.0);
        assert_eq!(clamp_percent(-1.0), 0.0);
    }

    #[test]
    fn test_sysinfo_window_floor() {
        let sampler = SysinfoSampler::new(Duration::from_millis(1));
        assert!(sampler.window() >= sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    }

    #[test]
    fn test_sysinfo_gpu_unsupported() {
        let mut sampler = SysinfoSampler::default();
        if sysinfo::IS_SUPPORTED_SYSTEM {
            assert_eq!(
                sampler.sample(ResourceKind::Gpu),
                Err(SampleError::UnsupportedKind(ResourceKind::Gpu))
            );
        }
    }

    #[test]
    fn test_sysinfo_memory_in_range() {
        let mut sampler = SysinfoSampler::default();
        if let Ok(pct) = sampler.sample(ResourceKind::Memory) {
            assert!((0.0..=100.0).contains(&pct));
        }
    }
}
