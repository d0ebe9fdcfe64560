//! TOML configuration for burncheck.
//!
//! Every field has a default, so running with no config file reproduces the
//! stock burn-in: CPU for 15 s on every logical processor, 1000 MB of RAM for
//! 15 s, GPU for 15 s, four pings to 8.8.8.8 and one speed test.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::accel::{KernelParams, DEFAULT_ELEMENTS, DEFAULT_INNER_ITERATIONS};
use crate::stress::{logical_cpus, StressConfig};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "BURNCHECK_CONFIG";

/// Config file picked up from the working directory.
pub const LOCAL_CONFIG: &str = "burncheck.toml";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{section}.duration_secs must be greater than zero")]
    ZeroDuration { section: &'static str },

    #[error("memory.size_mb must be greater than zero")]
    ZeroMemorySize,

    #[error("gpu.elements must be greater than zero")]
    ZeroGpuElements,

    #[error("gpu.elements must be at most {max}")]
    GpuElementsTooLarge { max: u64 },

    #[error("sampling.cpu_window_ms must be at least {min_ms} ms")]
    WindowTooShort { min_ms: u128 },

    #[error("sampling.memory_interval_ms must be greater than zero")]
    ZeroInterval,

    #[error("connectivity.host is invalid: {0}")]
    InvalidHost(String),

    #[error("connectivity.count must be greater than zero")]
    ZeroPingCount,
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub cpu: CpuConfig,
    pub memory: MemoryConfig,
    pub gpu: GpuConfig,
    pub sampling: SamplingConfig,
    pub connectivity: ConnectivityConfig,
    pub bandwidth: BandwidthConfig,
    pub logging: LoggingConfig,
}

impl HarnessConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration from, in order:
    /// 1. An explicit path (from `--config`); a failure here is fatal.
    /// 2. The path in `BURNCHECK_CONFIG`.
    /// 3. `./burncheck.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            match Self::load(&path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "BURNCHECK_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Override every stress duration (from `--duration`).
    pub fn with_stress_duration(mut self, secs: u64) -> Self {
        self.cpu.duration_secs = secs;
        self.memory.duration_secs = secs;
        self.gpu.duration_secs = secs;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpu.duration_secs == 0 {
            return Err(ConfigError::ZeroDuration { section: "cpu" });
        }
        if self.memory.duration_secs == 0 {
            return Err(ConfigError::ZeroDuration { section: "memory" });
        }
        if self.gpu.duration_secs == 0 {
            return Err(ConfigError::ZeroDuration { section: "gpu" });
        }
        if self.memory.size_mb == 0 {
            return Err(ConfigError::ZeroMemorySize);
        }
        if self.gpu.elements == 0 {
            return Err(ConfigError::ZeroGpuElements);
        }
        // The kernel indexes the buffer with a u32.
        if self.gpu.elements as u64 > u32::MAX as u64 {
            return Err(ConfigError::GpuElementsTooLarge {
                max: u32::MAX as u64,
            });
        }
        let min = sysinfo::MINIMUM_CPU_UPDATE_INTERVAL;
        if self.sampling.cpu_window() < min {
            return Err(ConfigError::WindowTooShort {
                min_ms: min.as_millis(),
            });
        }
        if self.sampling.memory_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        crate::probes::validate_target(&self.connectivity.host)
            .map_err(|e| ConfigError::InvalidHost(e.to_string()))?;
        if self.connectivity.count == 0 {
            return Err(ConfigError::ZeroPingCount);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stress sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub duration_secs: u64,
    /// Busy-spin threads. 0 means one per logical processor.
    pub workers: usize,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            duration_secs: 15,
            workers: 0,
        }
    }
}

impl CpuConfig {
    pub fn stress_config(&self) -> StressConfig {
        let workers = if self.workers == 0 {
            logical_cpus()
        } else {
            self.workers
        };
        StressConfig::cpu(Duration::from_secs(self.duration_secs), workers)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub duration_secs: u64,
    pub size_mb: u64,
    /// Refuse requests larger than the memory the OS reports as available.
    pub preflight: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            duration_secs: 15,
            size_mb: 1000,
            preflight: true,
        }
    }
}

impl MemoryConfig {
    pub fn stress_config(&self) -> StressConfig {
        StressConfig::memory(
            Duration::from_secs(self.duration_secs),
            self.size_mb.saturating_mul(1024 * 1024),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    pub enabled: bool,
    pub duration_secs: u64,
    pub elements: usize,
    pub inner_iterations: u32,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_secs: 15,
            elements: DEFAULT_ELEMENTS,
            inner_iterations: DEFAULT_INNER_ITERATIONS,
        }
    }
}

impl GpuConfig {
    pub fn stress_config(&self) -> StressConfig {
        StressConfig::gpu(Duration::from_secs(self.duration_secs), self.elements)
    }

    pub fn kernel_params(&self) -> KernelParams {
        KernelParams {
            elements: self.elements,
            inner_iterations: self.inner_iterations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Blocking window of each CPU sample.
    pub cpu_window_ms: u64,
    /// Pause between memory samples.
    pub memory_interval_ms: u64,
    /// Wake-up interval of the GPU session's deadline check.
    pub gpu_heartbeat_ms: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            cpu_window_ms: 1000,
            memory_interval_ms: 1000,
            gpu_heartbeat_ms: 1000,
        }
    }
}

impl SamplingConfig {
    pub fn cpu_window(&self) -> Duration {
        Duration::from_millis(self.cpu_window_ms)
    }

    pub fn memory_interval(&self) -> Duration {
        Duration::from_millis(self.memory_interval_ms)
    }

    pub fn gpu_heartbeat(&self) -> Duration {
        Duration::from_millis(self.gpu_heartbeat_ms.max(1))
    }
}

// ---------------------------------------------------------------------------
// Network sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub enabled: bool,
    pub host: String,
    pub count: u32,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "8.8.8.8".to_string(),
            count: 4,
        }
    }
}

/// Which speed test backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    /// Ookla CLI if installed, else Cloudflare over HTTP.
    Auto,
    Ookla,
    Cloudflare,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthConfig {
    pub enabled: bool,
    pub provider: ProviderChoice,
    pub download_bytes: u64,
    pub upload_bytes: u64,
    pub timeout_secs: u64,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: ProviderChoice::Auto,
            download_bytes: 25_000_000,
            upload_bytes: 10_000_000,
            timeout_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
