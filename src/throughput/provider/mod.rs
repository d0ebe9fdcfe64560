use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod cloudflare;
pub mod ookla;

/// Metadata describing a speed test provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderMeta {
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub install_hint: Option<&'static str>,
    pub licensing_note: Option<&'static str>,
}

/// Parameters for one speed test run.
#[derive(Debug, Clone)]
pub struct SpeedTestRequest {
    pub timeout: Duration,
    /// Payload sizes for providers that measure with their own transfers.
    pub download_bytes: u64,
    pub upload_bytes: u64,
}

/// Normalized result from any provider, already in megabits per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedTestResult {
    pub provider_id: String,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub latency_ms: Option<f64>,
    pub server: Option<String>,
    pub raw_json: Option<serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// A bandwidth measurement backend.
#[async_trait::async_trait]
pub trait SpeedTestProvider: Send + Sync {
    fn meta(&self) -> ProviderMeta;

    /// Whether the provider's CLI or endpoint can be used on this host.
    fn is_available(&self) -> bool;

    /// Run one download and one upload measurement.
    async fn run(&self, req: &SpeedTestRequest) -> Result<SpeedTestResult>;
}

/// Bits per second to megabits per second.
pub fn bps_to_mbps(bits_per_second: f64) -> f64 {
    bits_per_second / 1_000_000.0
}

/// Bytes per second (Ookla's native unit) to megabits per second.
pub fn bytes_per_sec_to_mbps(bytes_per_second: f64) -> f64 {
    bps_to_mbps(bytes_per_second * 8.0)
}
