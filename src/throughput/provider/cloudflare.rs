use super::{bps_to_mbps, ProviderMeta, SpeedTestProvider, SpeedTestRequest, SpeedTestResult};
use crate::throughput::ThroughputError;
use anyhow::{Context, Result};
use rand::RngCore;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::debug;

const BASE_URL: &str = "https://speed.cloudflare.com";

/// Native HTTP measurement against Cloudflare's speed test endpoints.
/// Used when no speed test CLI is installed.
pub struct CloudflareProvider {
    base_url: String,
}

impl Default for CloudflareProvider {
    fn default() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
        }
    }
}

impl CloudflareProvider {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    async fn measure_latency(&self, client: &Client) -> Result<f64> {
        let start = Instant::now();
        client
            .get(format!("{}/__down?bytes=0", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(start.elapsed().as_secs_f64() * 1000.0)
    }

    async fn measure_download(&self, client: &Client, bytes: u64) -> Result<f64> {
        let start = Instant::now();
        let mut response = client
            .get(format!("{}/__down?bytes={}", self.base_url, bytes))
            .send()
            .await
            .context("download request failed")?
            .error_for_status()?;

        let mut received: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            received += chunk.len() as u64;
        }
        let elapsed = start.elapsed();
        debug!(received, elapsed_ms = elapsed.as_millis() as u64, "download finished");
        throughput_mbps(received, elapsed)
    }

    async fn measure_upload(&self, client: &Client, bytes: u64) -> Result<f64> {
        let mut payload = vec![0u8; bytes as usize];
        rand::thread_rng().fill_bytes(&mut payload);

        let start = Instant::now();
        client
            .post(format!("{}/__up", self.base_url))
            .body(payload)
            .send()
            .await
            .context("upload request failed")?
            .error_for_status()?;
        let elapsed = start.elapsed();
        debug!(sent = bytes, elapsed_ms = elapsed.as_millis() as u64, "upload finished");
        throughput_mbps(bytes, elapsed)
    }
}

#[async_trait::async_trait]
impl SpeedTestProvider for CloudflareProvider {
    fn meta(&self) -> ProviderMeta {
        ProviderMeta {
            id: "cloudflare",
            display_name: "Cloudflare Speed Test",
            description: "Single-stream HTTP transfer to and from Cloudflare's edge.",
            install_hint: None,
            licensing_note: None,
        }
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn run(&self, req: &SpeedTestRequest) -> Result<SpeedTestResult> {
        let client = Client::builder()
            .timeout(req.timeout)
            .build()
            .context("failed to build HTTP client")?;

        let latency = self.measure_latency(&client).await.ok();
        let download = self.measure_download(&client, req.download_bytes).await?;
        let upload = self.measure_upload(&client, req.upload_bytes).await?;

        Ok(SpeedTestResult {
            provider_id: "cloudflare".to_string(),
            download_mbps: Some(download),
            upload_mbps: Some(upload),
            latency_ms: latency,
            server: Some(self.base_url.clone()),
            raw_json: None,
            timestamp: chrono::Utc::now(),
        })
    }
}

/// Megabits per second for `bytes` moved in `elapsed`.
fn throughput_mbps(bytes: u64, elapsed: Duration) -> Result<f64> {
    let secs = elapsed.as_secs_f64();
    if bytes == 0 || secs <= 0.0 {
        return Err(ThroughputError::NoData.into());
    }
    Ok(bps_to_mbps(bytes as f64 * 8.0 / secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_mbps() {
        let mbps = throughput_mbps(12_500_000, Duration::from_secs(1)).unwrap();
        assert_eq!(mbps, 100.0);
        let mbps = throughput_mbps(12_500_000, Duration::from_secs(2)).unwrap();
        assert_eq!(mbps, 50.0);
    }

    #[test]
    fn test_throughput_requires_data() {
        assert!(throughput_mbps(0, Duration::from_secs(1)).is_err());
        assert!(throughput_mbps(10, Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let provider = CloudflareProvider::with_base_url("http://127.0.0.1:9");
        let req = SpeedTestRequest {
            timeout: Duration::from_secs(2),
            download_bytes: 1024,
            upload_bytes: 1024,
        };
        assert!(provider.run(&req).await.is_err());
    }
}
