//! Internet bandwidth check: one download and one upload measurement.

pub mod provider;
pub mod report;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{BandwidthConfig, ProviderChoice};
use provider::cloudflare::CloudflareProvider;
use provider::ookla::OoklaProvider;
use provider::{SpeedTestProvider, SpeedTestRequest, SpeedTestResult};

#[derive(Debug, Error)]
pub enum ThroughputError {
    #[error("{tool} exited with an error: {stderr}")]
    ToolFailed { tool: &'static str, stderr: String },

    #[error("{provider} did not finish within {secs}s")]
    Timeout { provider: &'static str, secs: u64 },

    #[error("{provider} is not available on this host ({hint})")]
    Unavailable {
        provider: &'static str,
        hint: &'static str,
    },

    #[error("transfer moved no data")]
    NoData,
}

/// Runs the configured speed test provider and logs the result.
pub struct BandwidthChecker {
    provider: Arc<dyn SpeedTestProvider>,
    request: SpeedTestRequest,
}

impl BandwidthChecker {
    pub fn new(provider: Arc<dyn SpeedTestProvider>, request: SpeedTestRequest) -> Self {
        Self { provider, request }
    }

    /// Pick a provider for the configured choice. `auto` prefers the Ookla CLI
    /// and falls back to Cloudflare over HTTP.
    pub async fn from_config(config: &BandwidthConfig) -> Self {
        let request = SpeedTestRequest {
            timeout: Duration::from_secs(config.timeout_secs),
            download_bytes: config.download_bytes,
            upload_bytes: config.upload_bytes,
        };
        let provider: Arc<dyn SpeedTestProvider> = match config.provider {
            ProviderChoice::Ookla => Arc::new(OoklaProvider::detect().await),
            ProviderChoice::Cloudflare => Arc::new(CloudflareProvider::default()),
            ProviderChoice::Auto => {
                let ookla = OoklaProvider::detect().await;
                if ookla.is_available() {
                    Arc::new(ookla)
                } else {
                    debug!("speedtest CLI not found, using Cloudflare");
                    Arc::new(CloudflareProvider::default())
                }
            }
        };
        Self::new(provider, request)
    }

    pub fn provider_id(&self) -> &'static str {
        self.provider.meta().id
    }

    pub async fn run(&self) -> Result<SpeedTestResult> {
        let meta = self.provider.meta();
        info!(provider = meta.id, "Running internet speed test...");

        if !self.provider.is_available() {
            return Err(ThroughputError::Unavailable {
                provider: meta.id,
                hint: meta.install_hint.unwrap_or("no install hint"),
            }
            .into());
        }

        let result = self.provider.run(&self.request).await?;
        if let Some(server) = &result.server {
            debug!(%server, "speed test server");
        }
        for line in report::summary_lines(&result) {
            info!("{}", line);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider::ProviderMeta;

    struct Canned {
        available: bool,
    }

    #[async_trait::async_trait]
    impl SpeedTestProvider for Canned {
        fn meta(&self) -> ProviderMeta {
            ProviderMeta {
                id: "canned",
                display_name: "Canned",
                description: "fixed values",
                install_hint: Some("nothing to install"),
                licensing_note: None,
            }
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn run(&self, _req: &SpeedTestRequest) -> Result<SpeedTestResult> {
            Ok(SpeedTestResult {
                provider_id: "canned".into(),
                download_mbps: Some(100.0),
                upload_mbps: Some(10.0),
                latency_ms: None,
                server: None,
                raw_json: None,
                timestamp: chrono::Utc::now(),
            })
        }
    }

    fn request() -> SpeedTestRequest {
        SpeedTestRequest {
            timeout: Duration::from_secs(1),
            download_bytes: 1,
            upload_bytes: 1,
        }
    }

    #[tokio::test]
    async fn test_checker_returns_provider_result() {
        let checker = BandwidthChecker::new(Arc::new(Canned { available: true }), request());
        let result = checker.run().await.unwrap();
        assert_eq!(result.download_mbps, Some(100.0));
        assert_eq!(checker.provider_id(), "canned");
    }

    #[tokio::test]
    async fn test_unavailable_provider_is_reported() {
        let checker = BandwidthChecker::new(Arc::new(Canned { available: false }), request());
        let err = checker.run().await.unwrap_err();
        assert!(err.to_string().contains("not available"));
    }

    #[tokio::test]
    async fn test_explicit_provider_choice() {
        let config = BandwidthConfig {
            provider: ProviderChoice::Cloudflare,
            ..Default::default()
        };
        let checker = BandwidthChecker::from_config(&config).await;
        assert_eq!(checker.provider_id(), "cloudflare");
    }
}
