use super::{bytes_per_sec_to_mbps, ProviderMeta, SpeedTestProvider, SpeedTestRequest, SpeedTestResult};
use crate::throughput::ThroughputError;
use anyhow::Result;
use std::path::PathBuf;
use tracing::debug;

const PROGRAM: &str = "speedtest";

/// Speedtest.net through the official Ookla `speedtest` CLI.
///
/// Availability is checked once, asynchronously, by [`OoklaProvider::detect`].
pub struct OoklaProvider {
    program: PathBuf,
    available: bool,
}

impl OoklaProvider {
    /// Probe for the `speedtest` binary on `PATH`.
    pub async fn detect() -> Self {
        Self::detect_program(PROGRAM).await
    }

    /// Probe a specific binary with `--version`.
    pub async fn detect_program(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let available = tokio::process::Command::new(&program)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false);
        debug!(program = %program.display(), available, "speedtest CLI probe");
        Self { program, available }
    }
}

#[async_trait::async_trait]
impl SpeedTestProvider for OoklaProvider {
    fn meta(&self) -> ProviderMeta {
        ProviderMeta {
            id: "ookla-cli",
            display_name: "Speedtest.net (Ookla)",
            description: "Picks the nearest Speedtest.net server and measures download, upload and latency.",
            install_hint: Some("Install the official CLI: https://www.speedtest.net/apps/cli"),
            licensing_note: Some("Personal Non-Commercial Use Only (EULA)."),
        }
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn run(&self, req: &SpeedTestRequest) -> Result<SpeedTestResult> {
        // Dropping the future on timeout must take the child down with it.
        let child = tokio::process::Command::new(&self.program)
            .arg("--format=json")
            .arg("--accept-license")
            .arg("--accept-gdpr")
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(req.timeout, child)
            .await
            .map_err(|_| ThroughputError::Timeout {
                provider: "ookla-cli",
                secs: req.timeout.as_secs(),
            })??;

        if !output.status.success() {
            return Err(ThroughputError::ToolFailed {
                tool: "speedtest",
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        Ok(parse_result(json))
    }
}

/// Pull the measurements out of `speedtest --format=json` output.
/// `bandwidth` is reported in bytes per second.
fn parse_result(json: serde_json::Value) -> SpeedTestResult {
    let bandwidth = |section: &str| {
        json.get(section)
            .and_then(|v| v.get("bandwidth"))
            .and_then(|v| v.as_f64())
            .map(bytes_per_sec_to_mbps)
    };
    let download = bandwidth("download");
    let upload = bandwidth("upload");
    let latency = json
        .get("ping")
        .and_then(|v| v.get("latency"))
        .and_then(|v| v.as_f64());
    let server = json.get("server").and_then(|s| {
        let name = s.get("name")?.as_str()?;
        let location = s.get("location").and_then(|l| l.as_str()).unwrap_or("");
        Some(format!("{} {}", name, location).trim().to_string())
    });

    SpeedTestResult {
        provider_id: "ookla-cli".to_string(),
        download_mbps: download,
        upload_mbps: upload,
        latency_ms: latency,
        server,
        raw_json: Some(json),
        timestamp: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ookla_json() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{
                "type": "result",
                "ping": { "jitter": 0.4, "latency": 9.8 },
                "download": { "bandwidth": 11765000, "bytes": 120000000, "elapsed": 10000 },
                "upload": { "bandwidth": 2500000, "bytes": 25000000, "elapsed": 10000 },
                "server": { "name": "Example ISP", "location": "Frankfurt" }
            }"#,
        )
        .unwrap();
        let result = parse_result(json);
        assert!((result.download_mbps.unwrap() - 94.12).abs() < 1e-9);
        assert_eq!(result.upload_mbps, Some(20.0));
        assert_eq!(result.latency_ms, Some(9.8));
        assert_eq!(result.server.as_deref(), Some("Example ISP Frankfurt"));
    }

    #[cfg(unix)]
    fn fake_cli(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("speedtest");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_the_cli() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let program = fake_cli(
            dir.path(),
            &format!(
                "[ \"$1\" = --version ] && exit 0\nsleep 2\ntouch {}",
                marker.display()
            ),
        );

        let provider = OoklaProvider::detect_program(&program).await;
        assert!(provider.is_available());

        let req = SpeedTestRequest {
            timeout: std::time::Duration::from_millis(300),
            download_bytes: 1,
            upload_bytes: 1,
        };
        let err = provider.run(&req).await.unwrap_err();
        assert!(err.to_string().contains("did not finish"));

        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        assert!(!marker.exists(), "speedtest kept running after the timeout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_output_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_cli(
            dir.path(),
            r#"echo '{"download":{"bandwidth":1250000},"upload":{"bandwidth":125000}}'"#,
        );

        let provider = OoklaProvider::detect_program(&program).await;
        let req = SpeedTestRequest {
            timeout: std::time::Duration::from_secs(5),
            download_bytes: 1,
            upload_bytes: 1,
        };
        let result = provider.run(&req).await.unwrap();
        assert_eq!(result.download_mbps, Some(10.0));
        assert_eq!(result.upload_mbps, Some(1.0));
    }

    #[tokio::test]
    async fn test_missing_cli_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let provider = OoklaProvider::detect_program(dir.path().join("no-such-cli")).await;
        assert!(!provider.is_available());
    }

    #[test]
    fn test_parse_missing_sections() {
        let result = parse_result(serde_json::json!({ "type": "result" }));
        assert_eq!(result.download_mbps, None);
        assert_eq!(result.upload_mbps, None);
        assert_eq!(result.server, None);
    }
}
