use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use super::validate_target;

/// Result of one ping run. `raw_output` is the tool's stdout, untouched.
#[derive(Debug, Clone, Serialize)]
pub struct PingReport {
    pub host: String,
    pub count: u32,
    pub success: bool,
    pub raw_output: String,
    pub avg_rtt_ms: Option<f64>,
}

/// Arguments for the host OS's ping: `-n` on Windows, `-c` elsewhere.
pub fn ping_args(count: u32, windows: bool) -> [String; 2] {
    let flag = if windows { "-n" } else { "-c" };
    [flag.to_string(), count.to_string()]
}

/// Ping `host` `count` times with the system ping utility.
///
/// An unreachable host is not an error: it shows up in `raw_output` and
/// `success`. Only a failure to run ping at all is returned as `Err`.
pub async fn ping(host: &str, count: u32) -> Result<PingReport> {
    validate_target(host).with_context(|| format!("refusing to ping {:?}", host))?;

    info!("Pinging {} ({} times)...", host, count);

    let output = tokio::process::Command::new("ping")
        .args(ping_args(count, cfg!(windows)))
        .arg(host)
        .output()
        .await
        .context("Failed to execute ping")?;

    let raw_output = String::from_utf8_lossy(&output.stdout).into_owned();
    let success = output.status.success();
    let avg_rtt_ms = if success {
        let rtt = extract_rtt(&raw_output);
        if rtt.is_none() {
            warn!(%host, "ping succeeded but no RTT could be parsed");
        }
        rtt
    } else {
        None
    };

    Ok(PingReport {
        host: host.to_string(),
        count,
        success,
        raw_output,
        avg_rtt_ms,
    })
}

/// Average RTT from a ping summary, falling back to the first reply time.
fn extract_rtt(output: &str) -> Option<f64> {
    // Linux / macOS: "rtt min/avg/max/mdev = 14.1/14.5/15.0/0.3 ms"
    //                "round-trip min/avg/max/stddev = ..."
    for line in output.lines() {
        if let Some(pos) = line.find(" = ") {
            let head = &line[..pos];
            if head.contains("rtt") || head.contains("round-trip") {
                let parts: Vec<&str> = line[pos + 3..].split('/').collect();
                if parts.len() >= 2 {
                    if let Ok(avg) = parts[1].trim().parse::<f64>() {
                        return Some(avg);
                    }
                }
            }
        }
    }

    // Windows: "Minimum = 14ms, Maximum = 15ms, Average = 14ms"
    if let Some(pos) = output.find("Average = ") {
        let rest = &output[pos + 10..];
        let digits: String = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        if let Ok(avg) = digits.parse::<f64>() {
            return Some(avg);
        }
    }

    // Single reply: "... time=12.3 ms"
    if let Some(pos) = output.find("time=") {
        let rest = &output[pos + 5..];
        let value: String = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        return value.parse::<f64>().ok();
    }

    None
}
