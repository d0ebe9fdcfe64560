//! Speed test result formatting.

use super::provider::SpeedTestResult;

/// Megabits per second with two decimals.
pub fn format_mbps(mbps: f64) -> String {
    format!("{:.2} Mbps", mbps)
}

/// The operator-facing lines for one result, in log order.
pub fn summary_lines(result: &SpeedTestResult) -> Vec<String> {
    let render = |v: Option<f64>| match v {
        Some(mbps) => format_mbps(mbps),
        None => "not reported".to_string(),
    };

    let mut lines = vec![
        format!("Download Speed: {}", render(result.download_mbps)),
        format!("Upload Speed: {}", render(result.upload_mbps)),
    ];
    if let Some(latency) = result.latency_ms {
        lines.push(format!("Latency: {:.1} ms", latency));
    }
    lines
}
