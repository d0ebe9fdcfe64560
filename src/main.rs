use std::io::BufRead;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use burncheck::accel::{self, GpuCapability};
use burncheck::config::HarnessConfig;

#[derive(Parser)]
#[command(
    name = "burncheck",
    about = "CPU, memory and GPU burn-in followed by a network check",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (default: $BURNCHECK_CONFIG, then ./burncheck.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the duration of every stress phase, in seconds
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// Skip the GPU phase
    #[arg(long)]
    skip_gpu: bool,

    /// Skip the ping and speed test
    #[arg(long)]
    skip_network: bool,

    /// Exit without waiting for Enter
    #[arg(long)]
    no_pause: bool,

    /// Print the run summary as JSON when finished
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The configured level and format are not known yet, so config lookup
    // logs through a temporary subscriber.
    let bootstrap = tracing_subscriber::fmt()
        .with_timer(timer())
        .with_target(false)
        .with_env_filter(env_filter("info"))
        .finish();
    let resolved = tracing::subscriber::with_default(bootstrap, || {
        HarnessConfig::resolve(cli.config.as_deref())
    });
    let mut config = resolved?;
    if let Some(secs) = cli.duration {
        config = config.with_stress_duration(secs);
    }
    if cli.skip_gpu {
        config.gpu.enabled = false;
    }
    if cli.skip_network {
        config.connectivity.enabled = false;
        config.bandwidth.enabled = false;
    }
    config.validate()?;

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_timer(timer())
        .with_target(false)
        .with_env_filter(env_filter(&config.logging.level));
    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let gpu = if config.gpu.enabled {
        accel::probe()
    } else {
        GpuCapability::unavailable("disabled by configuration")
    };

    let summary = burncheck::run(config, gpu).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    if !cli.no_pause {
        println!("Press Enter to exit...");
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
    }

    Ok(())
}

fn timer() -> ChronoLocal {
    ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string())
}

/// `RUST_LOG` if set, else `fallback`.
fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}
