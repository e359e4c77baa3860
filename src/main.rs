use clap::Parser;
use owbridge::config::{BridgeConfig, DEFAULT_BLOCKS_PER_TRANSFER, DEFAULT_QUALITY};
use tracing_subscriber::EnvFilter;

/// Thin argv-to-config translation. Device discovery, interactive setup,
/// and persistence are out of scope — this binary only builds the
/// configuration object the core expects and hands it off.
#[derive(Debug, Parser)]
#[command(name = "owbridge", about = "USB device / host audio server resampling bridge")]
struct Cli {
    /// USB bus number of the device.
    #[arg(long, default_value_t = 0)]
    bus: u8,

    /// USB device address on that bus.
    #[arg(long, default_value_t = 0)]
    address: u8,

    /// USB transfer depth in blocks.
    #[arg(long, default_value_t = DEFAULT_BLOCKS_PER_TRANSFER)]
    blocks_per_transfer: u32,

    /// Resampling quality, 0 (fastest) .. 4 (cleanest).
    #[arg(long, default_value_t = DEFAULT_QUALITY)]
    quality: u8,

    /// Realtime scheduling priority, or -1 to use the host server's default.
    #[arg(long, default_value_t = -1)]
    priority: i32,

    /// Client name registered with the host audio server.
    #[arg(long, default_value = "owbridge")]
    client_name: String,
}

impl From<Cli> for BridgeConfig {
    fn from(cli: Cli) -> Self {
        Self {
            bus: cli.bus,
            address: cli.address,
            blocks_per_transfer: cli.blocks_per_transfer,
            quality: cli.quality,
            priority: cli.priority,
            client_name: cli.client_name,
        }
    }
}

#[cfg(unix)]
#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config: BridgeConfig = Cli::parse().into();
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e:#}");
        return std::process::ExitCode::FAILURE;
    }

    // The real USB device is an external collaborator out of scope for this
    // crate; this binary drives the bridge against the in-process synthetic
    // device so the host-side plumbing above is runnable end to end.
    let device = owbridge::device::mock::MockDevice::spawn(2, 2, 48000.0);
    let handle = device.handle();

    match owbridge::run(config, handle).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("owbridge failed: {e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

#[cfg(not(unix))]
fn main() -> std::process::ExitCode {
    eprintln!("owbridge's host adapter is only available on unix targets (jack-audio-connection-kit)");
    std::process::ExitCode::FAILURE
}
