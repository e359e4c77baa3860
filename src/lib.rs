pub mod config;
pub mod device;
pub mod dll;
pub mod error;
#[cfg(unix)]
pub mod hw;
pub mod midi;
pub mod mutex;
pub mod resample;
pub mod resampler;
pub mod ring;
pub mod rt;
pub mod seqlock;

use config::BridgeConfig;
use device::{DeviceHandle, DeviceStatus};
use error::BridgeError;
use mutex::UnsafeMutex;
use resampler::Resampler;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::info;

/// Opens the host client against `device` and runs until the host server
/// shuts the bridge down or a fatal resampler error parks the device in
/// `DeviceStatus::Error`/`Stop`. Mirrors the original client's
/// open → activate → `wait()` → teardown sequence, with the device side
/// supplied by the caller rather than opened here (device opening is an
/// external collaborator's responsibility).
#[cfg(unix)]
pub async fn run(config: BridgeConfig, device: Arc<dyn DeviceHandle>) -> Result<(), BridgeError> {
    config.validate()?;

    let descriptor = device.descriptor();
    let resampler = Arc::new(UnsafeMutex::new(Resampler::new(
        48000.0,
        48000.0,
        128,
        descriptor.in_channels,
        descriptor.out_channels,
        config.quality,
    )));

    device.activate().map_err(|reason| BridgeError::DeviceOpenFailed {
        bus: config.bus,
        address: config.address,
        reason,
    })?;

    let bridge = hw::jack::JackBridge::open(&config.client_name, device.clone(), resampler, config.priority)?;

    let wait_device = device.clone();
    let wait_handle = tokio::task::spawn_blocking(move || wait_device.wait());

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    info!("owbridge running; press ctrl-c to stop");
    tokio::select! {
        _ = shutdown_rx => {
            device.set_status(DeviceStatus::Stop);
        }
        result = wait_handle => {
            if let Ok(status) = result {
                info!("device reported terminal status {status:?}");
            }
        }
    }
    drop(bridge);
    device.destroy();
    Ok(())
}
