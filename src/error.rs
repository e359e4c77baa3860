use thiserror::Error;

/// Startup/teardown failures. Never constructed from the realtime callback
/// path — conditions observed there are counted and logged, not returned
/// (see `resampler::Resampler::xruns` and friends).
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to open device bus {bus} address {address}: {reason}")]
    DeviceOpenFailed {
        bus: u8,
        address: u8,
        reason: String,
    },

    #[cfg(unix)]
    #[error("failed to open host client '{name}': {source}")]
    HostOpenFailed {
        name: String,
        source: jack::Error,
    },

    #[cfg(unix)]
    #[error("failed to register host port '{name}': {source}")]
    PortRegisterFailed { name: String, source: jack::Error },

    #[cfg(unix)]
    #[error("failed to activate host process callback: {source}")]
    ProcessCallbackInstallFailed { source: jack::Error },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
