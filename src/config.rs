use serde::{Deserialize, Serialize};

/// Default USB transfer depth, matching the original device client's
/// `blocks_per_transfer` default.
pub const DEFAULT_BLOCKS_PER_TRANSFER: u32 = 8;

/// `rubato` quality knob, 0 (fastest/roughest) .. 4 (slowest/cleanest).
pub const DEFAULT_QUALITY: u8 = 2;

/// Configuration object handed to the core by the external CLI collaborator.
/// Loading this from argv/env/files is out of scope; this struct is only the
/// shape the core expects to receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// USB bus number of the device.
    pub bus: u8,
    /// USB device address on that bus.
    pub address: u8,
    /// Number of isochronous blocks queued per USB transfer.
    pub blocks_per_transfer: u32,
    /// Resampling quality, 0..=4.
    pub quality: u8,
    /// Realtime scheduling priority for the host client's worker threads.
    /// `-1` means "let the host server pick its default".
    pub priority: i32,
    /// Client name registered with the host audio server.
    pub client_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bus: 0,
            address: 0,
            blocks_per_transfer: DEFAULT_BLOCKS_PER_TRANSFER,
            quality: DEFAULT_QUALITY,
            priority: -1,
            client_name: "owbridge".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), crate::error::BridgeError> {
        if self.quality > 4 {
            return Err(crate::error::BridgeError::InvalidConfig(format!(
                "quality {} out of range 0..=4",
                self.quality
            )));
        }
        if self.blocks_per_transfer == 0 {
            return Err(crate::error::BridgeError::InvalidConfig(
                "blocks_per_transfer must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(BridgeConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_quality() {
        let mut cfg = BridgeConfig::default();
        cfg.quality = 9;
        assert!(cfg.validate().is_err());
    }
}
