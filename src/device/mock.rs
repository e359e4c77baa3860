//! Synthetic device used only by this crate's own tests. Stands in for the
//! external USB collaborator by running a generator thread that advances a
//! device-side frame counter and streams a synthesized waveform into the
//! O→H ring, mirroring the cadence a real device thread would have.

use super::{DeviceCore, DeviceDescriptor, DeviceHandle, DeviceSnapshot, DeviceStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

pub struct MockDevice {
    core: Arc<DeviceCore>,
    stop: Arc<AtomicBool>,
    generator: Option<JoinHandle<()>>,
}

impl MockDevice {
    /// Spawns a background thread producing a sine wave at `f_dev` into the
    /// O→H ring and draining whatever arrives on the H→O ring, so the
    /// resampler's rings never deadlock during a test.
    pub fn spawn(out_channels: usize, in_channels: usize, f_dev: f64) -> Self {
        let descriptor = DeviceDescriptor::new("mock", in_channels, out_channels, 48);
        let core = DeviceCore::new(descriptor, 16384 * 4 * out_channels.max(1), 4096);
        let stop = Arc::new(AtomicBool::new(false));

        let gen_core = core.clone();
        let gen_stop = stop.clone();
        let generator = std::thread::spawn(move || {
            let frame_bytes = out_channels.max(1) * 4;
            let mut phase = 0.0_f64;
            let phase_step = 2.0 * std::f64::consts::PI * 1000.0 / f_dev;
            let mut k_dev = 0u64;
            let mut drain_scratch = vec![0_u8; 4096];
            let period = std::time::Duration::from_secs_f64(64.0 / f_dev);

            // Signals readiness before the first frame is produced:
            // `compute_ratios` only leaves READY once it observes the
            // device in WAIT (it drives the device to BOOT itself on the
            // first cycle). Without this the device sits in READY forever
            // and the bridge never reaches RUN.
            if gen_core.status() < DeviceStatus::Wait {
                gen_core.set_status(DeviceStatus::Wait);
            }

            while !gen_stop.load(Ordering::Relaxed) {
                let mut chunk = Vec::with_capacity(64 * frame_bytes);
                for _ in 0..64 {
                    let sample = (phase.sin() as f32).to_le_bytes();
                    for _ in 0..out_channels.max(1) {
                        chunk.extend_from_slice(&sample);
                    }
                    phase += phase_step;
                }
                gen_core.o2h_audio().write(&chunk);
                while gen_core.h2o_audio().read_space() > 0 {
                    let n = gen_core.h2o_audio().read(&mut drain_scratch);
                    if n == 0 {
                        break;
                    }
                }
                k_dev += 64;
                gen_core.publish_snapshot(DeviceSnapshot {
                    k_dev,
                    h2o_latency: gen_core.h2o_audio().read_space() as u32,
                    h2o_max_latency: 0,
                });
                std::thread::sleep(period);
            }
        });

        Self {
            core,
            stop,
            generator: Some(generator),
        }
    }

    pub fn handle(&self) -> Arc<DeviceCore> {
        self.core.clone()
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.core.destroy();
        if let Some(handle) = self.generator.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_advances_device_snapshot() {
        let dev = MockDevice::spawn(2, 2, 48000.0);
        std::thread::sleep(std::time::Duration::from_millis(50));
        let snap = dev.handle().snapshot();
        assert!(snap.k_dev > 0);
    }
}
