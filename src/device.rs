//! Device-side abstraction (C6). The real USB device driver is an external
//! collaborator out of scope for this crate; this module defines the narrow
//! contract the resampler core needs from it and a mock implementation used
//! to drive the core's tests.

pub mod mock;

use crate::ring::Ring;
use crate::seqlock::Seqlock;
use std::sync::{Arc, Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Explicit total order `READY < BOOT < WAIT < RUN < STOP < ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DeviceStatus {
    Ready = 0,
    Boot = 1,
    Wait = 2,
    Run = 3,
    Stop = 4,
    Error = 5,
}

impl DeviceStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DeviceStatus::Ready,
            1 => DeviceStatus::Boot,
            2 => DeviceStatus::Wait,
            3 => DeviceStatus::Run,
            4 => DeviceStatus::Stop,
            _ => DeviceStatus::Error,
        }
    }
}

/// Immutable once the device is open.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub name: String,
    pub in_channels: usize,
    pub out_channels: usize,
    pub frame_size_h2o: usize,
    pub frame_size_o2h: usize,
    pub frames_per_transfer: u32,
    pub in_port_names: Vec<String>,
    pub out_port_names: Vec<String>,
}

impl DeviceDescriptor {
    pub fn new(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        frames_per_transfer: u32,
    ) -> Self {
        const SAMPLE_BYTES: usize = 4;
        Self {
            name: name.into(),
            in_channels,
            out_channels,
            frame_size_h2o: in_channels * SAMPLE_BYTES,
            frame_size_o2h: out_channels * SAMPLE_BYTES,
            frames_per_transfer,
            in_port_names: (0..in_channels).map(|i| format!("capture_{}", i + 1)).collect(),
            out_port_names: (0..out_channels).map(|i| format!("playback_{}", i + 1)).collect(),
        }
    }
}

/// Snapshot of device-side state the core cross-correlates its DLL against.
/// Published by the device thread under a seqlock, read by the host
/// callback without ever blocking.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceSnapshot {
    pub k_dev: u64,
    pub h2o_latency: u32,
    pub h2o_max_latency: u32,
}

/// The contract the resampler core requires from the device side (§4.6).
/// Implemented either by a real USB driver binding (out of scope here) or,
/// for tests, by `mock::MockDevice`.
pub trait DeviceHandle: Send + Sync {
    fn descriptor(&self) -> &DeviceDescriptor;

    fn status(&self) -> DeviceStatus;
    fn set_status(&self, status: DeviceStatus);

    fn o2h_audio(&self) -> &Ring;
    fn h2o_audio(&self) -> &Ring;
    fn o2h_midi(&self) -> &Ring;
    fn h2o_midi(&self) -> &Ring;

    fn snapshot(&self) -> DeviceSnapshot;
    fn publish_snapshot(&self, snapshot: DeviceSnapshot);

    fn set_h2o_audio_enable(&self, enabled: bool);
    fn is_h2o_audio_enable(&self) -> bool;

    /// Monotonic wall clock in seconds, as the device side would convert
    /// from its own microsecond clock.
    fn get_time(&self) -> f64;

    /// Activates the device side so it starts streaming. Implementations
    /// that activate fully at construction time may no-op here.
    fn activate(&self) -> Result<(), String>;

    /// Blocks the calling thread until the device status reaches `STOP` or
    /// `ERROR`, returning that terminal status. The main thread parks here
    /// between setup and teardown.
    fn wait(&self) -> DeviceStatus;

    /// Tears the device side down. Idempotent.
    fn destroy(&self);
}

/// Shared device-side state common to any `DeviceHandle` implementation,
/// reused by `mock::MockDevice` and suitable for a real driver binding too.
pub struct DeviceCore {
    descriptor: DeviceDescriptor,
    status: AtomicU8,
    o2h_audio: Ring,
    h2o_audio: Ring,
    o2h_midi: Ring,
    h2o_midi: Ring,
    snapshot: Seqlock<DeviceSnapshot>,
    h2o_enable: AtomicBool,
    /// Notified by `set_status` whenever the status changes, so `wait()`
    /// can block instead of polling. The guarded `()` carries no state of
    /// its own; the status itself is still read through the lock-free
    /// atomic above.
    status_changed: (Mutex<()>, Condvar),
}

impl DeviceCore {
    pub fn new(descriptor: DeviceDescriptor, audio_ring_capacity: usize, midi_ring_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            status: AtomicU8::new(DeviceStatus::Ready as u8),
            o2h_audio: Ring::new(audio_ring_capacity),
            h2o_audio: Ring::new(audio_ring_capacity),
            o2h_midi: Ring::new(midi_ring_capacity),
            h2o_midi: Ring::new(midi_ring_capacity),
            snapshot: Seqlock::new(DeviceSnapshot::default()),
            h2o_enable: AtomicBool::new(false),
            status_changed: (Mutex::new(()), Condvar::new()),
        })
    }
}

impl DeviceHandle for DeviceCore {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: DeviceStatus) {
        self.status.store(status as u8, Ordering::Release);
        // Only status transitions take this lock, not the per-cycle hot
        // path (audio rings, snapshot, xrun), so it stays off the RT
        // callback's steady-state cost.
        let _guard = self.status_changed.0.lock().unwrap();
        self.status_changed.1.notify_all();
    }

    fn o2h_audio(&self) -> &Ring {
        &self.o2h_audio
    }

    fn h2o_audio(&self) -> &Ring {
        &self.h2o_audio
    }

    fn o2h_midi(&self) -> &Ring {
        &self.o2h_midi
    }

    fn h2o_midi(&self) -> &Ring {
        &self.h2o_midi
    }

    fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot.read()
    }

    fn publish_snapshot(&self, snapshot: DeviceSnapshot) {
        self.snapshot.write(snapshot);
    }

    fn set_h2o_audio_enable(&self, enabled: bool) {
        self.h2o_enable.store(enabled, Ordering::Release);
    }

    fn is_h2o_audio_enable(&self) -> bool {
        self.h2o_enable.load(Ordering::Acquire)
    }

    fn get_time(&self) -> f64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn activate(&self) -> Result<(), String> {
        Ok(())
    }

    fn wait(&self) -> DeviceStatus {
        let mut guard = self.status_changed.0.lock().unwrap();
        loop {
            let current = self.status();
            if current >= DeviceStatus::Stop {
                return current;
            }
            guard = self.status_changed.1.wait(guard).unwrap();
        }
    }

    fn destroy(&self) {
        self.set_status(DeviceStatus::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ordering_matches_spec() {
        assert!(DeviceStatus::Ready < DeviceStatus::Boot);
        assert!(DeviceStatus::Boot < DeviceStatus::Wait);
        assert!(DeviceStatus::Wait < DeviceStatus::Run);
        assert!(DeviceStatus::Run < DeviceStatus::Stop);
        assert!(DeviceStatus::Stop < DeviceStatus::Error);
    }

    #[test]
    fn wait_blocks_until_set_status_reaches_stop() {
        let core = DeviceCore::new(DeviceDescriptor::new("test", 1, 1, 8), 4096, 256);
        let waiter = core.clone();
        let handle = std::thread::spawn(move || waiter.wait());
        std::thread::sleep(std::time::Duration::from_millis(20));
        core.set_status(DeviceStatus::Stop);
        let result = handle.join().unwrap();
        assert_eq!(result, DeviceStatus::Stop);
    }

    #[test]
    fn snapshot_round_trips_through_seqlock() {
        let core = DeviceCore::new(DeviceDescriptor::new("test", 2, 2, 48), 4096, 256);
        core.publish_snapshot(DeviceSnapshot {
            k_dev: 42,
            h2o_latency: 10,
            h2o_max_latency: 20,
        });
        let snap = core.snapshot();
        assert_eq!(snap.k_dev, 42);
        assert_eq!(snap.h2o_latency, 10);
    }
}
