//! End-to-end scenarios from the testable-properties list, driven directly
//! against `MockDevice` with a synthetic host-cycle loop in place of a real
//! JACK graph: the graph itself contributes nothing these scenarios need to
//! observe — ratio convergence, status transitions, xrun and MIDI handling
//! all live in the resampler core. The negative-ratio fault scenario is
//! covered by an inline unit test in `resampler.rs` instead, since forcing
//! DLL divergence needs access to the DLL's private state.

use owbridge::device::mock::MockDevice;
use owbridge::device::{DeviceHandle, DeviceStatus};
use owbridge::midi::{self, UsbMidiEvent};
use owbridge::resampler::{Resampler, ResamplerStatus};
use std::sync::Arc;

fn run_until_run_or_timeout(r: &mut Resampler, device: &Arc<dyn DeviceHandle>, dt: f64, max_seconds: f64) -> f64 {
    let mut t = 0.0;
    let max_cycles = (max_seconds / dt).ceil() as usize;
    for _ in 0..max_cycles {
        let skip = r.compute_ratios(t, device.as_ref());
        if !skip {
            let _ = r.o2h(device.as_ref());
        }
        t += dt;
        if r.status() == ResamplerStatus::Run {
            break;
        }
    }
    t
}

#[test]
fn cold_start_matched_rates_reaches_run() {
    let device: Arc<dyn DeviceHandle> = MockDevice::spawn(2, 2, 48000.0);
    let mut r = Resampler::new(48000.0, 48000.0, 128, 2, 2, 2);
    device.set_status(DeviceStatus::Wait);

    run_until_run_or_timeout(&mut r, &device, 128.0 / 48000.0, 8.0);

    assert_eq!(r.status(), ResamplerStatus::Run);
    assert!((0.99999..=1.00001).contains(&r.o2h_ratio()));
    assert_eq!(device.status(), DeviceStatus::Run);
}

#[test]
fn host_at_96khz_ratio_is_one_half() {
    let device: Arc<dyn DeviceHandle> = MockDevice::spawn(2, 2, 48000.0);
    let mut r = Resampler::new(96000.0, 48000.0, 256, 2, 2, 2);
    device.set_status(DeviceStatus::Wait);

    run_until_run_or_timeout(&mut r, &device, 256.0 / 96000.0, 10.0);

    assert_eq!(r.status(), ResamplerStatus::Run);
    assert!((r.o2h_ratio() - 0.5).abs() < 0.01, "o2h_ratio={}", r.o2h_ratio());
    assert!((r.h2o_ratio() - 2.0).abs() < 0.04, "h2o_ratio={}", r.h2o_ratio());
}

#[test]
fn inverse_ratio_invariant_holds_through_run() {
    let device: Arc<dyn DeviceHandle> = MockDevice::spawn(2, 2, 48000.0);
    let mut r = Resampler::new(48000.0, 48000.0, 128, 2, 2, 2);
    device.set_status(DeviceStatus::Wait);

    let dt = 128.0 / 48000.0;
    for i in 0..2000 {
        let t = i as f64 * dt;
        let skip = r.compute_ratios(t, device.as_ref());
        if !skip {
            let out = r.o2h(device.as_ref());
            assert_eq!(out.len(), 128 * 2, "frame accounting violated at cycle {i}");
            assert!((r.o2h_ratio() * r.h2o_ratio() - 1.0).abs() < 1e-9);
        }
    }
}

#[test]
fn buffer_size_change_mid_run_recovers() {
    let device: Arc<dyn DeviceHandle> = MockDevice::spawn(2, 2, 48000.0);
    let mut r = Resampler::new(48000.0, 48000.0, 256, 2, 2, 2);
    device.set_status(DeviceStatus::Wait);

    run_until_run_or_timeout(&mut r, &device, 256.0 / 48000.0, 10.0);
    assert_eq!(r.status(), ResamplerStatus::Run);

    // Host announces a buffer size change; this is what `apply_pending_reconfig`
    // does from inside the RT callback once the notification thread stores it.
    r.reset_buffers(512, 2, 2);
    r.reset_dll(48000.0, device.as_ref());
    assert_eq!(device.status(), DeviceStatus::Ready);

    let dt = 512.0 / 48000.0;
    let mut t = 0.0;
    for _ in 0..(10.0 / dt) as usize {
        let skip = r.compute_ratios(t, device.as_ref());
        if !skip {
            let out = r.o2h(device.as_ref());
            assert_eq!(out.len(), 512 * 2);
        }
        t += dt;
        if r.status() == ResamplerStatus::Run {
            break;
        }
    }
    assert_eq!(r.status(), ResamplerStatus::Run);
}

#[test]
fn induced_xrun_inflates_ratio_then_recovers() {
    let device: Arc<dyn DeviceHandle> = MockDevice::spawn(2, 2, 48000.0);
    let mut r = Resampler::new(48000.0, 48000.0, 128, 2, 2, 2);
    device.set_status(DeviceStatus::Wait);

    let dt = 128.0 / 48000.0;
    let mut t = run_until_run_or_timeout(&mut r, &device, dt, 10.0);
    assert_eq!(r.status(), ResamplerStatus::Run);

    let nominal_ratio = r.o2h_ratio();
    r.increment_xrun();
    t += dt;
    let skip = r.compute_ratios(t, device.as_ref());
    assert!(!skip);
    let _ = r.o2h(device.as_ref());
    assert!(
        (r.o2h_ratio() / (nominal_ratio * 2.0) - 1.0).abs() < 0.01,
        "expected ratio inflated by 1+xruns, got {} (nominal was {})",
        r.o2h_ratio(),
        nominal_ratio
    );
    assert_eq!(r.lat_max(), 0);

    for _ in 0..(4.0 / dt) as usize {
        let skip = r.compute_ratios(t, device.as_ref());
        if !skip {
            let _ = r.o2h(device.as_ref());
        }
        t += dt;
    }
    assert!(r.o2h_ratio() > 0.0);
}

#[test]
fn midi_forwarding_preserves_monotonic_frame_offsets() {
    let us_per_frame = 1_000_000.0 / 48000.0;
    let current_frame_time_us: u64 = 1_000_000;

    let events = [
        UsbMidiEvent {
            device_time_us: current_frame_time_us,
            bytes: [0x09, 0x90, 0x40, 0x7f],
        },
        UsbMidiEvent {
            device_time_us: current_frame_time_us + 10,
            bytes: [0x09, 0x90, 0x41, 0x7f],
        },
        UsbMidiEvent {
            device_time_us: current_frame_time_us + 1000,
            bytes: [0x09, 0x90, 0x42, 0x7f],
        },
    ];

    let offsets: Vec<u32> = events
        .iter()
        .map(|e| midi::o2h_frame_offset(current_frame_time_us, e.device_time_us, us_per_frame))
        .collect();

    assert_eq!(offsets[0], 0);
    assert_eq!(offsets[1], 0);
    assert!((offsets[2] as i64 - 48).abs() <= 1);

    let forward_count = midi::monotonic_prefix_len(&offsets);
    assert_eq!(forward_count, 3, "offsets are non-decreasing, all three forward in one cycle");
}
