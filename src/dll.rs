//! Second-order delay-locked loop tracking `ratio = F_dev / F_host` from
//! timestamped frame counters observed on both sides of the bridge.

use std::f64::consts::PI;

pub const STARTUP_TIME_SECS: f64 = 5.0;
pub const LOG_TIME_SECS: f64 = 2.0;
pub const RATIO_DIFF_THRES: f64 = 1e-5;

/// Loop bandwidth used while entering each status, narrowing over time so
/// the loop converges fast then settles quietly.
pub const BANDWIDTH_BOOT: f64 = 1.0;
pub const BANDWIDTH_TUNE: f64 = 0.05;
pub const BANDWIDTH_RUN: f64 = 0.02;

#[derive(Debug, Clone)]
pub struct Dll {
    f_host: f64,
    f_dev: f64,
    bufsize: u32,

    b: f64,
    c: f64,

    ratio: f64,
    secondary: f64,
    ratio_avg: f64,
    last_ratio_avg: f64,
    ratio_sum: f64,
    ratio_sum_count: u64,

    k_host: u64,
    first_run: bool,

    log_control_cycles: u64,
}

impl Dll {
    /// `init` in spec terms: called once per `F_host` change in READY.
    pub fn init(f_host: f64, f_dev: f64, bufsize: u32, _frames_per_transfer: u32) -> Self {
        let mut dll = Self {
            f_host,
            f_dev,
            bufsize,
            b: 0.0,
            c: 0.0,
            ratio: f_dev / f_host,
            secondary: 0.0,
            ratio_avg: f_dev / f_host,
            last_ratio_avg: f_dev / f_host,
            ratio_sum: 0.0,
            ratio_sum_count: 0,
            k_host: 0,
            first_run: true,
        log_control_cycles: 0,
        };
        dll.log_control_cycles = dll.cycles_for_seconds(STARTUP_TIME_SECS);
        dll
    }

    pub fn cycles_for_seconds(&self, seconds: f64) -> u64 {
        ((seconds * self.f_host / self.bufsize as f64).round() as u64).max(1)
    }

    pub fn log_control_cycles(&self) -> u64 {
        self.log_control_cycles
    }

    pub fn set_log_control_cycles(&mut self, cycles: u64) {
        self.log_control_cycles = cycles;
    }

    /// Rescales the running ratio for a new nominal host rate without
    /// resetting the filter state, used when `reset_dll` is called while
    /// already past READY.
    pub fn rescale(&mut self, f_host_new: f64) {
        self.ratio = self.last_ratio_avg * f_host_new / self.f_host;
        self.f_host = f_host_new;
        self.log_control_cycles = self.cycles_for_seconds(STARTUP_TIME_SECS);
    }

    pub fn set_bufsize(&mut self, bufsize: u32) {
        self.bufsize = bufsize;
    }

    /// Derives `b`/`c` from bandwidth `omega` (Hz) and the current period.
    pub fn set_loop_filter(&mut self, omega_bw: f64) {
        let period = self.bufsize as f64 / self.f_host;
        let omega = 2.0 * PI * omega_bw * period;
        self.b = std::f64::consts::SQRT_2 * omega;
        self.c = omega * omega;
    }

    /// Computes the phase error between the observed host frame count and
    /// the device-side frame count, scaled by the nominal ratio.
    pub fn update_err(&self, k_dev: u64) -> f64 {
        let expected = self.k_host as f64 * self.f_dev / self.f_host;
        k_dev as f64 - expected
    }

    pub fn first_time_run(&mut self, err: f64) {
        self.secondary = err * self.c / self.b.max(1e-12);
        self.first_run = false;
    }

    pub fn is_first_run(&self) -> bool {
        self.first_run
    }

    /// Advances the filter given the current phase error and updates
    /// `ratio`.
    pub fn update(&mut self, err: f64) {
        self.ratio += self.b * err / self.f_host;
        self.secondary += self.c * err / self.f_host;
        self.ratio += self.secondary;
        if self.ratio > 0.0 {
            self.ratio_sum += self.ratio;
            self.ratio_sum_count += 1;
        }
    }

    pub fn advance_k_host(&mut self, frames: u64) {
        self.k_host = self.k_host.wrapping_add(frames);
    }

    pub fn k_host(&self) -> u64 {
        self.k_host
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn ratio_avg(&self) -> f64 {
        self.ratio_avg
    }

    pub fn last_ratio_avg(&self) -> f64 {
        self.last_ratio_avg
    }

    /// `ratio_avg = mean(last n ratios)`; stashes the previous average into
    /// `last_ratio_avg` for the TUNE→RUN convergence check.
    pub fn calc_avg(&mut self) {
        self.last_ratio_avg = self.ratio_avg;
        if self.ratio_sum_count > 0 {
            self.ratio_avg = self.ratio_sum / self.ratio_sum_count as f64;
        }
        self.ratio_sum = 0.0;
        self.ratio_sum_count = 0;
    }

    pub fn has_converged(&self) -> bool {
        (self.ratio_avg - self.last_ratio_avg).abs() < RATIO_DIFF_THRES
    }

    pub fn f_host(&self) -> f64 {
        self.f_host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initializes_to_nominal_ratio() {
        let dll = Dll::init(48000.0, 48000.0, 128, 8);
        assert!((dll.ratio() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn loop_filter_coefficients_scale_with_bandwidth() {
        let mut dll = Dll::init(48000.0, 48000.0, 128, 8);
        dll.set_loop_filter(BANDWIDTH_BOOT);
        let (b_boot, c_boot) = (dll.b, dll.c);
        dll.set_loop_filter(BANDWIDTH_RUN);
        let (b_run, c_run) = (dll.b, dll.c);
        assert!(b_boot > b_run);
        assert!(c_boot > c_run);
    }

    #[test]
    fn converges_toward_constant_offset() {
        let mut dll = Dll::init(48000.0, 48000.0, 128, 8);
        dll.set_loop_filter(BANDWIDTH_BOOT);
        let err = dll.update_err(dll.k_host() + 10);
        dll.first_time_run(err);
        for _ in 0..2000 {
            let err = dll.update_err(dll.k_host() + 10);
            dll.update(err);
            dll.advance_k_host(128);
        }
        assert!(dll.ratio() > 0.0);
        assert!((dll.ratio() - 1.0).abs() < 0.05);
    }

    #[test]
    fn rescale_preserves_last_known_average() {
        let mut dll = Dll::init(48000.0, 48000.0, 128, 8);
        dll.last_ratio_avg = 1.0;
        dll.rescale(96000.0);
        assert!((dll.ratio() - 0.5).abs() < 1e-9);
    }
}
