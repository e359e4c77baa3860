//! Pull-based asynchronous sample-rate converter.
//!
//! `rubato` resamples in fixed-size chunks; the rest of the bridge needs a
//! reader-callback contract that can be asked for an arbitrary number of
//! output frames at a (possibly changing) ratio, the way libsamplerate's
//! `src_callback_read` works. `AsyncSrc` bridges the two: it pulls input
//! through a caller-supplied closure, runs it through `rubato` in whole
//! chunks, and buffers surplus output samples in an internal FIFO so a
//! request for fewer frames than a chunk produces doesn't need to re-run the
//! converter.

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::collections::VecDeque;

/// Maps the bridge's integer quality knob (0..=4) onto `rubato`'s sinc
/// interpolation parameters; higher quality trades CPU for a longer filter
/// and denser oversampling.
fn params_for_quality(quality: u8) -> SincInterpolationParameters {
    let (sinc_len, oversampling_factor, window) = match quality.min(4) {
        0 => (64, 64, WindowFunction::Hann),
        1 => (128, 128, WindowFunction::Hann),
        2 => (192, 160, WindowFunction::Blackman),
        3 => (256, 192, WindowFunction::BlackmanHarris2),
        _ => (384, 256, WindowFunction::BlackmanHarris2),
    };
    SincInterpolationParameters {
        sinc_len,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor,
        window,
    }
}

/// Asynchronous sample-rate converter for one direction (either O→H or
/// H→O), driven by a reader closure rather than a fixed input buffer.
pub struct AsyncSrc {
    inner: SincFixedIn<f32>,
    channels: usize,
    chunk_frames: usize,
    input_scratch: Vec<Vec<f32>>,
    output_fifo: Vec<VecDeque<f32>>,
    last_sample: Vec<f32>,
}

impl AsyncSrc {
    /// `ratio` is the initial output/input rate ratio; `max_ratio_relative`
    /// bounds how far `set_ratio` may move away from it without rebuilding
    /// the internal filter bank.
    pub fn new(channels: usize, quality: u8, ratio: f64, chunk_frames: usize) -> Self {
        let params = params_for_quality(quality);
        let inner = SincFixedIn::<f32>::new(ratio, 4.0, params, chunk_frames, channels)
            .expect("sinc resampler parameters are always in range for this crate's quality table");
        Self {
            input_scratch: vec![Vec::with_capacity(chunk_frames); channels],
            output_fifo: vec![VecDeque::with_capacity(chunk_frames * 2); channels],
            last_sample: vec![0.0; channels],
            inner,
            channels,
            chunk_frames,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Updates the conversion ratio for subsequent `read` calls.
    pub fn set_ratio(&mut self, ratio: f64) {
        let _ = self.inner.set_resample_ratio(ratio, true);
    }

    fn buffered_frames(&self) -> usize {
        self.output_fifo[0].len()
    }

    /// Runs one `rubato` chunk, pulling `self.chunk_frames` input frames
    /// from `reader`. `reader` fills `scratch` (interleaved, `channels`
    /// wide) and returns the number of frames actually produced; 0 means
    /// "no data yet", in which case the converter is fed silence so it
    /// keeps its internal state warm without stalling.
    fn run_one_chunk(&mut self, reader: &mut dyn FnMut(&mut [f32], usize) -> usize) {
        let mut interleaved = vec![0.0_f32; self.chunk_frames * self.channels];
        let produced = reader(&mut interleaved, self.chunk_frames);
        for ch in 0..self.channels {
            self.input_scratch[ch].clear();
            for frame in 0..self.chunk_frames {
                let sample = if frame < produced {
                    interleaved[frame * self.channels + ch]
                } else {
                    0.0
                };
                self.input_scratch[ch].push(sample);
            }
        }

        let waves_out = match self.inner.process(&self.input_scratch, None) {
            Ok(out) => out,
            Err(_) => {
                // Conversion failed for this chunk; emit silence rather than
                // stalling the pull side indefinitely.
                vec![vec![0.0; self.chunk_frames]; self.channels]
            }
        };
        for (ch, wave) in waves_out.into_iter().enumerate() {
            if let Some(&last) = wave.last() {
                self.last_sample[ch] = last;
            }
            self.output_fifo[ch].extend(wave);
        }
    }

    /// Pulls exactly `requested_frames` interleaved output frames, running
    /// as many input chunks through `rubato` as needed. On success the
    /// returned buffer always has `requested_frames * channels` samples.
    pub fn read(
        &mut self,
        requested_frames: usize,
        ratio: f64,
        reader: &mut dyn FnMut(&mut [f32], usize) -> usize,
    ) -> Vec<f32> {
        self.set_ratio(ratio);
        while self.buffered_frames() < requested_frames {
            self.run_one_chunk(reader);
        }
        let mut out = Vec::with_capacity(requested_frames * self.channels);
        for _ in 0..requested_frames {
            for ch in 0..self.channels {
                let s = self.output_fifo[ch].pop_front().unwrap_or(self.last_sample[ch]);
                out.push(s);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_returns_exactly_requested_frames() {
        let mut src = AsyncSrc::new(2, 2, 1.0, 64);
        let mut fed = 0usize;
        let out = src.read(128, 1.0, &mut |buf, max| {
            let n = max.min(256 - fed);
            for i in 0..n {
                buf[i * 2] = 0.1;
                buf[i * 2 + 1] = -0.1;
            }
            fed += n;
            n
        });
        assert_eq!(out.len(), 128 * 2);
    }

    #[test]
    fn silence_on_empty_reader() {
        let mut src = AsyncSrc::new(1, 0, 1.0, 32);
        let out = src.read(32, 1.0, &mut |_buf, _max| 0);
        assert_eq!(out.len(), 32);
    }
}
