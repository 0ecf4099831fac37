//! Analyser node: time-domain and frequency-domain bytes of the live signal.
//!
//! The audio graph feeds mono samples into a [`SampleRing`]; the control side
//! copies the ring and turns it into bytes with an [`AnalyserNode`], so FFT work
//! never runs inside the output callback.
//!
//! Conversions follow the Web Audio `AnalyserNode`:
//! - time domain: `128 * (1 + x)`, clamped to `0..=255`
//! - frequency: Blackman window, FFT, magnitude / N, exponential smoothing over
//!   frames, `20 * log10`, then scaled from `[min_decibels, max_decibels]` to `0..=255`

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::config::AnalyserConfig;

/// Fixed-size ring of the most recent mono samples.
#[derive(Clone, Debug)]
pub struct SampleRing {
    buf: Vec<f32>,
    write: usize,
}

impl SampleRing {
    pub fn new(len: usize) -> Self {
        Self {
            buf: vec![0.0; len.max(1)],
            write: 0,
        }
    }

    pub fn push(&mut self, sample: f32) {
        self.buf[self.write] = sample;
        self.write = (self.write + 1) % self.buf.len();
    }

    /// Copy the ring into `out`, oldest sample first.
    pub fn copy_ordered(&self, out: &mut Vec<f32>) {
        out.clear();
        out.extend_from_slice(&self.buf[self.write..]);
        out.extend_from_slice(&self.buf[..self.write]);
    }

    pub fn clear(&mut self) {
        self.buf.fill(0.0);
        self.write = 0;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Byte conversions plus smoothing state for one analyser.
pub struct AnalyserNode {
    fft_size: usize,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl AnalyserNode {
    pub fn new(cfg: &AnalyserConfig) -> Self {
        let fft_size = cfg.fft_size.max(32);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        Self {
            fft_size,
            smoothing: cfg.smoothing_time_constant.clamp(0.0, 1.0),
            min_db: cfg.min_decibels,
            max_db: cfg.max_decibels,
            fft,
            window: blackman_window(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Ring sized for this analyser.
    pub fn ring(&self) -> SampleRing {
        SampleRing::new(self.fft_size)
    }

    /// Fill `out` with time-domain bytes for the newest `fft_size` samples.
    pub fn byte_time_domain(&self, samples: &[f32], out: &mut Vec<u8>) {
        out.clear();
        let start = samples.len().saturating_sub(self.fft_size);
        out.extend(samples[start..].iter().map(|s| {
            let v = 128.0 * (1.0 + s);
            v.clamp(0.0, 255.0) as u8
        }));
        out.resize(self.fft_size, 128);
    }

    /// Fill `out` with one byte per frequency bin, updating the smoothing state.
    pub fn byte_frequency(&mut self, samples: &[f32], out: &mut Vec<u8>) {
        let n = self.fft_size;
        let start = samples.len().saturating_sub(n);
        let tail = &samples[start..];
        let pad = n - tail.len();
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let s = if i < pad { 0.0 } else { tail[i - pad] };
            *slot = Complex::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let norm = 1.0 / n as f32;
        let range = self.max_db - self.min_db;
        out.clear();
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.scratch[k].norm() * norm;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
            let db = if *smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                f32::NEG_INFINITY
            };
            let scaled = 255.0 / range * (db - self.min_db);
            out.push(if scaled.is_finite() { scaled.clamp(0.0, 255.0) as u8 } else { 0 });
        }
    }

    /// Forget smoothing history (new track or seek).
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
    }
}

fn blackman_window(n: usize) -> Vec<f32> {
    let alpha = 0.16f32;
    let a0 = 0.5 * (1.0 - alpha);
    let a1 = 0.5;
    let a2 = 0.5 * alpha;
    (0..n)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
            a0 - a1 * phase.cos() + a2 * (2.0 * phase).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(fft_size: usize) -> AnalyserNode {
        AnalyserNode::new(&AnalyserConfig {
            fft_size,
            smoothing_time_constant: 0.0,
            ..AnalyserConfig::default()
        })
    }

    #[test]
    fn ring_orders_oldest_first() {
        let mut ring = SampleRing::new(4);
        for s in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0] {
            ring.push(s);
        }
        let mut out = Vec::new();
        ring.copy_ordered(&mut out);
        assert_eq!(out, vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn silence_maps_to_midpoint_waveform() {
        let node = node(32);
        let mut out = Vec::new();
        node.byte_time_domain(&[0.0; 32], &mut out);
        assert_eq!(out, vec![128u8; 32]);
    }

    #[test]
    fn waveform_clamps_extremes() {
        let node = node(32);
        let mut out = Vec::new();
        let mut samples = vec![0.0f32; 32];
        samples[0] = -2.0;
        samples[1] = 1.5;
        samples[2] = 0.5;
        node.byte_time_domain(&samples, &mut out);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 255);
        assert_eq!(out[2], 192);
    }

    #[test]
    fn short_input_is_padded() {
        let node = node(32);
        let mut out = Vec::new();
        node.byte_time_domain(&[0.5; 4], &mut out);
        assert_eq!(out.len(), 32);
    }

    #[test]
    fn silence_has_empty_spectrum() {
        let mut node = node(64);
        let mut out = Vec::new();
        node.byte_frequency(&[0.0; 64], &mut out);
        assert_eq!(out.len(), node.frequency_bin_count());
        assert!(out.iter().all(|b| *b == 0));
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let n = 256;
        let bin = 16;
        let samples: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / n as f32).sin())
            .collect();
        // Widen the range so the main lobe does not clamp.
        let mut node = AnalyserNode::new(&AnalyserConfig {
            fft_size: n,
            smoothing_time_constant: 0.0,
            min_decibels: -100.0,
            max_decibels: 0.0,
        });
        let mut out = Vec::new();
        node.byte_frequency(&samples, &mut out);
        let peak = out
            .iter()
            .enumerate()
            .max_by_key(|(_, v)| **v)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, bin);
        assert!(out[bin] > 200);
    }

    #[test]
    fn smoothing_carries_previous_frame() {
        let n = 64;
        let samples: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * 4.0 * i as f32 / n as f32).sin())
            .collect();
        let mut node = AnalyserNode::new(&AnalyserConfig {
            fft_size: n,
            smoothing_time_constant: 0.9,
            ..AnalyserConfig::default()
        });
        let mut first = Vec::new();
        node.byte_frequency(&samples, &mut first);
        let mut second = Vec::new();
        node.byte_frequency(&samples, &mut second);
        assert!(second[4] > first[4]);
        node.reset();
        let mut after_reset = Vec::new();
        node.byte_frequency(&samples, &mut after_reset);
        assert_eq!(after_reset[4], first[4]);
    }
}
