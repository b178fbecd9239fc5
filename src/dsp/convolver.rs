//! Convolution — uniformly partitioned FFT convolution.
//!
//! The impulse response is split into partitions of one render block each.
//! Every block the input window (previous + current block) is transformed
//! once and multiplied against each partition's spectrum through a
//! frequency-domain delay line (overlap-save). Latency is zero; cost per
//! block is one forward and one inverse FFT plus one complex multiply-add per
//! partition.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use tracing::debug;

/// WebAudio ConvolverNode normalisation constants.
const GAIN_CALIBRATION: f64 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f64 = 44100.0;
const MIN_POWER: f64 = 0.000125;

pub struct Convolver {
    block_size: usize,
    fft_size: usize,
    r2c: Arc<dyn RealToComplex<f32>>,
    c2r: Arc<dyn ComplexToReal<f32>>,
    /// Spectrum of each impulse partition, normalisation folded in.
    partitions: Vec<Vec<Complex<f32>>>,
    /// Input spectra, most recent at `delay_head`.
    delay_line: Vec<Vec<Complex<f32>>>,
    delay_head: usize,
    window: Vec<f32>,
    scratch_time: Vec<f32>,
    scratch_freq: Vec<Complex<f32>>,
    accum: Vec<Complex<f32>>,
}

impl std::fmt::Debug for Convolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Convolver")
            .field("block_size", &self.block_size)
            .field("partitions", &self.partitions.len())
            .finish()
    }
}

impl Convolver {
    /// Build a convolver for `impulse`, normalised the way WebAudio does
    /// by default.
    pub fn new(impulse: &[f32], sample_rate: f64, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let fft_size = block_size * 2;
        let bins = fft_size / 2 + 1;

        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(fft_size);
        let c2r = planner.plan_fft_inverse(fft_size);

        let scale = (normalization_scale(impulse, sample_rate) / fft_size as f64) as f32;

        let mut partitions = Vec::new();
        let mut padded = vec![0.0f32; fft_size];
        for chunk in impulse.chunks(block_size) {
            padded.fill(0.0);
            for (dst, src) in padded.iter_mut().zip(chunk) {
                *dst = src * scale;
            }
            let mut spectrum = r2c.make_output_vec();
            if let Err(e) = r2c.process(&mut padded, &mut spectrum) {
                debug!(%e, "impulse partition transform failed");
                spectrum.fill(Complex::new(0.0, 0.0));
            }
            partitions.push(spectrum);
        }

        let delay_line = vec![vec![Complex::new(0.0, 0.0); bins]; partitions.len().max(1)];

        Convolver {
            block_size,
            fft_size,
            r2c,
            c2r,
            partitions,
            delay_line,
            delay_head: 0,
            window: vec![0.0; fft_size],
            scratch_time: vec![0.0; fft_size],
            scratch_freq: vec![Complex::new(0.0, 0.0); bins],
            accum: vec![Complex::new(0.0, 0.0); bins],
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Convolve one block in place. `block.len()` must equal the block size;
    /// other lengths are passed through silently zeroed.
    pub fn process_block(&mut self, block: &mut [f32]) {
        if block.len() != self.block_size || self.partitions.is_empty() {
            block.fill(0.0);
            return;
        }
        let b = self.block_size;

        // Slide the input window: [previous block | current block].
        self.window.copy_within(b.., 0);
        self.window[b..].copy_from_slice(block);

        self.scratch_time.copy_from_slice(&self.window);
        let slot = &mut self.delay_line[self.delay_head];
        if self.r2c.process(&mut self.scratch_time, slot).is_err() {
            block.fill(0.0);
            return;
        }

        self.accum.fill(Complex::new(0.0, 0.0));
        let count = self.delay_line.len();
        for (p, partition) in self.partitions.iter().enumerate() {
            let input = &self.delay_line[(self.delay_head + count - p) % count];
            for ((acc, x), h) in self.accum.iter_mut().zip(input).zip(partition) {
                *acc += x * h;
            }
        }
        self.delay_head = (self.delay_head + 1) % count;

        self.scratch_freq.copy_from_slice(&self.accum);
        // DC and Nyquist bins of a real signal carry no imaginary part.
        if let Some(first) = self.scratch_freq.first_mut() {
            first.im = 0.0;
        }
        if let Some(last) = self.scratch_freq.last_mut() {
            last.im = 0.0;
        }
        if self.c2r.process(&mut self.scratch_freq, &mut self.scratch_time).is_err() {
            block.fill(0.0);
            return;
        }

        // Overlap-save: the second half is the valid linear convolution.
        block.copy_from_slice(&self.scratch_time[b..self.fft_size]);
    }
}

/// WebAudio's default impulse normalisation factor.
pub fn normalization_scale(impulse: &[f32], sample_rate: f64) -> f64 {
    let mut power = if impulse.is_empty() {
        0.0
    } else {
        let sum: f64 = impulse.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / impulse.len() as f64).sqrt()
    };
    if !power.is_finite() || power < MIN_POWER {
        power = MIN_POWER;
    }
    let mut scale = GAIN_CALIBRATION / power;
    if sample_rate > 0.0 {
        scale *= GAIN_CALIBRATION_SAMPLE_RATE / sample_rate;
    }
    scale
}

/// Exponentially decaying noise, `seconds` long, falling to 1/e at half its
/// length.
pub fn noise_impulse(rng: &mut fastrand::Rng, sample_rate: f64, seconds: f64) -> Vec<f32> {
    let len = (sample_rate * seconds).max(1.0) as usize;
    let decay = sample_rate * seconds / 2.0;
    (0..len)
        .map(|i| ((rng.f64() * 2.0 - 1.0) * (-(i as f64) / decay).exp()) as f32)
        .collect()
}
