use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{Result, SoundclashError};

/// Planned real-input FFT that turns time-domain frames into magnitude
/// spectra. Buffers are allocated once and reused for every frame.
pub struct FftEngine {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl FftEngine {
    /// Plans a transform of `size` points. The size must be a power of two.
    pub fn new(size: usize) -> Result<Self> {
        if size < 2 || !size.is_power_of_two() {
            return Err(SoundclashError::InvalidInput(
                "fft size must be a power of two of at least 2",
            ));
        }
        Ok(Self::planned(size))
    }

    /// Plans a transform for a size already known to be a power of two.
    pub(crate) fn planned(size: usize) -> Self {
        debug_assert!(size.is_power_of_two() && size >= 2);
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(size);
        let scratch = plan.make_scratch_vec();
        let spectrum = plan.make_output_vec();
        let input = plan.make_input_vec();
        Self {
            size,
            plan,
            window: hann_window(size),
            input,
            spectrum,
            scratch,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of magnitude bins produced per frame (`size / 2`).
    pub fn bins(&self) -> usize {
        self.size / 2
    }

    pub fn bin_width(&self, sample_rate: u32) -> f32 {
        sample_rate as f32 / self.size as f32
    }

    pub fn bin_frequency(&self, bin: usize, sample_rate: u32) -> f32 {
        bin as f32 * self.bin_width(sample_rate)
    }

    /// Hann-windows `frame`, transforms it and writes the magnitudes of the
    /// first `size / 2` bins into `out`. Short frames are zero-padded and
    /// long ones truncated.
    pub fn magnitude_spectrum(&mut self, frame: &[f32], out: &mut Vec<f32>) -> Result<()> {
        for (index, slot) in self.input.iter_mut().enumerate() {
            let sample = frame.get(index).copied().unwrap_or(0.0);
            *slot = sample * self.window[index];
        }

        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        out.clear();
        out.extend(
            self.spectrum[..self.size / 2]
                .iter()
                .map(|bin| (bin.re * bin.re + bin.im * bin.im).sqrt()),
        );
        Ok(())
    }
}

impl fmt::Debug for FftEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftEngine")
            .field("size", &self.size)
            .finish()
    }
}

/// Symmetric Hann window, `0.5 * (1 - cos(2*pi*i / (len - 1)))`.
pub fn hann_window(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    let denom = (len - 1) as f32;
    (0..len)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / denom).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn peak_bin(spectrum: &[f32]) -> usize {
        spectrum
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (index, &value)| {
                if value > best.1 {
                    (index, value)
                } else {
                    best
                }
            })
            .0
    }

    #[test]
    fn rejects_non_power_of_two_sizes() {
        assert!(FftEngine::new(1000).is_err());
        assert!(FftEngine::new(1).is_err());
        assert!(FftEngine::new(1024).is_ok());
    }

    #[test]
    fn sine_energy_lands_in_nearest_bin() {
        let sample_rate = 44_100;
        let mut engine = FftEngine::new(4096).unwrap();
        let mut spectrum = Vec::new();

        for freq in [110.0, 440.0, 1000.0, 5000.0] {
            engine
                .magnitude_spectrum(&sine(freq, sample_rate, 4096), &mut spectrum)
                .unwrap();
            assert_eq!(spectrum.len(), 2048);

            let expected = (freq * 4096.0 / sample_rate as f32).round() as usize;
            let found = peak_bin(&spectrum);
            assert!(found.abs_diff(expected) <= 1, "{freq} Hz peaked at bin {found}");

            let total: f32 = spectrum.iter().sum();
            let local: f32 = spectrum[found.saturating_sub(3)..found + 4].iter().sum();
            assert!(local / total > 0.9);
        }
    }

    #[test]
    fn silence_has_an_empty_spectrum() {
        let mut engine = FftEngine::new(256).unwrap();
        let mut spectrum = Vec::new();
        engine.magnitude_spectrum(&[0.0; 100], &mut spectrum).unwrap();
        assert!(spectrum.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn hann_window_is_symmetric_and_peaks_in_the_middle() {
        let window = hann_window(9);
        assert_eq!(window[0], 0.0);
        assert!((window[4] - 1.0).abs() < 1e-6);
        for i in 0..9 {
            assert!((window[i] - window[8 - i]).abs() < 1e-6);
        }
    }
}
