//! Scalar descriptors computed from a block of samples or a magnitude
//! spectrum. Every function returns 0 for empty or silent input.

use crate::pcm::amplitude_to_db;

const FEATURE_EPSILON: f32 = 1e-10;
/// Loudness mapped to zero energy.
const ENERGY_FLOOR_DB: f32 = -60.0;

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Maps an RMS level to 0-1, linear in dB between -60 dBFS and 0 dBFS.
pub fn energy_from_rms(rms: f32) -> f32 {
    ((amplitude_to_db(rms) - ENERGY_FLOOR_DB) / -ENERGY_FLOOR_DB).clamp(0.0, 1.0)
}

/// Fraction of adjacent sample pairs whose sign differs; zero counts as
/// positive.
pub fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();
    crossings as f32 / samples.len() as f32
}

/// Magnitude-weighted mean frequency of the spectrum in Hz.
pub fn spectral_centroid(spectrum: &[f32], sample_rate: u32, fft_size: usize) -> f32 {
    if fft_size == 0 {
        return 0.0;
    }
    let bin_width = sample_rate as f32 / fft_size as f32;
    let (mut weighted, mut total) = (0.0_f32, 0.0_f32);
    for (bin, &magnitude) in spectrum.iter().enumerate() {
        weighted += bin as f32 * bin_width * magnitude;
        total += magnitude;
    }
    if total <= FEATURE_EPSILON {
        0.0
    } else {
        weighted / total
    }
}

/// Wiener entropy: geometric over arithmetic mean of the magnitudes. Close
/// to 1 for noise and close to 0 for pure tones.
pub fn spectral_flatness(spectrum: &[f32]) -> f32 {
    if spectrum.is_empty() {
        return 0.0;
    }
    let count = spectrum.len() as f32;
    let arithmetic = spectrum.iter().sum::<f32>() / count;
    if arithmetic <= FEATURE_EPSILON {
        return 0.0;
    }
    let log_mean = spectrum
        .iter()
        .map(|&magnitude| (magnitude + FEATURE_EPSILON).ln())
        .sum::<f32>()
        / count;
    (log_mean.exp() / arithmetic).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rms_of_a_square_wave_is_its_amplitude() {
        let square: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        assert_relative_eq!(rms(&square), 0.5);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn energy_maps_decibels_to_unit_range() {
        assert_relative_eq!(energy_from_rms(1.0), 1.0);
        assert_relative_eq!(energy_from_rms(0.001), 0.0, epsilon = 1e-5);
        assert_relative_eq!(energy_from_rms(0.031_622_78), 0.5, epsilon = 1e-4);
        assert_eq!(energy_from_rms(0.0), 0.0);
    }

    #[test]
    fn zero_crossings_count_sign_changes() {
        assert_eq!(zero_crossing_rate(&[1.0, -1.0, 1.0, -1.0]), 0.75);
        assert_eq!(zero_crossing_rate(&[0.0, 0.0, 1.0]), 0.0);
        assert_eq!(zero_crossing_rate(&[0.5]), 0.0);
    }

    #[test]
    fn centroid_of_a_single_bin_is_its_frequency() {
        let mut spectrum = vec![0.0; 512];
        spectrum[10] = 2.0;
        assert_relative_eq!(spectral_centroid(&spectrum, 1024, 1024), 10.0);

        spectrum[30] = 2.0;
        assert_relative_eq!(spectral_centroid(&spectrum, 1024, 1024), 20.0);
        assert_eq!(spectral_centroid(&[0.0; 16], 1024, 32), 0.0);
    }

    #[test]
    fn flatness_separates_tones_from_noise() {
        assert_relative_eq!(spectral_flatness(&[1.0; 64]), 1.0, epsilon = 1e-5);

        let mut tone = vec![0.0; 64];
        tone[5] = 1.0;
        assert!(spectral_flatness(&tone) < 0.01);
        assert_eq!(spectral_flatness(&[0.0; 8]), 0.0);
    }
}
