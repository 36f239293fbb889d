use serde::{Deserialize, Serialize};

use super::fft::FftEngine;
use crate::Result;

/// Frame length used for the onset envelope.
pub const ONSET_FRAME_SIZE: usize = 2048;
/// Hop between onset frames.
pub const ONSET_HOP_SIZE: usize = 512;
/// Shortest envelope that is worth autocorrelating.
pub const MIN_ENVELOPE_LEN: usize = 100;

const MIN_BPM: f32 = 60.0;
const MAX_BPM: f32 = 200.0;
const FOLD_LOW_BPM: f32 = 70.0;
const FOLD_HIGH_BPM: f32 = 170.0;
const PREFERRED_BPM: f32 = 125.0;
const CORRELATION_EPSILON: f32 = 1e-9;

/// Beats per minute together with how periodic the envelope was (0-100).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TempoEstimate {
    pub bpm: f32,
    pub confidence: f32,
}

impl TempoEstimate {
    pub fn is_detected(&self) -> bool {
        self.bpm > 0.0
    }
}

/// Half-wave rectified spectral flux between consecutive magnitude spectra.
#[derive(Debug, Clone, Default)]
pub struct SpectralFlux {
    previous: Vec<f32>,
    primed: bool,
}

impl SpectralFlux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sums the positive magnitude increases against the previous spectrum.
    /// The first spectrum only primes the detector and yields zero.
    pub fn next(&mut self, spectrum: &[f32]) -> f32 {
        let flux = if self.primed && self.previous.len() == spectrum.len() {
            spectrum
                .iter()
                .zip(&self.previous)
                .map(|(current, previous)| (current - previous).max(0.0))
                .sum()
        } else {
            0.0
        };
        self.previous.clear();
        self.previous.extend_from_slice(spectrum);
        self.primed = true;
        flux
    }

    pub fn reset(&mut self) {
        self.previous.clear();
        self.primed = false;
    }
}

/// Spectral-flux onset envelope of a mono signal, one value per
/// [`ONSET_HOP_SIZE`] samples, normalised so its maximum is 1.
pub fn onset_envelope(samples: &[f32]) -> Result<Vec<f32>> {
    if samples.len() < ONSET_FRAME_SIZE {
        return Ok(Vec::new());
    }

    let mut fft = FftEngine::planned(ONSET_FRAME_SIZE);
    let mut flux = SpectralFlux::new();
    let mut spectrum = Vec::with_capacity(fft.bins());
    let frames = (samples.len() - ONSET_FRAME_SIZE) / ONSET_HOP_SIZE + 1;
    let mut envelope = Vec::with_capacity(frames);

    for frame in 0..frames {
        let start = frame * ONSET_HOP_SIZE;
        fft.magnitude_spectrum(&samples[start..start + ONSET_FRAME_SIZE], &mut spectrum)?;
        envelope.push(flux.next(&spectrum));
    }

    normalize_envelope(&mut envelope);
    Ok(envelope)
}

/// Scales the envelope so its peak is 1. A flat zero envelope is left alone.
pub fn normalize_envelope(envelope: &mut [f32]) {
    let max = envelope.iter().copied().fold(0.0_f32, f32::max);
    if max > CORRELATION_EPSILON {
        envelope.iter_mut().for_each(|value| *value /= max);
    }
}

/// Estimates the tempo of an onset envelope sampled every `hop_size`
/// samples.
///
/// Every lag between 60 and 200 BPM is scored by normalised autocorrelation
/// of the mean-removed envelope, gently weighted towards 125 BPM. The winner
/// is refined with a parabola through its neighbours and folded into
/// 70-170 BPM. Too little data or no periodicity gives a zero estimate.
pub fn detect_tempo(envelope: &[f32], sample_rate: u32, hop_size: usize) -> TempoEstimate {
    let len = envelope.len();
    if len < MIN_ENVELOPE_LEN || sample_rate == 0 || hop_size == 0 {
        return TempoEstimate::default();
    }

    let frame_rate = sample_rate as f32 / hop_size as f32;
    let min_lag = ((60.0 * frame_rate / MAX_BPM).ceil() as usize).max(2);
    let max_lag = ((60.0 * frame_rate / MIN_BPM).floor() as usize).min(len - 2);
    if min_lag >= max_lag {
        return TempoEstimate::default();
    }

    let mean = envelope.iter().sum::<f32>() / len as f32;
    let centered: Vec<f32> = envelope.iter().map(|value| value - mean).collect();

    // Scores cover one lag either side of the search range for refinement.
    let first_lag = min_lag - 1;
    let scores: Vec<f32> = (first_lag..=max_lag + 1)
        .map(|lag| autocorrelation(&centered, lag))
        .collect();

    let mut best_lag = 0;
    let mut best_weighted = f32::NEG_INFINITY;
    for lag in min_lag..=max_lag {
        let bpm = 60.0 * frame_rate / lag as f32;
        let weight = 1.0 + 0.2 * (1.0 - (bpm - PREFERRED_BPM).abs() / 100.0);
        let weighted = scores[lag - first_lag] * weight;
        if weighted > best_weighted {
            best_weighted = weighted;
            best_lag = lag;
        }
    }

    let index = best_lag - first_lag;
    let raw = scores[index];
    if raw <= 0.0 {
        return TempoEstimate::default();
    }

    let (left, right) = (scores[index - 1], scores[index + 1]);
    let curvature = left - 2.0 * raw + right;
    let shift = if curvature.abs() > CORRELATION_EPSILON {
        (0.5 * (left - right) / curvature).clamp(-0.5, 0.5)
    } else {
        0.0
    };

    let mut bpm = 60.0 * frame_rate / (best_lag as f32 + shift);
    while bpm < FOLD_LOW_BPM {
        bpm *= 2.0;
    }
    while bpm > FOLD_HIGH_BPM {
        bpm /= 2.0;
    }

    TempoEstimate {
        bpm,
        confidence: (raw * 100.0).clamp(0.0, 100.0),
    }
}

fn autocorrelation(signal: &[f32], lag: usize) -> f32 {
    let head = &signal[..signal.len() - lag];
    let tail = &signal[lag..];
    let (mut dot, mut head_energy, mut tail_energy) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (a, b) in head.iter().zip(tail) {
        dot += a * b;
        head_energy += a * a;
        tail_energy += b * b;
    }
    let denom = (head_energy * tail_energy).sqrt();
    if denom <= CORRELATION_EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 44_100;

    fn frame_rate() -> f32 {
        SAMPLE_RATE as f32 / ONSET_HOP_SIZE as f32
    }

    /// Triangular onsets centred on the exact beat positions.
    fn pulse_train(bpm: f32, frames: usize) -> Vec<f32> {
        let period = 60.0 * frame_rate() / bpm;
        let mut envelope = vec![0.0_f32; frames];
        let mut center = 0.0_f32;
        while center < frames as f32 {
            let lo = (center.floor() as usize).saturating_sub(2);
            let hi = (center.ceil() as usize + 2).min(frames - 1);
            for i in lo..=hi {
                let value = (1.0 - (i as f32 - center).abs() / 1.5).max(0.0);
                envelope[i] = envelope[i].max(value);
            }
            center += period;
        }
        envelope
    }

    #[test]
    fn finds_tempo_of_a_pulse_train() {
        let estimate = detect_tempo(&pulse_train(120.0, 1024), SAMPLE_RATE, ONSET_HOP_SIZE);
        assert!((estimate.bpm - 120.0).abs() < 2.0, "bpm {}", estimate.bpm);
        assert!(estimate.confidence > 50.0, "confidence {}", estimate.confidence);
    }

    #[test]
    fn slow_tempos_fold_into_the_dance_range() {
        let estimate = detect_tempo(&pulse_train(65.0, 1024), SAMPLE_RATE, ONSET_HOP_SIZE);
        assert!((FOLD_LOW_BPM..=FOLD_HIGH_BPM).contains(&estimate.bpm));
        assert!((estimate.bpm - 130.0).abs() < 3.0, "bpm {}", estimate.bpm);
    }

    #[test]
    fn short_or_flat_envelopes_give_no_tempo() {
        let short = pulse_train(120.0, MIN_ENVELOPE_LEN - 1);
        assert_eq!(
            detect_tempo(&short, SAMPLE_RATE, ONSET_HOP_SIZE),
            TempoEstimate::default()
        );

        let flat = vec![0.5; 500];
        let estimate = detect_tempo(&flat, SAMPLE_RATE, ONSET_HOP_SIZE);
        assert!(!estimate.is_detected());
        assert_eq!(estimate.confidence, 0.0);
    }

    #[test]
    fn flux_ignores_decreasing_energy() {
        let mut flux = SpectralFlux::new();
        assert_eq!(flux.next(&[1.0, 1.0]), 0.0);
        assert_eq!(flux.next(&[3.0, 0.5]), 2.0);
        assert_eq!(flux.next(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn envelope_is_normalised() {
        let mut samples = vec![0.0_f32; 44_100];
        for start in (0..samples.len()).step_by(11_025) {
            for (i, sample) in samples[start..].iter_mut().take(400).enumerate() {
                *sample = ((i as f32) * 0.3).sin() * (1.0 - i as f32 / 400.0);
            }
        }
        let envelope = onset_envelope(&samples).unwrap();
        assert_eq!(envelope.len(), (44_100 - ONSET_FRAME_SIZE) / ONSET_HOP_SIZE + 1);
        let max = envelope.iter().copied().fold(0.0_f32, f32::max);
        assert!((max - 1.0).abs() < 1e-6);
        assert!(envelope.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn short_input_has_empty_envelope() {
        assert!(onset_envelope(&[0.1; 100]).unwrap().is_empty());
    }
}
