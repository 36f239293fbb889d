//! Soft-knee peak compressor run ahead of the limiter in battle mode.

use std::ops::RangeInclusive;

use crate::pcm::{amplitude_to_db, db_to_amplitude, PcmFormat, StageFormat};

pub const THRESHOLD_RANGE_DB: RangeInclusive<f32> = -60.0..=0.0;
pub const RATIO_RANGE: RangeInclusive<f32> = 1.0..=20.0;
pub const ATTACK_RANGE_MS: RangeInclusive<f32> = 0.1..=100.0;
pub const RELEASE_RANGE_MS: RangeInclusive<f32> = 10.0..=1000.0;
pub const MAKEUP_RANGE_DB: RangeInclusive<f32> = 0.0..=24.0;

/// Width of the transition region around the threshold.
pub const KNEE_DB: f32 = 6.0;

const DEFAULT_THRESHOLD_DB: f32 = -12.0;
const DEFAULT_RATIO: f32 = 4.0;
const DEFAULT_ATTACK_MS: f32 = 5.0;
const DEFAULT_RELEASE_MS: f32 = 100.0;
const DEFAULT_MAKEUP_DB: f32 = 6.0;

/// Fraction of the distance to the target gain covered per frame.
const GAIN_SMOOTHING: f32 = 0.1;
const PEAK_SCALE: f32 = 32768.0;

/// Feed-forward compressor with a peak envelope detector, a soft knee and
/// makeup gain. All channels of a frame share one gain.
#[derive(Debug, Clone)]
pub struct Compressor {
    stage: StageFormat,
    enabled: bool,
    threshold_db: f32,
    ratio: f32,
    attack_ms: f32,
    release_ms: f32,
    makeup_db: f32,
    makeup: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
    gain: f32,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor {
    /// Creates an unconfigured compressor with the default punch settings:
    /// -12 dB threshold, 4:1, 5 ms attack, 100 ms release, +6 dB makeup.
    pub fn new() -> Self {
        let mut compressor = Self {
            stage: StageFormat::Bypassed,
            enabled: true,
            threshold_db: DEFAULT_THRESHOLD_DB,
            ratio: DEFAULT_RATIO,
            attack_ms: DEFAULT_ATTACK_MS,
            release_ms: DEFAULT_RELEASE_MS,
            makeup_db: DEFAULT_MAKEUP_DB,
            makeup: db_to_amplitude(DEFAULT_MAKEUP_DB),
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 0.0,
            gain: 1.0,
        };
        compressor.update_coefficients();
        compressor
    }

    /// Accepts the stream format; unsupported formats bypass the stage.
    pub fn configure(&mut self, format: PcmFormat) -> StageFormat {
        self.stage = StageFormat::negotiate(format);
        self.update_coefficients();
        self.flush();
        tracing::debug!(
            stage = ?self.stage,
            threshold_db = self.threshold_db,
            ratio = self.ratio,
            "compressor configured"
        );
        self.stage
    }

    /// Turns compression on or off; a disabled compressor leaves buffers untouched.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Level in dB above which gain reduction starts (centre of the knee).
    pub fn set_threshold(&mut self, db: f32) {
        self.threshold_db = clamp_to(db, &THRESHOLD_RANGE_DB, DEFAULT_THRESHOLD_DB);
    }

    /// Input-to-output slope above the knee; 1 disables compression.
    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = clamp_to(ratio, &RATIO_RANGE, DEFAULT_RATIO);
    }

    /// Detector attack time in milliseconds, clamped to 0.1..=100.
    pub fn set_attack(&mut self, ms: f32) {
        self.attack_ms = clamp_to(ms, &ATTACK_RANGE_MS, DEFAULT_ATTACK_MS);
        self.update_coefficients();
    }

    /// Detector release time in milliseconds, clamped to 10..=1000.
    pub fn set_release(&mut self, ms: f32) {
        self.release_ms = clamp_to(ms, &RELEASE_RANGE_MS, DEFAULT_RELEASE_MS);
        self.update_coefficients();
    }

    /// Gain in dB applied after compression.
    pub fn set_makeup_gain(&mut self, db: f32) {
        self.makeup_db = clamp_to(db, &MAKEUP_RANGE_DB, DEFAULT_MAKEUP_DB);
        self.makeup = db_to_amplitude(self.makeup_db);
    }

    /// Returns whether compression is switched on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True when buffers are actually being compressed.
    pub fn is_active(&self) -> bool {
        self.enabled && self.stage.is_active()
    }

    /// Returns the format negotiated by the last `configure`.
    pub fn stage(&self) -> StageFormat {
        self.stage
    }

    /// Returns the currently configured threshold in dB.
    pub fn threshold_db(&self) -> f32 {
        self.threshold_db
    }

    /// Returns the currently configured ratio.
    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Returns the currently configured attack time in milliseconds.
    pub fn attack_ms(&self) -> f32 {
        self.attack_ms
    }

    /// Returns the currently configured release time in milliseconds.
    pub fn release_ms(&self) -> f32 {
        self.release_ms
    }

    /// Returns the currently configured makeup gain in dB.
    pub fn makeup_gain_db(&self) -> f32 {
        self.makeup_db
    }

    /// Gain reduction currently applied, in dB (<= 0), excluding makeup.
    pub fn gain_reduction_db(&self) -> f32 {
        if self.gain >= 1.0 {
            0.0
        } else {
            amplitude_to_db(self.gain)
        }
    }

    /// Compresses an interleaved buffer in place.
    pub fn process(&mut self, samples: &mut [i16]) {
        let channels = match self.stage {
            StageFormat::Active(format) if self.enabled => format.channels(),
            _ => return,
        };

        for frame in samples.chunks_mut(channels) {
            let peak = frame
                .iter()
                .map(|&s| f32::from(s).abs() / PEAK_SCALE)
                .fold(0.0_f32, f32::max);

            let coeff = if peak > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * peak;

            let reduction = gain_reduction_db(
                amplitude_to_db(self.envelope),
                self.threshold_db,
                self.ratio,
                KNEE_DB,
            );
            let target = db_to_amplitude(reduction);
            self.gain += GAIN_SMOOTHING * (target - self.gain);

            let gain = self.gain * self.makeup;
            for sample in frame.iter_mut() {
                *sample = (f32::from(*sample) * gain)
                    .round()
                    .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
            }
        }
    }

    /// Clears the detector and gain state while keeping every parameter.
    pub fn flush(&mut self) {
        self.envelope = 0.0;
        self.gain = 1.0;
    }

    /// Restores the default parameters; the negotiated format is kept.
    pub fn reset(&mut self) {
        let stage = self.stage;
        *self = Self::new();
        self.stage = stage;
        self.update_coefficients();
    }

    fn update_coefficients(&mut self) {
        let sample_rate = self
            .stage
            .format()
            .map(|format| format.sample_rate as f32)
            .unwrap_or(44_100.0);
        self.attack_coeff = time_to_coeff(self.attack_ms, sample_rate);
        self.release_coeff = time_to_coeff(self.release_ms, sample_rate);
    }
}

/// Static curve: gain change in dB (<= 0) for a detector level in dB. The
/// knee blends quadratically between unity and the full ratio.
pub fn gain_reduction_db(level_db: f32, threshold_db: f32, ratio: f32, knee_db: f32) -> f32 {
    let slope = 1.0 - 1.0 / ratio.max(1.0);
    let half_knee = knee_db / 2.0;
    if level_db <= threshold_db - half_knee {
        0.0
    } else if knee_db <= 0.0 || level_db >= threshold_db + half_knee {
        (threshold_db - level_db) * slope
    } else {
        let x = level_db - threshold_db + half_knee;
        -(x * x) / (2.0 * knee_db) * slope
    }
}

fn time_to_coeff(ms: f32, sample_rate: f32) -> f32 {
    let samples = ms * sample_rate / 1000.0;
    if samples <= 0.0 {
        0.0
    } else {
        (-1.0 / samples).exp()
    }
}

fn clamp_to(value: f32, range: &RangeInclusive<f32>, fallback: f32) -> f32 {
    if value.is_nan() {
        return fallback;
    }
    value.clamp(*range.start(), *range.end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::PI;

    fn build_compressor() -> Compressor {
        let mut compressor = Compressor::new();
        assert!(compressor.configure(PcmFormat::pcm16(44_100, 2)).is_active());
        compressor
    }

    fn sine(amplitude: f32, frames: usize) -> Vec<i16> {
        (0..frames)
            .flat_map(|i| {
                let value = amplitude * (2.0 * PI * 220.0 * i as f32 / 44_100.0).sin();
                let sample = (value * 32767.0).round() as i16;
                [sample, sample]
            })
            .collect()
    }

    fn peak(samples: &[i16]) -> f32 {
        samples.iter().map(|&s| f32::from(s).abs()).fold(0.0, f32::max)
    }

    #[test]
    fn static_curve_is_continuous_through_the_knee() {
        assert_eq!(gain_reduction_db(-30.0, -12.0, 4.0, 6.0), 0.0);
        assert_eq!(gain_reduction_db(-15.0, -12.0, 4.0, 6.0), 0.0);
        assert_abs_diff_eq!(gain_reduction_db(-12.0, -12.0, 4.0, 6.0), -0.5625);
        assert_abs_diff_eq!(gain_reduction_db(-9.0, -12.0, 4.0, 6.0), -2.25);
        assert_abs_diff_eq!(gain_reduction_db(0.0, -12.0, 4.0, 6.0), -9.0);
        assert_eq!(gain_reduction_db(0.0, -12.0, 1.0, 6.0), 0.0);
        assert_abs_diff_eq!(gain_reduction_db(-6.0, -12.0, 2.0, 0.0), -3.0);
    }

    #[test]
    fn signal_below_threshold_passes_untouched_without_makeup() {
        let mut compressor = build_compressor();
        compressor.set_makeup_gain(0.0);

        let input = sine(db_to_amplitude(-30.0), 22_050);
        let mut output = input.clone();
        compressor.process(&mut output);

        assert_eq!(output, input);
        assert_eq!(compressor.gain_reduction_db(), 0.0);
    }

    #[test]
    fn makeup_gain_raises_quiet_signals() {
        let mut compressor = build_compressor();
        let input = sine(db_to_amplitude(-30.0), 22_050);
        let mut output = input.clone();
        compressor.process(&mut output);

        let ratio = peak(&output) / peak(&input);
        assert!((ratio - db_to_amplitude(6.0)).abs() < 0.02, "ratio {ratio}");
    }

    #[test]
    fn loud_signal_is_reduced_above_threshold() {
        let mut compressor = build_compressor();
        compressor.set_threshold(-20.0);
        compressor.set_makeup_gain(0.0);

        let mut output = sine(1.0, 44_100);
        compressor.process(&mut output);

        let tail = peak(&output[44_100..]);
        assert!(tail < 0.5 * 32767.0, "tail peak {tail}");
        assert!(compressor.gain_reduction_db() < -6.0);
    }

    #[test]
    fn setters_clamp_and_reset_restores_defaults() {
        let mut compressor = build_compressor();
        compressor.set_threshold(-90.0);
        compressor.set_ratio(0.5);
        compressor.set_attack(500.0);
        compressor.set_release(1.0);
        compressor.set_makeup_gain(f32::NAN);
        assert_eq!(compressor.threshold_db(), -60.0);
        assert_eq!(compressor.ratio(), 1.0);
        assert_eq!(compressor.attack_ms(), 100.0);
        assert_eq!(compressor.release_ms(), 10.0);
        assert_eq!(compressor.makeup_gain_db(), DEFAULT_MAKEUP_DB);

        let mut buffer = sine(1.0, 4096);
        compressor.process(&mut buffer);
        compressor.reset();
        assert_eq!(compressor.ratio(), DEFAULT_RATIO);
        assert_eq!(compressor.gain_reduction_db(), 0.0);
        assert!(compressor.stage().is_active());
    }

    #[test]
    fn disabled_or_unconfigured_compressor_bypasses() {
        let input = sine(1.0, 2048);

        let mut unconfigured = Compressor::new();
        let mut buffer = input.clone();
        unconfigured.process(&mut buffer);
        assert_eq!(buffer, input);

        let mut disabled = build_compressor();
        disabled.set_enabled(false);
        let mut buffer = input.clone();
        disabled.process(&mut buffer);
        assert_eq!(buffer, input);
        assert!(!disabled.is_active());
    }
}
