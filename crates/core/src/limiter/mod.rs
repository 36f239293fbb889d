//! Envelope-follower brickwall limiter for interleaved 16-bit PCM.

use std::ops::RangeInclusive;

use crate::pcm::{amplitude_to_db, db_to_amplitude, PcmFormat, StageFormat, FULL_SCALE};

pub const THRESHOLD_RANGE_DB: RangeInclusive<f32> = -12.0..=0.0;
pub const CEILING_RANGE_DB: RangeInclusive<f32> = -3.0..=0.0;
pub const ATTACK_RANGE_MS: RangeInclusive<f32> = 0.1..=10.0;
pub const RELEASE_RANGE_MS: RangeInclusive<f32> = 10.0..=500.0;

const DEFAULT_THRESHOLD_DB: f32 = -0.3;
const DEFAULT_CEILING_DB: f32 = -0.1;
const DEFAULT_ATTACK_MS: f32 = 0.5;
const DEFAULT_RELEASE_MS: f32 = 100.0;

/// Full-scale magnitude used to normalise detected peaks into `[0, 1]`.
const PEAK_SCALE: f32 = 32768.0;

/// Peak limiter guarding the final output of the playback chain.
///
/// The limiter owns its envelope; it must be driven from a single thread.
#[derive(Debug, Clone)]
pub struct PeakLimiter {
    stage: StageFormat,
    enabled: bool,
    threshold_db: f32,
    ceiling_db: f32,
    attack_ms: f32,
    release_ms: f32,
    threshold: f32,
    ceiling: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
    peak_reduction_db: f32,
    samples_processed: u64,
}

impl Default for PeakLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl PeakLimiter {
    /// Creates an unconfigured limiter with the default settings. It bypasses
    /// audio until [`PeakLimiter::configure`] accepts a format.
    pub fn new() -> Self {
        let mut limiter = Self {
            stage: StageFormat::Bypassed,
            enabled: true,
            threshold_db: DEFAULT_THRESHOLD_DB,
            ceiling_db: DEFAULT_CEILING_DB,
            attack_ms: DEFAULT_ATTACK_MS,
            release_ms: DEFAULT_RELEASE_MS,
            threshold: db_to_amplitude(DEFAULT_THRESHOLD_DB),
            ceiling: db_to_amplitude(DEFAULT_CEILING_DB),
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 0.0,
            peak_reduction_db: 0.0,
            samples_processed: 0,
        };
        limiter.update_coefficients();
        limiter
    }

    /// Accepts the stream format. Anything but 16-bit PCM turns the limiter
    /// into a pass-through.
    pub fn configure(&mut self, format: PcmFormat) -> StageFormat {
        self.stage = StageFormat::negotiate(format);
        self.update_coefficients();
        self.flush();
        tracing::debug!(
            stage = ?self.stage,
            threshold_db = self.threshold_db,
            ceiling_db = self.ceiling_db,
            "limiter configured"
        );
        self.stage
    }

    /// Turns limiting on or off; a disabled limiter leaves buffers untouched.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Level in dB where gain reduction starts, clamped to -12..=0.
    pub fn set_threshold(&mut self, db: f32) {
        self.threshold_db = clamp_to(db, &THRESHOLD_RANGE_DB);
        self.threshold = db_to_amplitude(self.threshold_db);
    }

    /// Hard output ceiling in dB, clamped to -3..=0.
    pub fn set_ceiling(&mut self, db: f32) {
        self.ceiling_db = clamp_to(db, &CEILING_RANGE_DB);
        self.ceiling = db_to_amplitude(self.ceiling_db);
    }

    /// Envelope attack time in milliseconds, clamped to 0.1..=10.
    pub fn set_attack(&mut self, ms: f32) {
        self.attack_ms = clamp_to(ms, &ATTACK_RANGE_MS);
        self.update_coefficients();
    }

    /// Envelope release time in milliseconds, clamped to 10..=500.
    pub fn set_release(&mut self, ms: f32) {
        self.release_ms = clamp_to(ms, &RELEASE_RANGE_MS);
        self.update_coefficients();
    }

    /// Returns whether limiting is switched on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True when buffers are actually being limited.
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

    /// Returns the currently configured ceiling in dB.
    pub fn ceiling_db(&self) -> f32 {
        self.ceiling_db
    }

    /// Returns the currently configured attack time in milliseconds.
    pub fn attack_ms(&self) -> f32 {
        self.attack_ms
    }

    /// Returns the currently configured release time in milliseconds.
    pub fn release_ms(&self) -> f32 {
        self.release_ms
    }

    /// Current envelope estimate, normalised to `[0, 1]`.
    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    /// Deepest gain reduction applied since the last meter reset, in dB (<= 0).
    pub fn peak_reduction_db(&self) -> f32 {
        self.peak_reduction_db
    }

    /// Clears the reduction meter back to 0 dB.
    pub fn reset_peak_meter(&mut self) {
        self.peak_reduction_db = 0.0;
    }

    /// Number of sample frames limited since the last flush.
    pub fn samples_processed(&self) -> u64 {
        self.samples_processed
    }

    /// Largest absolute sample value the limiter will ever emit.
    pub fn output_limit(&self) -> i16 {
        (FULL_SCALE * self.ceiling).floor() as i16
    }

    /// Limits an interleaved buffer in place.
    pub fn process(&mut self, samples: &mut [i16]) {
        let channels = match self.stage {
            StageFormat::Active(format) if self.enabled => format.channels(),
            _ => return,
        };

        let limit = f32::from(self.output_limit());
        let makeup = self.ceiling / self.threshold;

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

            let gain = if self.envelope > self.threshold {
                (self.threshold / self.envelope * makeup).min(1.0)
            } else {
                1.0
            };

            if gain < 1.0 {
                let reduction = amplitude_to_db(gain);
                if reduction < self.peak_reduction_db {
                    self.peak_reduction_db = reduction;
                }
                for sample in frame.iter_mut() {
                    *sample = (f32::from(*sample) * gain).round().clamp(-limit, limit) as i16;
                }
            } else {
                for sample in frame.iter_mut() {
                    let value = f32::from(*sample);
                    if value.abs() > limit {
                        *sample = value.clamp(-limit, limit) as i16;
                    }
                }
            }

            self.samples_processed += 1;
        }
    }

    /// Clears the envelope while keeping every parameter.
    pub fn flush(&mut self) {
        self.envelope = 0.0;
        self.samples_processed = 0;
    }

    /// Restores the default parameters and clears all state, including the
    /// reduction meter. The negotiated format is kept.
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

/// One-pole smoothing coefficient for a time constant given in milliseconds.
fn time_to_coeff(ms: f32, sample_rate: f32) -> f32 {
    let samples = ms * sample_rate / 1000.0;
    if samples <= 0.0 {
        0.0
    } else {
        (-1.0 / samples).exp()
    }
}

fn clamp_to(value: f32, range: &RangeInclusive<f32>) -> f32 {
    if value.is_nan() {
        return *range.end();
    }
    value.clamp(*range.start(), *range.end())
}
