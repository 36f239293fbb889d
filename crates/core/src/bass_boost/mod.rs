//! Low-shelf bass boost run first in the battle chain.

use std::f32::consts::PI;
use std::ops::RangeInclusive;

use crate::pcm::{f32_to_i16, i16_to_f32, PcmFormat, StageFormat};

pub const GAIN_RANGE_DB: RangeInclusive<f32> = 0.0..=24.0;
pub const FREQUENCY_RANGE_HZ: RangeInclusive<f32> = 20.0..=200.0;

const DEFAULT_FREQUENCY_HZ: f32 = 80.0;
/// Shelf slope; 0.707 gives a maximally flat transition.
const SHELF_SLOPE: f32 = 0.707;

/// Normalised biquad coefficients (`a0 == 1`).
#[derive(Debug, Clone, Copy, PartialEq)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coefficients {
    const IDENTITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Low-shelf design from the RBJ audio EQ cookbook.
    fn low_shelf(gain_db: f32, frequency: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * frequency / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / SHELF_SLOPE - 1.0) + 2.0).sqrt();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha;
        Self {
            b0: a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha) / a0,
            b1: 2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0) / a0,
            b2: a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha) / a0,
            a1: -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha) / a0,
        }
    }
}

/// Direct form I history of one channel.
#[derive(Debug, Clone, Copy, Default)]
struct History {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

/// Low-shelf filter that lifts everything below the corner frequency by up
/// to 24 dB. A gain of 0 dB leaves buffers untouched.
#[derive(Debug, Clone)]
pub struct BassBoost {
    stage: StageFormat,
    enabled: bool,
    gain_db: f32,
    frequency: f32,
    coefficients: Coefficients,
    history: Vec<History>,
}

impl Default for BassBoost {
    fn default() -> Self {
        Self::new()
    }
}

impl BassBoost {
    /// Creates an unconfigured, flat (0 dB) boost at 80 Hz.
    pub fn new() -> Self {
        Self {
            stage: StageFormat::Bypassed,
            enabled: true,
            gain_db: 0.0,
            frequency: DEFAULT_FREQUENCY_HZ,
            coefficients: Coefficients::IDENTITY,
            history: Vec::new(),
        }
    }

    /// Accepts the stream format and recomputes the filter for its sample
    /// rate.
    pub fn configure(&mut self, format: PcmFormat) -> StageFormat {
        self.stage = StageFormat::negotiate(format);
        let channels = self.stage.format().map_or(0, |format| format.channels());
        self.history = vec![History::default(); channels];
        self.update_coefficients();
        tracing::debug!(
            stage = ?self.stage,
            gain_db = self.gain_db,
            frequency = self.frequency,
            "bass boost configured"
        );
        self.stage
    }

    /// Turns the boost on or off without touching its settings.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Shelf gain in dB, clamped to 0..=24.
    pub fn set_gain(&mut self, db: f32) {
        self.gain_db = clamp_to(db, &GAIN_RANGE_DB, 0.0);
        self.update_coefficients();
    }

    /// Corner frequency in Hz, clamped to 20..=200.
    pub fn set_frequency(&mut self, hz: f32) {
        self.frequency = clamp_to(hz, &FREQUENCY_RANGE_HZ, DEFAULT_FREQUENCY_HZ);
        self.update_coefficients();
    }

    /// Returns whether the boost is switched on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True when buffers are actually being filtered.
    pub fn is_active(&self) -> bool {
        self.enabled && self.gain_db > 0.0 && self.stage.is_active()
    }

    /// Returns the format negotiated by the last `configure`.
    pub fn stage(&self) -> StageFormat {
        self.stage
    }

    /// Returns the currently configured shelf gain in dB.
    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    /// Returns the currently configured corner frequency in Hz.
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Filters an interleaved buffer in place.
    pub fn process(&mut self, samples: &mut [i16]) {
        if !self.is_active() || self.history.is_empty() {
            return;
        }
        let Coefficients { b0, b1, b2, a1, a2 } = self.coefficients;
        let channels = self.history.len();

        for frame in samples.chunks_mut(channels) {
            for (sample, state) in frame.iter_mut().zip(self.history.iter_mut()) {
                let x = i16_to_f32(*sample);
                let y = b0 * x + b1 * state.x1 + b2 * state.x2 - a1 * state.y1 - a2 * state.y2;
                state.x2 = state.x1;
                state.x1 = x;
                state.y2 = state.y1;
                state.y1 = y;
                *sample = f32_to_i16(y);
            }
        }
    }

    /// Clears the filter history, keeping gain and frequency.
    pub fn flush(&mut self) {
        self.history.iter_mut().for_each(|state| *state = History::default());
    }

    /// Restores 0 dB at the default frequency; the negotiated format is kept.
    pub fn reset(&mut self) {
        self.enabled = true;
        self.gain_db = 0.0;
        self.frequency = DEFAULT_FREQUENCY_HZ;
        self.update_coefficients();
        self.flush();
    }

    fn update_coefficients(&mut self) {
        self.coefficients = match self.stage.format() {
            Some(format) if self.gain_db > 0.0 => {
                Coefficients::low_shelf(self.gain_db, self.frequency, format.sample_rate as f32)
            }
            _ => Coefficients::IDENTITY,
        };
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

    const SAMPLE_RATE: u32 = 44_100;

    fn build_boost(gain_db: f32) -> BassBoost {
        let mut boost = BassBoost::new();
        assert!(boost.configure(PcmFormat::pcm16(SAMPLE_RATE, 2)).is_active());
        boost.set_gain(gain_db);
        boost
    }

    fn tone(freq: f32, seconds: f32) -> Vec<i16> {
        let frames = (seconds * SAMPLE_RATE as f32) as usize;
        (0..frames)
            .flat_map(|i| {
                let value = 0.1 * (2.0 * PI * freq * i as f32 / SAMPLE_RATE as f32).sin();
                let sample = (value * 32767.0).round() as i16;
                [sample, sample]
            })
            .collect()
    }

    fn rms(samples: &[i16]) -> f32 {
        let sum: f32 = samples.iter().map(|&s| f32::from(s) * f32::from(s)).sum();
        (sum / samples.len() as f32).sqrt()
    }

    /// Output over input RMS after the filter has settled.
    fn settled_gain(boost: &mut BassBoost, freq: f32) -> f32 {
        let input = tone(freq, 1.0);
        let mut output = input.clone();
        boost.process(&mut output);
        let settled = SAMPLE_RATE as usize;
        rms(&output[settled..]) / rms(&input[settled..])
    }

    #[test]
    fn low_tone_is_lifted_by_the_shelf() {
        let mut boost = build_boost(12.0);
        let gain = settled_gain(&mut boost, 60.0);
        // About +8 dB at 60 Hz for a 12 dB shelf at 80 Hz.
        assert!(gain > 2.0 && gain < 3.2, "gain {gain}");
    }

    #[test]
    fn high_tone_is_left_alone() {
        let mut boost = build_boost(12.0);
        let gain = settled_gain(&mut boost, 5_000.0);
        assert!((gain - 1.0).abs() < 0.03, "gain {gain}");
    }

    #[test]
    fn zero_gain_and_disabled_boost_are_bit_exact() {
        let input = tone(60.0, 0.2);

        let mut flat = build_boost(0.0);
        assert!(!flat.is_active());
        let mut buffer = input.clone();
        flat.process(&mut buffer);
        assert_eq!(buffer, input);

        let mut disabled = build_boost(12.0);
        disabled.set_enabled(false);
        let mut buffer = input.clone();
        disabled.process(&mut buffer);
        assert_eq!(buffer, input);
    }

    #[test]
    fn setters_clamp_and_reset_restores_flat_response() {
        let mut boost = build_boost(40.0);
        boost.set_frequency(5.0);
        assert_eq!(boost.gain_db(), 24.0);
        assert_eq!(boost.frequency(), 20.0);
        boost.set_frequency(1_000.0);
        assert_eq!(boost.frequency(), 200.0);

        let mut buffer = tone(60.0, 0.1);
        boost.process(&mut buffer);
        boost.reset();
        assert_eq!(boost.gain_db(), 0.0);
        assert_eq!(boost.frequency(), DEFAULT_FREQUENCY_HZ);
        assert!(boost.stage().is_active());
        assert!(!boost.is_active());
    }
}
