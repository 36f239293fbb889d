//! Variable speed and pitch processing for interleaved 16-bit PCM.
//!
//! Speed changes come from WSOLA time stretching. Pitch changes stretch by the
//! pitch ratio first and then resample by that ratio, which restores the
//! duration while moving every partial by the same factor.

mod accumulator;
mod resample;
mod wsola;

use std::collections::VecDeque;
use std::ops::RangeInclusive;

use crate::pcm::{f32_to_i16, PcmFormat, StageFormat};

use self::resample::LinearResampler;
use self::wsola::Wsola;

pub use self::wsola::WsolaGeometry;

pub const SPEED_RANGE: RangeInclusive<f32> = 0.1..=8.0;
pub const PITCH_RANGE_SEMITONES: RangeInclusive<f32> = -24.0..=24.0;
pub const RATE_RANGE: RangeInclusive<f32> = 0.1..=8.0;

/// Parameters closer than this to their neutral value count as neutral.
const NEUTRAL_EPSILON: f32 = 1e-4;

/// WSOLA-based speed and pitch processor.
///
/// Input is queued with [`queue_input`](Self::queue_input) and collected with
/// [`get_output`](Self::get_output) or [`read_output`](Self::read_output).
/// While speed is 1, pitch is 0 and rate is 1 the stage is inactive and
/// buffers pass through bit-exactly.
#[derive(Debug)]
pub struct TimeStretchPitchShifter {
    stage: StageFormat,
    speed: f32,
    pitch_semitones: f32,
    rate: f32,
    formant_preservation: bool,
    wsola: Option<Wsola>,
    resampler: LinearResampler,
    stretched: Vec<f32>,
    resampled: Vec<f32>,
    output: VecDeque<i16>,
    input_ended: bool,
}

impl Default for TimeStretchPitchShifter {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeStretchPitchShifter {
    /// Creates a neutral, unconfigured stage that passes input through.
    pub fn new() -> Self {
        Self {
            stage: StageFormat::Bypassed,
            speed: 1.0,
            pitch_semitones: 0.0,
            rate: 1.0,
            formant_preservation: false,
            wsola: None,
            resampler: LinearResampler::new(1),
            stretched: Vec::new(),
            resampled: Vec::new(),
            output: VecDeque::new(),
            input_ended: false,
        }
    }

    /// Accepts the stream format and rebuilds the WSOLA state for it. The
    /// output format always equals the input format.
    pub fn configure(&mut self, format: PcmFormat) -> StageFormat {
        self.stage = StageFormat::negotiate(format);
        match self.stage {
            StageFormat::Active(format) => {
                let wsola = Wsola::new(format.sample_rate, format.channels(), self.wsola_speed());
                tracing::debug!(
                    sample_rate = format.sample_rate,
                    channels = format.channel_count,
                    geometry = ?wsola.geometry(),
                    "stretcher configured"
                );
                self.wsola = Some(wsola);
                self.resampler = LinearResampler::new(format.channels());
            }
            StageFormat::Bypassed => {
                self.wsola = None;
                self.resampler = LinearResampler::new(1);
            }
        }
        self.update_processing();
        self.flush();
        self.stage
    }

    /// Playback speed; 2.0 halves the duration.
    pub fn set_speed(&mut self, speed: f32) {
        self.apply_parameters(|shifter| shifter.speed = clamp_to(speed, &SPEED_RANGE, 1.0));
    }

    /// Pitch offset in semitones, independent of speed.
    pub fn set_pitch(&mut self, semitones: f32) {
        self.apply_parameters(|shifter| {
            shifter.pitch_semitones = clamp_to(semitones, &PITCH_RANGE_SEMITONES, 0.0)
        });
    }

    /// Vinyl-style rate that scales speed and pitch together.
    pub fn set_rate(&mut self, rate: f32) {
        self.apply_parameters(|shifter| shifter.rate = clamp_to(rate, &RATE_RANGE, 1.0));
    }

    /// Stored and reported only; no spectral envelope correction is applied.
    pub fn set_formant_preservation(&mut self, enabled: bool) {
        self.formant_preservation = enabled;
    }

    /// Returns the currently configured playback speed.
    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Returns the currently configured pitch offset in semitones.
    pub fn pitch_semitones(&self) -> f32 {
        self.pitch_semitones
    }

    /// Returns the currently configured vinyl-style rate.
    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Returns whether formant preservation was requested.
    pub fn formant_preservation(&self) -> bool {
        self.formant_preservation
    }

    /// Returns the format negotiated by the last `configure`.
    pub fn stage(&self) -> StageFormat {
        self.stage
    }

    /// Window geometry in frames, once a supported format is configured.
    pub fn geometry(&self) -> Option<WsolaGeometry> {
        self.wsola.as_ref().map(Wsola::geometry)
    }

    /// True iff speed, pitch or rate differ from neutral.
    pub fn is_active(&self) -> bool {
        (self.speed - 1.0).abs() > NEUTRAL_EPSILON
            || self.pitch_semitones.abs() > NEUTRAL_EPSILON
            || (self.rate - 1.0).abs() > NEUTRAL_EPSILON
    }

    /// Samples ready to be collected.
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    /// Queues interleaved input. Input after end of stream is ignored until
    /// the next flush.
    pub fn queue_input(&mut self, input: &[i16]) {
        if self.input_ended {
            return;
        }

        let stretching = self.stage.is_active() && self.is_active();
        let wsola = match self.wsola.as_mut() {
            Some(wsola) if stretching => wsola,
            _ => {
                self.output.extend(input.iter().copied());
                return;
            }
        };

        wsola.push(input);
        self.stretched.clear();
        wsola.process(&mut self.stretched);
        self.resample_stretched(false);
    }

    /// Removes and returns everything processed so far.
    pub fn get_output(&mut self) -> Vec<i16> {
        self.output.drain(..).collect()
    }

    /// Copies up to `dest.len()` processed samples into `dest` and returns how
    /// many were written. Does not allocate.
    pub fn read_output(&mut self, dest: &mut [i16]) -> usize {
        let count = dest.len().min(self.output.len());
        for (slot, sample) in dest.iter_mut().zip(self.output.drain(..count)) {
            *slot = sample;
        }
        count
    }

    /// Marks the input as complete and renders whatever is still buffered.
    pub fn queue_end_of_stream(&mut self) {
        if self.input_ended {
            return;
        }
        self.input_ended = true;

        if let Some(wsola) = self.wsola.as_mut() {
            self.stretched.clear();
            wsola.finish(&mut self.stretched);
            self.resample_stretched(true);
        }
    }

    /// True once end of stream was queued and all output has been collected.
    pub fn is_ended(&self) -> bool {
        self.input_ended && self.output.is_empty()
    }

    /// Drops all buffered audio while keeping the parameters.
    pub fn flush(&mut self) {
        if let Some(wsola) = self.wsola.as_mut() {
            wsola.clear();
        }
        self.resampler.clear();
        self.stretched.clear();
        self.resampled.clear();
        self.output.clear();
        self.input_ended = false;
    }

    /// Restores neutral parameters and drops all buffered audio.
    pub fn reset(&mut self) {
        self.speed = 1.0;
        self.pitch_semitones = 0.0;
        self.rate = 1.0;
        self.formant_preservation = false;
        self.update_processing();
        self.flush();
    }

    fn pitch_ratio(&self) -> f64 {
        2.0_f64.powf(f64::from(self.pitch_semitones) / 12.0)
    }

    /// WSOLA runs slower by the pitch ratio so the resampler can bring the
    /// duration back while transposing.
    fn wsola_speed(&self) -> f64 {
        f64::from(self.speed) / self.pitch_ratio()
    }

    fn resample_step(&self) -> f64 {
        self.pitch_ratio() * f64::from(self.rate)
    }

    fn apply_parameters(&mut self, change: impl FnOnce(&mut Self)) {
        let was_active = self.is_active();
        change(self);
        if was_active && !self.is_active() {
            self.release_pending();
        }
        self.update_processing();
        tracing::debug!(
            speed = self.speed,
            pitch = self.pitch_semitones,
            rate = self.rate,
            active = self.is_active(),
            "stretch parameters updated"
        );
    }

    fn update_processing(&mut self) {
        let speed = self.wsola_speed();
        let step = self.resample_step();
        if let Some(wsola) = self.wsola.as_mut() {
            wsola.set_speed(speed);
        }
        self.resampler.set_step(step);
    }

    /// Hands frames that were buffered for stretching straight to the output
    /// when the stage turns neutral.
    fn release_pending(&mut self) {
        self.stretched.clear();
        if let Some(wsola) = self.wsola.as_mut() {
            wsola.drain_unprocessed(&mut self.stretched);
        }
        self.resampled.clear();
        self.resampler.finish(&mut self.resampled);
        self.output
            .extend(self.resampled.iter().map(|&sample| f32_to_i16(sample)));
        self.output
            .extend(self.stretched.iter().map(|&sample| f32_to_i16(sample)));
    }

    fn resample_stretched(&mut self, finish: bool) {
        self.resampled.clear();
        self.resampler.process(&self.stretched, &mut self.resampled);
        if finish {
            self.resampler.finish(&mut self.resampled);
        }
        self.output
            .extend(self.resampled.iter().map(|&sample| f32_to_i16(sample)));
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
    use crate::pcm::PcmEncoding;
    use std::f32::consts::PI;

    const SAMPLE_RATE: u32 = 44_100;

    fn build_shifter(channels: u16) -> TimeStretchPitchShifter {
        let mut shifter = TimeStretchPitchShifter::new();
        let stage = shifter.configure(PcmFormat::pcm16(SAMPLE_RATE, channels));
        assert!(stage.is_active());
        shifter
    }

    fn sine(freq: f32, seconds: f32, channels: usize) -> Vec<i16> {
        let frames = (seconds * SAMPLE_RATE as f32) as usize;
        (0..frames)
            .flat_map(|i| {
                let value = 0.5 * (2.0 * PI * freq * i as f32 / SAMPLE_RATE as f32).sin();
                std::iter::repeat((value * 32767.0) as i16).take(channels)
            })
            .collect()
    }

    fn run(shifter: &mut TimeStretchPitchShifter, input: &[i16], block: usize) -> Vec<i16> {
        let mut output = Vec::new();
        for chunk in input.chunks(block) {
            shifter.queue_input(chunk);
            output.extend(shifter.get_output());
        }
        shifter.queue_end_of_stream();
        output.extend(shifter.get_output());
        output
    }

    fn zero_crossings(samples: &[i16]) -> usize {
        samples
            .windows(2)
            .filter(|pair| (pair[0] >= 0) != (pair[1] >= 0))
            .count()
    }

    #[test]
    fn neutral_settings_pass_through_bit_exact() {
        let mut shifter = build_shifter(2);
        assert!(!shifter.is_active());

        let input = sine(330.0, 0.5, 2);
        let output = run(&mut shifter, &input, 777);
        assert_eq!(output, input);
        assert!(shifter.is_ended());
    }

    #[test]
    fn double_speed_halves_duration() {
        for channels in [1_usize, 2] {
            let mut shifter = build_shifter(channels as u16);
            shifter.set_speed(2.0);
            assert!(shifter.is_active());
            let window = shifter.geometry().unwrap().window;

            let input = sine(440.0, 2.0, channels);
            let output = run(&mut shifter, &input, 1024);

            let input_frames = input.len() / channels;
            let output_frames = output.len() / channels;
            assert_eq!(output.len() % channels, 0);
            let expected = input_frames / 2;
            assert!(
                output_frames.abs_diff(expected) <= window,
                "{output_frames} frames, expected about {expected}"
            );
        }
    }

    #[test]
    fn half_speed_doubles_duration() {
        let mut shifter = build_shifter(1);
        shifter.set_speed(0.5);
        let window = shifter.geometry().unwrap().window;

        let input = sine(440.0, 1.0, 1);
        let output = run(&mut shifter, &input, 4096);
        assert!(output.len().abs_diff(input.len() * 2) <= window);
    }

    #[test]
    fn octave_up_keeps_duration_and_doubles_frequency() {
        let mut shifter = build_shifter(1);
        shifter.set_pitch(12.0);
        let window = shifter.geometry().unwrap().window;

        let input = sine(220.0, 2.0, 1);
        let output = run(&mut shifter, &input, 2048);
        assert!(output.len().abs_diff(input.len()) <= window);

        let middle = &output[window * 4..window * 4 + SAMPLE_RATE as usize];
        let crossings = zero_crossings(middle) as f32;
        let expected = 2.0 * 440.0;
        assert!(
            (crossings - expected).abs() < expected * 0.15,
            "{crossings} crossings, expected about {expected}"
        );
    }

    #[test]
    fn duration_law_holds_at_extreme_settings() {
        const RATE: u32 = 8_000;
        let input: Vec<i16> = (0..2 * RATE as usize)
            .map(|i| (8_000.0 * (2.0 * PI * 220.0 * i as f32 / RATE as f32).sin()) as i16)
            .collect();

        for (speed, pitch) in [(0.1, 24.0), (0.1, -24.0), (8.0, 24.0), (8.0, -24.0), (3.3, 7.0)] {
            let mut shifter = TimeStretchPitchShifter::new();
            assert!(shifter.configure(PcmFormat::pcm16(RATE, 1)).is_active());
            shifter.set_speed(speed);
            shifter.set_pitch(pitch);
            let window = shifter.geometry().unwrap().window;

            let output = run(&mut shifter, &input, 999);
            let expected = (input.len() as f32 / speed).round() as usize;
            assert!(
                output.len().abs_diff(expected) <= window,
                "speed {speed} pitch {pitch}: {} frames, expected about {expected}",
                output.len()
            );
        }
    }

    #[test]
    fn rate_scales_duration_like_vinyl() {
        let mut shifter = build_shifter(1);
        shifter.set_rate(2.0);
        let window = shifter.geometry().unwrap().window;

        let input = sine(220.0, 1.0, 1);
        let output = run(&mut shifter, &input, 1000);
        assert!(output.len().abs_diff(input.len() / 2) <= window);
    }

    #[test]
    fn setters_clamp_into_range() {
        let mut shifter = TimeStretchPitchShifter::new();
        shifter.set_speed(20.0);
        shifter.set_pitch(-40.0);
        shifter.set_rate(0.0);
        assert_eq!(shifter.speed(), 8.0);
        assert_eq!(shifter.pitch_semitones(), -24.0);
        assert_eq!(shifter.rate(), 0.1);

        shifter.set_speed(f32::NAN);
        assert_eq!(shifter.speed(), 1.0);
    }

    #[test]
    fn end_of_stream_reports_ended_after_output_is_drained() {
        let mut shifter = build_shifter(1);
        shifter.set_speed(1.5);
        shifter.queue_input(&sine(440.0, 0.3, 1));
        assert!(!shifter.is_ended());

        shifter.queue_end_of_stream();
        assert!(shifter.pending_output() > 0);
        assert!(!shifter.is_ended());

        let mut scratch = vec![0_i16; 512];
        while shifter.read_output(&mut scratch) > 0 {}
        assert!(shifter.is_ended());

        shifter.queue_input(&[1, 2, 3]);
        assert_eq!(shifter.pending_output(), 0);

        shifter.flush();
        assert!(!shifter.is_ended());
        assert_eq!(shifter.speed(), 1.5);
    }

    #[test]
    fn returning_to_neutral_releases_buffered_input_untouched() {
        let mut shifter = build_shifter(1);
        shifter.set_speed(2.0);
        let input = sine(440.0, 0.02, 1);
        shifter.queue_input(&input);
        assert_eq!(shifter.pending_output(), 0);

        shifter.set_speed(1.0);
        assert_eq!(shifter.get_output(), input);
    }

    #[test]
    fn reset_restores_neutral_parameters() {
        let mut shifter = build_shifter(2);
        shifter.set_speed(3.0);
        shifter.set_pitch(5.0);
        shifter.set_formant_preservation(true);
        shifter.queue_input(&sine(440.0, 0.5, 2));

        shifter.reset();
        assert!(!shifter.is_active());
        assert!(!shifter.formant_preservation());
        assert_eq!(shifter.pending_output(), 0);
        assert!(shifter.stage().is_active());
    }

    #[test]
    fn unsupported_format_bypasses_even_when_active() {
        let mut shifter = TimeStretchPitchShifter::new();
        let stage = shifter.configure(PcmFormat {
            encoding: PcmEncoding::Float,
            ..PcmFormat::pcm16(SAMPLE_RATE, 2)
        });
        assert_eq!(stage, StageFormat::Bypassed);
        assert!(shifter.geometry().is_none());

        shifter.set_speed(2.0);
        let input = sine(440.0, 0.1, 2);
        shifter.queue_input(&input);
        assert_eq!(shifter.get_output(), input);
    }
}
