//! WSOLA (Waveform Similarity Overlap-Add) core working on normalised floats.

use super::accumulator::SampleAccumulator;
use crate::analysis::fft::hann_window;

/// Length of one analysis window.
const WINDOW_MS: f64 = 25.0;
/// Forward search span used to line up each new segment with the previous one.
const SEEK_MS: f64 = 8.0;
/// Minimum energy before a correlation is trusted.
const ENERGY_EPSILON: f32 = 1e-9;
const BLEND_EPSILON: f32 = 1e-6;

/// Frame geometry derived from the sample rate and the effective speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsolaGeometry {
    /// Frames per analysis window.
    pub window: usize,
    /// Frames cross-faded between consecutive windows.
    pub overlap: usize,
    /// Frames emitted per step; constant for a given sample rate.
    pub output_hop: usize,
    /// Frames the read cursor advances per step, rounded for display. The
    /// cursor itself advances by the exact fractional hop.
    pub input_hop: usize,
    /// Frames searched past the nominal read position.
    pub seek: usize,
}

impl WsolaGeometry {
    fn new(sample_rate: u32, speed: f64) -> Self {
        let window = ((WINDOW_MS * f64::from(sample_rate) / 1000.0).round() as usize).max(4);
        let overlap = window / 2;
        let output_hop = window - overlap;
        let seek = (SEEK_MS * f64::from(sample_rate) / 1000.0).round() as usize;
        Self {
            window,
            overlap,
            output_hop,
            input_hop: exact_input_hop(output_hop, speed).round() as usize,
            seek,
        }
    }
}

fn exact_input_hop(output_hop: usize, speed: f64) -> f64 {
    (output_hop as f64 * speed).max(1.0)
}

/// Time-domain stretcher: reads the input at a speed-scaled hop and emits a
/// fixed hop, cross-fading consecutive windows.
#[derive(Debug, Clone)]
pub(crate) struct Wsola {
    channels: usize,
    geometry: WsolaGeometry,
    hann: Vec<f32>,
    accumulator: SampleAccumulator,
    /// Exact per-step advance of the read position.
    hop: f64,
    /// Next nominal read position, in frames from the accumulator start. Kept
    /// fractional so rounding never accumulates; may run past the buffered
    /// data when the input hop exceeds a window.
    position: f64,
    prev_window: Vec<f32>,
    has_prev: bool,
    target: Vec<f32>,
    candidates: Vec<f32>,
}

impl Wsola {
    pub(crate) fn new(sample_rate: u32, channels: usize, speed: f64) -> Self {
        let channels = channels.max(1);
        let geometry = WsolaGeometry::new(sample_rate, speed);
        let hann = hann_window(geometry.window);
        Self {
            channels,
            geometry,
            hann,
            accumulator: SampleAccumulator::with_capacity(
                (geometry.window + geometry.seek) * channels * 4,
            ),
            hop: exact_input_hop(geometry.output_hop, speed),
            position: 0.0,
            prev_window: vec![0.0; geometry.window * channels],
            has_prev: false,
            target: Vec::with_capacity(geometry.overlap),
            candidates: Vec::with_capacity(geometry.overlap + geometry.seek),
        }
    }

    pub(crate) fn geometry(&self) -> WsolaGeometry {
        self.geometry
    }

    pub(crate) fn set_speed(&mut self, speed: f64) {
        self.hop = exact_input_hop(self.geometry.output_hop, speed);
        self.geometry.input_hop = self.hop.round() as usize;
    }

    pub(crate) fn push(&mut self, samples: &[i16]) {
        self.accumulator.extend_from_pcm(samples);
    }

    /// Runs every step for which a full window plus its search span is
    /// buffered, appending interleaved output.
    pub(crate) fn process(&mut self, output: &mut Vec<f32>) {
        let span = self.geometry.window + self.geometry.seek;
        while self.cursor() + span <= self.frames() {
            let cursor = self.cursor();
            let offset = self.best_offset(cursor);
            self.step(cursor + offset, output);
            self.position += self.hop;
        }
        self.compact();
    }

    /// Drains the remaining input at end of stream, zero-padding the last
    /// windows and skipping the similarity search.
    pub(crate) fn finish(&mut self, output: &mut Vec<f32>) {
        self.process(output);
        while self.cursor() < self.frames() {
            self.step(self.cursor(), output);
            self.position += self.hop;
        }
        self.clear();
    }

    /// Hands back the raw frames the cursor has not reached yet and clears
    /// all state. Used when the stage stops stretching mid-stream.
    pub(crate) fn drain_unprocessed(&mut self, output: &mut Vec<f32>) {
        let start = self.cursor().min(self.frames()) * self.channels;
        output.extend_from_slice(&self.accumulator.as_slice()[start..]);
        self.clear();
    }

    pub(crate) fn clear(&mut self) {
        self.accumulator.clear();
        self.position = 0.0;
        self.has_prev = false;
        self.prev_window.iter_mut().for_each(|s| *s = 0.0);
    }

    /// Read position rounded to the nearest frame.
    fn cursor(&self) -> usize {
        self.position.round() as usize
    }

    fn frames(&self) -> usize {
        self.accumulator.len() / self.channels
    }

    /// Picks the offset within the seek span whose head best matches the
    /// natural continuation of the previous window.
    fn best_offset(&mut self, cursor: usize) -> usize {
        if !self.has_prev || self.geometry.seek == 0 {
            return 0;
        }

        let WsolaGeometry {
            overlap,
            output_hop,
            seek,
            ..
        } = self.geometry;
        let channels = self.channels;
        let data = self.accumulator.as_slice();

        self.target.clear();
        self.target.extend(
            self.prev_window[output_hop * channels..(output_hop + overlap) * channels]
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>()),
        );
        let start = cursor * channels;
        self.candidates.clear();
        self.candidates.extend(
            data[start..start + (overlap + seek) * channels]
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>()),
        );

        let target_energy: f32 = self.target.iter().map(|s| s * s).sum();
        if target_energy <= ENERGY_EPSILON {
            return 0;
        }

        let mut candidate_energy: f32 = self.candidates[..overlap].iter().map(|s| s * s).sum();
        let mut best_offset = 0;
        let mut best_score = f32::NEG_INFINITY;

        for offset in 0..=seek {
            if offset > 0 {
                let leaving = self.candidates[offset - 1];
                let entering = self.candidates[offset + overlap - 1];
                candidate_energy = (candidate_energy - leaving * leaving + entering * entering).max(0.0);
            }
            if candidate_energy <= ENERGY_EPSILON {
                continue;
            }
            let dot: f32 = self
                .target
                .iter()
                .zip(&self.candidates[offset..offset + overlap])
                .map(|(a, b)| a * b)
                .sum();
            let score = dot / (target_energy * candidate_energy).sqrt();
            if score > best_score {
                best_score = score;
                best_offset = offset;
            }
        }

        best_offset
    }

    /// Emits one output hop starting from the segment at `start` and keeps
    /// that segment for the next cross-fade. Frames past the buffered data
    /// read as silence.
    fn step(&mut self, start: usize, output: &mut Vec<f32>) {
        let WsolaGeometry {
            window,
            overlap,
            output_hop,
            ..
        } = self.geometry;
        let channels = self.channels;
        let data = self.accumulator.as_slice();
        let read = |frame: usize, channel: usize| -> f32 {
            data.get((start + frame) * channels + channel)
                .copied()
                .unwrap_or(0.0)
        };
        let ramp_len = (overlap * channels) as f32;

        for i in 0..output_hop {
            for channel in 0..channels {
                let current = read(i, channel);
                let sample = if self.has_prev && i < overlap {
                    let previous = self.prev_window[(output_hop + i) * channels + channel];
                    let blend = (i * channels + channel) as f32 / ramp_len;
                    let w_prev = self.hann[output_hop + i] * (1.0 - blend);
                    let w_curr = self.hann[i] * blend;
                    let norm = w_prev + w_curr;
                    if norm > BLEND_EPSILON {
                        (previous * w_prev + current * w_curr) / norm
                    } else {
                        current
                    }
                } else {
                    current
                };
                output.push(sample);
            }
        }

        for frame in 0..window {
            for channel in 0..channels {
                self.prev_window[frame * channels + channel] = read(frame, channel);
            }
        }
        self.has_prev = true;
    }

    /// Drops the whole frames already passed, keeping the fractional part of
    /// the position.
    fn compact(&mut self) {
        let consumed = (self.position.floor() as usize).min(self.frames());
        self.accumulator.discard_front(consumed * self.channels);
        self.position -= consumed as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_follows_window_length() {
        let geometry = WsolaGeometry::new(44_100, 1.0);
        assert_eq!(geometry.window, 1103);
        assert_eq!(geometry.overlap, 551);
        assert_eq!(geometry.output_hop, 552);
        assert_eq!(geometry.input_hop, 552);
        assert_eq!(geometry.seek, 353);

        assert_eq!(WsolaGeometry::new(44_100, 2.0).input_hop, 1104);
        assert_eq!(WsolaGeometry::new(44_100, 0.001).input_hop, 1);
    }

    #[test]
    fn nothing_is_emitted_before_a_full_span_is_buffered() {
        let mut wsola = Wsola::new(8_000, 1, 1.5);
        let geometry = wsola.geometry();
        let mut output = Vec::new();

        wsola.push(&vec![1000; geometry.window + geometry.seek - 1]);
        wsola.process(&mut output);
        assert!(output.is_empty());

        wsola.push(&[1000]);
        wsola.process(&mut output);
        assert_eq!(output.len(), geometry.output_hop);
    }

    #[test]
    fn constant_signal_keeps_its_level_through_crossfades() {
        let mut wsola = Wsola::new(8_000, 2, 0.75);
        let mut output = Vec::new();
        wsola.push(&vec![8192; 8_000 * 2]);
        wsola.process(&mut output);

        assert!(!output.is_empty());
        for sample in output {
            assert!((sample - 0.25).abs() < 1e-5, "sample {sample}");
        }
    }

    #[test]
    fn drain_returns_unread_frames() {
        let mut wsola = Wsola::new(8_000, 1, 2.0);
        wsola.push(&[100, 200, 300]);

        let mut output = Vec::new();
        wsola.drain_unprocessed(&mut output);
        assert_eq!(output.len(), 3);
        assert_eq!(wsola.frames(), 0);

        output.clear();
        wsola.drain_unprocessed(&mut output);
        assert!(output.is_empty());
    }

    #[test]
    fn fractional_hops_do_not_accumulate_rounding() {
        // 8 kHz gives a 100-frame output hop, so speed 0.025 asks for 2.5
        // input frames per step.
        let mut wsola = Wsola::new(8_000, 1, 0.025);
        assert_eq!(wsola.geometry().output_hop, 100);

        let mut output = Vec::new();
        for block in vec![1000_i16; 8_000].chunks(999) {
            wsola.push(block);
            wsola.process(&mut output);
        }
        wsola.finish(&mut output);

        let steps = output.len() / 100;
        assert_eq!(steps, 3_200);
    }
}
