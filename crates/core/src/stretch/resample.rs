/// Streaming linear-interpolation resampler over interleaved frames.
///
/// Reads `step` input frames per output frame: a step of 2.0 halves the
/// duration and raises pitch by an octave. The fractional read position and
/// the frame it sits on survive across calls so block boundaries are seamless.
#[derive(Debug, Clone)]
pub(crate) struct LinearResampler {
    channels: usize,
    step: f64,
    position: f64,
    pending: Vec<f32>,
}

impl LinearResampler {
    pub(crate) fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            step: 1.0,
            position: 0.0,
            pending: Vec::new(),
        }
    }

    pub(crate) fn set_step(&mut self, step: f64) {
        self.step = step.max(f64::EPSILON);
    }

    /// True when the resampler would only copy frames.
    pub(crate) fn is_identity(&self) -> bool {
        (self.step - 1.0).abs() < 1e-9
    }

    pub(crate) fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        if self.is_identity() && self.pending.is_empty() {
            output.extend_from_slice(input);
            return;
        }

        self.pending.extend_from_slice(input);
        let channels = self.channels;
        let frames = self.pending.len() / channels;

        while self.position + 1.0 < frames as f64 {
            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            let current = &self.pending[index * channels..(index + 1) * channels];
            let next = &self.pending[(index + 1) * channels..(index + 2) * channels];
            output.extend(
                current
                    .iter()
                    .zip(next)
                    .map(|(&a, &b)| a + (b - a) * frac),
            );
            self.position += self.step;
        }

        let consumed = (self.position.floor() as usize).min(frames);
        self.pending.drain(..consumed * channels);
        self.position -= consumed as f64;
    }

    /// Emits what is left, holding the final frame where no successor exists.
    pub(crate) fn finish(&mut self, output: &mut Vec<f32>) {
        let channels = self.channels;
        let frames = self.pending.len() / channels;

        while self.position < frames as f64 {
            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            let current = &self.pending[index * channels..(index + 1) * channels];
            if index + 1 < frames {
                let next = &self.pending[(index + 1) * channels..(index + 2) * channels];
                output.extend(
                    current
                        .iter()
                        .zip(next)
                        .map(|(&a, &b)| a + (b - a) * frac),
                );
            } else {
                output.extend_from_slice(current);
            }
            self.position += self.step;
        }

        self.clear();
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
        self.position = 0.0;
    }
}
