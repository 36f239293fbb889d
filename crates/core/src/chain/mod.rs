use crate::{
    bass_boost::BassBoost,
    compressor::Compressor,
    config::{LimiterConfig, StretchConfig},
    limiter::PeakLimiter,
    pcm::{PcmFormat, StageFormat},
    stretch::TimeStretchPitchShifter,
};

/// Playback path: speed/pitch processing, then in battle mode the bass boost
/// and compressor, and finally the output limiter.
///
/// The chain owns every stage, so whoever holds it has exclusive access to
/// their state.
#[derive(Debug, Default)]
pub struct ProcessingChain {
    stretcher: TimeStretchPitchShifter,
    bass_boost: BassBoost,
    compressor: Compressor,
    limiter: PeakLimiter,
    battle_mode: bool,
}

impl ProcessingChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures every stage. They accept the same formats, so the returned
    /// stage applies to the whole chain.
    pub fn configure(&mut self, format: PcmFormat) -> StageFormat {
        let stage = self.stretcher.configure(format);
        self.bass_boost.configure(format);
        self.compressor.configure(format);
        self.limiter.configure(format);
        stage
    }

    /// Routes output through the bass boost and compressor before the
    /// limiter. Off by default.
    pub fn set_battle_mode(&mut self, enabled: bool) {
        if enabled != self.battle_mode {
            self.bass_boost.flush();
            self.compressor.flush();
        }
        self.battle_mode = enabled;
        tracing::debug!(enabled, "battle mode updated");
    }

    pub fn is_battle_mode(&self) -> bool {
        self.battle_mode
    }

    pub fn apply(&mut self, stretch: &StretchConfig, limiter: &LimiterConfig) {
        stretch.apply(&mut self.stretcher);
        limiter.apply(&mut self.limiter);
    }

    pub fn stretcher(&self) -> &TimeStretchPitchShifter {
        &self.stretcher
    }

    pub fn stretcher_mut(&mut self) -> &mut TimeStretchPitchShifter {
        &mut self.stretcher
    }

    pub fn bass_boost(&self) -> &BassBoost {
        &self.bass_boost
    }

    pub fn bass_boost_mut(&mut self) -> &mut BassBoost {
        &mut self.bass_boost
    }

    pub fn compressor(&self) -> &Compressor {
        &self.compressor
    }

    pub fn compressor_mut(&mut self) -> &mut Compressor {
        &mut self.compressor
    }

    pub fn limiter(&self) -> &PeakLimiter {
        &self.limiter
    }

    pub fn limiter_mut(&mut self) -> &mut PeakLimiter {
        &mut self.limiter
    }

    /// Pushes `input` through the stretcher and appends whatever it emits,
    /// limited, to `output`. Returns the number of samples appended.
    pub fn process(&mut self, input: &[i16], output: &mut Vec<i16>) -> usize {
        self.stretcher.queue_input(input);
        self.drain_into(output)
    }

    /// Signals end of stream and appends the stretcher's tail.
    pub fn finish(&mut self, output: &mut Vec<i16>) -> usize {
        self.stretcher.queue_end_of_stream();
        self.drain_into(output)
    }

    pub fn is_ended(&self) -> bool {
        self.stretcher.is_ended()
    }

    /// Drops buffered audio and filter and envelope history, keeping
    /// settings.
    pub fn flush(&mut self) {
        self.stretcher.flush();
        self.bass_boost.flush();
        self.compressor.flush();
        self.limiter.flush();
    }

    /// Restores every stage's defaults and leaves battle mode.
    pub fn reset(&mut self) {
        self.stretcher.reset();
        self.bass_boost.reset();
        self.compressor.reset();
        self.limiter.reset();
        self.battle_mode = false;
    }

    fn drain_into(&mut self, output: &mut Vec<i16>) -> usize {
        let start = output.len();
        let pending = self.stretcher.pending_output();
        output.resize(start + pending, 0);
        let written = self.stretcher.read_output(&mut output[start..]);
        output.truncate(start + written);
        let block = &mut output[start..];
        if self.battle_mode {
            self.bass_boost.process(block);
            self.compressor.process(block);
        }
        self.limiter.process(block);
        written
    }
}
