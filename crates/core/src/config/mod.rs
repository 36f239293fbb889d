use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    bass_boost::BassBoost, chain::ProcessingChain, compressor::Compressor, limiter::PeakLimiter,
    pcm::PcmFormat, stretch::TimeStretchPitchShifter, Result,
};

/// Top-level configuration structure for the application. Every section and
/// field falls back to its default, so partial documents are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub limiter: LimiterConfig,
    pub stretch: StretchConfig,
    pub battle: BattleConfig,
    pub analysis: AnalysisConfig,
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Stream format and block size of the PCM path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames handed to the processing chain per call.
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            block_size: 1024,
        }
    }
}

impl AudioConfig {
    pub fn format(&self) -> PcmFormat {
        PcmFormat::pcm16(self.sample_rate, self.channels)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    pub enabled: bool,
    pub threshold_db: f32,
    pub ceiling_db: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_db: -0.3,
            ceiling_db: -0.1,
            attack_ms: 0.5,
            release_ms: 100.0,
        }
    }
}

impl LimiterConfig {
    /// Pushes the settings into a limiter; out-of-range values are clamped
    /// by its setters.
    pub fn apply(&self, limiter: &mut PeakLimiter) {
        limiter.set_enabled(self.enabled);
        limiter.set_threshold(self.threshold_db);
        limiter.set_ceiling(self.ceiling_db);
        limiter.set_attack(self.attack_ms);
        limiter.set_release(self.release_ms);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StretchConfig {
    pub speed: f32,
    pub pitch_semitones: f32,
    pub rate: f32,
    pub formant_preservation: bool,
}

impl Default for StretchConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch_semitones: 0.0,
            rate: 1.0,
            formant_preservation: false,
        }
    }
}

impl StretchConfig {
    pub fn apply(&self, stretcher: &mut TimeStretchPitchShifter) {
        stretcher.set_speed(self.speed);
        stretcher.set_pitch(self.pitch_semitones);
        stretcher.set_rate(self.rate);
        stretcher.set_formant_preservation(self.formant_preservation);
    }
}

/// Battle mode: bass boost and compressor ahead of the limiter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleConfig {
    pub enabled: bool,
    pub bass_boost: BassBoostConfig,
    pub compressor: CompressorConfig,
}

impl BattleConfig {
    pub fn apply(&self, chain: &mut ProcessingChain) {
        chain.set_battle_mode(self.enabled);
        self.bass_boost.apply(chain.bass_boost_mut());
        self.compressor.apply(chain.compressor_mut());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BassBoostConfig {
    pub gain_db: f32,
    pub frequency_hz: f32,
}

impl Default for BassBoostConfig {
    fn default() -> Self {
        Self {
            gain_db: 0.0,
            frequency_hz: 80.0,
        }
    }
}

impl BassBoostConfig {
    pub fn apply(&self, boost: &mut BassBoost) {
        boost.set_gain(self.gain_db);
        boost.set_frequency(self.frequency_hz);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorConfig {
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub makeup_db: f32,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            threshold_db: -12.0,
            ratio: 4.0,
            attack_ms: 5.0,
            release_ms: 100.0,
            makeup_db: 6.0,
        }
    }
}

impl CompressorConfig {
    pub fn apply(&self, compressor: &mut Compressor) {
        compressor.set_threshold(self.threshold_db);
        compressor.set_ratio(self.ratio);
        compressor.set_attack(self.attack_ms);
        compressor.set_release(self.release_ms);
        compressor.set_makeup_gain(self.makeup_db);
    }
}

/// Streaming analysis geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Power-of-two FFT length.
    pub fft_size: usize,
    pub hop_size: usize,
    /// Hops between tempo and key re-estimates.
    pub tempo_interval: usize,
    /// Onset envelope values kept for tempo estimation.
    pub onset_history: usize,
    /// Chroma vectors averaged for key estimation.
    pub key_history: usize,
    /// Chroma vectors required before a key is reported.
    pub min_key_history: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            hop_size: 512,
            tempo_interval: 32,
            onset_history: 1024,
            key_history: 100,
            min_key_history: 20,
        }
    }
}
