pub mod features;
pub mod fft;
pub mod key;
pub mod live;
pub mod tempo;

use serde::{Deserialize, Serialize};

use crate::Result;

pub use self::fft::FftEngine;
pub use self::key::{CamelotCode, KeyEstimate, KeyTracker, Mode, MusicalKey};
pub use self::live::{LiveAnalyzer, LiveSnapshot};
pub use self::tempo::TempoEstimate;

/// FFT length used for whole-file chroma and spectral descriptors.
pub const FILE_FFT_SIZE: usize = 4096;
/// Hop between whole-file FFT windows.
pub const FILE_HOP_SIZE: usize = 2048;
/// Non-silent windows needed before a key is reported.
const MIN_KEY_WINDOWS: usize = 10;
const SILENCE_EPSILON: f32 = 1e-9;

/// Descriptors of a complete mono signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioAnalysisResult {
    pub bpm: f32,
    pub bpm_confidence: f32,
    pub key: Option<MusicalKey>,
    pub key_confidence: f32,
    /// Loudness mapped to 0-1 between -60 dBFS and full scale.
    pub energy: f32,
    /// Hz.
    pub spectral_centroid: f32,
    pub spectral_flatness: f32,
    pub zero_crossing_rate: f32,
    pub danceability: f32,
    pub valence: f32,
}

impl AudioAnalysisResult {
    /// Display name of the key with its Camelot code, e.g. `"A minor (8A)"`.
    pub fn key_label(&self) -> Option<String> {
        self.key.map(|key| format!("{} ({})", key, key.camelot()))
    }
}

/// Offline analyzer for decoded tracks.
#[derive(Debug)]
pub struct SpectralAnalyzer {
    fft: FftEngine,
    spectrum: Vec<f32>,
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralAnalyzer {
    pub fn new() -> Self {
        let fft = FftEngine::planned(FILE_FFT_SIZE);
        Self {
            spectrum: Vec::with_capacity(fft.bins()),
            fft,
        }
    }

    /// Analyzes a whole mono track.
    ///
    /// Insufficient material never errors: too few onset frames yields a zero
    /// BPM, fewer than ten non-silent windows yields no key, and empty or
    /// fully silent input yields an all-zero result.
    pub fn analyze_audio_file(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<AudioAnalysisResult> {
        if samples.is_empty() || sample_rate == 0 {
            return Ok(AudioAnalysisResult::default());
        }

        let level = features::rms(samples);
        if level <= SILENCE_EPSILON {
            tracing::debug!(samples = samples.len(), "silent input, skipping analysis");
            return Ok(AudioAnalysisResult::default());
        }
        let energy = features::energy_from_rms(level);
        let zero_crossing_rate = features::zero_crossing_rate(samples);

        let mut chroma = [0.0_f32; 12];
        let mut centroid_sum = 0.0_f32;
        let mut flatness_sum = 0.0_f32;
        let mut voiced = 0usize;

        let windows = if samples.len() <= FILE_FFT_SIZE {
            1
        } else {
            (samples.len() - FILE_FFT_SIZE) / FILE_HOP_SIZE + 1
        };
        for window in 0..windows {
            let start = window * FILE_HOP_SIZE;
            let end = (start + FILE_FFT_SIZE).min(samples.len());
            self.fft
                .magnitude_spectrum(&samples[start..end], &mut self.spectrum)?;

            if self.spectrum.iter().sum::<f32>() <= SILENCE_EPSILON {
                continue;
            }
            voiced += 1;
            key::chroma_from_spectrum(&self.spectrum, sample_rate, FILE_FFT_SIZE, &mut chroma);
            centroid_sum +=
                features::spectral_centroid(&self.spectrum, sample_rate, FILE_FFT_SIZE);
            flatness_sum += features::spectral_flatness(&self.spectrum);
        }

        let (spectral_centroid, spectral_flatness) = if voiced > 0 {
            (centroid_sum / voiced as f32, flatness_sum / voiced as f32)
        } else {
            (0.0, 0.0)
        };

        let key = if voiced >= MIN_KEY_WINDOWS && key::normalize_chroma(&mut chroma) {
            key::detect_key(&chroma)
        } else {
            KeyEstimate::default()
        };

        let envelope = tempo::onset_envelope(samples)?;
        let tempo = tempo::detect_tempo(&envelope, sample_rate, tempo::ONSET_HOP_SIZE);

        let result = AudioAnalysisResult {
            bpm: tempo.bpm,
            bpm_confidence: tempo.confidence,
            key: key.key,
            key_confidence: key.confidence,
            energy,
            spectral_centroid,
            spectral_flatness,
            zero_crossing_rate,
            danceability: danceability(tempo.bpm, energy, spectral_flatness),
            valence: valence(key.key, spectral_centroid),
        };

        tracing::debug!(
            windows,
            voiced,
            bpm = result.bpm,
            key = ?result.key,
            "analysis finished"
        );
        Ok(result)
    }
}

/// How close the tempo sits to 120 BPM, 0 outside 60-180 or when unknown.
fn bpm_score(bpm: f32) -> f32 {
    if bpm <= 0.0 {
        return 0.0;
    }
    (1.0 - (bpm - 120.0).abs() / 60.0).clamp(0.0, 1.0)
}

pub fn danceability(bpm: f32, energy: f32, flatness: f32) -> f32 {
    (0.4 * bpm_score(bpm) + 0.3 * energy + 0.3 * (1.0 - flatness)).clamp(0.0, 1.0)
}

pub fn valence(key: Option<MusicalKey>, centroid_hz: f32) -> f32 {
    let mode_score = match key.map(|key| key.mode()) {
        Some(Mode::Major) => 0.7,
        Some(Mode::Minor) => 0.3,
        None => 0.5,
    };
    let brightness = (centroid_hz / 4000.0).clamp(0.0, 1.0);
    (0.6 * mode_score + 0.4 * brightness).clamp(0.0, 1.0)
}
