use std::{collections::VecDeque, ops::Range};

use serde::{Deserialize, Serialize};

use super::{
    features,
    fft::FftEngine,
    key::{self, KeyEstimate, KeyTracker},
    tempo::{self, SpectralFlux, TempoEstimate},
};
use crate::{
    bands::{FrequencyBandProfiler, FrequencyBands},
    config::AnalysisConfig,
    pcm::{amplitude_to_db, estimate_true_peak, DB_FLOOR},
    Result, SoundclashError,
};

/// Bars in the log-spaced display spectrum.
pub const SPECTRUM_BANDS: usize = 32;
const SPECTRUM_MIN_HZ: f32 = 20.0;
const SPECTRUM_EPSILON: f32 = 1e-10;

/// Latest streaming measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    /// RMS level of the last hop in dBFS, floored at -80.
    pub loudness_db: f32,
    pub energy: f32,
    /// Inter-sample peak estimate of the last hop in dBFS.
    pub peak_db: f32,
    /// Log-spaced magnitudes from 20 Hz to Nyquist, normalised to the
    /// loudest bar.
    pub spectrum: Vec<f32>,
    pub bands: FrequencyBands,
    pub tempo: TempoEstimate,
    pub key: KeyEstimate,
    pub hops: u64,
}

impl Default for LiveSnapshot {
    fn default() -> Self {
        Self {
            loudness_db: DB_FLOOR,
            energy: 0.0,
            peak_db: DB_FLOOR,
            spectrum: vec![0.0; SPECTRUM_BANDS],
            bands: FrequencyBands::default(),
            tempo: TempoEstimate::default(),
            key: KeyEstimate::default(),
            hops: 0,
        }
    }
}

/// Incremental analyzer for a mono stream fed in blocks of any size.
///
/// Samples are regrouped into fixed hops. Level, spectrum and band profile
/// refresh on every hop; tempo and key are re-estimated every
/// `tempo_interval` hops from the rolling onset and chroma histories.
#[derive(Debug)]
pub struct LiveAnalyzer {
    sample_rate: u32,
    hop_size: usize,
    tempo_interval: u64,
    onset_capacity: usize,
    fft: FftEngine,
    frame: VecDeque<f32>,
    pending: Vec<f32>,
    spectrum: Vec<f32>,
    flux: SpectralFlux,
    onsets: VecDeque<f32>,
    envelope: Vec<f32>,
    keys: KeyTracker,
    profiler: FrequencyBandProfiler,
    display_bins: Vec<Range<usize>>,
    snapshot: LiveSnapshot,
}

impl LiveAnalyzer {
    pub fn new(sample_rate: u32, config: &AnalysisConfig) -> Result<Self> {
        if sample_rate == 0 {
            return Err(SoundclashError::InvalidInput("sample rate must be positive"));
        }
        if config.hop_size == 0 || config.hop_size > config.fft_size {
            return Err(SoundclashError::InvalidInput(
                "hop size must be between 1 and the fft size",
            ));
        }

        let fft = FftEngine::new(config.fft_size)?;
        let profiler = FrequencyBandProfiler::new(sample_rate, config.fft_size)?;
        let display_bins = display_bins(sample_rate, config.fft_size);
        tracing::debug!(
            sample_rate,
            fft_size = config.fft_size,
            hop_size = config.hop_size,
            "live analyzer configured"
        );

        Ok(Self {
            sample_rate,
            hop_size: config.hop_size,
            tempo_interval: config.tempo_interval.max(1) as u64,
            onset_capacity: config.onset_history.max(tempo::MIN_ENVELOPE_LEN),
            frame: VecDeque::from(vec![0.0; config.fft_size]),
            pending: Vec::with_capacity(config.hop_size),
            spectrum: Vec::with_capacity(fft.bins()),
            flux: SpectralFlux::new(),
            onsets: VecDeque::with_capacity(config.onset_history),
            envelope: Vec::with_capacity(config.onset_history),
            keys: KeyTracker::new(config.key_history, config.min_key_history),
            profiler,
            display_bins,
            snapshot: LiveSnapshot::default(),
            fft,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Feeds mono samples and returns how many hops were completed.
    pub fn push_samples(&mut self, samples: &[f32]) -> Result<usize> {
        let mut completed = 0;
        let mut remaining = samples;
        while !remaining.is_empty() {
            let take = (self.hop_size - self.pending.len()).min(remaining.len());
            self.pending.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];

            if self.pending.len() == self.hop_size {
                let mut hop = std::mem::take(&mut self.pending);
                let outcome = self.process_hop(&hop);
                hop.clear();
                self.pending = hop;
                outcome?;
                completed += 1;
            }
        }
        Ok(completed)
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        self.snapshot.clone()
    }

    pub fn tempo(&self) -> TempoEstimate {
        self.snapshot.tempo
    }

    pub fn key(&self) -> KeyEstimate {
        self.snapshot.key
    }

    /// Drops all history and buffered audio.
    pub fn reset(&mut self) {
        self.frame.iter_mut().for_each(|sample| *sample = 0.0);
        self.pending.clear();
        self.flux.reset();
        self.onsets.clear();
        self.keys.clear();
        self.snapshot = LiveSnapshot::default();
    }

    fn process_hop(&mut self, hop: &[f32]) -> Result<()> {
        self.frame.drain(..hop.len());
        self.frame.extend(hop.iter().copied());
        self.fft
            .magnitude_spectrum(self.frame.make_contiguous(), &mut self.spectrum)?;

        let level = features::rms(hop);
        self.snapshot.loudness_db = amplitude_to_db(level);
        self.snapshot.energy = features::energy_from_rms(level);
        self.snapshot.peak_db = amplitude_to_db(estimate_true_peak(hop));
        self.snapshot.bands = self.profiler.profile(&self.spectrum);
        self.update_display_spectrum();

        if self.onsets.len() == self.onset_capacity {
            self.onsets.pop_front();
        }
        self.onsets.push_back(self.flux.next(&self.spectrum));

        let mut chroma = [0.0_f32; 12];
        key::chroma_from_spectrum(&self.spectrum, self.sample_rate, self.fft.size(), &mut chroma);
        if key::normalize_chroma(&mut chroma) {
            self.keys.push(chroma);
        }

        self.snapshot.hops += 1;
        if self.snapshot.hops % self.tempo_interval == 0 {
            self.envelope.clear();
            self.envelope.extend(self.onsets.iter().copied());
            tempo::normalize_envelope(&mut self.envelope);
            self.snapshot.tempo =
                tempo::detect_tempo(&self.envelope, self.sample_rate, self.hop_size);
            self.snapshot.key = self.keys.estimate();
        }
        Ok(())
    }

    fn update_display_spectrum(&mut self) {
        let mut max = 0.0_f32;
        for (bar, bins) in self.snapshot.spectrum.iter_mut().zip(&self.display_bins) {
            let slice = &self.spectrum[bins.clone()];
            *bar = if slice.is_empty() {
                0.0
            } else {
                slice.iter().sum::<f32>() / slice.len() as f32
            };
            max = max.max(*bar);
        }
        let divisor = max.max(SPECTRUM_EPSILON);
        self.snapshot
            .spectrum
            .iter_mut()
            .for_each(|bar| *bar /= divisor);
    }
}

/// Bin ranges of the display bars. Edges grow geometrically from 20 Hz to
/// Nyquist; a bar narrower than one bin takes the bin nearest its centre.
fn display_bins(sample_rate: u32, fft_size: usize) -> Vec<Range<usize>> {
    let bins = fft_size / 2;
    let bin_width = sample_rate as f32 / fft_size as f32;
    let nyquist = sample_rate as f32 / 2.0;
    let ratio = (nyquist / SPECTRUM_MIN_HZ).max(1.0);
    let edge = |index: usize| SPECTRUM_MIN_HZ * ratio.powf(index as f32 / SPECTRUM_BANDS as f32);

    (0..SPECTRUM_BANDS)
        .map(|index| {
            let (lo, hi) = (edge(index), edge(index + 1));
            let start = ((lo / bin_width).ceil() as usize).min(bins);
            let end = ((hi / bin_width).ceil() as usize).min(bins);
            if end > start {
                start..end
            } else {
                let centre = (((lo * hi).sqrt() / bin_width).round() as usize).min(bins - 1);
                centre..centre + 1
            }
        })
        .collect()
}
