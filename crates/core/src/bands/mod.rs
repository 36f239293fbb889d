use std::{cmp::Ordering, fmt, ops::Range};

use serde::{Deserialize, Serialize};

use crate::{analysis::fft::FftEngine, Result};

const BAND_EPSILON: f32 = 1e-10;

/// The six perceptual frequency bands, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    SubBass,
    Bass,
    LowMid,
    Mid,
    HighMid,
    High,
}

impl Band {
    pub const ALL: [Band; 6] = [
        Band::SubBass,
        Band::Bass,
        Band::LowMid,
        Band::Mid,
        Band::HighMid,
        Band::High,
    ];

    /// Lower (inclusive) and upper (exclusive) edge in Hz.
    pub fn range_hz(self) -> (f32, f32) {
        match self {
            Band::SubBass => (20.0, 60.0),
            Band::Bass => (60.0, 250.0),
            Band::LowMid => (250.0, 500.0),
            Band::Mid => (500.0, 2_000.0),
            Band::HighMid => (2_000.0, 4_000.0),
            Band::High => (4_000.0, 20_000.0),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Band::SubBass => "sub-bass",
            Band::Bass => "bass",
            Band::LowMid => "low-mid",
            Band::Mid => "mid",
            Band::HighMid => "high-mid",
            Band::High => "high",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Band energies normalised so the loudest band is 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBands {
    pub sub_bass: f32,
    pub bass: f32,
    pub low_mid: f32,
    pub mid: f32,
    pub high_mid: f32,
    pub high: f32,
}

impl FrequencyBands {
    pub fn get(&self, band: Band) -> f32 {
        match band {
            Band::SubBass => self.sub_bass,
            Band::Bass => self.bass,
            Band::LowMid => self.low_mid,
            Band::Mid => self.mid,
            Band::HighMid => self.high_mid,
            Band::High => self.high,
        }
    }

    fn slot(&mut self, band: Band) -> &mut f32 {
        match band {
            Band::SubBass => &mut self.sub_bass,
            Band::Bass => &mut self.bass,
            Band::LowMid => &mut self.low_mid,
            Band::Mid => &mut self.mid,
            Band::HighMid => &mut self.high_mid,
            Band::High => &mut self.high,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Band, f32)> + '_ {
        Band::ALL.into_iter().map(move |band| (band, self.get(band)))
    }

    /// Loudest band; ties resolve to the lower band.
    pub fn dominant(&self) -> Band {
        self.ranked()[0]
    }

    /// Quietest band; ties resolve to the higher band.
    pub fn weakest(&self) -> Band {
        self.ranked()[Band::ALL.len() - 1]
    }

    /// Bands sorted from loudest to quietest.
    pub fn ranked(&self) -> [Band; 6] {
        let mut bands = Band::ALL;
        bands.sort_by(|a, b| {
            self.get(*b)
                .partial_cmp(&self.get(*a))
                .unwrap_or(Ordering::Equal)
        });
        bands
    }
}

/// Splits magnitude spectra into the six bands.
#[derive(Debug)]
pub struct FrequencyBandProfiler {
    sample_rate: u32,
    fft: FftEngine,
    ranges: [(Band, Range<usize>); 6],
    spectrum: Vec<f32>,
}

impl FrequencyBandProfiler {
    pub fn new(sample_rate: u32, fft_size: usize) -> Result<Self> {
        let fft = FftEngine::new(fft_size)?;
        let ranges = band_bins(sample_rate, fft_size);
        Ok(Self {
            sample_rate,
            spectrum: Vec::with_capacity(fft.bins()),
            fft,
            ranges,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.fft.size()
    }

    /// RMS magnitude per band divided by the largest band. A silent spectrum
    /// gives all zeros.
    pub fn profile(&self, spectrum: &[f32]) -> FrequencyBands {
        let mut bands = FrequencyBands::default();
        let mut max = 0.0_f32;

        for (band, bins) in &self.ranges {
            let end = bins.end.min(spectrum.len());
            let start = bins.start.min(end);
            let slice = &spectrum[start..end];
            let energy = if slice.is_empty() {
                0.0
            } else {
                (slice.iter().map(|m| m * m).sum::<f32>() / slice.len() as f32).sqrt()
            };
            *bands.slot(*band) = energy;
            max = max.max(energy);
        }

        let divisor = max.max(BAND_EPSILON);
        for band in Band::ALL {
            *bands.slot(band) /= divisor;
        }
        bands
    }

    /// Transforms a block of mono samples and profiles its spectrum.
    pub fn profile_frame(&mut self, samples: &[f32]) -> Result<FrequencyBands> {
        let mut spectrum = std::mem::take(&mut self.spectrum);
        self.fft.magnitude_spectrum(samples, &mut spectrum)?;
        let bands = self.profile(&spectrum);
        self.spectrum = spectrum;
        Ok(bands)
    }
}

/// Bin index ranges `[ceil(lo / width), ceil(hi / width))` for every band.
fn band_bins(sample_rate: u32, fft_size: usize) -> [(Band, Range<usize>); 6] {
    let bin_width = sample_rate as f32 / fft_size as f32;
    let nyquist_bins = fft_size / 2;
    Band::ALL.map(|band| {
        let (lo, hi) = band.range_hz();
        if bin_width <= 0.0 {
            return (band, 0..0);
        }
        let start = ((lo / bin_width).ceil() as usize).min(nyquist_bins);
        let end = ((hi / bin_width).ceil() as usize).clamp(start, nyquist_bins);
        (band, start..end)
    })
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn bass_tone_dominates_the_bass_band() {
        let mut profiler = FrequencyBandProfiler::new(44_100, 4096).unwrap();
        let bands = profiler.profile_frame(&sine(120.0, 44_100, 4096)).unwrap();

        assert_eq!(bands.dominant(), Band::Bass);
        assert_eq!(bands.bass, 1.0);
        for (_, value) in bands.iter() {
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn loudest_band_is_exactly_one() {
        let profiler = FrequencyBandProfiler::new(48_000, 2048).unwrap();
        let spectrum: Vec<f32> = (0..1024).map(|bin| 1.0 + (bin % 7) as f32 * 0.37).collect();
        let bands = profiler.profile(&spectrum);

        let max = bands.iter().map(|(_, v)| v).fold(0.0_f32, f32::max);
        assert_eq!(max, 1.0);
        assert_eq!(bands.get(bands.dominant()), 1.0);
    }

    #[test]
    fn silent_spectrum_profiles_to_zero() {
        let profiler = FrequencyBandProfiler::new(44_100, 1024).unwrap();
        let bands = profiler.profile(&[0.0; 512]);
        assert_eq!(bands, FrequencyBands::default());
    }

    #[test]
    fn weakest_band_is_the_quietest() {
        let bands = FrequencyBands {
            sub_bass: 0.2,
            bass: 1.0,
            low_mid: 0.6,
            mid: 0.4,
            high_mid: 0.1,
            high: 0.3,
        };
        assert_eq!(bands.dominant(), Band::Bass);
        assert_eq!(bands.weakest(), Band::HighMid);
        assert_eq!(bands.ranked()[1], Band::LowMid);
    }

    #[test]
    fn band_bins_do_not_overlap() {
        let ranges = band_bins(44_100, 2048);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1.end, pair[1].1.start);
        }
        assert_eq!(ranges[5].1.end, 929);
        assert!(FrequencyBandProfiler::new(44_100, 1000).is_err());
    }
}
