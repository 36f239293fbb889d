use std::{collections::VecDeque, fmt};

use serde::{Deserialize, Serialize};

/// Twelve pitch-class energies, C first. Sums to 1 once normalised.
pub type Chroma = [f32; 12];

pub const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Krumhansl-Schmuckler key profiles, tonic first.
const MAJOR_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const MINOR_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Camelot wheel numbers indexed by root pitch class.
const CAMELOT_MAJOR: [u8; 12] = [8, 3, 10, 5, 12, 7, 2, 9, 4, 11, 6, 1];
const CAMELOT_MINOR: [u8; 12] = [5, 12, 7, 2, 9, 4, 11, 6, 1, 8, 3, 10];

const CHROMA_MIN_HZ: f32 = 60.0;
const CHROMA_MAX_HZ: f32 = 4000.0;
const CHROMA_EPSILON: f32 = 1e-9;
const VARIANCE_EPSILON: f32 = 1e-12;

/// Chroma vectors kept by [`KeyTracker`].
pub const KEY_HISTORY: usize = 100;
/// Vectors required before [`KeyTracker`] reports a key.
pub const MIN_KEY_HISTORY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Major => "major",
            Mode::Minor => "minor",
        }
    }
}

/// A tonic pitch class plus mode, e.g. A minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MusicalKey {
    root: u8,
    mode: Mode,
}

impl MusicalKey {
    /// Builds a key from a pitch class; values above 11 wrap around.
    pub fn new(root: u8, mode: Mode) -> Self {
        Self {
            root: root % 12,
            mode,
        }
    }

    pub fn root(&self) -> u8 {
        self.root
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_major(&self) -> bool {
        self.mode == Mode::Major
    }

    pub fn root_name(&self) -> &'static str {
        PITCH_CLASS_NAMES[usize::from(self.root)]
    }

    /// Display name such as `"A minor"`.
    pub fn name(&self) -> String {
        format!("{} {}", self.root_name(), self.mode.label())
    }

    pub fn camelot(&self) -> CamelotCode {
        let number = match self.mode {
            Mode::Major => CAMELOT_MAJOR[usize::from(self.root)],
            Mode::Minor => CAMELOT_MINOR[usize::from(self.root)],
        };
        CamelotCode {
            number,
            mode: self.mode,
        }
    }

    /// Harmonic mixing rule: same wheel position (identical or relative
    /// key), or one step around the wheel in the same mode.
    pub fn is_compatible_with(&self, other: &MusicalKey) -> bool {
        let (a, b) = (self.camelot(), other.camelot());
        if a.number == b.number {
            return true;
        }
        if a.mode != b.mode {
            return false;
        }
        let distance = (i16::from(a.number) - i16::from(b.number)).rem_euclid(12);
        distance == 1 || distance == 11
    }
}

impl fmt::Display for MusicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.root_name(), self.mode.label())
    }
}

/// Position on the Camelot wheel: 1-12 plus `A` (minor) or `B` (major).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CamelotCode {
    pub number: u8,
    pub mode: Mode,
}

impl CamelotCode {
    pub fn letter(&self) -> char {
        match self.mode {
            Mode::Major => 'B',
            Mode::Minor => 'A',
        }
    }
}

impl fmt::Display for CamelotCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.number, self.letter())
    }
}

/// Detected key with a 0-100 confidence; `key` is `None` when the chroma
/// carried no tonal information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyEstimate {
    pub key: Option<MusicalKey>,
    pub confidence: f32,
}

/// Folds magnitude bins between 60 Hz and 4 kHz onto their nearest pitch
/// class and adds them to `chroma`.
pub fn chroma_from_spectrum(
    spectrum: &[f32],
    sample_rate: u32,
    fft_size: usize,
    chroma: &mut Chroma,
) {
    if sample_rate == 0 || fft_size == 0 {
        return;
    }
    let bin_width = sample_rate as f32 / fft_size as f32;
    for (bin, &magnitude) in spectrum.iter().enumerate().skip(1) {
        let freq = bin as f32 * bin_width;
        if freq < CHROMA_MIN_HZ {
            continue;
        }
        if freq > CHROMA_MAX_HZ {
            break;
        }
        let midi = (12.0 * (freq / 440.0).log2() + 69.0).round() as i32;
        chroma[midi.rem_euclid(12) as usize] += magnitude;
    }
}

/// Scales the chroma to sum to 1. Returns `false`, leaving it untouched,
/// when it holds no energy.
pub fn normalize_chroma(chroma: &mut Chroma) -> bool {
    let total: f32 = chroma.iter().sum();
    if total <= CHROMA_EPSILON {
        return false;
    }
    chroma.iter_mut().for_each(|value| *value /= total);
    true
}

/// Correlates the chroma with all 24 rotated key profiles and keeps the best.
pub fn detect_key(chroma: &Chroma) -> KeyEstimate {
    let mut best: Option<(MusicalKey, f32)> = None;

    for root in 0..12u8 {
        for (mode, profile) in [(Mode::Major, &MAJOR_PROFILE), (Mode::Minor, &MINOR_PROFILE)] {
            let Some(score) = pearson(chroma, profile, usize::from(root)) else {
                return KeyEstimate::default();
            };
            if best.map_or(true, |(_, current)| score > current) {
                best = Some((MusicalKey::new(root, mode), score));
            }
        }
    }

    match best {
        Some((key, score)) => KeyEstimate {
            key: Some(key),
            confidence: ((score + 1.0) / 2.0 * 100.0).clamp(0.0, 100.0),
        },
        None => KeyEstimate::default(),
    }
}

/// Pearson correlation of the chroma against `profile` transposed to
/// `root`. `None` when the chroma has no variance.
fn pearson(chroma: &Chroma, profile: &[f32; 12], root: usize) -> Option<f32> {
    let rotated = |pc: usize| profile[(pc + 12 - root) % 12];
    let chroma_mean = chroma.iter().sum::<f32>() / 12.0;
    let profile_mean = profile.iter().sum::<f32>() / 12.0;

    let (mut covariance, mut chroma_var, mut profile_var) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (pc, &value) in chroma.iter().enumerate() {
        let x = value - chroma_mean;
        let y = rotated(pc) - profile_mean;
        covariance += x * y;
        chroma_var += x * x;
        profile_var += y * y;
    }

    if chroma_var <= VARIANCE_EPSILON || profile_var <= VARIANCE_EPSILON {
        return None;
    }
    Some(covariance / (chroma_var * profile_var).sqrt())
}

/// Rolling average of recent chroma vectors for streaming key detection.
#[derive(Debug, Clone)]
pub struct KeyTracker {
    history: VecDeque<Chroma>,
    capacity: usize,
    min_history: usize,
}

impl Default for KeyTracker {
    fn default() -> Self {
        Self::new(KEY_HISTORY, MIN_KEY_HISTORY)
    }
}

impl KeyTracker {
    pub fn new(capacity: usize, min_history: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            min_history: min_history.clamp(1, capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn push(&mut self, chroma: Chroma) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(chroma);
    }

    /// Key of the averaged history, or an empty estimate until enough
    /// vectors have been collected.
    pub fn estimate(&self) -> KeyEstimate {
        if self.history.len() < self.min_history {
            return KeyEstimate::default();
        }
        let mut average = [0.0_f32; 12];
        for chroma in &self.history {
            for (sum, value) in average.iter_mut().zip(chroma) {
                *sum += value;
            }
        }
        if !normalize_chroma(&mut average) {
            return KeyEstimate::default();
        }
        detect_key(&average)
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}
