//! Core library for the Soundclash audio engine.
//!
//! The playback path runs interleaved 16-bit PCM through a WSOLA speed and
//! pitch stage, an optional battle stage (bass boost and compressor) and a
//! peak limiter ([`ProcessingChain`]). The analysis side
//! extracts tempo, key, spectral descriptors and band energies, either from a
//! whole decoded track ([`SpectralAnalyzer`]) or incrementally from a live
//! stream ([`LiveAnalyzer`], shared across threads through [`AudioEngine`]).

pub mod analysis;
pub mod audio;
pub mod bands;
pub mod bass_boost;
pub mod chain;
pub mod compressor;
pub mod config;
pub mod error;
pub mod limiter;
pub mod pcm;
pub mod stretch;

pub use analysis::{
    AudioAnalysisResult, KeyEstimate, LiveAnalyzer, LiveSnapshot, Mode, MusicalKey,
    SpectralAnalyzer, TempoEstimate,
};
pub use audio::{AnalysisHandle, AudioEngine};
pub use bands::{Band, FrequencyBandProfiler, FrequencyBands};
pub use bass_boost::BassBoost;
pub use chain::ProcessingChain;
pub use compressor::Compressor;
pub use config::{
    AnalysisConfig, AppConfig, AudioConfig, BassBoostConfig, BattleConfig, CompressorConfig,
    LimiterConfig, StretchConfig,
};
pub use error::{Result, SoundclashError};
pub use limiter::PeakLimiter;
pub use pcm::{PcmEncoding, PcmFormat, StageFormat};
pub use stretch::{TimeStretchPitchShifter, WsolaGeometry};
