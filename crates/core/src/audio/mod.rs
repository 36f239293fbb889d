use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    analysis::{LiveAnalyzer, LiveSnapshot},
    config::AnalysisConfig,
    pcm::downmix_to_mono,
    Result, SoundclashError,
};

/// Producer side of the live analysis pipeline.
///
/// A capture or decoder thread pushes PCM through the engine while any
/// number of [`AnalysisHandle`]s read the latest snapshot.
#[derive(Debug)]
pub struct AudioEngine {
    sample_rate: u32,
    channels: u16,
    config: AnalysisConfig,
    analysis: Arc<Mutex<LiveAnalyzer>>,
    /// Samples of an incomplete trailing frame, held until the next push.
    partial: Mutex<Vec<i16>>,
}

impl AudioEngine {
    pub fn new(sample_rate: u32, channels: u16, config: &AnalysisConfig) -> Result<Self> {
        if channels == 0 {
            return Err(SoundclashError::InvalidInput("channel count must be positive"));
        }
        let analyzer = LiveAnalyzer::new(sample_rate, config)?;
        Ok(Self {
            sample_rate,
            channels,
            config: config.clone(),
            analysis: Arc::new(Mutex::new(analyzer)),
            partial: Mutex::new(Vec::with_capacity(usize::from(channels))),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Clears previous analysis state and returns a handle to the shared
    /// analyzer.
    pub fn start(&self) -> Result<AnalysisHandle> {
        self.lock_partial()?.clear();
        self.lock_analysis()?.reset();
        tracing::info!(
            sample_rate = self.sample_rate,
            channels = self.channels,
            "live analysis started"
        );
        Ok(AnalysisHandle::new(self.analysis.clone()))
    }

    /// Feeds interleaved 16-bit PCM, downmixed to mono. Returns the number
    /// of analysis hops completed.
    ///
    /// Buffers need not hold whole frames: a trailing partial frame is kept
    /// and completed by the next call.
    pub fn push_pcm(&self, samples: &[i16]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        let channels = usize::from(self.channels);
        let mono = {
            let mut partial = self.lock_partial()?;
            if partial.is_empty() {
                let whole = samples.len() - samples.len() % channels;
                partial.extend_from_slice(&samples[whole..]);
                downmix_to_mono(&samples[..whole], channels)
            } else {
                partial.extend_from_slice(samples);
                let whole = partial.len() - partial.len() % channels;
                let mono = downmix_to_mono(&partial[..whole], channels);
                partial.drain(..whole);
                mono
            }
        };
        self.push_samples(&mono)
    }

    /// Feeds mono floating point samples.
    pub fn push_samples(&self, samples: &[f32]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut analyzer = self.lock_analysis()?;
        analyzer.push_samples(samples)
    }

    fn lock_analysis(&self) -> Result<MutexGuard<'_, LiveAnalyzer>> {
        self.analysis
            .lock()
            .map_err(|_| SoundclashError::msg("analysis pipeline has been poisoned"))
    }

    fn lock_partial(&self) -> Result<MutexGuard<'_, Vec<i16>>> {
        self.partial
            .lock()
            .map_err(|_| SoundclashError::msg("pcm buffer has been poisoned"))
    }
}

/// Shared, thread-safe view over the analyzer managed by [`AudioEngine`].
#[derive(Clone)]
pub struct AnalysisHandle {
    shared: Arc<Mutex<LiveAnalyzer>>,
}

impl AnalysisHandle {
    pub(crate) fn new(shared: Arc<Mutex<LiveAnalyzer>>) -> Self {
        Self { shared }
    }

    /// Copy of the latest measurements.
    pub fn snapshot(&self) -> Result<LiveSnapshot> {
        let analyzer = self.lock()?;
        Ok(analyzer.snapshot())
    }

    pub fn reset(&self) -> Result<()> {
        self.lock()?.reset();
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, LiveAnalyzer>> {
        self.shared
            .lock()
            .map_err(|_| SoundclashError::msg("analysis pipeline has been poisoned"))
    }
}

impl std::fmt::Debug for AnalysisHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisHandle").finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn engine(channels: u16) -> AudioEngine {
        AudioEngine::new(44_100, channels, &AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn pushes_pcm_into_shared_analysis() {
        let audio = engine(2);
        let analysis = audio.start().unwrap();

        let hops = audio
            .push_pcm(&[8_192_i16; 2 * 1024])
            .expect("pushing samples should succeed");
        assert_eq!(hops, 2);

        let snapshot = analysis.snapshot().unwrap();
        assert_eq!(snapshot.hops, 2);
        assert!(snapshot.loudness_db > -13.0 && snapshot.loudness_db < -11.0);
    }

    #[test]
    fn start_resets_previous_session() {
        let audio = engine(1);
        audio.push_samples(&[0.25; 4096]).unwrap();
        let analysis = audio.start().unwrap();
        assert_eq!(analysis.snapshot().unwrap(), LiveSnapshot::default());
    }

    #[test]
    fn handles_are_readable_from_other_threads() {
        let audio = engine(1);
        let analysis = audio.start().unwrap();
        audio.push_samples(&[0.5; 512 * 4]).unwrap();

        let reader = analysis.clone();
        let hops = thread::spawn(move || reader.snapshot().unwrap().hops)
            .join()
            .unwrap();
        assert_eq!(hops, 4);

        analysis.reset().unwrap();
        assert_eq!(analysis.snapshot().unwrap().hops, 0);
    }

    #[test]
    fn split_frames_are_joined_across_pushes() {
        let whole = engine(2);
        let split = engine(2);
        let frames: Vec<i16> = (0..2 * 1024)
            .map(|i| if i % 2 == 0 { 16_000 } else { -4_000 })
            .collect();

        assert_eq!(whole.push_pcm(&frames).unwrap(), 2);
        assert_eq!(split.push_pcm(&frames[..511]).unwrap(), 0);
        assert_eq!(split.push_pcm(&frames[511..1537]).unwrap(), 1);
        assert_eq!(split.push_pcm(&frames[1537..]).unwrap(), 1);

        let lhs = whole.analysis.lock().unwrap().snapshot();
        let rhs = split.analysis.lock().unwrap().snapshot();
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn rejects_zero_channels() {
        assert!(AudioEngine::new(44_100, 0, &AnalysisConfig::default()).is_err());
    }
}
