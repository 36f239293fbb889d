use serde::{Deserialize, Serialize};

/// Largest positive 16-bit sample value, used as the clip reference.
pub const FULL_SCALE: f32 = 32767.0;

/// Scale between 16-bit integers and normalised floats.
const I16_SCALE: f32 = 32768.0;

/// Floor returned by [`amplitude_to_db`] for silent or near-silent input.
pub const DB_FLOOR: f32 = -80.0;

/// Sample encodings a host may announce when configuring a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PcmEncoding {
    Pcm8,
    Pcm16,
    Pcm24,
    Pcm32,
    Float,
}

/// Stream format established once per `configure` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub encoding: PcmEncoding,
}

impl PcmFormat {
    /// Convenience constructor for interleaved signed 16-bit PCM.
    pub fn pcm16(sample_rate: u32, channel_count: u16) -> Self {
        Self {
            sample_rate,
            channel_count,
            encoding: PcmEncoding::Pcm16,
        }
    }

    /// Only non-degenerate 16-bit PCM is processed; everything else bypasses.
    pub fn is_supported(&self) -> bool {
        self.encoding == PcmEncoding::Pcm16 && self.sample_rate > 0 && self.channel_count > 0
    }

    pub fn channels(&self) -> usize {
        usize::from(self.channel_count)
    }
}

/// Outcome of configuring a processing stage.
///
/// `Bypassed` means the stage will hand buffers through untouched until it is
/// configured again with a supported format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFormat {
    Active(PcmFormat),
    Bypassed,
}

impl StageFormat {
    pub(crate) fn negotiate(format: PcmFormat) -> Self {
        if format.is_supported() {
            StageFormat::Active(format)
        } else {
            tracing::warn!(?format, "unsupported pcm format, stage bypassed");
            StageFormat::Bypassed
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, StageFormat::Active(_))
    }

    pub fn format(&self) -> Option<PcmFormat> {
        match self {
            StageFormat::Active(format) => Some(*format),
            StageFormat::Bypassed => None,
        }
    }
}

#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / I16_SCALE
}

/// Converts back to 16-bit, rounding and saturating. Exact inverse of
/// [`i16_to_f32`] for every representable sample.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * I16_SCALE).round().clamp(-32768.0, 32767.0) as i16
}

/// Decodes little-endian signed 16-bit samples. A trailing odd byte is ignored.
pub fn decode_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn encode_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Averages interleaved channels into a normalised mono signal. A trailing
/// partial frame is ignored.
pub fn downmix_to_mono(samples: &[i16], channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().map(|&s| i16_to_f32(s)).sum::<f32>() / channels as f32)
        .collect()
}

/// Converts a linear amplitude to decibels, floored at [`DB_FLOOR`].
#[inline]
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    if amplitude <= 1e-4 {
        DB_FLOOR
    } else {
        (20.0 * amplitude.log10()).max(DB_FLOOR)
    }
}

#[inline]
pub fn db_to_amplitude(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Estimates the true (inter-sample) peak of a normalised signal.
///
/// Starts from the sample peak and refines every local extremum with a
/// parabola through its two neighbours.
pub fn estimate_true_peak(samples: &[f32]) -> f32 {
    let mut peak = samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));

    for window in samples.windows(3) {
        let (y0, y1, y2) = (window[0], window[1], window[2]);
        let is_extremum = (y1 > y0 && y1 > y2) || (y1 < y0 && y1 < y2);
        if !is_extremum {
            continue;
        }
        let curvature = y0 - 2.0 * y1 + y2;
        if curvature.abs() <= f32::EPSILON {
            continue;
        }
        let offset = (y0 - y2) / (2.0 * curvature);
        if offset.abs() < 1.0 {
            let interpolated = y1 - 0.25 * (y0 - y2) * offset;
            peak = peak.max(interpolated.abs());
        }
    }

    peak
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sample_conversion_round_trips_every_value() {
        for sample in i16::MIN..=i16::MAX {
            assert_eq!(f32_to_i16(i16_to_f32(sample)), sample);
        }
    }

    #[test]
    fn float_conversion_saturates() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), i16::MIN);
    }

    #[test]
    fn le_bytes_ignore_trailing_byte() {
        let bytes = [0x01, 0x00, 0xff, 0xff, 0x7f];
        assert_eq!(decode_le_bytes(&bytes), vec![1, -1]);
        assert_eq!(encode_le_bytes(&[1, -1]), vec![0x01, 0x00, 0xff, 0xff]);
    }

    #[test]
    fn only_pcm16_is_supported() {
        assert!(StageFormat::negotiate(PcmFormat::pcm16(44_100, 2)).is_active());
        let float = PcmFormat {
            encoding: PcmEncoding::Float,
            ..PcmFormat::pcm16(44_100, 2)
        };
        assert_eq!(StageFormat::negotiate(float), StageFormat::Bypassed);
        assert_eq!(
            StageFormat::negotiate(PcmFormat::pcm16(0, 2)),
            StageFormat::Bypassed
        );
    }

    #[test]
    fn db_helpers_floor_silence() {
        assert_eq!(amplitude_to_db(0.0), DB_FLOOR);
        assert_abs_diff_eq!(amplitude_to_db(1.0), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(db_to_amplitude(-6.0206), 0.5, epsilon = 1e-4);
    }

    #[test]
    fn downmix_averages_channels() {
        let mono = downmix_to_mono(&[16_384, -16_384, 8_192, 8_192], 2);
        assert_eq!(mono, vec![0.0, 0.25]);
    }

    #[test]
    fn true_peak_exceeds_sample_peak_between_samples() {
        // A sine sampled so that its crest falls between two samples.
        let samples: Vec<f32> = (0..64)
            .map(|i| (std::f32::consts::PI * (i as f32 + 0.3) / 4.0).sin())
            .collect();
        let sample_peak = samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
        let true_peak = estimate_true_peak(&samples);
        assert!(true_peak > sample_peak);
        assert!(true_peak <= 1.01);
    }
}
