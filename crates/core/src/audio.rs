//! Audio frame types.
//!
//! The pipeline speaks 16 kHz mono PCM16 little-endian on the wire; frames
//! are held as normalized f32 internally so capture-rate conversion stays
//! lossless until the final encode.

use std::sync::Arc;
use std::time::Duration;

/// Supported sample rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleRate {
    /// Standard speech-recognition rate; the pipeline's wire format.
    #[default]
    Hz16000,
    /// Common device capture rate.
    Hz44100,
    /// Common device capture rate.
    Hz48000,
}

impl SampleRate {
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Nearest supported rate for a device-reported value.
    pub fn from_device_rate(rate: u32) -> Option<Self> {
        match rate {
            16000 => Some(SampleRate::Hz16000),
            44100 => Some(SampleRate::Hz44100),
            48000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }

    /// Samples in a 20 ms frame at this rate.
    pub fn frame_size_20ms(&self) -> usize {
        (self.as_u32() as usize * 20) / 1000
    }
}

/// Audio channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Channels {
    #[default]
    Mono,
    Stereo,
}

impl Channels {
    pub fn count(&self) -> usize {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

const PCM16_NORMALIZE: f32 = 32768.0;
const PCM16_SCALE: f32 = 32767.0;

/// A block of captured audio with ordering metadata.
#[derive(Clone)]
pub struct AudioFrame {
    /// Samples normalized to [-1.0, 1.0].
    pub samples: Arc<[f32]>,
    pub sample_rate: SampleRate,
    pub channels: Channels,
    /// Frame sequence number for ordering.
    pub sequence: u64,
    pub duration: Duration,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("sequence", &self.sequence)
            .field("duration", &self.duration)
            .finish()
    }
}

impl AudioFrame {
    pub fn new(
        samples: Vec<f32>,
        sample_rate: SampleRate,
        channels: Channels,
        sequence: u64,
    ) -> Self {
        let duration = Duration::from_secs_f64(
            samples.len() as f64 / (sample_rate.as_u32() as f64 * channels.count() as f64),
        );
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
            sequence,
            duration,
        }
    }

    /// Decode PCM16 little-endian bytes. A trailing odd byte is dropped.
    pub fn from_pcm16(
        bytes: &[u8],
        sample_rate: SampleRate,
        channels: Channels,
        sequence: u64,
    ) -> Self {
        let samples: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|chunk| {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                sample as f32 / PCM16_NORMALIZE
            })
            .collect();
        Self::new(samples, sample_rate, channels, sequence)
    }

    /// Encode to PCM16 little-endian bytes.
    pub fn to_pcm16(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|&sample| {
                let clamped = sample.clamp(-1.0, 1.0);
                ((clamped * PCM16_SCALE) as i16).to_le_bytes()
            })
            .collect()
    }

    /// Resample to the target rate using sinc interpolation, with a linear
    /// fallback for frames too short for the FFT resampler.
    pub fn resample(&self, target_rate: SampleRate) -> Self {
        use rubato::{FftFixedIn, Resampler};

        if self.sample_rate == target_rate {
            return self.clone();
        }

        if self.samples.len() < 64 {
            return self.resample_linear(target_rate);
        }

        let from_rate = self.sample_rate.as_u32() as usize;
        let to_rate = target_rate.as_u32() as usize;
        let chunk_size = self.samples.len().min(1024);
        let samples_f64: Vec<f64> = self.samples.iter().map(|&s| s as f64).collect();

        match FftFixedIn::<f64>::new(from_rate, to_rate, chunk_size, 2, 1) {
            Ok(mut resampler) => match resampler.process(&[samples_f64], None) {
                Ok(output) => {
                    let resampled: Vec<f32> = output[0].iter().map(|&s| s as f32).collect();
                    Self::new(resampled, target_rate, self.channels, self.sequence)
                }
                Err(e) => {
                    tracing::warn!("resampler processing failed, using linear fallback: {e}");
                    self.resample_linear(target_rate)
                }
            },
            Err(e) => {
                tracing::warn!("resampler init failed, using linear fallback: {e}");
                self.resample_linear(target_rate)
            }
        }
    }

    fn resample_linear(&self, target_rate: SampleRate) -> Self {
        let ratio = target_rate.as_u32() as f64 / self.sample_rate.as_u32() as f64;
        let new_len = (self.samples.len() as f64 * ratio) as usize;

        let mut resampled = Vec::with_capacity(new_len);
        for i in 0..new_len {
            let src_idx = i as f64 / ratio;
            let idx_floor = src_idx.floor() as usize;
            let idx_ceil = (idx_floor + 1).min(self.samples.len().saturating_sub(1));
            let frac = (src_idx - idx_floor as f64) as f32;
            resampled.push(self.samples[idx_floor] * (1.0 - frac) + self.samples[idx_ceil] * frac);
        }

        Self::new(resampled, target_rate, self.channels, self.sequence)
    }

    /// Average stereo down to mono.
    pub fn to_mono(&self) -> Self {
        if self.channels == Channels::Mono {
            return self.clone();
        }
        let mono: Vec<f32> = self
            .samples
            .chunks_exact(2)
            .map(|chunk| (chunk[0] + chunk[1]) / 2.0)
            .collect();
        Self::new(mono, self.sample_rate, Channels::Mono, self.sequence)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_round_trip() {
        let pcm16: Vec<u8> = vec![0x00, 0x40, 0x00, 0xC0];
        let frame = AudioFrame::from_pcm16(&pcm16, SampleRate::Hz16000, Channels::Mono, 0);
        assert_eq!(frame.samples.len(), 2);
        assert!(frame.samples[0] > 0.0);
        assert!(frame.samples[1] < 0.0);

        let encoded = frame.to_pcm16();
        assert_eq!(encoded.len(), 4);
    }

    #[test]
    fn resamples_48k_to_16k() {
        let samples = vec![0.0f32; 960]; // 20ms at 48kHz
        let frame = AudioFrame::new(samples, SampleRate::Hz48000, Channels::Mono, 0);
        let resampled = frame.resample(SampleRate::Hz16000);
        // FFT resampler may pad slightly; the ratio must hold approximately.
        let expected = 320;
        assert!((resampled.samples.len() as i64 - expected).abs() <= 32);
    }

    #[test]
    fn stereo_folds_to_mono() {
        let frame = AudioFrame::new(
            vec![0.5, -0.5, 0.2, 0.4],
            SampleRate::Hz16000,
            Channels::Stereo,
            7,
        );
        let mono = frame.to_mono();
        assert_eq!(mono.samples.len(), 2);
        assert!((mono.samples[0] - 0.0).abs() < f32::EPSILON);
        assert!((mono.samples[1] - 0.3).abs() < 1e-6);
        assert_eq!(mono.sequence, 7);
    }

    #[test]
    fn frame_sizes() {
        assert_eq!(SampleRate::Hz16000.frame_size_20ms(), 320);
        assert_eq!(SampleRate::Hz48000.frame_size_20ms(), 960);
    }
}
