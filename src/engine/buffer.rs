//! Audio Buffer Management
//!
//! Provides the PCM buffer type shared by the loader, the playback path,
//! the offline renderer and the encoder, plus a few level helpers.

use std::sync::Arc;

use crate::error::{EditorError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Minimum channel count of a loaded asset
pub const MIN_ASSET_CHANNELS: usize = 2;

/// Decoded audio as held by an editor session
///
/// Immutable once created; a new upload replaces it wholesale.
pub type AudioAsset = Arc<AudioBuffer>;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert linear amplitude to decibels
///
/// Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Calculate the RMS level of an audio buffer in dB
///
/// Returns -f32::INFINITY for empty or silent buffers.
pub fn calculate_rms(buffer: &AudioBuffer) -> f32 {
    let total_samples = buffer.channels() * buffer.len();
    if total_samples == 0 {
        return f32::NEG_INFINITY;
    }

    let sum_squares: f64 = buffer
        .samples
        .iter()
        .flat_map(|channel| channel.iter())
        .map(|&s| (s as f64) * (s as f64))
        .sum();

    let rms = (sum_squares / total_samples as f64).sqrt() as f32;
    linear_to_db(rms)
}

/// Calculate the peak level of an audio buffer in dB
pub fn calculate_peak(buffer: &AudioBuffer) -> f32 {
    let peak = buffer
        .samples
        .iter()
        .flat_map(|channel| channel.iter())
        .map(|&s| s.abs())
        .fold(0.0_f32, f32::max);

    linear_to_db(peak)
}

/// Calculate the RMS level (linear) of one channel over a frame range
pub fn window_rms(channel: &[f32], start: usize, end: usize) -> f32 {
    let end = end.min(channel.len());
    if start >= end {
        return 0.0;
    }
    let sum: f64 = channel[start..end]
        .iter()
        .map(|&s| (s as f64) * (s as f64))
        .sum();
    (sum / (end - start) as f64).sqrt() as f32
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Linear PCM audio, stored non-interleaved as 32-bit float
///
/// Each channel is a separate `Vec<f32>`; all channels have the same length.
///
/// # Example
/// ```
/// use echoform::engine::buffer::AudioBuffer;
///
/// // One second of stereo silence at 44.1kHz
/// let buffer = AudioBuffer::new(44100, 2, 44100);
/// assert_eq!(buffer.channels(), 2);
/// assert_eq!(buffer.duration_secs(), 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a silent buffer with the given frame count, channel count and rate
    pub fn new(num_frames: usize, num_channels: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; num_frames]; num_channels],
            sample_rate,
        }
    }

    /// Create a silent buffer lasting `duration_secs`
    pub fn silence(duration_secs: f64, num_channels: usize, sample_rate: u32) -> Self {
        let frames = (duration_secs.max(0.0) * sample_rate as f64).round() as usize;
        Self::new(frames, num_channels, sample_rate)
    }

    /// Build a buffer from per-channel sample vectors
    ///
    /// Fails if the channels have different lengths or the rate is zero.
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(EditorError::DecodeFailure {
                reason: "sample rate is zero".to_string(),
                source: None,
            });
        }
        if let Some(first) = samples.first() {
            let frames = first.len();
            if let Some(bad) = samples.iter().position(|ch| ch.len() != frames) {
                return Err(EditorError::DecodeFailure {
                    reason: format!(
                        "channel {} has {} frames, expected {}",
                        bad,
                        samples[bad].len(),
                        frames
                    ),
                    source: None,
                });
            }
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create an audio buffer from interleaved sample data
    ///
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(interleaved: &[f32], num_channels: usize, sample_rate: u32) -> Self {
        if num_channels == 0 {
            return Self {
                samples: Vec::new(),
                sample_rate,
            };
        }

        let num_frames = interleaved.len() / num_channels;
        let mut samples = vec![Vec::with_capacity(num_frames); num_channels];

        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Self {
            samples,
            sample_rate,
        }
    }

    /// Convert the buffer to interleaved format (L, R, L, R, ... for stereo)
    pub fn to_interleaved(&self) -> Vec<f32> {
        let num_channels = self.channels();
        let num_frames = self.len();

        if num_channels == 0 || num_frames == 0 {
            return Vec::new();
        }

        let mut interleaved = Vec::with_capacity(num_channels * num_frames);
        for frame in 0..num_frames {
            for channel in &self.samples {
                interleaved.push(channel[frame]);
            }
        }

        interleaved
    }

    /// Get the number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of frames (samples per channel)
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Check if the buffer holds no frames
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Get immutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Get mutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Widen the buffer to at least `min_channels` by duplicating the first channel
    ///
    /// Buffers that already have enough channels are returned unchanged.
    /// A buffer with no channel at all cannot be widened.
    pub fn ensure_min_channels(mut self, min_channels: usize) -> Result<Self> {
        let first = match self.samples.first() {
            Some(first) => first.clone(),
            None => {
                return Err(EditorError::DecodeFailure {
                    reason: "decoded audio has no channels".to_string(),
                    source: None,
                })
            }
        };

        while self.samples.len() < min_channels {
            self.samples.push(first.clone());
        }
        Ok(self)
    }

    /// Check if all samples are finite (not NaN or Infinity)
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|s| s.is_finite())
    }

    /// Check if every sample is exactly zero
    pub fn is_silent(&self) -> bool {
        self.samples
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|&s| s == 0.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_buffer(samples: Vec<Vec<f32>>) -> AudioBuffer {
        AudioBuffer {
            samples,
            sample_rate: 48000,
        }
    }

    #[test]
    fn test_linear_to_db() {
        assert!((linear_to_db(1.0)).abs() < 1e-6);
        assert!((linear_to_db(0.5) + 6.0206).abs() < 1e-3);
        assert_eq!(linear_to_db(0.0), f32::NEG_INFINITY);
    }

    #[test]
    fn test_calculate_rms_silence() {
        let buffer = create_test_buffer(vec![vec![0.0; 1000]]);
        let rms = calculate_rms(&buffer);
        assert!(rms.is_infinite() && rms.is_sign_negative());
    }

    #[test]
    fn test_calculate_rms_unity() {
        let buffer = create_test_buffer(vec![vec![1.0; 1000]]);
        assert!(calculate_rms(&buffer).abs() < 0.01);
    }

    #[test]
    fn test_calculate_peak_negative() {
        let buffer = create_test_buffer(vec![vec![0.1, -0.5, 0.2]]);
        assert!((calculate_peak(&buffer) - linear_to_db(0.5)).abs() < 1e-4);
    }

    #[test]
    fn test_window_rms() {
        let channel = vec![0.0, 0.0, 1.0, 1.0];
        assert_eq!(window_rms(&channel, 0, 2), 0.0);
        assert!((window_rms(&channel, 2, 4) - 1.0).abs() < 1e-6);
        assert_eq!(window_rms(&channel, 3, 2), 0.0);
    }

    #[test]
    fn test_buffer_new_and_duration() {
        let buffer = AudioBuffer::new(22050, 2, 44100);
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.len(), 22050);
        assert!((buffer.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_silence_rounds_frames() {
        let buffer = AudioBuffer::silence(0.1, 2, 44100);
        assert_eq!(buffer.len(), 4410);
        assert!(buffer.is_silent());
    }

    #[test]
    fn test_from_channels_rejects_ragged() {
        let result = AudioBuffer::from_channels(vec![vec![0.0; 10], vec![0.0; 9]], 48000);
        assert!(matches!(result, Err(EditorError::DecodeFailure { .. })));
    }

    #[test]
    fn test_from_channels_rejects_zero_rate() {
        let result = AudioBuffer::from_channels(vec![vec![0.0; 10]], 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_interleaved_roundtrip() {
        let interleaved = vec![1.0, 5.0, 2.0, 6.0, 3.0, 7.0];
        let buffer = AudioBuffer::from_interleaved(&interleaved, 2, 48000);
        assert_eq!(buffer.channel(0), &[1.0, 2.0, 3.0]);
        assert_eq!(buffer.channel(1), &[5.0, 6.0, 7.0]);
        assert_eq!(buffer.to_interleaved(), interleaved);
    }

    #[test]
    fn test_from_interleaved_drops_partial_frame() {
        let buffer = AudioBuffer::from_interleaved(&[1.0, 2.0, 3.0], 2, 48000);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_ensure_min_channels_duplicates_mono() {
        let mono = create_test_buffer(vec![vec![0.1, 0.2, 0.3]]);
        let widened = mono.ensure_min_channels(MIN_ASSET_CHANNELS).unwrap();
        assert_eq!(widened.channels(), 2);
        assert_eq!(widened.channel(0), widened.channel(1));
    }

    #[test]
    fn test_ensure_min_channels_keeps_multichannel() {
        let quad = create_test_buffer(vec![vec![0.0; 4]; 4]);
        let result = quad.ensure_min_channels(MIN_ASSET_CHANNELS).unwrap();
        assert_eq!(result.channels(), 4);
    }

    #[test]
    fn test_ensure_min_channels_rejects_empty() {
        let empty = create_test_buffer(Vec::new());
        assert!(empty.ensure_min_channels(MIN_ASSET_CHANNELS).is_err());
    }

    #[test]
    fn test_is_finite() {
        let mut buffer = create_test_buffer(vec![vec![0.0; 10]]);
        assert!(buffer.is_finite());
        buffer.channel_mut(0)[5] = f32::NAN;
        assert!(!buffer.is_finite());
    }
}
