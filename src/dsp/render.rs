//! Offline rendering
//!
//! Renders a trimmed window of an asset through a fresh echo → reverb chain
//! as fast as possible. Live playback is never involved: every render owns
//! its own chain and output buffer.

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info};

use super::params::{check_range, EffectParameters, TrimRange};
use super::EffectChain;
use crate::config::RenderConfig;
use crate::engine::transport::{MAX_RATE, MIN_RATE};
use crate::engine::{AudioAsset, AudioBuffer};
use crate::error::{EditorError, Result};

/// Result of an offline render
#[derive(Debug, Clone)]
pub struct RenderedAsset {
    /// Rendered PCM, same channel count and sample rate as the source
    pub buffer: AudioBuffer,
    /// Playback rate the source was read at
    pub rate: f64,
    /// Clamped trim window the render covers
    pub window: TrimRange,
    /// Effect chain state used for the render
    pub chain: Value,
}

impl RenderedAsset {
    pub fn duration_secs(&self) -> f64 {
        self.buffer.duration_secs()
    }

    pub fn sample_rate(&self) -> u32 {
        self.buffer.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.buffer.channels()
    }
}

/// Non-realtime renderer
#[derive(Debug, Clone)]
pub struct OfflineRenderer {
    block_size: usize,
}

impl Default for OfflineRenderer {
    fn default() -> Self {
        Self::new(&RenderConfig::default())
    }
}

impl OfflineRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            block_size: config.block_size.max(1),
        }
    }

    /// Render `params.trim` of `asset` at `rate`
    ///
    /// The window is clamped to the asset first; an empty window fails with
    /// `InvalidRange` before anything is processed. Out-of-range settings
    /// and non-finite output fail with `RenderFailure`. No partial output is
    /// ever returned.
    pub fn render(
        &self,
        asset: &AudioBuffer,
        params: &EffectParameters,
        rate: f64,
    ) -> Result<RenderedAsset> {
        let window = params.trim.clamp_to(asset.duration_secs())?;
        params.validate()?;
        check_range("playback rate", rate, (MIN_RATE, MAX_RATE))?;

        let started = Instant::now();
        let frames = (window.length() * asset.sample_rate as f64).round() as usize;
        let mut buffer = read_varispeed(asset, window, rate, frames);

        let mut chain = EffectChain::from_params(params, asset.sample_rate, asset.channels());
        let mut pos = 0;
        while pos < frames {
            let end = (pos + self.block_size).min(frames);
            let mut block = AudioBuffer {
                samples: buffer
                    .samples
                    .iter()
                    .map(|ch| ch[pos..end].to_vec())
                    .collect(),
                sample_rate: buffer.sample_rate,
            };
            chain.process(&mut block)?;
            for (dst, src) in buffer.samples.iter_mut().zip(&block.samples) {
                dst[pos..end].copy_from_slice(src);
            }
            pos = end;
        }

        debug!(
            "Rendered {} frames in {:.1} ms",
            frames,
            started.elapsed().as_secs_f64() * 1000.0
        );
        info!(
            "Rendered {:.3}s-{:.3}s at {}x ({:.3}s of audio)",
            window.start,
            window.end,
            rate,
            buffer.duration_secs()
        );

        Ok(RenderedAsset {
            buffer,
            rate,
            window,
            chain: chain.to_json(),
        })
    }

    /// Render on the blocking thread pool
    pub async fn render_async(
        &self,
        asset: AudioAsset,
        params: EffectParameters,
        rate: f64,
    ) -> Result<RenderedAsset> {
        let renderer = self.clone();
        tokio::task::spawn_blocking(move || renderer.render(&asset, &params, rate))
            .await
            .map_err(|e| EditorError::RenderFailure {
                reason: format!("render task failed: {}", e),
            })?
    }
}

/// Read `frames` output frames starting at `window.start`, advancing `rate`
/// source frames per output frame
///
/// Linear interpolation between neighbouring source frames. Source past
/// `window.end` reads as silence.
fn read_varispeed(asset: &AudioBuffer, window: TrimRange, rate: f64, frames: usize) -> AudioBuffer {
    let sr = asset.sample_rate as f64;
    let first = window.start * sr;
    let last = (window.end * sr).min(asset.len() as f64);
    let mut out = AudioBuffer::new(frames, asset.channels(), asset.sample_rate);

    for (src, dst) in asset.samples.iter().zip(out.samples.iter_mut()) {
        for (n, sample) in dst.iter_mut().enumerate() {
            let pos = first + n as f64 * rate;
            if pos >= last {
                break;
            }
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = src[idx];
            let b = src.get(idx + 1).copied().unwrap_or(a);
            *sample = a + (b - a) * frac;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::calculate_peak;
    use std::sync::Arc;

    fn ramp(duration_secs: f64, sample_rate: u32) -> AudioBuffer {
        let frames = (duration_secs * sample_rate as f64) as usize;
        let ch: Vec<f32> = (0..frames).map(|i| i as f32 / frames as f32).collect();
        AudioBuffer::from_channels(vec![ch.clone(), ch], sample_rate).unwrap()
    }

    fn echo_only() -> EffectParameters {
        EffectParameters::default().with_reverb(0.0, 0.0)
    }

    #[test]
    fn test_output_length_matches_window() {
        let asset = AudioBuffer::silence(10.0, 2, 8000);
        let params = EffectParameters::default().with_trim(2.0, 6.0);
        let rendered = OfflineRenderer::default().render(&asset, &params, 1.0).unwrap();

        assert_eq!(rendered.buffer.len(), 32000);
        assert_eq!(rendered.channels(), 2);
        assert_eq!(rendered.sample_rate(), 8000);
        assert_eq!(rendered.window, TrimRange::new(2.0, 6.0));
    }

    #[test]
    fn test_window_is_clamped() {
        let asset = AudioBuffer::silence(3.0, 2, 8000);
        let params = EffectParameters::default().with_trim(-1.0, 99.0);
        let rendered = OfflineRenderer::default().render(&asset, &params, 1.0).unwrap();
        assert!((rendered.duration_secs() - 3.0).abs() < 1.0 / 8000.0);
    }

    #[test]
    fn test_invalid_range_rejected_before_validation() {
        let asset = AudioBuffer::silence(10.0, 2, 8000);
        let params = EffectParameters::default()
            .with_trim(2.0, 1.0)
            .with_echo(5.0, 5.0);
        let err = OfflineRenderer::default().render(&asset, &params, 1.0).unwrap_err();
        assert!(matches!(err, EditorError::InvalidRange { .. }));
    }

    #[test]
    fn test_out_of_range_params_fail() {
        let asset = AudioBuffer::silence(1.0, 2, 8000);
        let params = EffectParameters::default().with_trim(0.0, 1.0).with_reverb(1.0, 0.9);
        let err = OfflineRenderer::default().render(&asset, &params, 1.0).unwrap_err();
        assert!(matches!(err, EditorError::RenderFailure { .. }));

        let params = EffectParameters::default().with_trim(0.0, 1.0);
        let err = OfflineRenderer::default().render(&asset, &params, 4.0).unwrap_err();
        assert!(err.to_string().contains("playback rate"));
    }

    #[test]
    fn test_varispeed_copies_window_at_unit_rate() {
        let asset = ramp(2.0, 1000);
        let out = read_varispeed(&asset, TrimRange::new(0.5, 1.5), 1.0, 1000);

        assert_eq!(out.samples[0][0], asset.samples[0][500]);
        assert_eq!(out.samples[1][999], asset.samples[1][1499]);
    }

    #[test]
    fn test_varispeed_fast_rate_reads_ahead_then_silence() {
        let asset = ramp(2.0, 1000);
        let out = read_varispeed(&asset, TrimRange::new(0.0, 1.0), 2.0, 1000);

        assert_eq!(out.samples[0][250], asset.samples[0][500]);
        // Source beyond the window end is not read
        assert!(out.samples[0][500..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_varispeed_slow_rate_interpolates() {
        let asset = ramp(1.0, 1000);
        let out = read_varispeed(&asset, TrimRange::new(0.0, 1.0), 0.5, 1000);

        let expected = (asset.samples[0][10] + asset.samples[0][11]) / 2.0;
        assert!((out.samples[0][21] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_echo_tail_continues_after_source() {
        let mut asset = AudioBuffer::silence(2.0, 2, 1000);
        asset.samples[0][0] = 1.0;
        asset.samples[1][0] = 1.0;
        let params = echo_only().with_echo(0.25, 0.5).with_trim(0.0, 2.0);
        let rendered = OfflineRenderer::default().render(&asset, &params, 2.0).unwrap();

        assert!(rendered.buffer.samples[0][1250..].iter().any(|&s| s != 0.0));
        assert!(calculate_peak(&rendered.buffer) <= 0.0);
    }

    #[tokio::test]
    async fn test_render_async() {
        let asset = Arc::new(AudioBuffer::silence(1.0, 2, 8000));
        let params = EffectParameters::default().with_trim(0.0, 1.0);
        let rendered = OfflineRenderer::default()
            .render_async(asset, params, 1.0)
            .await
            .unwrap();
        assert!(rendered.buffer.is_silent());
        assert_eq!(rendered.rate, 1.0);
    }
}
