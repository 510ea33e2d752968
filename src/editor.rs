//! Editing session
//!
//! `EditorSession` ties the pieces together the way a front end uses them:
//! one loaded asset, one playback transport, one set of effect parameters,
//! and an encoder that becomes usable once the transcoder has loaded.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::EditorConfig;
use crate::dsp::{EffectParameters, OfflineRenderer, ParameterStore, RenderedAsset};
use crate::engine::{AudioAsset, AudioContext, FileLoader, PlaybackController, PlaybackState};
use crate::error::Result;
use crate::export::{
    Encoder, ExportReport, FfmpegTranscoder, TranscoderAssets, TranscoderHandle, TranscoderStatus,
};

/// Snapshot of the session for display
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: PlaybackState,
    pub elapsed: f64,
    pub duration: Option<f64>,
    pub channels: Option<usize>,
    pub sample_rate: Option<u32>,
    pub rate: f64,
    pub params: EffectParameters,
    pub transcoder: TranscoderStatus,
}

/// A single editing session
pub struct EditorSession {
    config: EditorConfig,
    context: Arc<AudioContext>,
    loader: FileLoader,
    playback: PlaybackController,
    params: ParameterStore,
    renderer: OfflineRenderer,
    encoder: Encoder,
    torn_down: bool,
}

impl EditorSession {
    /// Open a session on the shared output context
    ///
    /// The ffmpeg transcoder starts loading in the background; export is
    /// rejected until it is ready. Must be called from within a tokio runtime.
    pub fn new(config: EditorConfig) -> Result<Self> {
        let context = AudioContext::shared(&config.output)?;
        let transcoder = TranscoderHandle::spawn_load(
            Box::new(FfmpegTranscoder::new()),
            TranscoderAssets::from(&config.transcoder),
        );
        Ok(Self::with_parts(config, context, transcoder))
    }

    /// Open a session on an explicit context and transcoder
    pub fn with_parts(
        config: EditorConfig,
        context: Arc<AudioContext>,
        transcoder: TranscoderHandle,
    ) -> Self {
        let playback = PlaybackController::new(Arc::clone(&context), &config.playback);
        let params = ParameterStore::new(config.effects);
        let renderer = OfflineRenderer::new(&config.render);
        let encoder = Encoder::new(transcoder, &config.transcoder);

        Self {
            loader: FileLoader::with_context(Arc::clone(&context)),
            config,
            context,
            playback,
            params,
            renderer,
            encoder,
            torn_down: false,
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub fn transcoder(&self) -> &TranscoderHandle {
        self.encoder.transcoder()
    }

    /// The loaded asset
    pub fn asset(&self) -> Option<AudioAsset> {
        self.playback.asset()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load a file and make it the current asset
    ///
    /// `Ok(None)` when no path was given or the session is torn down; the
    /// previous asset stays in place in that case.
    pub async fn load_file(&self, path: Option<&Path>) -> Result<Option<AudioAsset>> {
        match self.loader.load(path).await? {
            Some(asset) => {
                self.load_asset(Arc::clone(&asset));
                Ok(Some(asset))
            }
            None => Ok(None),
        }
    }

    /// Make `asset` the current asset
    ///
    /// Playback stops and rewinds, and the trim range resets to the whole asset.
    pub fn load_asset(&self, asset: AudioAsset) {
        let duration = asset.duration_secs();
        self.playback.set_asset(Some(asset));
        self.params.update(|p| p.with_trim(0.0, duration));
        debug!("Trim reset to 0-{:.3}s", duration);
    }

    // ========================================================================
    // Playback
    // ========================================================================

    pub fn play(&self) -> bool {
        self.playback.play()
    }

    pub fn pause(&self) -> bool {
        self.playback.pause()
    }

    /// Set the playback rate; returns the clamped rate applied
    pub fn set_rate(&self, rate: f64) -> f64 {
        self.playback.set_rate(rate)
    }

    pub fn rate(&self) -> f64 {
        self.playback.rate()
    }

    pub fn elapsed(&self) -> f64 {
        self.playback.elapsed()
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    /// Current effect parameters
    pub fn params(&self) -> EffectParameters {
        self.params.snapshot()
    }

    /// Replace the effect parameters
    pub fn set_params(&self, params: EffectParameters) {
        self.params.replace(params);
    }

    /// Derive new parameters from the current ones
    pub fn update_params(
        &self,
        f: impl FnOnce(EffectParameters) -> EffectParameters,
    ) -> EffectParameters {
        self.params.update(f)
    }

    // ========================================================================
    // Render and export
    // ========================================================================

    /// Render the current asset with the current parameters and rate
    ///
    /// `Ok(None)` when no asset is loaded.
    pub async fn render(&self) -> Result<Option<RenderedAsset>> {
        let Some(asset) = self.asset() else {
            debug!("render ignored: no asset loaded");
            return Ok(None);
        };
        let params = self.params.snapshot();
        let rate = self.playback.rate();
        let rendered = self.renderer.render_async(asset, params, rate).await?;
        Ok(Some(rendered))
    }

    /// Render, encode and save into `dir` (or the configured export directory)
    ///
    /// `Ok(None)` when no asset is loaded. Fails with `TranscoderNotReady`
    /// before rendering if the transcoder has not finished loading.
    pub async fn export(&self, dir: Option<&Path>) -> Result<Option<ExportReport>> {
        if self.asset().is_none() {
            debug!("export ignored: no asset loaded");
            return Ok(None);
        }
        self.transcoder().try_ready()?;

        let Some(rendered) = self.render().await? else {
            return Ok(None);
        };
        let encoded = self.encoder.encode(&rendered).await?;
        let report = encoded
            .save(dir.unwrap_or(&self.config.export_dir))
            .await?;
        Ok(Some(report))
    }

    // ========================================================================
    // Status and teardown
    // ========================================================================

    pub fn status(&self) -> SessionStatus {
        let asset = self.asset();
        SessionStatus {
            state: self.playback.state(),
            elapsed: self.playback.elapsed(),
            duration: asset.as_ref().map(|a| a.duration_secs()),
            channels: asset.as_ref().map(|a| a.channels()),
            sample_rate: asset.as_ref().map(|a| a.sample_rate),
            rate: self.playback.rate(),
            params: self.params.snapshot(),
            transcoder: self.transcoder().status(),
        }
    }

    /// Stop playback, close the output context and release the transcoder
    ///
    /// Later calls do nothing.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.playback.shutdown();
        self.context.close();
        self.encoder.transcoder().terminate().await;
        info!("Session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AudioBuffer, HeadlessDevice};
    use crate::error::EditorError;
    use crate::export::transcoder::Transcoder;
    use async_trait::async_trait;

    struct Unloadable;

    #[async_trait]
    impl Transcoder for Unloadable {
        async fn load(&mut self, _assets: &TranscoderAssets) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
        async fn write_file(&self, _: &str, _: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn exec(&self, _: &[String]) -> Result<()> {
            Ok(())
        }
        async fn read_file(&self, _: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn delete_file(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn terminate(&self) {}
    }

    fn session() -> EditorSession {
        let config = EditorConfig::default();
        let context =
            AudioContext::with_device(Box::new(HeadlessDevice::new(48000, 2, 512))).unwrap();
        let transcoder = TranscoderHandle::spawn_load(
            Box::new(Unloadable),
            TranscoderAssets::from(&config.transcoder),
        );
        EditorSession::with_parts(config, context, transcoder)
    }

    #[tokio::test]
    async fn test_load_asset_resets_trim() {
        let session = session();
        session.update_params(|p| p.with_trim(1.0, 2.0));
        session.load_asset(Arc::new(AudioBuffer::silence(10.0, 2, 8000)));
        assert_eq!(session.params().trim.end, 10.0);
        assert_eq!(session.params().trim.start, 0.0);
    }

    #[tokio::test]
    async fn test_operations_without_asset_are_noops() {
        let session = session();
        assert!(session.load_file(None).await.unwrap().is_none());
        assert!(!session.play());
        assert!(!session.pause());
        assert!(session.render().await.unwrap().is_none());
        assert!(session.export(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_export_before_transcoder_ready() {
        let session = session();
        session.load_asset(Arc::new(AudioBuffer::silence(1.0, 2, 8000)));
        let err = session.export(None).await.unwrap_err();
        assert!(matches!(err, EditorError::TranscoderNotReady));
    }

    #[tokio::test]
    async fn test_teardown_closes_context() {
        let mut session = session();
        session.load_asset(Arc::new(AudioBuffer::silence(1.0, 2, 8000)));
        session.teardown().await;
        session.teardown().await;

        assert!(!session.play());
        assert!(session.asset().is_none());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.wav");
        std::fs::write(&path, b"RIFF").unwrap();
        assert!(session.load_file(Some(path.as_path())).await.unwrap().is_none());
    }
}
