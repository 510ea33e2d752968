//! File loading
//!
//! Reads a user-selected file and decodes it into an [`AudioAsset`] with at
//! least [`MIN_ASSET_CHANNELS`] channels.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::engine::buffer::{AudioAsset, MIN_ASSET_CHANNELS};
use crate::engine::context::AudioContext;
use crate::engine::io::decode_audio;
use crate::error::{EditorError, Result};

/// Decodes user files into audio assets
#[derive(Clone, Default)]
pub struct FileLoader {
    /// Output context the asset is decoded for; a closed context aborts loads
    context: Option<Arc<AudioContext>>,
}

impl FileLoader {
    /// Loader that decodes without an output context (offline use)
    pub fn new() -> Self {
        Self { context: None }
    }

    /// Loader tied to an output context
    pub fn with_context(context: Arc<AudioContext>) -> Self {
        Self {
            context: Some(context),
        }
    }

    /// Load and decode a file
    ///
    /// Returns `Ok(None)` without touching the filesystem when no path is
    /// given or the output context has been closed. Unreadable or
    /// undecodable files are errors.
    pub async fn load(&self, path: Option<&Path>) -> Result<Option<AudioAsset>> {
        let Some(path) = path else {
            debug!("No file selected, load aborted");
            return Ok(None);
        };
        if let Some(ctx) = &self.context {
            if ctx.is_closed() {
                debug!("Output context closed, load of {} aborted", path.display());
                return Ok(None);
            }
        }

        let bytes = tokio::fs::read(path).await?;
        let extension = path.extension().and_then(|e| e.to_str());
        let asset = Self::decode(&bytes, extension)?;

        info!(
            "Loaded {}: {} channels, {} Hz, {:.2}s",
            path.display(),
            asset.channels(),
            asset.sample_rate,
            asset.duration_secs()
        );
        Ok(Some(asset))
    }

    /// Decode in-memory file contents into an asset
    pub fn decode(bytes: &[u8], extension_hint: Option<&str>) -> Result<AudioAsset> {
        let buffer = decode_audio(bytes, extension_hint)?;
        if buffer.is_empty() {
            return Err(EditorError::DecodeFailure {
                reason: "decoded audio has no frames".to_string(),
                source: None,
            });
        }
        let source_channels = buffer.channels();
        let buffer = buffer.ensure_min_channels(MIN_ASSET_CHANNELS)?;
        if buffer.channels() != source_channels {
            debug!(
                "Duplicated {} source channel(s) onto {}",
                source_channels,
                buffer.channels()
            );
        }
        Ok(Arc::new(buffer))
    }
}
