//! Compressed export
//!
//! A render is written as a 16-bit WAV, handed to the transcoder, and the
//! compressed result is read back. Scratch files are removed whether or not
//! the transcode succeeded.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::transcoder::{Transcoder, TranscoderHandle};
use crate::config::TranscoderConfig;
use crate::dsp::{RenderedAsset, TrimRange};
use crate::engine::io::{encode_wav, WavFormat};
use crate::error::Result;

/// Scratch name of the WAV handed to the transcoder
pub const INPUT_FILE_NAME: &str = "input.wav";

/// Name of the exported file: `processed_{rate}x.{ext}`
///
/// The rate is written the shortest way (`1`, `1.5`, `0.75`).
pub fn output_file_name(rate: f64, extension: &str) -> String {
    format!("processed_{}x.{}", rate, extension)
}

/// A compressed file ready to be saved
#[derive(Debug, Clone)]
pub struct EncodedFile {
    /// File name to save under
    pub name: String,
    pub data: Vec<u8>,
    pub rate: f64,
    pub duration_secs: f64,
    pub window: TrimRange,
    pub chain: Value,
}

/// Summary of a saved export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// SHA-256 of the file contents, lowercase hex
    pub sha256: String,
    pub duration_secs: f64,
    pub rate: f64,
    pub window: TrimRange,
    pub chain: Value,
    pub exported_at: DateTime<Utc>,
}

impl EncodedFile {
    /// Write the file into `dir`, creating the directory if needed
    pub async fn save(&self, dir: &Path) -> Result<ExportReport> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&self.name);
        tokio::fs::write(&path, &self.data).await?;

        let report = ExportReport {
            path,
            size_bytes: self.data.len() as u64,
            sha256: format!("{:x}", Sha256::digest(&self.data)),
            duration_secs: self.duration_secs,
            rate: self.rate,
            window: self.window,
            chain: self.chain.clone(),
            exported_at: Utc::now(),
        };
        info!(
            "Exported {} ({} bytes)",
            report.path.display(),
            report.size_bytes
        );
        Ok(report)
    }
}

/// Turns renders into compressed files through the transcoder
#[derive(Clone)]
pub struct Encoder {
    transcoder: TranscoderHandle,
    extension: String,
    extra_args: Vec<String>,
}

impl Encoder {
    pub fn new(transcoder: TranscoderHandle, config: &TranscoderConfig) -> Self {
        Self {
            transcoder,
            extension: config.extension.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    /// Check whether `encode` would be accepted right now
    pub fn is_ready(&self) -> bool {
        self.transcoder.is_ready()
    }

    pub fn transcoder(&self) -> &TranscoderHandle {
        &self.transcoder
    }

    /// Encode a render
    ///
    /// Fails with `TranscoderNotReady` while the transcoder is still loading.
    pub async fn encode(&self, rendered: &RenderedAsset) -> Result<EncodedFile> {
        let transcoder = self.transcoder.try_ready()?;
        let wav = encode_wav(&rendered.buffer, WavFormat::pcm16())?;
        let output_name = format!("output.{}", self.extension);

        let mut args = vec!["-i".to_string(), INPUT_FILE_NAME.to_string()];
        args.extend(self.extra_args.iter().cloned());
        args.push(output_name.clone());

        let result = Self::transcode(transcoder.as_ref(), &wav, &args, &output_name).await;
        for name in [INPUT_FILE_NAME, output_name.as_str()] {
            if let Err(e) = transcoder.delete_file(name).await {
                // The output is missing when the transcode itself failed
                if result.is_ok() {
                    warn!("Could not remove scratch file {}: {}", name, e);
                }
            }
        }
        let data = result?;

        Ok(EncodedFile {
            name: output_file_name(rendered.rate, &self.extension),
            data,
            rate: rendered.rate,
            duration_secs: rendered.duration_secs(),
            window: rendered.window,
            chain: rendered.chain.clone(),
        })
    }

    async fn transcode(
        transcoder: &dyn Transcoder,
        wav: &[u8],
        args: &[String],
        output_name: &str,
    ) -> Result<Vec<u8>> {
        transcoder.write_file(INPUT_FILE_NAME, wav).await?;
        transcoder.exec(args).await?;
        transcoder.read_file(output_name).await
    }
}
