//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use echoform::config::EditorConfig;
use echoform::engine::io::{encode_wav, WavFormat};
use echoform::engine::{AudioBuffer, AudioContext, HeadlessDevice};
use echoform::error::{EditorError, Result};
use echoform::export::{Transcoder, TranscoderAssets, TranscoderHandle};
use echoform::EditorSession;

/// Transcoder that keeps its scratch space in memory and "encodes" by copying
#[derive(Default)]
pub struct MemoryTranscoder {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryTranscoder {
    pub fn scratch_files(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}

#[async_trait]
impl Transcoder for MemoryTranscoder {
    async fn load(&mut self, _assets: &TranscoderAssets) -> Result<()> {
        Ok(())
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn exec(&self, args: &[String]) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        let input = args
            .iter()
            .position(|a| a == "-i")
            .and_then(|i| args.get(i + 1))
            .and_then(|name| files.get(name).cloned())
            .ok_or(EditorError::TranscoderFailure {
                reason: "missing input".to_string(),
            })?;
        let output = args.last().cloned().unwrap_or_default();
        files.insert(output, input);
        Ok(())
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or(EditorError::TranscoderFailure {
                reason: format!("{} not found", name),
            })
    }

    async fn delete_file(&self, name: &str) -> Result<()> {
        self.files.lock().unwrap().remove(name);
        Ok(())
    }

    async fn terminate(&self) {}
}

/// Session on a private headless context with an in-memory transcoder
pub fn session(sample_rate: u32) -> (EditorSession, Arc<MemoryTranscoder>) {
    let transcoder = Arc::new(MemoryTranscoder::default());
    let context =
        AudioContext::with_device(Box::new(HeadlessDevice::new(sample_rate, 2, 256))).unwrap();
    let session = EditorSession::with_parts(
        EditorConfig::default(),
        context,
        TranscoderHandle::ready_now(transcoder.clone()),
    );
    (session, transcoder)
}

/// Mono buffer from a sample generator
pub fn mono(duration_secs: f64, sample_rate: u32, f: impl Fn(usize) -> f32) -> AudioBuffer {
    let frames = (duration_secs * sample_rate as f64).round() as usize;
    AudioBuffer::from_channels(vec![(0..frames).map(f).collect()], sample_rate).unwrap()
}

/// Write `buffer` as a 16-bit WAV file named `name` inside `dir`
pub fn write_wav(dir: &Path, name: &str, buffer: &AudioBuffer) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, encode_wav(buffer, WavFormat::pcm16()).unwrap()).unwrap();
    path
}
