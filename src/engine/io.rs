//! Audio decoding and WAV encoding
//!
//! WAV data is read with hound; everything else goes through symphonia's
//! format probe. Decoded audio keeps its native sample rate and channel
//! count. The encoder side only produces WAV, which is the intermediate
//! container handed to the transcoder.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::engine::buffer::AudioBuffer;
use crate::error::{EditorError, Result};

/// WAV export configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    /// Bit depth: 16, 24, or 32 (32 = float)
    pub bit_depth: u16,
}

impl Default for WavFormat {
    fn default() -> Self {
        WavFormat { bit_depth: 16 }
    }
}

impl WavFormat {
    /// 16-bit integer PCM
    pub fn pcm16() -> Self {
        WavFormat { bit_depth: 16 }
    }

    /// 32-bit float PCM
    pub fn float32() -> Self {
        WavFormat { bit_depth: 32 }
    }
}

/// Decode an in-memory audio file
///
/// RIFF/WAVE data is read with hound first; if hound rejects it, or the data
/// is not WAV, symphonia probes the container. `extension_hint` helps the
/// probe when the container has no reliable magic bytes.
pub fn decode_audio(bytes: &[u8], extension_hint: Option<&str>) -> Result<AudioBuffer> {
    if bytes.is_empty() {
        return Err(EditorError::DecodeFailure {
            reason: "file is empty".to_string(),
            source: None,
        });
    }

    if is_riff_wave(bytes) {
        match decode_wav(bytes) {
            Ok(buffer) => return Ok(buffer),
            Err(e) => debug!("hound could not read WAV data ({}), probing with symphonia", e),
        }
    }

    decode_with_symphonia(bytes, extension_hint)
}

/// Decode WAV data with hound
pub fn decode_wav(bytes: &[u8]) -> Result<AudioBuffer> {
    let reader = WavReader::new(Cursor::new(bytes)).map_err(|e| EditorError::DecodeFailure {
        reason: format!("Failed to open WAV data: {}", e),
        source: Some(Box::new(e)),
    })?;

    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(EditorError::DecodeFailure {
            reason: "WAV header declares zero channels".to_string(),
            source: None,
        });
    }

    let samples = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    let buffer = AudioBuffer::from_interleaved(&samples, channels, spec.sample_rate);
    AudioBuffer::from_channels(buffer.samples, spec.sample_rate)
}

/// Decode any container/codec symphonia understands
pub fn decode_with_symphonia(bytes: &[u8], extension_hint: Option<&str>) -> Result<AudioBuffer> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| EditorError::DecodeFailure {
            reason: format!("Unrecognised audio format: {}", e),
            source: Some(Box::new(e)),
        })?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| EditorError::DecodeFailure {
            reason: "No audio track found".to_string(),
            source: None,
        })?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| EditorError::DecodeFailure {
            reason: format!("Unsupported codec: {}", e),
            source: Some(Box::new(e)),
        })?;

    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(EditorError::DecodeFailure {
                    reason: format!("Failed to read packet: {}", e),
                    source: Some(Box::new(e)),
                })
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt packet: skip it and keep going
                debug!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => {
                return Err(EditorError::DecodeFailure {
                    reason: format!("Decoder error: {}", e),
                    source: Some(Box::new(e)),
                })
            }
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count();

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(sample_buf.samples());
    }

    if channels == 0 || sample_rate == 0 {
        return Err(EditorError::DecodeFailure {
            reason: "Stream has no channel layout or sample rate".to_string(),
            source: None,
        });
    }

    Ok(AudioBuffer::from_interleaved(&interleaved, channels, sample_rate))
}

/// Encode a buffer as an in-memory WAV file
pub fn encode_wav(buffer: &AudioBuffer, format: WavFormat) -> Result<Vec<u8>> {
    let channels = buffer.channels() as u16;
    if channels == 0 {
        return Err(EditorError::RenderFailure {
            reason: "cannot encode a buffer without channels".to_string(),
        });
    }

    let spec = WavSpec {
        channels,
        sample_rate: buffer.sample_rate,
        bits_per_sample: format.bit_depth,
        sample_format: if format.bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    let interleaved = buffer.to_interleaved();
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).map_err(wav_write_error)?;

        match format.bit_depth {
            16 => {
                for sample in interleaved {
                    let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                    writer.write_sample(scaled).map_err(wav_write_error)?;
                }
            }
            24 => {
                for sample in interleaved {
                    // 24-bit stored as i32 in hound
                    let scaled = (sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32;
                    writer.write_sample(scaled).map_err(wav_write_error)?;
                }
            }
            32 => {
                for sample in interleaved {
                    writer.write_sample(sample).map_err(wav_write_error)?;
                }
            }
            other => {
                return Err(EditorError::InvalidConfig {
                    reason: format!("{}-bit WAV output (only 16, 24, 32 supported)", other),
                });
            }
        }

        writer.finalize().map_err(wav_write_error)?;
    }

    Ok(cursor.into_inner())
}

/// Generate a mono sine test tone
pub fn generate_test_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> AudioBuffer {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let mut buffer = AudioBuffer::new(num_samples, 1, sample_rate);

    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
    for (i, sample) in buffer.samples[0].iter_mut().enumerate() {
        *sample = (angular_freq * i as f32).sin();
    }

    buffer
}

// ============================================================================
// Internal helper functions
// ============================================================================

fn is_riff_wave(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

fn wav_write_error(e: hound::Error) -> EditorError {
    match e {
        hound::Error::IoError(io) => EditorError::Io(io),
        other => EditorError::RenderFailure {
            reason: format!("WAV encoding failed: {}", other),
        },
    }
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let read_error = |bits: &str, e: hound::Error| EditorError::DecodeFailure {
        reason: format!("Failed to read {} samples: {}", bits, e),
        source: Some(Box::new(e)),
    };

    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| read_error("float", e)),
        SampleFormat::Int => match bits_per_sample {
            8 => reader
                .samples::<i8>()
                .map(|s| s.map(|v| v as f32 / 128.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| read_error("8-bit", e)),
            16 => reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| read_error("16-bit", e)),
            24 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / 8388608.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| read_error("24-bit", e)),
            32 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / 2147483648.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| read_error("32-bit int", e)),
            _ => Err(EditorError::DecodeFailure {
                reason: format!("{}-bit integer audio is not supported", bits_per_sample),
                source: None,
            }),
        },
    }
}

// ============================================================================
// Tests
// ============================================================================
