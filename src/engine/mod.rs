//! Audio Engine Module
//!
//! Core audio engine including:
//! - Audio buffer management
//! - Decoding and file loading
//! - The output context and playback transport

pub mod buffer;
pub mod context;
pub mod io;
pub mod loader;
pub mod transport;

pub use buffer::{AudioAsset, AudioBuffer, MIN_ASSET_CHANNELS};
pub use context::{AudioContext, HeadlessDevice, Mixer, OutputDevice, VoiceHandle};
#[cfg(feature = "device-output")]
pub use context::SystemDevice;
pub use io::{decode_audio, encode_wav, generate_test_tone, WavFormat};
pub use loader::FileLoader;
pub use transport::{clamp_rate, PlaybackController, PlaybackState, MAX_RATE, MIN_RATE};
