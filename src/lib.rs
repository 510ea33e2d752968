//! Echoform - Audio Editing Pipeline
//!
//! Echoform loads an audio file, plays it back at variable speed, renders a
//! trimmed range through a fixed echo → reverb chain and exports the result
//! as a compressed file through an external transcoder.
//!
//! # Architecture
//!
//! - `engine`: PCM buffers, decoding, the output context and playback
//! - `dsp`: effect parameters, the effect chain and the offline renderer
//! - `export`: WAV intermediate, transcoder contract and file export
//! - `editor`: the session facade tying the pieces together

pub mod cli;
pub mod config;
pub mod dsp;
pub mod editor;
pub mod engine;
pub mod error;
pub mod export;

pub use config::EditorConfig;
pub use editor::EditorSession;
pub use error::{EditorError, Result};
