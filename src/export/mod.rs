//! Export
//!
//! WAV intermediate, the external transcoder contract and saving the
//! compressed result.

pub mod encoder;
pub mod transcoder;

pub use encoder::{output_file_name, EncodedFile, Encoder, ExportReport};
pub use transcoder::{
    FfmpegTranscoder, Transcoder, TranscoderAssets, TranscoderHandle, TranscoderStatus,
};
