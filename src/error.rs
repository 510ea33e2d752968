//! Error handling for Echoform
//!
//! User-facing errors carry recovery suggestions and a friendly message;
//! front ends show those instead of the raw error text.

use thiserror::Error;

/// Result type alias for Echoform operations
pub type Result<T> = std::result::Result<T, EditorError>;

/// Main error type for Echoform operations
#[derive(Error, Debug)]
pub enum EditorError {
    // Input Errors
    #[error("No input available: {what}")]
    MissingInput { what: String },

    #[error("Could not decode audio: {reason}")]
    DecodeFailure {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Render Errors
    #[error("Invalid trim range: start {start:.3}s, end {end:.3}s")]
    InvalidRange { start: f64, end: f64 },

    #[error("Rendering error: {reason}")]
    RenderFailure { reason: String },

    // Transcoder Errors
    #[error("Transcoder is not ready")]
    TranscoderNotReady,

    #[error("Transcoder failed: {reason}")]
    TranscoderFailure { reason: String },

    // Output Errors
    #[error("Audio output error: {reason}")]
    OutputDevice { reason: String },

    #[error("Audio output context is closed")]
    ContextClosed,

    // Configuration Errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EditorError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            EditorError::MissingInput { .. } => "MISSING_INPUT",
            EditorError::DecodeFailure { .. } => "DECODE_FAILURE",
            EditorError::InvalidRange { .. } => "INVALID_RANGE",
            EditorError::RenderFailure { .. } => "RENDER_FAILURE",
            EditorError::TranscoderNotReady => "TRANSCODER_NOT_READY",
            EditorError::TranscoderFailure { .. } => "TRANSCODER_FAILURE",
            EditorError::OutputDevice { .. } => "OUTPUT_DEVICE",
            EditorError::ContextClosed => "CONTEXT_CLOSED",
            EditorError::InvalidConfig { .. } => "INVALID_CONFIG",
            EditorError::Io(_) => "IO_ERROR",
            EditorError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the session can continue after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            EditorError::MissingInput { .. } => true,
            EditorError::DecodeFailure { .. } => true,
            EditorError::InvalidRange { .. } => true,
            EditorError::RenderFailure { .. } => true,
            EditorError::TranscoderNotReady => true,
            EditorError::TranscoderFailure { .. } => true,
            EditorError::OutputDevice { .. } => true,
            _ => false,
        }
    }

    /// Whether the error should be shown to the user as a blocking notice
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            EditorError::InvalidRange { .. }
                | EditorError::RenderFailure { .. }
                | EditorError::DecodeFailure { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            EditorError::DecodeFailure { .. } => vec![
                "Check that the file is an audio file",
                "Try converting the file to WAV first",
                "The file may be truncated or corrupted",
            ],
            EditorError::InvalidRange { .. } => vec![
                "Trim end must be later than trim start",
                "Both trim points must lie within the audio duration",
            ],
            EditorError::RenderFailure { .. } => vec![
                "Check the effect settings are within range",
                "Try lowering echo feedback or reverb decay",
            ],
            EditorError::TranscoderNotReady => vec![
                "Wait for the transcoder to finish loading",
            ],
            EditorError::TranscoderFailure { .. } => vec![
                "Check that ffmpeg is installed and on PATH",
                "Set ECHOFORM_FFMPEG or --ffmpeg to the ffmpeg executable",
                "Verify ffmpeg was built with the configured encoder",
            ],
            EditorError::OutputDevice { .. } => vec![
                "Check that an audio output device is connected",
                "Use the headless output backend instead",
            ],
            _ => vec![],
        }
    }

    /// Get a user-friendly message for this error
    pub fn friendly_message(&self) -> String {
        match self {
            EditorError::InvalidRange { .. } => "Invalid trim values.".to_string(),
            EditorError::RenderFailure { reason } => format!("Rendering error: {}", reason),
            EditorError::DecodeFailure { reason, .. } => {
                format!("This file doesn't appear to be playable audio: {}", reason)
            }
            EditorError::TranscoderNotReady => {
                "The encoder is still loading. Try exporting again in a moment.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = EditorError::InvalidRange {
            start: 2.0,
            end: 1.0,
        };
        assert_eq!(err.error_code(), "INVALID_RANGE");
        assert_eq!(EditorError::TranscoderNotReady.error_code(), "TRANSCODER_NOT_READY");
    }

    #[test]
    fn test_invalid_range_is_user_facing() {
        let err = EditorError::InvalidRange {
            start: 2.0,
            end: 1.0,
        };
        assert!(err.is_user_facing());
        assert!(err.is_recoverable());
        assert_eq!(err.friendly_message(), "Invalid trim values.");
    }

    #[test]
    fn test_render_failure_keeps_underlying_message() {
        let err = EditorError::RenderFailure {
            reason: "echo feedback 1.5 outside 0..=1".to_string(),
        };
        assert!(err.friendly_message().contains("echo feedback 1.5"));
        assert!(!err.recovery_suggestions().is_empty());
    }

    #[test]
    fn test_context_closed_not_recoverable() {
        assert!(!EditorError::ContextClosed.is_recoverable());
        assert!(!EditorError::ContextClosed.is_user_facing());
    }
}
