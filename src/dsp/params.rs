//! Effect parameters
//!
//! `EffectParameters` is a plain `Copy` value. Every control change builds a
//! new value and swaps it into the `ParameterStore` whole, so a render always
//! reads one consistent snapshot.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{EditorError, Result};

/// Echo delay range in seconds
pub const ECHO_DELAY_RANGE: (f64, f64) = (0.0, 1.0);
/// Echo feedback gain range
pub const ECHO_FEEDBACK_RANGE: (f64, f64) = (0.0, 1.0);
/// Reverb decay range in seconds
pub const REVERB_DECAY_RANGE: (f64, f64) = (0.1, 5.0);
/// Reverb decay that disables the reverb stage
pub const REVERB_BYPASS_DECAY: f64 = 0.0;
/// Reverb pre-delay range in seconds
pub const REVERB_PRE_DELAY_RANGE: (f64, f64) = (0.0, 0.5);

/// Time range to render, in seconds of source audio
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrimRange {
    pub start: f64,
    pub end: f64,
}

impl TrimRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// The whole of an asset of the given duration
    pub fn full(duration_secs: f64) -> Self {
        Self::new(0.0, duration_secs)
    }

    /// Length of the range in seconds (may be negative)
    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    /// Clamp to `[0, duration]`
    ///
    /// Fails with `InvalidRange` if the clamped end is not after the clamped
    /// start, or either bound is NaN.
    pub fn clamp_to(&self, duration_secs: f64) -> Result<TrimRange> {
        let start = self.start.max(0.0);
        let end = self.end.min(duration_secs);
        if start.is_nan() || end.is_nan() || end <= start {
            return Err(EditorError::InvalidRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(TrimRange { start, end })
    }
}

/// Echo, reverb and trim settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectParameters {
    /// Echo delay time in seconds
    pub echo_delay: f64,
    /// Echo feedback gain
    pub echo_feedback: f64,
    /// Reverb decay time (RT60) in seconds
    pub reverb_decay: f64,
    /// Reverb pre-delay in seconds
    pub reverb_pre_delay: f64,
    /// Trim range
    pub trim: TrimRange,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self {
            echo_delay: 0.3,
            echo_feedback: 0.5,
            reverb_decay: 1.5,
            reverb_pre_delay: 0.01,
            trim: TrimRange::default(),
        }
    }
}

impl EffectParameters {
    pub fn with_echo(self, delay: f64, feedback: f64) -> Self {
        Self {
            echo_delay: delay,
            echo_feedback: feedback,
            ..self
        }
    }

    pub fn with_reverb(self, decay: f64, pre_delay: f64) -> Self {
        Self {
            reverb_decay: decay,
            reverb_pre_delay: pre_delay,
            ..self
        }
    }

    pub fn with_trim(self, start: f64, end: f64) -> Self {
        Self {
            trim: TrimRange::new(start, end),
            ..self
        }
    }

    /// Check every effect setting is finite and in range
    ///
    /// The trim range is checked separately by [`TrimRange::clamp_to`].
    pub fn validate(&self) -> Result<()> {
        check_range("echo delay", self.echo_delay, ECHO_DELAY_RANGE)?;
        check_range("echo feedback", self.echo_feedback, ECHO_FEEDBACK_RANGE)?;
        if self.reverb_decay != REVERB_BYPASS_DECAY {
            check_range("reverb decay", self.reverb_decay, REVERB_DECAY_RANGE)?;
        }
        check_range("reverb pre-delay", self.reverb_pre_delay, REVERB_PRE_DELAY_RANGE)?;
        Ok(())
    }
}

/// Fail with `RenderFailure` unless `value` is finite and within `range`
pub fn check_range(name: &str, value: f64, range: (f64, f64)) -> Result<()> {
    if !value.is_finite() || value < range.0 || value > range.1 {
        return Err(EditorError::RenderFailure {
            reason: format!(
                "{} {} outside {}..={}",
                name, value, range.0, range.1
            ),
        });
    }
    Ok(())
}

/// Shared holder for the current parameters
///
/// Writers replace the whole value; readers take a snapshot. Subscribers
/// are woken on every change.
#[derive(Debug)]
pub struct ParameterStore {
    tx: watch::Sender<EffectParameters>,
}

impl ParameterStore {
    pub fn new(initial: EffectParameters) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Current parameters
    pub fn snapshot(&self) -> EffectParameters {
        *self.tx.borrow()
    }

    /// Replace the parameters
    pub fn replace(&self, params: EffectParameters) {
        self.tx.send_replace(params);
    }

    /// Derive new parameters from the current ones and store them
    pub fn update(&self, f: impl FnOnce(EffectParameters) -> EffectParameters) -> EffectParameters {
        let next = f(self.snapshot());
        self.replace(next);
        next
    }

    pub fn subscribe(&self) -> watch::Receiver<EffectParameters> {
        self.tx.subscribe()
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new(EffectParameters::default())
    }
}
