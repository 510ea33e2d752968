//! Echo effect
//!
//! Feedback delay line per channel with a low-pass filter in the feedback
//! path, so each repeat is a little darker than the last.

use crate::dsp::chain::ChainPosition;
use crate::dsp::effect::{Effect, EffectSlot};
use crate::engine::AudioBuffer;
use crate::impl_effect_common;
use serde_json::{json, Value};
use std::f32::consts::PI;

/// Low-pass cutoff on the feedback path in Hz
const FEEDBACK_FILTER_FREQ: f32 = 8000.0;

/// Feedback delay (echo)
#[derive(Debug, Clone)]
pub struct Echo {
    slot: EffectSlot,
    /// Delay time in seconds
    delay_secs: f64,
    /// Feedback gain (0-1)
    feedback: f32,
    /// Wet signal level
    wet_level: f32,
    /// Dry signal level
    dry_level: f32,
    /// One delay line per channel, each exactly `delay_samples()` long
    lines: Vec<Vec<f32>>,
    /// One-pole lowpass state per channel
    filter_states: Vec<f32>,
    write_pos: usize,
    sample_rate: u32,
}

impl Echo {
    /// Create an echo with the given delay time and feedback gain
    ///
    /// Delay is clamped to at least zero and feedback to 0-1; a zero delay
    /// still delays by one sample.
    pub fn new(delay_secs: f64, feedback: f32) -> Self {
        Self {
            slot: EffectSlot::default(),
            delay_secs: delay_secs.max(0.0),
            feedback: feedback.clamp(0.0, 1.0),
            // Dry passes at unity so the echo stage sits in series with the source
            wet_level: 0.5,
            dry_level: 1.0,
            lines: Vec::new(),
            filter_states: Vec::new(),
            write_pos: 0,
            sample_rate: 48000,
        }
    }

    /// Get delay time in seconds
    pub fn delay_secs(&self) -> f64 {
        self.delay_secs
    }

    /// Get feedback gain
    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    /// Get wet signal level
    pub fn wet_level(&self) -> f32 {
        self.wet_level
    }

    /// Delay in samples at the prepared sample rate (at least one)
    pub fn delay_samples(&self) -> usize {
        ((self.delay_secs * self.sample_rate as f64).round() as usize).max(1)
    }

    /// One-pole lowpass coefficient: 1 - exp(-2π·fc/fs)
    fn filter_coeff(&self) -> f32 {
        let fc = FEEDBACK_FILTER_FREQ.min(self.sample_rate as f32 / 2.0);
        1.0 - (-2.0 * PI * fc / self.sample_rate as f32).exp()
    }
}

impl Effect for Echo {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        if !self.slot.enabled {
            return;
        }
        if self.lines.len() != buffer.channels() || self.sample_rate != buffer.sample_rate {
            self.prepare(buffer.sample_rate, buffer.channels());
        }

        let size = self.lines.first().map(Vec::len).unwrap_or(0);
        if size == 0 {
            return;
        }

        let coeff = self.filter_coeff();
        let feedback = self.feedback;
        let wet_level = self.wet_level;
        let dry_level = self.dry_level;
        let mut write_pos = self.write_pos;

        for i in 0..buffer.len() {
            for (ch, line) in self.lines.iter_mut().enumerate() {
                let input = buffer.samples[ch][i];
                let delayed = line[write_pos];

                let state = &mut self.filter_states[ch];
                *state += coeff * (delayed * feedback - *state);
                line[write_pos] = input + *state;

                buffer.samples[ch][i] = input * dry_level + delayed * wet_level;
            }
            write_pos = (write_pos + 1) % size;
        }

        self.write_pos = write_pos;
    }

    fn prepare(&mut self, sample_rate: u32, channels: usize) {
        self.sample_rate = sample_rate.max(1);
        let size = self.delay_samples();
        self.lines = vec![vec![0.0; size]; channels];
        self.filter_states = vec![0.0; channels];
        self.write_pos = 0;
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.fill(0.0);
        }
        self.filter_states.fill(0.0);
        self.write_pos = 0;
    }

    fn get_params(&self) -> Value {
        json!({
            "delay_secs": self.delay_secs,
            "feedback": self.feedback,
            "wet_level": self.wet_level,
            "dry_level": self.dry_level,
            "filter_freq": FEEDBACK_FILTER_FREQ,
        })
    }

    impl_effect_common!(ChainPosition::Echo, "echo", "Echo");
}
