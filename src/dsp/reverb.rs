//! Reverb effect
//!
//! Freeverb-style tanks (eight damped combs into four allpasses), one per
//! stereo side with the right side's delays spread slightly longer, behind a
//! shared pre-delay setting. Comb feedback comes from a decay time rather
//! than a room size.

use crate::dsp::chain::ChainPosition;
use crate::dsp::effect::{Effect, EffectSlot};
use crate::engine::AudioBuffer;
use crate::impl_effect_common;
use serde_json::{json, Value};

// Tuning (Freeverb, delays in samples at 44.1 kHz)
const TUNING_SAMPLE_RATE: f64 = 44100.0;
const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
/// Extra delay of the right-hand tank
const SPREAD: usize = 23;

const ALLPASS_FEEDBACK: f32 = 0.5;
/// Input gain applied to the stereo-normalised channel sum
const INPUT_GAIN: f32 = 0.015;
/// Share of the previous comb output kept by the damping lowpass
const DAMPING: f32 = 0.2;

/// Maximum pre-delay in seconds
pub const MAX_PRE_DELAY_SECS: f64 = 0.5;

/// Power-of-two ring buffer holding the most recent samples
#[derive(Debug, Clone)]
struct DelayLine {
    samples: Vec<f32>,
    next: usize,
}

impl DelayLine {
    /// Line able to look back at least `max_delay` samples
    fn with_capacity(max_delay: usize) -> Self {
        Self {
            samples: vec![0.0; (max_delay + 1).next_power_of_two()],
            next: 0,
        }
    }

    /// Sample pushed `delay` pushes ago (`delay >= 1`)
    fn tap(&self, delay: usize) -> f32 {
        let mask = self.samples.len() - 1;
        self.samples[self.next.wrapping_sub(delay) & mask]
    }

    fn push(&mut self, sample: f32) {
        let mask = self.samples.len() - 1;
        self.samples[self.next] = sample;
        self.next = (self.next + 1) & mask;
    }

    fn clear(&mut self) {
        self.samples.fill(0.0);
        self.next = 0;
    }
}

/// Feedback comb with a one-pole lowpass in the loop
#[derive(Debug, Clone)]
struct Comb {
    line: DelayLine,
    delay: usize,
    feedback: f32,
    lowpass: f32,
}

impl Comb {
    fn new(delay: usize) -> Self {
        Self {
            line: DelayLine::with_capacity(delay),
            delay,
            feedback: 0.0,
            lowpass: 0.0,
        }
    }

    /// g = 10^(-3 · delay / (decay · sr)): the loop loses 60 dB in `decay_secs`
    fn set_decay(&mut self, decay_secs: f64, sample_rate: u32) {
        self.feedback = if decay_secs > 0.0 {
            10f64.powf(-3.0 * self.delay as f64 / (decay_secs * sample_rate as f64)) as f32
        } else {
            0.0
        };
    }

    fn tick(&mut self, input: f32) -> f32 {
        let out = self.line.tap(self.delay);
        self.lowpass = out * (1.0 - DAMPING) + self.lowpass * DAMPING;
        self.line.push(input + self.lowpass * self.feedback);
        out
    }

    fn clear(&mut self) {
        self.line.clear();
        self.lowpass = 0.0;
    }
}

/// Schroeder allpass used for diffusion
#[derive(Debug, Clone)]
struct Allpass {
    line: DelayLine,
    delay: usize,
}

impl Allpass {
    fn new(delay: usize) -> Self {
        Self {
            line: DelayLine::with_capacity(delay),
            delay,
        }
    }

    fn tick(&mut self, input: f32) -> f32 {
        let delayed = self.line.tap(self.delay);
        let out = delayed - ALLPASS_FEEDBACK * input;
        self.line.push(input + ALLPASS_FEEDBACK * out);
        out
    }
}

/// One side of the reverb: pre-delay, comb bank and allpass chain
#[derive(Debug, Clone)]
struct Tank {
    pre_delay: DelayLine,
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl Tank {
    fn new(sample_rate: u32, spread: usize) -> Self {
        let scale = sample_rate as f64 / TUNING_SAMPLE_RATE;
        let scaled = |tuning: usize| (((tuning + spread) as f64 * scale) as usize).max(1);
        let max_pre_delay = (MAX_PRE_DELAY_SECS * sample_rate as f64).ceil() as usize;

        Self {
            pre_delay: DelayLine::with_capacity(max_pre_delay),
            combs: COMB_TUNING.iter().map(|&t| Comb::new(scaled(t))).collect(),
            allpasses: ALLPASS_TUNING.iter().map(|&t| Allpass::new(scaled(t))).collect(),
        }
    }

    fn set_decay(&mut self, decay_secs: f64, sample_rate: u32) {
        for comb in &mut self.combs {
            comb.set_decay(decay_secs, sample_rate);
        }
    }

    fn tick(&mut self, input: f32, pre_delay: usize) -> f32 {
        let delayed = if pre_delay == 0 {
            input
        } else {
            let out = self.pre_delay.tap(pre_delay);
            self.pre_delay.push(input);
            out
        };

        let parallel: f32 = self.combs.iter_mut().map(|c| c.tick(delayed)).sum();
        self.allpasses
            .iter_mut()
            .fold(parallel, |signal, allpass| allpass.tick(signal))
    }

    fn clear(&mut self) {
        self.pre_delay.clear();
        self.combs.iter_mut().for_each(Comb::clear);
        self.allpasses.iter_mut().for_each(|a| a.line.clear());
    }
}

// ============================================================================
// Main Reverb Effect
// ============================================================================

/// Algorithmic reverb
///
/// All channels are summed into both tanks; even channels take the left
/// tank's output and odd channels the right one's. A decay of zero turns
/// the effect into a bypass.
#[derive(Debug, Clone)]
pub struct Reverb {
    slot: EffectSlot,
    /// Decay time (RT60) in seconds
    decay_secs: f64,
    /// Pre-delay in seconds (0 to `MAX_PRE_DELAY_SECS`)
    pre_delay_secs: f64,
    wet_level: f32,
    dry_level: f32,
    sample_rate: u32,
    pre_delay_samples: usize,
    tanks: [Tank; 2],
}

impl Reverb {
    /// Create a reverb with the given decay time and pre-delay
    pub fn new(decay_secs: f64, pre_delay_secs: f64) -> Self {
        let mut reverb = Self {
            slot: EffectSlot::default(),
            decay_secs: decay_secs.max(0.0),
            pre_delay_secs: pre_delay_secs.clamp(0.0, MAX_PRE_DELAY_SECS),
            // Dry at unity keeps the echo repeats audible through this stage
            wet_level: 0.3,
            dry_level: 1.0,
            sample_rate: 48000,
            pre_delay_samples: 0,
            tanks: [Tank::new(48000, 0), Tank::new(48000, SPREAD)],
        };
        reverb.update_coefficients();
        reverb
    }

    /// Get decay time in seconds
    pub fn decay_secs(&self) -> f64 {
        self.decay_secs
    }

    /// Get pre-delay in seconds
    pub fn pre_delay_secs(&self) -> f64 {
        self.pre_delay_secs
    }

    /// Check whether the reverb passes audio through untouched
    pub fn is_bypassed(&self) -> bool {
        self.decay_secs <= 0.0
    }

    fn update_coefficients(&mut self) {
        for tank in &mut self.tanks {
            tank.set_decay(self.decay_secs, self.sample_rate);
        }
        self.pre_delay_samples = (self.pre_delay_secs * self.sample_rate as f64).round() as usize;
    }
}

impl Effect for Reverb {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        if !self.slot.enabled || self.is_bypassed() {
            return;
        }
        if self.sample_rate != buffer.sample_rate {
            self.prepare(buffer.sample_rate, buffer.channels());
        }

        let channels = buffer.channels();
        if channels == 0 {
            return;
        }
        let tanks = channels.min(2);
        let wet_level = self.wet_level;
        let dry_level = self.dry_level;

        for i in 0..buffer.len() {
            let sum: f32 = buffer.samples.iter().map(|ch| ch[i]).sum();
            // Scale to the level of a stereo pair so gain does not grow with channel count
            let input = sum * (2.0 / channels as f32) * INPUT_GAIN;

            let mut wet = [0.0_f32; 2];
            for (t, out) in wet.iter_mut().enumerate().take(tanks) {
                *out = self.tanks[t].tick(input, self.pre_delay_samples);
            }

            for (ch, samples) in buffer.samples.iter_mut().enumerate() {
                samples[i] = samples[i] * dry_level + wet[ch % 2] * wet_level;
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32, _channels: usize) {
        self.sample_rate = sample_rate.max(1);
        self.tanks = [
            Tank::new(self.sample_rate, 0),
            Tank::new(self.sample_rate, SPREAD),
        ];
        self.update_coefficients();
    }

    fn reset(&mut self) {
        for tank in &mut self.tanks {
            tank.clear();
        }
    }

    fn get_params(&self) -> Value {
        json!({
            "decay_secs": self.decay_secs,
            "pre_delay_secs": self.pre_delay_secs,
            "wet_level": self.wet_level,
            "dry_level": self.dry_level,
            "damping": DAMPING,
            "spread": SPREAD,
        })
    }

    impl_effect_common!(ChainPosition::Reverb, "reverb", "Reverb");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::window_rms;

    fn impulse(frames: usize, sample_rate: u32) -> AudioBuffer {
        let mut buffer = AudioBuffer::new(frames, 2, sample_rate);
        buffer.samples[0][0] = 1.0;
        buffer.samples[1][0] = 1.0;
        buffer
    }

    fn tail_rms(buffer: &AudioBuffer, start: usize) -> f32 {
        window_rms(&buffer.samples[0], start, buffer.len())
    }

    #[test]
    fn test_zero_decay_is_bypass() {
        let mut reverb = Reverb::new(0.0, 0.1);
        reverb.prepare(48000, 2);
        let mut buffer = impulse(4800, 48000);
        let original = buffer.clone();
        reverb.process(&mut buffer);

        assert!(reverb.is_bypassed());
        assert_eq!(buffer, original);
    }

    #[test]
    fn test_impulse_produces_tail() {
        let mut reverb = Reverb::new(1.5, 0.0);
        reverb.prepare(48000, 2);
        let mut buffer = impulse(48000, 48000);
        reverb.process(&mut buffer);

        assert!(buffer.is_finite());
        assert!(tail_rms(&buffer, 2400) > 0.0);
    }

    #[test]
    fn test_longer_decay_rings_longer() {
        let render = |decay: f64| {
            let mut reverb = Reverb::new(decay, 0.0);
            reverb.prepare(48000, 2);
            let mut buffer = impulse(96000, 48000);
            reverb.process(&mut buffer);
            tail_rms(&buffer, 48000)
        };

        assert!(render(4.0) > render(0.5));
    }

    #[test]
    fn test_pre_delay_holds_back_wet_signal() {
        let mut reverb = Reverb::new(2.0, 0.2);
        reverb.prepare(48000, 2);
        let mut buffer = impulse(19200, 48000);
        reverb.process(&mut buffer);

        // Nothing but the dry impulse before the pre-delay plus the shortest comb
        assert_eq!(buffer.samples[0][0], 1.0);
        assert!(buffer.samples[0][1..9600].iter().all(|&s| s == 0.0));
        assert!(tail_rms(&buffer, 9600) > 0.0);
    }

    #[test]
    fn test_stereo_spread_decorrelates_channels() {
        let mut reverb = Reverb::new(1.0, 0.0);
        reverb.prepare(44100, 2);
        let mut buffer = impulse(44100, 44100);
        reverb.process(&mut buffer);

        assert_ne!(buffer.samples[0][5000], buffer.samples[1][5000]);
    }

    #[test]
    fn test_mono_and_multichannel() {
        let mut mono = AudioBuffer::new(4800, 1, 48000);
        mono.samples[0][0] = 1.0;
        let mut reverb = Reverb::new(1.0, 0.0);
        reverb.prepare(48000, 1);
        reverb.process(&mut mono);
        assert!(mono.is_finite());

        let mut quad = AudioBuffer::new(4800, 4, 48000);
        quad.samples[0][0] = 1.0;
        let mut reverb = Reverb::new(1.0, 0.0);
        reverb.prepare(48000, 4);
        reverb.process(&mut quad);
        assert_eq!(quad.samples[0][2000], quad.samples[2][2000]);
        assert_eq!(quad.samples[1][2000], quad.samples[3][2000]);
    }
}
