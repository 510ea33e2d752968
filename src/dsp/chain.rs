//! Effect chain
//!
//! Effects are processed in chain order (index 0 first). Insertion places
//! each effect at its fixed position: echo always precedes reverb, so the
//! repeats are diffused along with the dry signal.

use super::{Echo, Effect, EffectParameters, Reverb};
use crate::engine::AudioBuffer;
use crate::error::{EditorError, Result};

/// Order priority of the effects (lower runs first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChainPosition {
    Echo = 0,
    Reverb = 1,
    /// Anything else runs after the built-in stages
    Other = 2,
}

/// Chain of effects for processing
pub struct EffectChain {
    effects: Vec<Box<dyn Effect>>,
    sample_rate: u32,
    channels: usize,
}

impl EffectChain {
    /// Create a new empty effect chain
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            effects: Vec::new(),
            sample_rate,
            channels,
        }
    }

    /// Build the echo → reverb chain for a set of parameters
    pub fn from_params(params: &EffectParameters, sample_rate: u32, channels: usize) -> Self {
        let mut chain = Self::new(sample_rate, channels);
        chain.add(Box::new(Reverb::new(
            params.reverb_decay,
            params.reverb_pre_delay,
        )));
        chain.add(Box::new(Echo::new(
            params.echo_delay,
            params.echo_feedback as f32,
        )));
        chain
    }

    /// Reset all effects
    pub fn reset(&mut self) {
        for effect in &mut self.effects {
            effect.reset();
        }
    }

    /// Add an effect at its position in the chain
    pub fn add(&mut self, mut effect: Box<dyn Effect>) {
        effect.prepare(self.sample_rate, self.channels);
        let position = effect.position();
        let index = self
            .effects
            .iter()
            .position(|e| e.position() > position)
            .unwrap_or(self.effects.len());
        self.effects.insert(index, effect);
    }

    /// Process one block through every enabled effect
    ///
    /// Fails as soon as a stage produces a non-finite sample.
    pub fn process(&mut self, buffer: &mut AudioBuffer) -> Result<()> {
        for effect in &mut self.effects {
            if !effect.is_enabled() {
                continue;
            }
            effect.process(buffer);
            if !buffer.is_finite() {
                return Err(EditorError::RenderFailure {
                    reason: format!("{} produced non-finite samples", effect.display_name()),
                });
            }
        }
        Ok(())
    }

    /// Get the number of effects in the chain
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Check if the chain is empty
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Iterate over effects
    pub fn iter(&self) -> impl Iterator<Item = &dyn Effect> {
        self.effects.iter().map(|e| e.as_ref())
    }

    /// Serialize chain state to JSON
    pub fn to_json(&self) -> serde_json::Value {
        let effects: Vec<serde_json::Value> = self
            .effects
            .iter()
            .map(|e| {
                serde_json::json!({
                    "effect_type": e.effect_type(),
                    "id": e.id(),
                    "enabled": e.is_enabled(),
                    "params": e.get_params(),
                })
            })
            .collect();

        serde_json::json!({
            "effects": effects,
            "sample_rate": self.sample_rate,
            "channels": self.channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_position_ordering() {
        assert!(ChainPosition::Echo < ChainPosition::Reverb);
        assert!(ChainPosition::Reverb < ChainPosition::Other);
    }

    #[test]
    fn test_echo_precedes_reverb_regardless_of_insertion() {
        let chain = EffectChain::from_params(&EffectParameters::default(), 48000, 2);
        let order: Vec<_> = chain.iter().map(|e| e.effect_type()).collect();
        assert_eq!(order, vec!["echo", "reverb"]);
    }

    #[test]
    fn test_process_passes_silence() {
        let mut chain = EffectChain::from_params(&EffectParameters::default(), 48000, 2);
        let mut buffer = AudioBuffer::new(512, 2, 48000);
        chain.process(&mut buffer).unwrap();
        assert!(buffer.is_silent());
    }

    #[test]
    fn test_non_finite_input_fails_render() {
        let mut chain = EffectChain::from_params(&EffectParameters::default(), 48000, 2);
        let mut buffer = AudioBuffer::new(512, 2, 48000);
        buffer.samples[0][10] = f32::NAN;

        let err = chain.process(&mut buffer).unwrap_err();
        assert!(err.to_string().contains("Echo"));
    }

    #[test]
    fn test_disabled_effect_is_skipped() {
        let mut echo = Echo::new(0.001, 0.5);
        echo.set_enabled(false);
        let mut chain = EffectChain::new(8000, 1);
        chain.add(Box::new(echo));

        let mut buffer = AudioBuffer::new(64, 1, 8000);
        buffer.samples[0][0] = 1.0;
        chain.process(&mut buffer).unwrap();
        assert_eq!(buffer.samples[0][0], 1.0);
        assert!(buffer.samples[0][1..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_to_json_lists_effects() {
        let chain = EffectChain::from_params(&EffectParameters::default(), 44100, 2);
        let json = chain.to_json();
        assert_eq!(json["effects"].as_array().unwrap().len(), 2);
        assert_eq!(json["effects"][0]["effect_type"], "echo");
        assert_eq!(json["sample_rate"], 44100);
    }
}
