//! Render-chain effects
//!
//! An effect owns its state (delay lines, filter history) across blocks, so
//! a render feeds it consecutive blocks of one buffer and never shares an
//! instance between renders.

use serde_json::Value;
use uuid::Uuid;

use super::chain::ChainPosition;
use crate::engine::AudioBuffer;

/// Identity and on/off switch of an effect instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectSlot {
    pub id: Uuid,
    pub enabled: bool,
}

impl Default for EffectSlot {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            enabled: true,
        }
    }
}

/// A stage of the render chain
pub trait Effect: Send + Sync {
    /// Process one block in place
    fn process(&mut self, buffer: &mut AudioBuffer);

    /// Size internal state for a sample rate and channel count, clearing it
    fn prepare(&mut self, sample_rate: u32, channels: usize);

    /// Clear internal state without resizing
    fn reset(&mut self);

    /// Where the effect sits in the chain
    fn position(&self) -> ChainPosition;

    /// Short machine name (`"echo"`)
    fn effect_type(&self) -> &'static str;

    /// Name used in messages (`"Echo"`)
    fn display_name(&self) -> &str;

    fn id(&self) -> Uuid;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// Current settings as JSON, for export reports
    fn get_params(&self) -> Value;
}

/// Implements the identity methods of [`Effect`] for a type with a `slot: EffectSlot` field
#[macro_export]
macro_rules! impl_effect_common {
    ($position:expr, $effect_type:expr, $display_name:expr) => {
        fn position(&self) -> $crate::dsp::ChainPosition {
            $position
        }

        fn effect_type(&self) -> &'static str {
            $effect_type
        }

        fn display_name(&self) -> &str {
            $display_name
        }

        fn id(&self) -> uuid::Uuid {
            self.slot.id
        }

        fn is_enabled(&self) -> bool {
            self.slot.enabled
        }

        fn set_enabled(&mut self, enabled: bool) {
            self.slot.enabled = enabled;
        }
    };
}
