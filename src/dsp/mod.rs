//! DSP Effects
//!
//! Effect parameters, the echo and reverb effects, the fixed effect chain
//! and the offline renderer. All effects implement the `Effect` trait for
//! uniform processing.

mod chain;
mod delay;
mod effect;
pub mod params;
mod render;
mod reverb;

pub use chain::{ChainPosition, EffectChain};
pub use delay::Echo;
pub use effect::{Effect, EffectSlot};
pub use params::{EffectParameters, ParameterStore, TrimRange};
pub use render::{OfflineRenderer, RenderedAsset};
pub use reverb::{Reverb, MAX_PRE_DELAY_SECS};
