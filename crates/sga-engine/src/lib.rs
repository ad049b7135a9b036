//! Sound group arbitration engine
//!
//! Decides which variation of a sound group plays when a game asks for it:
//! - Variation pools with fair, non-repeating rotation
//! - Replay limits, group polyphony and retriggering
//! - Bus voice limits with eviction policies
//! - Dialog interruption by importance
//! - Volume fades, pitch glides, occlusion transitions and bus ducking
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   SOUND GROUP ENGINE                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │   Game code                           Engine                     │
//! │   ┌─────────────────┐                ┌──────────────────────┐   │
//! │   │ request_play()  │───────────────▶│ trial: gate ─▶ bus   │   │
//! │   │ stop / pause    │                │   ─▶ selection       │   │
//! │   │ fade / glide    │                │   ─▶ candidate walk  │   │
//! │   │ duck_bus()      │                └──────────┬───────────┘   │
//! │   └─────────────────┘                           │               │
//! │            │ tick(now, frame)                   │ start / stop  │
//! │            ▼                                    ▼               │
//! │   ┌─────────────────┐                ┌──────────────────────┐   │
//! │   │ reap · fades    │───set_volume──▶│ VoiceBackend         │   │
//! │   │ ducks · chains  │                │ (host audio / sim)   │   │
//! │   └─────────────────┘                └──────────────────────┘   │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sga_engine::{Engine, PlayRequest, SceneDefinition, SimulatedBackend};
//!
//! let scene = SceneDefinition::from_json(&std::fs::read_to_string("scene.json")?)?;
//! let mut engine = Engine::from_scene(SimulatedBackend::new(1.0), &scene)?;
//!
//! let result = engine.request_play("Footsteps", PlayRequest::new());
//! engine.tick(1.0 / 60.0, 1);
//! ```

#![allow(clippy::new_without_default)]

pub mod backend;
pub mod bus;
pub mod config;
mod control;
pub mod duck;
pub mod engine;
pub mod fade;
pub mod gate;
pub mod group;
pub mod pool;
pub mod selection;
pub mod trial;
pub mod voice;

// Re-exports
pub use backend::{BackendCommand, SimulatedBackend, StartParams, StopMode, VoiceBackend};
pub use bus::{Bus, BusDefinition, BusVoiceLimitMode};
pub use config::{EngineConfig, SceneDefinition};
pub use duck::{DuckActor, DuckRuleDefinition};
pub use engine::{Engine, EngineNotification, FadeTarget};
pub use fade::{FadeCallback, FadeOptions};
pub use group::{
    ChainLoop, GroupDefinition, GroupSettings, LinkedGroupMode, PlaybackMode, Polyphony,
    ReplayLimit, SequencingMode, SoundGroup, VariationDefinition, VariationSlot,
};
pub use pool::VariationPool;
pub use trial::{DenyReason, PlayRequest, PlaybackOutcome, PlaybackResult, PlayingHandle};
pub use voice::ActiveVoice;

pub use sga_core::{
    ArbiterError, ArbiterResult, BusId, Clock, GroupId, PlayingId, Position3D, VoiceRef,
};
