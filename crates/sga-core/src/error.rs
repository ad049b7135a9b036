//! Error types for the sound group arbiter

use thiserror::Error;

/// Configuration and misuse errors.
///
/// Arbitration misses (polyphony, replay limits, bus limits, probability rolls)
/// are not errors; they resolve to a denied playback result instead.
#[derive(Error, Debug)]
pub enum ArbiterError {
    #[error("Engine not initialized")]
    NotInitialized,

    #[error("Unknown sound group: {0}")]
    UnknownGroup(String),

    #[error("Unknown bus: {0}")]
    UnknownBus(String),

    #[error("Sound group already exists: {0}")]
    DuplicateGroup(String),

    #[error("Bus already exists: {0}")]
    DuplicateBus(String),

    #[error("Invalid volume {0} (expected 0.0 - 1.0)")]
    InvalidVolume(f32),

    #[error("Invalid pitch {0} (expected -3.0 - 3.0)")]
    InvalidPitch(f32),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unknown variation slot {index} in group {group}")]
    UnknownSlot { group: String, index: usize },

    #[error("Unknown playing id: {0}")]
    UnknownPlayingId(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type ArbiterResult<T> = Result<T, ArbiterError>;
