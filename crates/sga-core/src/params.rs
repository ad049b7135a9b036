//! Parameter validation for the configuration API

use crate::error::{ArbiterError, ArbiterResult};

/// Lowest accepted pitch
pub const MIN_PITCH: f32 = -3.0;
/// Highest accepted pitch
pub const MAX_PITCH: f32 = 3.0;

/// Accept a volume in 0.0 - 1.0
#[inline]
pub fn validate_volume(volume: f32) -> ArbiterResult<f32> {
    if !(0.0..=1.0).contains(&volume) {
        return Err(ArbiterError::InvalidVolume(volume));
    }
    Ok(volume)
}

/// Accept a pitch in -3.0 - 3.0
#[inline]
pub fn validate_pitch(pitch: f32) -> ArbiterResult<f32> {
    if !(MIN_PITCH..=MAX_PITCH).contains(&pitch) {
        return Err(ArbiterError::InvalidPitch(pitch));
    }
    Ok(pitch)
}

/// Accept a percentage in 0 - 100
#[inline]
pub fn validate_percentage(name: &str, value: f32) -> ArbiterResult<f32> {
    if !(0.0..=100.0).contains(&value) {
        return Err(ArbiterError::InvalidParameter(format!(
            "{name} must be within 0-100, got {value}"
        )));
    }
    Ok(value)
}

/// Accept a non-negative duration
#[inline]
pub fn validate_duration(name: &str, secs: f32) -> ArbiterResult<f32> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(ArbiterError::InvalidParameter(format!(
            "{name} must be a non-negative duration, got {secs}"
        )));
    }
    Ok(secs)
}

/// Convert decibels to linear gain
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}
