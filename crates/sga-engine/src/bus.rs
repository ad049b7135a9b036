//! Buses and voice-limit arbitration

use serde::{Deserialize, Serialize};

use sga_core::{ArbiterError, ArbiterResult, BusId, PlayingId, Position3D, validate_pitch, validate_volume};

// ═══════════════════════════════════════════════════════════════════════════════
// BUS
// ═══════════════════════════════════════════════════════════════════════════════

/// What a full bus does with a new request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BusVoiceLimitMode {
    #[default]
    DoNotPlayNewSound = 0,
    StopOldestSound = 1,
    StopFarthestSound = 2,
    StopLeastImportantSound = 3,
}

/// A bus as authored in a scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusDefinition {
    pub name: String,
    pub volume: f32,
    pub pitch: f32,
    /// Maximum voices across every group routed here
    pub voice_limit: Option<u32>,
    pub limit_mode: BusVoiceLimitMode,
}

impl Default for BusDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            volume: 1.0,
            pitch: 1.0,
            voice_limit: None,
            limit_mode: BusVoiceLimitMode::DoNotPlayNewSound,
        }
    }
}

impl BusDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_voice_limit(mut self, limit: u32, mode: BusVoiceLimitMode) -> Self {
        self.voice_limit = Some(limit);
        self.limit_mode = mode;
        self
    }

    pub fn validate(&self) -> ArbiterResult<()> {
        if self.name.trim().is_empty() {
            return Err(ArbiterError::InvalidParameter("bus name is empty".into()));
        }
        validate_volume(self.volume)?;
        validate_pitch(self.pitch)?;
        Ok(())
    }
}

/// A live bus
#[derive(Debug, Clone, PartialEq)]
pub struct Bus {
    pub id: BusId,
    pub name: String,
    pub volume: f32,
    pub pitch: f32,
    pub muted: bool,
    pub soloed: bool,
    pub voice_limit: Option<u32>,
    pub limit_mode: BusVoiceLimitMode,
}

impl Bus {
    pub fn new(id: BusId, def: &BusDefinition) -> Self {
        Self {
            id,
            name: def.name.clone(),
            volume: def.volume,
            pitch: def.pitch,
            muted: false,
            soloed: false,
            voice_limit: def.voice_limit,
            limit_mode: def.limit_mode,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ARBITRATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Whether a bus admits one more voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusDecision {
    Allow,
    Deny,
    MustEvict,
}

/// What the arbiter needs to know about a voice on the bus
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusVoice {
    pub playing_id: PlayingId,
    pub started_at: f64,
    pub group_importance: i32,
    pub variation_importance: f32,
    pub uninterruptible: bool,
    /// Already stopping with a fade
    pub fading_out: bool,
    pub position: Option<Position3D>,
}

/// Eviction choice
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Eviction {
    /// Voice to fade out once the new voice is confirmed
    pub evictee: Option<PlayingId>,
    /// Voices met mid fade-out; stop them outright
    pub stop_now: Vec<PlayingId>,
}

pub fn can_play(bus: &Bus, voices_on_bus: usize) -> BusDecision {
    match bus.voice_limit {
        Some(limit) if voices_on_bus >= limit as usize => match bus.limit_mode {
            BusVoiceLimitMode::DoNotPlayNewSound => BusDecision::Deny,
            _ => BusDecision::MustEvict,
        },
        _ => BusDecision::Allow,
    }
}

/// Pick a voice to make room for a requester of `requester_importance`
pub fn choose_evictee(
    mode: BusVoiceLimitMode,
    voices: &[BusVoice],
    requester_importance: i32,
    listener: Option<Position3D>,
) -> Eviction {
    let mut eviction = Eviction::default();
    let mut live = Vec::with_capacity(voices.len());
    for voice in voices {
        if voice.fading_out {
            eviction.stop_now.push(voice.playing_id);
        } else {
            live.push(voice);
        }
    }

    eviction.evictee = match mode {
        BusVoiceLimitMode::DoNotPlayNewSound => None,
        BusVoiceLimitMode::StopOldestSound => live
            .iter()
            .min_by(|a, b| a.started_at.total_cmp(&b.started_at))
            .map(|v| v.playing_id),
        BusVoiceLimitMode::StopFarthestSound => {
            let listener = listener.unwrap_or_default();
            live.iter()
                .map(|v| {
                    let distance = v.position.map_or(0.0, |p| p.distance_squared(&listener));
                    (v.playing_id, distance)
                })
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(id, _)| id)
        }
        BusVoiceLimitMode::StopLeastImportantSound => live
            .iter()
            .filter(|v| !v.uninterruptible)
            .min_by(|a, b| {
                a.group_importance
                    .cmp(&b.group_importance)
                    .then(a.variation_importance.total_cmp(&b.variation_importance))
                    .then(a.started_at.total_cmp(&b.started_at))
            })
            .filter(|v| v.group_importance < requester_importance)
            .map(|v| v.playing_id),
    };
    eviction
}
