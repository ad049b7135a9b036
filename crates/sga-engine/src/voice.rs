//! Voices the engine is tracking

use sga_core::{BusId, GroupId, PlayingId, Position3D, VoiceRef};

use crate::bus::BusVoice;

/// One started slot, tracked until the backend reports it silent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveVoice {
    pub playing_id: PlayingId,
    pub voice: VoiceRef,
    pub group: GroupId,
    pub bus: Option<BusId>,
    pub started_at: f64,
    /// Slot volume with random offset and request multiplier applied
    pub volume: f32,
    /// Slot pitch with random offset applied, or the request override
    pub pitch: f32,
    pub group_importance: i32,
    pub variation_importance: f32,
    pub uninterruptible: bool,
    pub position: Option<Position3D>,
    /// Stopping with a fade; gone once the fade ends
    pub fading_out: bool,
    pub paused: bool,
    pub occlusion_cutoff_hz: f32,
}

impl ActiveVoice {
    /// View used by bus eviction
    pub fn as_bus_voice(&self, position: Option<Position3D>) -> BusVoice {
        BusVoice {
            playing_id: self.playing_id,
            started_at: self.started_at,
            group_importance: self.group_importance,
            variation_importance: self.variation_importance,
            uninterruptible: self.uninterruptible,
            fading_out: self.fading_out,
            position: position.or(self.position),
        }
    }
}
