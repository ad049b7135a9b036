//! Sound groups and their variation slots

use rand::Rng;
use serde::{Deserialize, Serialize};

use sga_core::{
    ArbiterError, ArbiterResult, BusId, GroupId, SlotKey, VoiceRef, validate_duration,
    validate_percentage, validate_pitch, validate_volume,
};

use crate::pool::VariationPool;

// ═══════════════════════════════════════════════════════════════════════════════
// MODES
// ═══════════════════════════════════════════════════════════════════════════════

/// Order in which a group cycles through its slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SequencingMode {
    /// Shuffled once per cycle
    #[default]
    Randomized = 0,
    /// Slot order, top to bottom
    TopToBottom = 1,
}

/// How plays of a group relate to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PlaybackMode {
    /// Independent one-shots, subject to replay and polyphony limits
    #[default]
    Normal = 0,
    /// Each finished voice schedules the next one
    LoopedChain = 1,
    /// One voice at a time, resolved by importance
    Dialog = 2,
}

/// Minimum spacing between plays of a group
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ReplayLimit {
    #[default]
    None,
    /// Minimum seconds between plays
    TimeBased(f64),
    /// Minimum frames between plays
    FrameBased(u64),
}

/// Per-group voice ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Polyphony {
    pub enabled: bool,
    pub max_voices: u32,
}

impl Default for Polyphony {
    fn default() -> Self {
        Self {
            enabled: false,
            max_voices: 1,
        }
    }
}

/// Which linked groups play along with this one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum LinkedGroupMode {
    #[default]
    None = 0,
    All = 1,
    OneAtRandom = 2,
}

/// Length of a looped chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChainLoop {
    #[default]
    Endless,
    /// Stop after this many full cycles
    Loops(u32),
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEFINITIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Tunable settings of a sound group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSettings {
    pub sequencing: SequencingMode,
    pub playback_mode: PlaybackMode,
    pub polyphony: Polyphony,
    pub replay_limit: ReplayLimit,
    /// Percentage (0 - 100) a voice must have played before it may be retriggered
    pub retrigger_percentage: f32,
    /// Never start a new cycle with the slot that ended the previous one
    pub no_repeat_on_refill: bool,
    /// Used by dialog interruption and bus eviction
    pub importance: i32,
    /// Group volume (0.0 - 1.0)
    pub volume: f32,
    /// Group pitch multiplier
    pub pitch: f32,
    pub use_dialog_fade_out: bool,
    pub dialog_fade_out_secs: f32,
    pub linked_groups: Vec<String>,
    pub linked_mode: LinkedGroupMode,
    /// Custom event emitted whenever the group plays
    pub sound_played_event: Option<String>,
    pub chain_loop: ChainLoop,
    /// Random delay range between chained plays
    pub chain_delay_secs: (f32, f32),
    /// Log every arbitration outcome for this group
    pub log_sound: bool,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            sequencing: SequencingMode::Randomized,
            playback_mode: PlaybackMode::Normal,
            polyphony: Polyphony::default(),
            replay_limit: ReplayLimit::None,
            retrigger_percentage: 50.0,
            no_repeat_on_refill: true,
            importance: 0,
            volume: 1.0,
            pitch: 1.0,
            use_dialog_fade_out: false,
            dialog_fade_out_secs: 0.1,
            linked_groups: Vec::new(),
            linked_mode: LinkedGroupMode::None,
            sound_played_event: None,
            chain_loop: ChainLoop::Endless,
            chain_delay_secs: (0.0, 0.0),
            log_sound: false,
        }
    }
}

impl GroupSettings {
    pub fn validate(&self) -> ArbiterResult<()> {
        validate_volume(self.volume)?;
        validate_pitch(self.pitch)?;
        validate_percentage("retrigger_percentage", self.retrigger_percentage)?;
        validate_duration("dialog_fade_out_secs", self.dialog_fade_out_secs)?;
        let (min, max) = self.chain_delay_secs;
        validate_duration("chain_delay_secs", min)?;
        validate_duration("chain_delay_secs", max)?;
        if min > max {
            return Err(ArbiterError::InvalidParameter(format!(
                "chain_delay_secs min {min} exceeds max {max}"
            )));
        }
        if self.polyphony.enabled && self.polyphony.max_voices == 0 {
            return Err(ArbiterError::InvalidParameter(
                "polyphony max_voices must be at least 1".into(),
            ));
        }
        match self.replay_limit {
            ReplayLimit::TimeBased(secs) if !secs.is_finite() || secs < 0.0 => Err(
                ArbiterError::InvalidParameter(format!("replay limit {secs}s is invalid")),
            ),
            _ => Ok(()),
        }
    }
}

/// One variation as authored; expands to `weight` slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariationDefinition {
    pub name: String,
    pub alias: Option<String>,
    /// Clip id handed to the backend; `None` never plays
    pub clip: Option<String>,
    pub weight: u32,
    /// Chance to actually sound, 0 - 100
    pub probability: u8,
    pub importance: f32,
    pub uninterruptible: bool,
    pub volume: f32,
    pub pitch: f32,
    /// Random offset added to pitch on every play
    pub random_pitch: Option<(f32, f32)>,
    /// Random offset added to volume on every play
    pub random_volume: Option<(f32, f32)>,
}

impl Default for VariationDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            alias: None,
            clip: None,
            weight: 1,
            probability: 100,
            importance: 0.0,
            uninterruptible: false,
            volume: 1.0,
            pitch: 1.0,
            random_pitch: None,
            random_volume: None,
        }
    }
}

impl VariationDefinition {
    pub fn new(name: impl Into<String>, clip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clip: Some(clip.into()),
            ..Default::default()
        }
    }

    /// Variation with no clip
    pub fn silent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_probability(mut self, probability: u8) -> Self {
        self.probability = probability;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_uninterruptible(mut self, uninterruptible: bool) -> Self {
        self.uninterruptible = uninterruptible;
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn with_random_pitch(mut self, min: f32, max: f32) -> Self {
        self.random_pitch = Some((min, max));
        self
    }

    pub fn with_random_volume(mut self, min: f32, max: f32) -> Self {
        self.random_volume = Some((min, max));
        self
    }

    pub fn validate(&self) -> ArbiterResult<()> {
        if self.weight == 0 {
            return Err(ArbiterError::InvalidParameter(format!(
                "variation {} has weight 0",
                self.name
            )));
        }
        if self.probability > 100 {
            return Err(ArbiterError::InvalidParameter(format!(
                "variation {} probability {} exceeds 100",
                self.name, self.probability
            )));
        }
        validate_volume(self.volume)?;
        validate_pitch(self.pitch)?;
        for (min, max) in [self.random_pitch, self.random_volume].into_iter().flatten() {
            if !(min <= max) {
                return Err(ArbiterError::InvalidParameter(format!(
                    "variation {} has an empty random range {min}..{max}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// A sound group as authored in a scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub name: String,
    #[serde(default)]
    pub bus: Option<String>,
    #[serde(flatten)]
    pub settings: GroupSettings,
    #[serde(default)]
    pub variations: Vec<VariationDefinition>,
}

impl GroupDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bus: None,
            settings: GroupSettings::default(),
            variations: Vec::new(),
        }
    }

    pub fn with_bus(mut self, bus: impl Into<String>) -> Self {
        self.bus = Some(bus.into());
        self
    }

    pub fn with_variation(mut self, variation: VariationDefinition) -> Self {
        self.variations.push(variation);
        self
    }

    pub fn with_settings(mut self, settings: GroupSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_sequencing(mut self, mode: SequencingMode) -> Self {
        self.settings.sequencing = mode;
        self
    }

    pub fn with_playback_mode(mut self, mode: PlaybackMode) -> Self {
        self.settings.playback_mode = mode;
        self
    }

    pub fn with_polyphony(mut self, max_voices: u32) -> Self {
        self.settings.polyphony = Polyphony {
            enabled: true,
            max_voices,
        };
        self
    }

    pub fn with_replay_limit(mut self, limit: ReplayLimit) -> Self {
        self.settings.replay_limit = limit;
        self
    }

    pub fn with_retrigger_percentage(mut self, percentage: f32) -> Self {
        self.settings.retrigger_percentage = percentage;
        self
    }

    pub fn with_importance(mut self, importance: i32) -> Self {
        self.settings.importance = importance;
        self
    }

    pub fn with_linked_groups(mut self, mode: LinkedGroupMode, groups: &[&str]) -> Self {
        self.settings.linked_mode = mode;
        self.settings.linked_groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn with_sound_played_event(mut self, event: impl Into<String>) -> Self {
        self.settings.sound_played_event = Some(event.into());
        self
    }

    pub fn validate(&self) -> ArbiterResult<()> {
        if self.name.trim().is_empty() {
            return Err(ArbiterError::InvalidParameter(
                "sound group name is empty".into(),
            ));
        }
        self.settings.validate()?;
        self.variations.iter().try_for_each(VariationDefinition::validate)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME
// ═══════════════════════════════════════════════════════════════════════════════

/// One expanded, selectable slot
#[derive(Debug, Clone, PartialEq)]
pub struct VariationSlot {
    pub key: SlotKey,
    pub name: String,
    pub alias: Option<String>,
    pub clip: Option<String>,
    pub probability: u8,
    pub importance: f32,
    pub uninterruptible: bool,
    pub volume: f32,
    pub pitch: f32,
    pub random_pitch: Option<(f32, f32)>,
    pub random_volume: Option<(f32, f32)>,
}

impl VariationSlot {
    /// Whether a lookup by name hits this slot
    #[inline]
    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.alias.as_deref() == Some(name)
    }

    /// Volume for one play, random offset applied
    pub fn roll_volume<R: Rng + ?Sized>(&self, rng: &mut R) -> f32 {
        let offset = self.random_volume.map_or(0.0, |r| roll(r, rng));
        (self.volume + offset).clamp(0.0, 1.0)
    }

    /// Pitch for one play, random offset applied
    pub fn roll_pitch<R: Rng + ?Sized>(&self, rng: &mut R) -> f32 {
        let offset = self.random_pitch.map_or(0.0, |r| roll(r, rng));
        self.pitch + offset
    }
}

fn roll<R: Rng + ?Sized>((min, max): (f32, f32), rng: &mut R) -> f32 {
    if min < max {
        rng.random_range(min..=max)
    } else {
        min
    }
}

/// Progress of a looped chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainState {
    pub active: bool,
    pub loops_completed: u32,
}

/// A live sound group
#[derive(Debug, Clone)]
pub struct SoundGroup {
    pub id: GroupId,
    pub name: String,
    pub bus: Option<BusId>,
    pub settings: GroupSettings,
    pub muted: bool,
    pub soloed: bool,
    pub last_time_played: Option<f64>,
    pub last_frame_played: Option<u64>,
    pub chain: ChainState,
    pub(crate) pool: VariationPool,
    slots: Vec<VariationSlot>,
    next_key: u32,
}

impl SoundGroup {
    pub fn new<R: Rng + ?Sized>(
        id: GroupId,
        name: impl Into<String>,
        bus: Option<BusId>,
        settings: GroupSettings,
        variations: &[VariationDefinition],
        rng: &mut R,
    ) -> Self {
        let mut group = Self {
            id,
            name: name.into(),
            bus,
            pool: VariationPool::new(0, settings.sequencing, settings.no_repeat_on_refill, rng),
            settings,
            muted: false,
            soloed: false,
            last_time_played: None,
            last_frame_played: None,
            chain: ChainState::default(),
            slots: Vec::new(),
            next_key: 0,
        };
        for variation in variations {
            group.expand(variation);
        }
        group.pool = VariationPool::new(
            group.slots.len(),
            group.settings.sequencing,
            group.settings.no_repeat_on_refill,
            rng,
        );
        group
    }

    fn expand(&mut self, variation: &VariationDefinition) -> Vec<usize> {
        let mut added = Vec::with_capacity(variation.weight as usize);
        for _ in 0..variation.weight {
            let key = SlotKey(self.next_key);
            self.next_key += 1;
            added.push(self.slots.len());
            self.slots.push(VariationSlot {
                key,
                name: variation.name.clone(),
                alias: variation.alias.clone(),
                clip: variation.clip.clone(),
                probability: variation.probability,
                importance: variation.importance,
                uninterruptible: variation.uninterruptible,
                volume: variation.volume,
                pitch: variation.pitch,
                random_pitch: variation.random_pitch,
                random_volume: variation.random_volume,
            });
        }
        added
    }

    #[inline]
    pub fn slots(&self) -> &[VariationSlot] {
        &self.slots
    }

    #[inline]
    pub fn slot(&self, index: usize) -> Option<&VariationSlot> {
        self.slots.get(index)
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn pool(&self) -> &VariationPool {
        &self.pool
    }

    /// Backend reference for a slot index
    #[inline]
    pub fn voice_ref(&self, index: usize) -> Option<VoiceRef> {
        self.slots.get(index).map(|s| VoiceRef::new(self.id, s.key))
    }

    /// Current positional index of a slot key
    pub fn index_of_key(&self, key: SlotKey) -> Option<usize> {
        self.slots.iter().position(|s| s.key == key)
    }

    /// Every slot whose name or alias is `name`
    pub fn matching_slots(&self, name: &str) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.matches(name))
            .map(|(i, _)| i)
            .collect()
    }

    /// Append a variation at runtime. Returns the new slot indices.
    pub fn add_variation(&mut self, variation: &VariationDefinition) -> Vec<usize> {
        let added = self.expand(variation);
        for &index in &added {
            self.pool.add_slot(index);
        }
        added
    }

    /// Remove one slot at runtime, renumbering pool state
    pub fn remove_slot<R: Rng + ?Sized>(
        &mut self,
        index: usize,
        rng: &mut R,
    ) -> ArbiterResult<VariationSlot> {
        if index >= self.slots.len() {
            return Err(ArbiterError::UnknownSlot {
                group: self.name.clone(),
                index,
            });
        }
        self.pool.remove_slot(index, rng);
        Ok(self.slots.remove(index))
    }

    /// Replace settings, keeping runtime state
    pub fn apply_settings(&mut self, settings: GroupSettings) {
        self.pool
            .set_policy(settings.sequencing, settings.no_repeat_on_refill);
        self.settings = settings;
    }

    #[inline]
    pub fn is_looped_chain(&self) -> bool {
        self.settings.playback_mode == PlaybackMode::LoopedChain
    }

    /// Whether the chain has run all of its loops
    pub fn chain_finished(&self) -> bool {
        match self.settings.chain_loop {
            ChainLoop::Endless => false,
            ChainLoop::Loops(n) => self.chain.loops_completed >= n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn group(variations: &[VariationDefinition]) -> SoundGroup {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        SoundGroup::new(
            GroupId(0),
            "Footsteps",
            None,
            GroupSettings::default(),
            variations,
            &mut rng,
        )
    }

    #[test]
    fn test_weight_expands_slots() {
        let g = group(&[
            VariationDefinition::new("step_a", "a.wav").with_weight(3),
            VariationDefinition::new("step_b", "b.wav"),
        ]);
        assert_eq!(g.slot_count(), 4);
        assert_eq!(g.pool().len(), 4);
        assert_eq!(g.matching_slots("step_a"), vec![0, 1, 2]);
        let keys: Vec<u32> = g.slots().iter().map(|s| s.key.0).collect();
        assert_eq!(keys, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_alias_lookup() {
        let g = group(&[VariationDefinition::new("step_a", "a.wav").with_alias("soft")]);
        assert_eq!(g.matching_slots("soft"), vec![0]);
        assert!(g.matching_slots("loud").is_empty());
    }

    #[test]
    fn test_remove_slot_keeps_keys_stable() {
        let mut g = group(&[
            VariationDefinition::new("a", "a.wav"),
            VariationDefinition::new("b", "b.wav"),
            VariationDefinition::new("c", "c.wav"),
        ]);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let removed = g.remove_slot(1, &mut rng).unwrap();
        assert_eq!(removed.name, "b");
        assert_eq!(g.index_of_key(SlotKey(2)), Some(1));
        assert_eq!(g.pool().len(), 2);
        assert!(matches!(
            g.remove_slot(5, &mut rng),
            Err(ArbiterError::UnknownSlot { index: 5, .. })
        ));
    }

    #[test]
    fn test_add_variation_gets_fresh_keys() {
        let mut g = group(&[VariationDefinition::new("a", "a.wav")]);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        g.remove_slot(0, &mut rng).unwrap();
        let added = g.add_variation(&VariationDefinition::new("b", "b.wav").with_weight(2));
        assert_eq!(added, vec![0, 1]);
        assert_eq!(g.slots()[0].key, SlotKey(1));
        assert_eq!(g.pool().len(), 2);
    }

    #[test]
    fn test_validation() {
        assert!(VariationDefinition::new("a", "a").with_weight(0).validate().is_err());
        assert!(VariationDefinition::new("a", "a").with_probability(101).validate().is_err());
        assert!(
            VariationDefinition::new("a", "a")
                .with_random_pitch(0.5, -0.5)
                .validate()
                .is_err()
        );
        let mut settings = GroupSettings::default();
        settings.volume = 2.0;
        assert!(matches!(settings.validate(), Err(ArbiterError::InvalidVolume(_))));
    }

    #[test]
    fn test_definition_from_json_uses_defaults() {
        let json = r#"{
            "name": "Explosions",
            "bus": "SFX",
            "polyphony": { "enabled": true, "max_voices": 2 },
            "replay_limit": { "TimeBased": 1.0 },
            "variations": [ { "name": "boom", "clip": "boom.wav", "weight": 2 } ]
        }"#;
        let def: GroupDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.bus.as_deref(), Some("SFX"));
        assert_eq!(def.settings.polyphony.max_voices, 2);
        assert_eq!(def.settings.replay_limit, ReplayLimit::TimeBased(1.0));
        assert_eq!(def.settings.retrigger_percentage, 50.0);
        assert_eq!(def.variations[0].probability, 100);
        assert!(def.validate().is_ok());
    }
}
