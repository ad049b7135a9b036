//! Engine facade
//!
//! Owns every group, bus, voice and scheduler. One engine per audio world;
//! several can coexist since nothing is global.

use std::collections::HashMap;

use log::{info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use sga_core::{
    ArbiterError, ArbiterResult, BusId, Clock, GroupId, IdAllocator, PlayingId,
};

use crate::backend::VoiceBackend;
use crate::bus::Bus;
use crate::config::{EngineConfig, SceneDefinition};
use crate::duck::{DuckActor, DuckRule, DuckScheduler};
use crate::fade::{FadeCompletion, FadePool};
use crate::group::SoundGroup;
use crate::pool::VariationPool;
use crate::trial::{DenyReason, PlayRequest, PlaybackResult, TrialContext};
use crate::voice::ActiveVoice;

// ═══════════════════════════════════════════════════════════════════════════════
// NOTIFICATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// What a fade or glide was driving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FadeTarget {
    GroupVolume(GroupId),
    BusVolume(BusId),
    GroupPitch(GroupId),
    BusPitch(BusId),
    Occlusion(PlayingId),
}

/// Outbound events, drained with [`Engine::take_notifications`]
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotification {
    /// A group with a custom "sound played" event played
    SoundPlayed {
        group: GroupId,
        event: String,
        playing_id: PlayingId,
    },
    /// A voice stopped being tracked
    VoiceFinished {
        group: GroupId,
        playing_id: PlayingId,
    },
    FadeCompleted(FadeTarget),
    /// A looped chain ran all of its loops
    ChainEnded { group: GroupId },
    /// A delayed or chained play was denied when it fell due
    ScheduledDenied {
        group: GroupId,
        playing_id: PlayingId,
        reason: DenyReason,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// A play request waiting for its time
#[derive(Debug, Clone)]
pub(crate) struct ScheduledPlay {
    pub due: f64,
    pub group: GroupId,
    pub playing_id: PlayingId,
    pub request: PlayRequest,
    pub chained: bool,
}

#[derive(Default)]
pub(crate) struct FadeSet {
    pub group_volume: FadePool<GroupId>,
    pub bus_volume: FadePool<BusId>,
    pub group_pitch: FadePool<GroupId>,
    pub bus_pitch: FadePool<BusId>,
    pub occlusion: FadePool<PlayingId>,
}

/// Whether anything is soloed, computed once per mix pass
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SoloState {
    groups: bool,
    buses: bool,
}

/// Sound group arbitration engine
pub struct Engine<B: VoiceBackend> {
    pub(crate) backend: B,
    pub(crate) config: EngineConfig,
    pub(crate) initialized: bool,
    pub(crate) clock: Clock,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) ids: IdAllocator,
    pub(crate) groups: Vec<Option<SoundGroup>>,
    pub(crate) group_names: HashMap<String, GroupId>,
    pub(crate) buses: Vec<Option<Bus>>,
    pub(crate) bus_names: HashMap<String, BusId>,
    pub(crate) voices: Vec<ActiveVoice>,
    pub(crate) scheduled: Vec<ScheduledPlay>,
    pub(crate) fades: FadeSet,
    pub(crate) ducks: DuckScheduler,
    pub(crate) duck_rules: Vec<DuckRule>,
    pub(crate) notifications: Vec<EngineNotification>,
}

/// Case-insensitive name key
#[inline]
pub(crate) fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Mutable group lookup that borrows only the group table
#[inline]
pub(crate) fn group_slot_mut(
    groups: &mut [Option<SoundGroup>],
    id: GroupId,
) -> Option<&mut SoundGroup> {
    groups.get_mut(id.0 as usize).and_then(Option::as_mut)
}

impl<B: VoiceBackend> Engine<B> {
    /// Create an uninitialized engine
    pub fn new(backend: B, config: EngineConfig) -> Self {
        let seed = config.rng_seed.unwrap_or_else(rand::random);
        Self {
            backend,
            config,
            initialized: false,
            clock: Clock::ZERO,
            rng: ChaCha8Rng::seed_from_u64(seed),
            ids: IdAllocator::new(),
            groups: Vec::new(),
            group_names: HashMap::new(),
            buses: Vec::new(),
            bus_names: HashMap::new(),
            voices: Vec::new(),
            scheduled: Vec::new(),
            fades: FadeSet::default(),
            ducks: DuckScheduler::new(),
            duck_rules: Vec::new(),
            notifications: Vec::new(),
        }
    }

    /// Create and initialize an engine from a scene, using the scene's config
    pub fn from_scene(backend: B, scene: &SceneDefinition) -> ArbiterResult<Self> {
        let mut engine = Self::new(backend, scene.config.clone());
        engine.initialize(scene)?;
        Ok(engine)
    }

    /// Build every bus, group and duck rule of `scene`.
    ///
    /// The scene is validated first; on error nothing changes. Calling this
    /// again tears down the previous scene.
    pub fn initialize(&mut self, scene: &SceneDefinition) -> ArbiterResult<()> {
        scene.validate()?;
        self.config.validate()?;

        if self.initialized {
            self.stop_all();
        }
        self.groups.clear();
        self.group_names.clear();
        self.buses.clear();
        self.bus_names.clear();
        self.voices.clear();
        self.scheduled.clear();
        self.fades = FadeSet::default();
        self.ducks = DuckScheduler::new();
        self.duck_rules.clear();

        for def in &scene.buses {
            self.insert_bus(def);
        }
        for def in &scene.groups {
            self.insert_group(def)?;
        }
        for rule in &scene.duck_rules {
            self.insert_duck_rule(rule)?;
        }

        self.initialized = true;
        info!(
            "Sound group engine initialized: {} buses, {} groups, {} duck rules",
            self.buses.len(),
            self.groups.len(),
            self.duck_rules.len()
        );
        Ok(())
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn ensure_initialized(&self) -> ArbiterResult<()> {
        if self.initialized {
            Ok(())
        } else {
            log::error!("Sound group engine used before initialize()");
            Err(ArbiterError::NotInitialized)
        }
    }

    // ─── Play requests ─────────────────────────────────────────────────────────

    /// Ask a group (by name) to play
    pub fn request_play(&mut self, group: &str, request: PlayRequest) -> PlaybackResult {
        if !self.initialized {
            log::error!("Play of '{group}' requested before initialize()");
            return PlaybackResult::denied(DenyReason::NotInitialized);
        }
        match self.group_id(group) {
            Some(id) => self.request_play_id(id, request),
            None => {
                warn!("Play requested for unknown sound group '{group}'");
                PlaybackResult::denied(DenyReason::UnknownGroup)
            }
        }
    }

    /// Ask a group (by id) to play
    pub fn request_play_id(&mut self, group: GroupId, request: PlayRequest) -> PlaybackResult {
        if !self.initialized {
            log::error!("Play of group {} requested before initialize()", group.0);
            return PlaybackResult::denied(DenyReason::NotInitialized);
        }
        if self.group(group).is_none() {
            return PlaybackResult::denied(DenyReason::UnknownGroup);
        }

        if request.delay_secs > 0.0 {
            let playing_id = self.ids.next_id();
            self.scheduled.push(ScheduledPlay {
                due: self.clock.now + f64::from(request.delay_secs),
                group,
                playing_id,
                request: PlayRequest {
                    delay_secs: 0.0,
                    ..request
                },
                chained: false,
            });
            return PlaybackResult::scheduled(playing_id);
        }

        self.run_trial(group, &request, TrialContext::default())
    }

    // ─── Tick ──────────────────────────────────────────────────────────────────

    /// Advance the engine to `now` / `frame`
    pub fn tick(&mut self, now: f64, frame: u64) {
        self.clock = Clock::new(now, frame);
        self.backend.on_tick(self.clock);
        if !self.initialized {
            return;
        }

        self.reap_finished();
        self.check_duck_rises();
        self.advance_fades();
        self.ducks.advance(now);
        self.run_scheduled();
        self.push_mix();
    }

    fn reap_finished(&mut self) {
        let backend = &self.backend;
        let mut finished = Vec::new();
        self.voices.retain(|v| {
            let alive = v.paused || backend.is_playing(v.voice);
            if !alive {
                finished.push(*v);
            }
            alive
        });

        for voice in finished {
            self.retire_voice(&voice);
        }
    }

    /// Release rule ducks whose voice has played past its rise point
    fn check_duck_rises(&mut self) {
        let now = self.clock.now;
        for (playing_id, rise) in self.ducks.pending_rises() {
            let risen = self
                .voice(playing_id)
                .is_none_or(|v| self.backend.played_percentage(v.voice) >= rise);
            if risen {
                self.ducks.release(DuckActor::Voice(playing_id), now);
            }
        }
    }

    fn run_scheduled(&mut self) {
        let now = self.clock.now;
        let (mut due, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.scheduled)
                .into_iter()
                .partition(|s| s.due <= now);
        self.scheduled = pending;
        due.sort_by(|a, b| a.due.total_cmp(&b.due));

        for entry in due {
            let ctx = TrialContext {
                playing_id: Some(entry.playing_id),
                linked_depth: 0,
            };
            let result = self.run_trial(entry.group, &entry.request, ctx);
            if let Some(reason) = result.deny_reason() {
                self.notifications.push(EngineNotification::ScheduledDenied {
                    group: entry.group,
                    playing_id: entry.playing_id,
                    reason,
                });
                let keep_chain = entry.chained
                    && reason != DenyReason::ProbabilityMiss
                    && self.group(entry.group).is_some_and(|g| g.chain.active);
                if keep_chain {
                    self.advance_chain(entry.group);
                }
            }
        }
    }

    /// Queue the next link of a looped chain, or end it
    pub(crate) fn advance_chain(&mut self, id: GroupId) {
        let now = self.clock.now;
        let Some(group) = group_slot_mut(&mut self.groups, id) else {
            return;
        };
        if !group.chain.active {
            return;
        }
        if group.chain_finished() {
            group.chain = Default::default();
            info!("Looped chain of '{}' finished", group.name);
            self.notifications
                .push(EngineNotification::ChainEnded { group: id });
            return;
        }
        if self.scheduled.iter().any(|s| s.chained && s.group == id) {
            return;
        }

        let (min, max) = group.settings.chain_delay_secs;
        let delay = if min < max {
            self.rng.random_range(min..=max)
        } else {
            min
        };
        let playing_id = self.ids.next_id();
        self.scheduled.push(ScheduledPlay {
            due: now + f64::from(delay),
            group: id,
            playing_id,
            request: PlayRequest::default(),
            chained: true,
        });
    }

    fn advance_fades(&mut self) {
        let now = self.clock.now;

        let tick = self
            .fades
            .group_volume
            .advance(now, self.config.stop_zero_volume_groups);
        for (id, value) in tick.values {
            if let Some(g) = group_slot_mut(&mut self.groups, id) {
                g.settings.volume = value;
            }
        }
        for done in tick.completed {
            self.finish_group_volume_fade(done);
        }

        let tick = self
            .fades
            .bus_volume
            .advance(now, self.config.stop_zero_volume_buses);
        for (id, value) in tick.values {
            if let Some(b) = self.bus_mut(id) {
                b.volume = value;
            }
        }
        for done in tick.completed {
            self.finish_bus_volume_fade(done);
        }

        let tick = self.fades.group_pitch.advance(now, false);
        for (id, value) in tick.values {
            if let Some(g) = group_slot_mut(&mut self.groups, id) {
                g.settings.pitch = value;
            }
        }
        for mut done in tick.completed {
            if let Some(g) = group_slot_mut(&mut self.groups, done.target) {
                g.settings.pitch = done.value;
            }
            self.notifications
                .push(EngineNotification::FadeCompleted(FadeTarget::GroupPitch(done.target)));
            done.notify();
        }

        let tick = self.fades.bus_pitch.advance(now, false);
        for (id, value) in tick.values {
            if let Some(b) = self.bus_mut(id) {
                b.pitch = value;
            }
        }
        for mut done in tick.completed {
            if let Some(b) = self.bus_mut(done.target) {
                b.pitch = done.value;
            }
            self.notifications
                .push(EngineNotification::FadeCompleted(FadeTarget::BusPitch(done.target)));
            done.notify();
        }

        let tick = self.fades.occlusion.advance(now, false);
        for (id, value) in tick.values {
            self.apply_occlusion(id, value);
        }
        for mut done in tick.completed {
            self.apply_occlusion(done.target, done.value);
            self.notifications
                .push(EngineNotification::FadeCompleted(FadeTarget::Occlusion(done.target)));
            done.notify();
        }
    }

    pub(crate) fn finish_group_volume_fade(&mut self, mut done: FadeCompletion<GroupId>) {
        let id = done.target;
        if let Some(g) = group_slot_mut(&mut self.groups, id) {
            g.settings.volume = done.value;
            if let Some(restore) = done.restore_to {
                g.settings.volume = restore;
            }
        }
        if done.stop {
            self.stop_voices_where(|v| v.group == id);
        }
        self.notifications
            .push(EngineNotification::FadeCompleted(FadeTarget::GroupVolume(id)));
        done.notify();
    }

    pub(crate) fn finish_bus_volume_fade(&mut self, mut done: FadeCompletion<BusId>) {
        let id = done.target;
        if let Some(b) = self.bus_mut(id) {
            b.volume = done.value;
            if let Some(restore) = done.restore_to {
                b.volume = restore;
            }
        }
        if done.stop {
            self.stop_voices_where(|v| v.bus == Some(id));
        }
        self.notifications
            .push(EngineNotification::FadeCompleted(FadeTarget::BusVolume(id)));
        done.notify();
    }

    fn apply_occlusion(&mut self, playing_id: PlayingId, cutoff_hz: f32) {
        if let Some(v) = self.voices.iter_mut().find(|v| v.playing_id == playing_id) {
            v.occlusion_cutoff_hz = cutoff_hz;
            self.backend.set_occlusion_cutoff(v.voice, cutoff_hz);
        }
    }

    // ─── Mixing ────────────────────────────────────────────────────────────────

    pub(crate) fn solo_state(&self) -> SoloState {
        SoloState {
            groups: self.groups.iter().flatten().any(|g| g.soloed),
            buses: self.buses.iter().flatten().any(|b| b.soloed),
        }
    }

    /// Effective (volume, pitch) of a voice
    pub(crate) fn mix_for(&self, voice: &ActiveVoice, solo: SoloState) -> (f32, f32) {
        let Some(group) = self.group(voice.group) else {
            return (0.0, voice.pitch);
        };
        let mut volume = voice.volume * group.settings.volume;
        let mut pitch = voice.pitch * group.settings.pitch;
        if group.muted || (solo.groups && !group.soloed) {
            volume = 0.0;
        }

        match voice.bus.and_then(|b| self.bus(b)) {
            Some(bus) => {
                volume *= bus.volume * self.ducks.level(bus.id);
                pitch *= bus.pitch;
                if bus.muted || (solo.buses && !bus.soloed) {
                    volume = 0.0;
                }
            }
            None if solo.buses => volume = 0.0,
            None => {}
        }
        (volume, pitch)
    }

    /// Push current volume and pitch of every voice to the backend
    pub(crate) fn push_mix(&mut self) {
        let solo = self.solo_state();
        let mixes: Vec<_> = self
            .voices
            .iter()
            .map(|v| (v.voice, self.mix_for(v, solo)))
            .collect();
        for (voice, (volume, pitch)) in mixes {
            self.backend.set_volume(voice, volume);
            self.backend.set_pitch(voice, pitch);
        }
    }

    // ─── Queries ───────────────────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Drain pending notifications
    pub fn take_notifications(&mut self) -> Vec<EngineNotification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn group_id(&self, name: &str) -> Option<GroupId> {
        self.group_names.get(&name_key(name)).copied()
    }

    pub fn bus_id(&self, name: &str) -> Option<BusId> {
        self.bus_names.get(&name_key(name)).copied()
    }

    pub fn group(&self, id: GroupId) -> Option<&SoundGroup> {
        self.groups.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn bus(&self, id: BusId) -> Option<&Bus> {
        self.buses.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub(crate) fn bus_mut(&mut self, id: BusId) -> Option<&mut Bus> {
        self.buses.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Rotation state of a group
    pub fn pool(&self, id: GroupId) -> Option<&VariationPool> {
        self.group(id).map(SoundGroup::pool)
    }

    /// Voices currently tracked
    pub fn voices(&self) -> &[ActiveVoice] {
        &self.voices
    }

    pub fn voice(&self, playing_id: PlayingId) -> Option<&ActiveVoice> {
        self.voices.iter().find(|v| v.playing_id == playing_id)
    }

    /// Whether the voice started for `playing_id` is still sounding
    pub fn is_playing(&self, playing_id: PlayingId) -> bool {
        self.voice(playing_id)
            .is_some_and(|v| v.paused || self.backend.is_playing(v.voice))
    }

    /// Voices of a group that are still sounding
    pub fn active_voice_count(&self, group: GroupId) -> usize {
        self.live_voice_count(|v| v.group == group)
    }

    /// Voices routed through a bus that are still sounding
    pub fn bus_voice_count(&self, bus: BusId) -> usize {
        self.live_voice_count(|v| v.bus == Some(bus))
    }

    pub(crate) fn live_voice_count(&self, pred: impl Fn(&ActiveVoice) -> bool) -> usize {
        self.voices
            .iter()
            .filter(|v| pred(v) && (v.paused || self.backend.is_playing(v.voice)))
            .count()
    }

    pub fn group_volume(&self, name: &str) -> Option<f32> {
        self.group_id(name)
            .and_then(|id| self.group(id))
            .map(|g| g.settings.volume)
    }

    pub fn group_pitch(&self, name: &str) -> Option<f32> {
        self.group_id(name)
            .and_then(|id| self.group(id))
            .map(|g| g.settings.pitch)
    }

    pub fn bus_volume(&self, name: &str) -> Option<f32> {
        self.bus_id(name).and_then(|id| self.bus(id)).map(|b| b.volume)
    }

    pub fn bus_pitch(&self, name: &str) -> Option<f32> {
        self.bus_id(name).and_then(|id| self.bus(id)).map(|b| b.pitch)
    }

    /// Combined duck multiplier currently applied to a bus
    pub fn bus_duck_level(&self, name: &str) -> Option<f32> {
        self.bus_id(name).map(|id| self.ducks.level(id))
    }

    /// Plays waiting for a later tick (delayed and chained)
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }
}
