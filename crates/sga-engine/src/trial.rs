//! Playback trial
//!
//! One play request, end to end: group gate, bus arbitration, candidate
//! selection, then a walk over the candidates until one starts.
//!
//! ```text
//!   request ──▶ validate ──▶ replay limit ──▶ polyphony ──▶ bus limit
//!                                   │              │             │
//!                                 Denied     Retrigger(slot)   evictee?
//!                                                  │             │
//!                                                  ▼             ▼
//!                      selection ──▶ candidates: available? clip ready?
//!                                    dialog ok? probability roll? ──▶ start
//!                                           │
//!                              exhausted ──▶ refill once ──▶ Denied
//! ```

use std::collections::VecDeque;

use log::{debug, warn};
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use sga_core::{BusId, GroupId, PlayingId, Position3D, VoiceRef, validate_pitch};

use crate::backend::{StartParams, StopMode, VoiceBackend};
use crate::bus::{self, BusDecision};
use crate::duck::DuckActor;
use crate::engine::{Engine, EngineNotification, group_slot_mut, name_key};
use crate::gate::{self, DialogDecision, GateDecision};
use crate::group::{LinkedGroupMode, PlaybackMode};
use crate::selection::{Selection, SlotProbe, SlotSnapshot, select_candidate};
use crate::voice::ActiveVoice;

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST / RESULT
// ═══════════════════════════════════════════════════════════════════════════════

/// Options of one play request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayRequest {
    /// Play a specific variation (name or alias)
    pub variation: Option<String>,
    /// Route through this bus instead of the group's
    pub bus: Option<String>,
    pub position: Option<Position3D>,
    /// Volume multiplier (0.0 - 1.0)
    pub volume: f32,
    /// Pitch override
    pub pitch: Option<f32>,
    /// Seconds to wait before the trial runs
    pub delay_secs: f32,
}

impl Default for PlayRequest {
    fn default() -> Self {
        Self {
            variation: None,
            bus: None,
            position: None,
            volume: 1.0,
            pitch: None,
            delay_secs: 0.0,
        }
    }
}

impl PlayRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variation(mut self, name: impl Into<String>) -> Self {
        self.variation = Some(name.into());
        self
    }

    pub fn with_bus(mut self, bus: impl Into<String>) -> Self {
        self.bus = Some(bus.into());
        self
    }

    pub fn with_position(mut self, position: Position3D) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = Some(pitch);
        self
    }

    pub fn with_delay(mut self, secs: f32) -> Self {
        self.delay_secs = secs;
        self
    }
}

/// Why a request did not produce a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DenyReason {
    NotInitialized,
    UnknownGroup,
    UnknownBus,
    EmptyGroup,
    InvalidRequest,
    ReplayLimited,
    PolyphonyExceeded,
    BusLimitReached,
    NoEvictableVoice,
    UnknownVariation,
    AllVariationsBusy,
    DialogBlocked,
    ProbabilityMiss,
    NoPlayableVariation,
}

impl DenyReason {
    pub fn name(&self) -> &'static str {
        match self {
            DenyReason::NotInitialized => "not initialized",
            DenyReason::UnknownGroup => "unknown group",
            DenyReason::UnknownBus => "unknown bus",
            DenyReason::EmptyGroup => "group has no variations",
            DenyReason::InvalidRequest => "invalid request",
            DenyReason::ReplayLimited => "replay limited",
            DenyReason::PolyphonyExceeded => "polyphony exceeded",
            DenyReason::BusLimitReached => "bus voice limit reached",
            DenyReason::NoEvictableVoice => "no evictable voice on bus",
            DenyReason::UnknownVariation => "unknown variation",
            DenyReason::AllVariationsBusy => "all variations busy",
            DenyReason::DialogBlocked => "blocked by dialog",
            DenyReason::ProbabilityMiss => "probability roll missed",
            DenyReason::NoPlayableVariation => "no playable variation",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal state of a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Played,
    Scheduled,
    Denied(DenyReason),
}

/// Handle to a played or scheduled request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayingHandle {
    pub playing_id: PlayingId,
    /// Slot that started; `None` while scheduled
    pub voice: Option<VoiceRef>,
}

/// What a play request resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackResult {
    pub outcome: PlaybackOutcome,
    pub handle: Option<PlayingHandle>,
}

impl PlaybackResult {
    pub fn played(playing_id: PlayingId, voice: VoiceRef) -> Self {
        Self {
            outcome: PlaybackOutcome::Played,
            handle: Some(PlayingHandle {
                playing_id,
                voice: Some(voice),
            }),
        }
    }

    pub fn scheduled(playing_id: PlayingId) -> Self {
        Self {
            outcome: PlaybackOutcome::Scheduled,
            handle: Some(PlayingHandle {
                playing_id,
                voice: None,
            }),
        }
    }

    pub fn denied(reason: DenyReason) -> Self {
        Self {
            outcome: PlaybackOutcome::Denied(reason),
            handle: None,
        }
    }

    #[inline]
    pub fn is_played(&self) -> bool {
        self.outcome == PlaybackOutcome::Played
    }

    #[inline]
    pub fn is_scheduled(&self) -> bool {
        self.outcome == PlaybackOutcome::Scheduled
    }

    #[inline]
    pub fn is_denied(&self) -> bool {
        matches!(self.outcome, PlaybackOutcome::Denied(_))
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self.outcome {
            PlaybackOutcome::Denied(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn playing_id(&self) -> Option<PlayingId> {
        self.handle.map(|h| h.playing_id)
    }

    pub fn voice(&self) -> Option<VoiceRef> {
        self.handle.and_then(|h| h.voice)
    }
}

/// How a trial was triggered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TrialContext {
    /// Id reserved when the request was scheduled
    pub playing_id: Option<PlayingId>,
    /// 0 for a direct request, >0 when propagated from a linked group
    pub linked_depth: u32,
}

impl TrialContext {
    #[inline]
    fn may_evict(&self) -> bool {
        self.linked_depth == 0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRIAL
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-trial facts gathered before the candidate walk
struct Attempt<'a> {
    group: GroupId,
    bus: Option<BusId>,
    request: &'a PlayRequest,
    snapshot: SlotSnapshot,
    /// Slot forced by the polyphony retrigger rule
    forced: Option<usize>,
    loop_continuation: bool,
    evictee: Option<PlayingId>,
    playing_id: Option<PlayingId>,
}

enum CandidateResult {
    Started(PlayingId, VoiceRef),
    Skipped(Option<DenyReason>),
    Terminal(DenyReason),
}

impl<B: VoiceBackend> Engine<B> {
    /// Run one trial to a terminal state
    pub(crate) fn run_trial(
        &mut self,
        group: GroupId,
        request: &PlayRequest,
        ctx: TrialContext,
    ) -> PlaybackResult {
        if !self.initialized {
            log::error!("Play requested before initialize()");
            return PlaybackResult::denied(DenyReason::NotInitialized);
        }

        let result = match self.attempt(group, request, &ctx) {
            Ok((playing_id, voice)) => {
                self.after_play(group, playing_id, request, &ctx);
                PlaybackResult::played(playing_id, voice)
            }
            Err(reason) => PlaybackResult::denied(reason),
        };

        if let Some(g) = self.group(group) {
            if self.config.verbose_logging || g.settings.log_sound {
                match result.deny_reason() {
                    Some(reason) => debug!("'{}' denied: {reason}", g.name),
                    None => debug!(
                        "'{}' played {:?} at {:.3}s",
                        g.name,
                        result.voice(),
                        self.clock.now
                    ),
                }
            }
        }
        result
    }

    fn attempt(
        &mut self,
        group_id: GroupId,
        request: &PlayRequest,
        ctx: &TrialContext,
    ) -> Result<(PlayingId, VoiceRef), DenyReason> {
        let clock = self.clock;
        let group = self.group(group_id).ok_or(DenyReason::UnknownGroup)?;
        if group.slot_count() == 0 {
            return Err(DenyReason::EmptyGroup);
        }
        if !(0.0..=1.0).contains(&request.volume)
            || request.pitch.is_some_and(|p| validate_pitch(p).is_err())
        {
            return Err(DenyReason::InvalidRequest);
        }
        let bus = match &request.bus {
            Some(name) => Some(self.bus_id(name).ok_or(DenyReason::UnknownBus)?),
            None => group.bus,
        };
        let importance = group.settings.importance;
        let requested = request.variation.as_deref();

        let snapshot = SlotSnapshot::capture(group, &self.backend);
        let active = self.active_voice_count(group_id);
        let forced = match gate::check_gate(group, active, requested, &snapshot, clock) {
            GateDecision::Allow => None,
            GateDecision::Deny(reason) => return Err(reason),
            GateDecision::Retrigger(slot) => Some(slot),
        };

        let evictee = match bus {
            Some(bus) => self.arbitrate_bus(bus, importance, ctx.may_evict())?,
            None => None,
        };

        let group = group_slot_mut(&mut self.groups, group_id).ok_or(DenyReason::UnknownGroup)?;
        let selection = match forced {
            Some(slot) => {
                group.pool.begin_attempt();
                Selection::single(slot)
            }
            None => select_candidate(group, requested, &snapshot, &mut self.rng)?,
        };

        let mut attempt = Attempt {
            group: group_id,
            bus,
            request,
            snapshot,
            forced,
            loop_continuation: selection.loop_continuation,
            evictee,
            playing_id: ctx.playing_id,
        };

        let mut candidates: VecDeque<usize> = std::iter::once(selection.primary)
            .chain(selection.fallback)
            .collect();
        let mut refilled = false;
        let mut last_reason = None;
        loop {
            while let Some(slot) = candidates.pop_front() {
                match self.try_candidate(&mut attempt, slot) {
                    CandidateResult::Started(id, voice) => return Ok((id, voice)),
                    CandidateResult::Terminal(reason) => return Err(reason),
                    CandidateResult::Skipped(reason) => last_reason = reason.or(last_reason),
                }
            }

            let may_refill = !refilled
                && requested.is_none()
                && attempt.forced.is_none()
                && !attempt.loop_continuation;
            if !may_refill {
                break;
            }
            refilled = true;
            let Some(group) = group_slot_mut(&mut self.groups, group_id) else {
                break;
            };
            group.pool.refill(&mut self.rng);
            candidates = group.pool.choices().iter().copied().collect();
        }
        Err(last_reason.unwrap_or(DenyReason::NoPlayableVariation))
    }

    /// Check the bus voice limit; returns the voice to evict on success
    fn arbitrate_bus(
        &mut self,
        bus_id: BusId,
        requester_importance: i32,
        may_evict: bool,
    ) -> Result<Option<PlayingId>, DenyReason> {
        let Some(bus) = self.bus(bus_id) else {
            return Ok(None);
        };
        let on_bus = self.bus_voice_count(bus_id);
        match bus::can_play(bus, on_bus) {
            BusDecision::Allow => return Ok(None),
            BusDecision::Deny => return Err(DenyReason::BusLimitReached),
            BusDecision::MustEvict if !may_evict => return Err(DenyReason::BusLimitReached),
            BusDecision::MustEvict => {}
        }

        let limit = bus.voice_limit.unwrap_or(0) as usize;
        let mode = bus.limit_mode;
        let candidates: Vec<_> = self
            .voices
            .iter()
            .filter(|v| v.bus == Some(bus_id) && (v.paused || self.backend.is_playing(v.voice)))
            .map(|v| v.as_bus_voice(self.backend.position(v.voice)))
            .collect();
        let listener = self.backend.listener_position();
        let eviction = bus::choose_evictee(mode, &candidates, requester_importance, listener);

        for &playing_id in &eviction.stop_now {
            self.stop_playing(playing_id, StopMode::Immediate);
        }
        match eviction.evictee {
            Some(id) => Ok(Some(id)),
            None if !eviction.stop_now.is_empty() && on_bus - eviction.stop_now.len() < limit => {
                Ok(None)
            }
            None => Err(DenyReason::NoEvictableVoice),
        }
    }

    fn try_candidate(&mut self, attempt: &mut Attempt<'_>, slot: usize) -> CandidateResult {
        let Some(group) = group_slot_mut(&mut self.groups, attempt.group) else {
            return CandidateResult::Terminal(DenyReason::UnknownGroup);
        };
        group.pool.mark_tried(slot);
        let (Some(voice), Some(variation)) = (group.voice_ref(slot), group.slot(slot)) else {
            return CandidateResult::Skipped(None);
        };

        let retrigger = group.settings.retrigger_percentage;
        let busy = attempt.snapshot.is_busy(slot);
        if busy && attempt.forced != Some(slot) && !attempt.snapshot.is_available(slot, retrigger) {
            return CandidateResult::Skipped(Some(DenyReason::AllVariationsBusy));
        }

        let Some(clip) = variation.clip.clone() else {
            return CandidateResult::Skipped(None);
        };
        if !self.backend.is_ready(voice, &clip) && !self.backend.resolve(voice, &clip) {
            debug!("Clip '{clip}' for {voice} is not loaded");
            return CandidateResult::Skipped(None);
        }

        // Re-borrow after the backend calls
        let Some(group) = self.group(attempt.group) else {
            return CandidateResult::Terminal(DenyReason::UnknownGroup);
        };
        let interrupt = if group.settings.playback_mode == PlaybackMode::Dialog {
            match gate::check_dialog(group, slot, &attempt.snapshot) {
                DialogDecision::Blocked => {
                    return CandidateResult::Skipped(Some(DenyReason::DialogBlocked));
                }
                DialogDecision::Proceed { interrupt } => interrupt,
            }
        } else {
            Vec::new()
        };

        let probability = group.slot(slot).map_or(100, |s| s.probability);
        if probability < 100 && self.rng.random_range(0..100u8) >= probability {
            self.consume_slot(attempt.group, slot, attempt.loop_continuation);
            let chained = self.group(attempt.group).is_some_and(|g| g.is_looped_chain());
            if chained {
                self.advance_chain(attempt.group);
            }
            return CandidateResult::Terminal(DenyReason::ProbabilityMiss);
        }

        let playing_id = self.start_candidate(attempt, slot, voice, &clip, busy, &interrupt);
        CandidateResult::Started(playing_id, voice)
    }

    /// Apply deferred stops and start the slot
    fn start_candidate(
        &mut self,
        attempt: &mut Attempt<'_>,
        slot: usize,
        voice: VoiceRef,
        clip: &str,
        busy: bool,
        interrupt: &[usize],
    ) -> PlayingId {
        let now = self.clock.now;

        if let Some(evictee) = attempt.evictee.take() {
            let fade = self.config.eviction_fade_secs;
            let mode = if fade > 0.0 {
                StopMode::Fade(fade)
            } else {
                StopMode::Immediate
            };
            self.stop_playing(evictee, mode);
        }

        if let Some(group) = self.group(attempt.group) {
            let mode = if group.settings.use_dialog_fade_out {
                StopMode::Fade(group.settings.dialog_fade_out_secs)
            } else {
                StopMode::Immediate
            };
            let interrupted: Vec<VoiceRef> =
                interrupt.iter().filter_map(|&i| group.voice_ref(i)).collect();
            for other in interrupted {
                self.stop_voice_ref(other, mode);
            }
        }

        if busy {
            self.stop_voice_ref(voice, StopMode::Immediate);
        }

        let playing_id = attempt
            .playing_id
            .take()
            .unwrap_or_else(|| self.ids.next_id());
        let Some(group) = self.groups.get(attempt.group.0 as usize).and_then(Option::as_ref) else {
            return playing_id;
        };
        let Some(variation) = group.slot(slot) else {
            return playing_id;
        };
        let volume = variation.roll_volume(&mut self.rng) * attempt.request.volume;
        let pitch = attempt
            .request
            .pitch
            .unwrap_or_else(|| variation.roll_pitch(&mut self.rng));
        let active = ActiveVoice {
            playing_id,
            voice,
            group: attempt.group,
            bus: attempt.bus,
            started_at: now,
            volume,
            pitch,
            group_importance: group.settings.importance,
            variation_importance: variation.importance,
            uninterruptible: variation.uninterruptible,
            position: attempt.request.position,
            fading_out: false,
            paused: false,
            occlusion_cutoff_hz: self.config.default_occlusion_cutoff_hz,
        };

        let (mix_volume, mix_pitch) = self.mix_for(&active, self.solo_state());
        self.backend.start(
            voice,
            &StartParams {
                playing_id,
                clip,
                volume: mix_volume,
                pitch: mix_pitch,
                position: attempt.request.position,
            },
        );
        self.voices.push(active);

        let frame = self.clock.frame;
        if let Some(group) = group_slot_mut(&mut self.groups, attempt.group) {
            group.last_time_played = Some(now);
            group.last_frame_played = Some(frame);
            if group.is_looped_chain() {
                group.chain.active = true;
            }
        }
        self.consume_slot(attempt.group, slot, attempt.loop_continuation);
        playing_id
    }

    /// Pool bookkeeping for a played (or probability-missed) slot
    fn consume_slot(&mut self, group_id: GroupId, slot: usize, loop_continuation: bool) {
        let Some(group) = group_slot_mut(&mut self.groups, group_id) else {
            return;
        };
        let looped = group.is_looped_chain();
        if loop_continuation {
            group.chain.loops_completed += 1;
        } else if group.pool.consume(slot, &mut self.rng) && looped {
            group.chain.loops_completed += 1;
        }
        if looped {
            group.chain.active = true;
        }
    }

    /// Linked groups, duck rules and the custom event
    fn after_play(
        &mut self,
        group_id: GroupId,
        playing_id: PlayingId,
        request: &PlayRequest,
        ctx: &TrialContext,
    ) {
        let now = self.clock.now;
        let Some(group) = self.groups.get(group_id.0 as usize).and_then(Option::as_ref) else {
            return;
        };
        let event = group.settings.sound_played_event.clone();
        let mode = group.settings.linked_mode;

        let linked: Vec<GroupId> = if ctx.linked_depth < self.config.max_linked_depth {
            let known: Vec<GroupId> = group
                .settings
                .linked_groups
                .iter()
                .filter_map(|name| {
                    let id = self.group_names.get(&name_key(name)).copied();
                    if id.is_none() {
                        warn!("'{}' links to unknown group '{name}'", group.name);
                    }
                    id
                })
                .filter(|&id| id != group_id)
                .collect();
            match mode {
                LinkedGroupMode::None => Vec::new(),
                LinkedGroupMode::All => known,
                LinkedGroupMode::OneAtRandom => {
                    known.choose(&mut self.rng).copied().into_iter().collect()
                }
            }
        } else {
            Vec::new()
        };

        for id in linked {
            let nested = PlayRequest {
                position: request.position,
                ..PlayRequest::default()
            };
            let nested_ctx = TrialContext {
                playing_id: None,
                linked_depth: ctx.linked_depth + 1,
            };
            self.run_trial(id, &nested, nested_ctx);
        }

        let rules: Vec<_> = self
            .duck_rules
            .iter()
            .filter(|r| r.trigger == group_id)
            .copied()
            .collect();
        for rule in rules {
            self.fades.bus_volume.cancel(rule.bus);
            self.ducks.start(
                rule.bus,
                DuckActor::Voice(playing_id),
                rule.level,
                rule.attack_secs,
                rule.release_secs,
                Some(rule.rise_start_percentage),
                now,
            );
        }

        if let Some(event) = event {
            self.notifications.push(EngineNotification::SoundPlayed {
                group: group_id,
                event,
                playing_id,
            });
        }
    }
}
