//! Runtime control: transport, fades, mixing and scene edits
//!
//! Every call validates before it mutates. Unknown names and bad values come
//! back as errors and leave the engine untouched.

use log::info;

use sga_core::{
    ArbiterError, ArbiterResult, BusId, GroupId, PlayingId, VoiceRef, validate_duration,
    validate_pitch, validate_volume,
};

use crate::backend::{StopMode, VoiceBackend};
use crate::bus::{Bus, BusDefinition};
use crate::duck::{DuckActor, DuckRule, DuckRuleDefinition};
use crate::engine::{Engine, EngineNotification, FadeTarget, group_slot_mut, name_key};
use crate::fade::{FadeCallback, FadeCompletion, FadeOptions};
use crate::group::{GroupDefinition, GroupSettings, SoundGroup, VariationDefinition};
use crate::voice::ActiveVoice;

impl<B: VoiceBackend> Engine<B> {
    // ═══════════════════════════════════════════════════════════════════════════
    // LOOKUP
    // ═══════════════════════════════════════════════════════════════════════════

    fn require_group(&self, name: &str) -> ArbiterResult<GroupId> {
        self.ensure_initialized()?;
        self.group_id(name).ok_or_else(|| {
            log::error!("Unknown sound group '{name}'");
            ArbiterError::UnknownGroup(name.to_string())
        })
    }

    fn require_bus(&self, name: &str) -> ArbiterResult<BusId> {
        self.ensure_initialized()?;
        self.bus_id(name).ok_or_else(|| {
            log::error!("Unknown bus '{name}'");
            ArbiterError::UnknownBus(name.to_string())
        })
    }

    fn require_voice(&self, playing_id: PlayingId) -> ArbiterResult<&ActiveVoice> {
        self.ensure_initialized()?;
        self.voice(playing_id)
            .ok_or(ArbiterError::UnknownPlayingId(playing_id))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STOP
    // ═══════════════════════════════════════════════════════════════════════════

    /// Stop one tracked voice. Returns whether it was found.
    pub(crate) fn stop_playing(&mut self, playing_id: PlayingId, mode: StopMode) -> bool {
        let Some(index) = self.voices.iter().position(|v| v.playing_id == playing_id) else {
            return false;
        };
        match mode {
            StopMode::Fade(secs) if secs > 0.0 => {
                let voice = &mut self.voices[index];
                if !voice.fading_out {
                    voice.fading_out = true;
                    self.backend.stop(voice.voice, mode);
                }
            }
            _ => {
                let voice = self.voices.remove(index);
                self.backend.stop(voice.voice, StopMode::Immediate);
                self.retire_voice(&voice);
            }
        }
        true
    }

    /// Stop whatever is playing on a slot, tracked or not
    pub(crate) fn stop_voice_ref(&mut self, voice: VoiceRef, mode: StopMode) {
        let tracked = self
            .voices
            .iter()
            .find(|v| v.voice == voice)
            .map(|v| v.playing_id);
        match tracked {
            Some(id) => {
                self.stop_playing(id, mode);
            }
            None if self.backend.is_playing(voice) => self.backend.stop(voice, mode),
            None => {}
        }
    }

    /// Stop every tracked voice matching `pred` at once
    pub(crate) fn stop_voices_where(&mut self, pred: impl Fn(&ActiveVoice) -> bool) -> usize {
        let ids: Vec<PlayingId> = self
            .voices
            .iter()
            .filter(|v| pred(v))
            .map(|v| v.playing_id)
            .collect();
        for &id in &ids {
            self.stop_playing(id, StopMode::Immediate);
        }
        ids.len()
    }

    /// Bookkeeping for a voice leaving the tracked set. A running looped
    /// chain moves on however its voice ended.
    pub(crate) fn retire_voice(&mut self, voice: &ActiveVoice) {
        self.ducks
            .release(DuckActor::Voice(voice.playing_id), self.clock.now);
        self.fades.occlusion.cancel(voice.playing_id);
        self.notifications.push(EngineNotification::VoiceFinished {
            group: voice.group,
            playing_id: voice.playing_id,
        });
        let chained = self
            .group(voice.group)
            .is_some_and(|g| g.is_looped_chain() && g.chain.active);
        if chained {
            self.advance_chain(voice.group);
        }
    }

    fn stop_chain(&mut self, id: GroupId) {
        if let Some(group) = group_slot_mut(&mut self.groups, id) {
            group.chain = Default::default();
        }
        self.scheduled.retain(|s| s.group != id);
    }

    /// Stop a voice, or cancel a scheduled play, by id
    pub fn stop_playing_id(&mut self, playing_id: PlayingId) -> ArbiterResult<()> {
        self.ensure_initialized()?;
        let scheduled = self.scheduled.len();
        self.scheduled.retain(|s| s.playing_id != playing_id);
        let cancelled = self.scheduled.len() != scheduled;
        if self.stop_playing(playing_id, StopMode::Immediate) || cancelled {
            Ok(())
        } else {
            Err(ArbiterError::UnknownPlayingId(playing_id))
        }
    }

    /// Fade a voice out, then stop it
    pub fn fade_out_playing_id(&mut self, playing_id: PlayingId, secs: f32) -> ArbiterResult<()> {
        validate_duration("fade_out", secs)?;
        self.require_voice(playing_id)?;
        self.stop_playing(playing_id, StopMode::Fade(secs));
        Ok(())
    }

    /// Stop every voice of a group and end its chain
    pub fn stop_group(&mut self, name: &str) -> ArbiterResult<usize> {
        let id = self.require_group(name)?;
        self.stop_chain(id);
        Ok(self.stop_voices_where(|v| v.group == id))
    }

    /// Stop every voice routed through a bus
    pub fn stop_bus(&mut self, name: &str) -> ArbiterResult<usize> {
        let id = self.require_bus(name)?;
        Ok(self.stop_voices_where(|v| v.bus == Some(id)))
    }

    /// Stop everything, including scheduled plays and chains
    pub fn stop_all(&mut self) -> usize {
        self.scheduled.clear();
        for group in self.groups.iter_mut().flatten() {
            group.chain = Default::default();
        }
        self.stop_voices_where(|_| true)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PAUSE
    // ═══════════════════════════════════════════════════════════════════════════

    fn set_paused_where(&mut self, paused: bool, pred: impl Fn(&ActiveVoice) -> bool) -> usize {
        let mut changed = 0;
        for voice in self.voices.iter_mut().filter(|v| pred(v) && v.paused != paused) {
            voice.paused = paused;
            if paused {
                self.backend.pause(voice.voice);
            } else {
                self.backend.unpause(voice.voice);
            }
            changed += 1;
        }
        changed
    }

    pub fn pause_playing_id(&mut self, playing_id: PlayingId) -> ArbiterResult<()> {
        self.require_voice(playing_id)?;
        self.set_paused_where(true, |v| v.playing_id == playing_id);
        Ok(())
    }

    pub fn unpause_playing_id(&mut self, playing_id: PlayingId) -> ArbiterResult<()> {
        self.require_voice(playing_id)?;
        self.set_paused_where(false, |v| v.playing_id == playing_id);
        Ok(())
    }

    pub fn pause_group(&mut self, name: &str) -> ArbiterResult<usize> {
        let id = self.require_group(name)?;
        Ok(self.set_paused_where(true, |v| v.group == id))
    }

    pub fn unpause_group(&mut self, name: &str) -> ArbiterResult<usize> {
        let id = self.require_group(name)?;
        Ok(self.set_paused_where(false, |v| v.group == id))
    }

    pub fn pause_bus(&mut self, name: &str) -> ArbiterResult<usize> {
        let id = self.require_bus(name)?;
        Ok(self.set_paused_where(true, |v| v.bus == Some(id)))
    }

    pub fn unpause_bus(&mut self, name: &str) -> ArbiterResult<usize> {
        let id = self.require_bus(name)?;
        Ok(self.set_paused_where(false, |v| v.bus == Some(id)))
    }

    pub fn pause_all(&mut self) -> usize {
        self.set_paused_where(true, |_| true)
    }

    pub fn unpause_all(&mut self) -> usize {
        self.set_paused_where(false, |_| true)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FADES & GLIDES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Fade a group's volume to `target` over `secs`
    pub fn fade_group_to_volume(
        &mut self,
        name: &str,
        target: f32,
        secs: f32,
        options: FadeOptions,
    ) -> ArbiterResult<()> {
        let id = self.require_group(name)?;
        validate_volume(target)?;
        validate_duration("fade", secs)?;
        let from = self.group(id).map_or(1.0, |g| g.settings.volume);

        if secs > 0.0 {
            self.fades
                .group_volume
                .start(id, from, target, self.clock.now, secs, options);
        } else {
            self.fades.group_volume.cancel(id);
            let stop_at_zero = self.config.stop_zero_volume_groups;
            let done = FadeCompletion::immediate(id, from, target, options, stop_at_zero);
            self.finish_group_volume_fade(done);
            self.push_mix();
        }
        Ok(())
    }

    /// Fade a bus's volume to `target` over `secs`
    pub fn fade_bus_to_volume(
        &mut self,
        name: &str,
        target: f32,
        secs: f32,
        options: FadeOptions,
    ) -> ArbiterResult<()> {
        let id = self.require_bus(name)?;
        validate_volume(target)?;
        validate_duration("fade", secs)?;
        let from = self.bus(id).map_or(1.0, |b| b.volume);

        if secs > 0.0 {
            self.fades
                .bus_volume
                .start(id, from, target, self.clock.now, secs, options);
        } else {
            self.fades.bus_volume.cancel(id);
            let stop_at_zero = self.config.stop_zero_volume_buses;
            let done = FadeCompletion::immediate(id, from, target, options, stop_at_zero);
            self.finish_bus_volume_fade(done);
            self.push_mix();
        }
        Ok(())
    }

    /// Glide a group's pitch by `delta` over `secs`
    pub fn glide_group_pitch(
        &mut self,
        name: &str,
        delta: f32,
        secs: f32,
        on_complete: Option<FadeCallback>,
    ) -> ArbiterResult<()> {
        let id = self.require_group(name)?;
        validate_duration("glide", secs)?;
        let from = self.group(id).map_or(1.0, |g| g.settings.pitch);
        let target = validate_pitch(from + delta)?;
        let options = FadeOptions {
            on_complete,
            ..FadeOptions::default()
        };

        if secs > 0.0 {
            self.fades
                .group_pitch
                .start(id, from, target, self.clock.now, secs, options);
        } else {
            self.fades.group_pitch.cancel(id);
            if let Some(group) = group_slot_mut(&mut self.groups, id) {
                group.settings.pitch = target;
            }
            self.notifications
                .push(EngineNotification::FadeCompleted(FadeTarget::GroupPitch(id)));
            FadeCompletion::immediate(id, from, target, options, false).notify();
            self.push_mix();
        }
        Ok(())
    }

    /// Glide a bus's pitch by `delta` over `secs`
    pub fn glide_bus_pitch(
        &mut self,
        name: &str,
        delta: f32,
        secs: f32,
        on_complete: Option<FadeCallback>,
    ) -> ArbiterResult<()> {
        let id = self.require_bus(name)?;
        validate_duration("glide", secs)?;
        let from = self.bus(id).map_or(1.0, |b| b.pitch);
        let target = validate_pitch(from + delta)?;
        let options = FadeOptions {
            on_complete,
            ..FadeOptions::default()
        };

        if secs > 0.0 {
            self.fades
                .bus_pitch
                .start(id, from, target, self.clock.now, secs, options);
        } else {
            self.fades.bus_pitch.cancel(id);
            if let Some(bus) = self.bus_mut(id) {
                bus.pitch = target;
            }
            self.notifications
                .push(EngineNotification::FadeCompleted(FadeTarget::BusPitch(id)));
            FadeCompletion::immediate(id, from, target, options, false).notify();
            self.push_mix();
        }
        Ok(())
    }

    /// Move a voice's occlusion low-pass cutoff to `cutoff_hz` over `secs`
    pub fn fade_occlusion(
        &mut self,
        playing_id: PlayingId,
        cutoff_hz: f32,
        secs: f32,
    ) -> ArbiterResult<()> {
        let voice = *self.require_voice(playing_id)?;
        validate_duration("occlusion", secs)?;
        if cutoff_hz.is_nan() || cutoff_hz <= 0.0 {
            return Err(ArbiterError::InvalidParameter(format!(
                "occlusion cutoff must be positive, got {cutoff_hz}"
            )));
        }

        if secs > 0.0 {
            self.fades.occlusion.start(
                playing_id,
                voice.occlusion_cutoff_hz,
                cutoff_hz,
                self.clock.now,
                secs,
                FadeOptions::default(),
            );
        } else {
            self.fades.occlusion.cancel(playing_id);
            if let Some(v) = self.voices.iter_mut().find(|v| v.playing_id == playing_id) {
                v.occlusion_cutoff_hz = cutoff_hz;
            }
            self.backend.set_occlusion_cutoff(voice.voice, cutoff_hz);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MIXING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Set a group's volume at once, cancelling any fade on it
    pub fn set_group_volume(&mut self, name: &str, volume: f32) -> ArbiterResult<()> {
        let id = self.require_group(name)?;
        validate_volume(volume)?;
        self.fades.group_volume.cancel(id);
        if let Some(group) = group_slot_mut(&mut self.groups, id) {
            group.settings.volume = volume;
        }
        self.push_mix();
        Ok(())
    }

    /// Set a bus's volume at once, cancelling any fade on it
    pub fn set_bus_volume(&mut self, name: &str, volume: f32) -> ArbiterResult<()> {
        let id = self.require_bus(name)?;
        validate_volume(volume)?;
        self.fades.bus_volume.cancel(id);
        if let Some(bus) = self.bus_mut(id) {
            bus.volume = volume;
        }
        self.push_mix();
        Ok(())
    }

    pub fn set_group_pitch(&mut self, name: &str, pitch: f32) -> ArbiterResult<()> {
        let id = self.require_group(name)?;
        validate_pitch(pitch)?;
        self.fades.group_pitch.cancel(id);
        if let Some(group) = group_slot_mut(&mut self.groups, id) {
            group.settings.pitch = pitch;
        }
        self.push_mix();
        Ok(())
    }

    pub fn set_bus_pitch(&mut self, name: &str, pitch: f32) -> ArbiterResult<()> {
        let id = self.require_bus(name)?;
        validate_pitch(pitch)?;
        self.fades.bus_pitch.cancel(id);
        if let Some(bus) = self.bus_mut(id) {
            bus.pitch = pitch;
        }
        self.push_mix();
        Ok(())
    }

    pub fn mute_group(&mut self, name: &str, muted: bool) -> ArbiterResult<()> {
        let id = self.require_group(name)?;
        if let Some(group) = group_slot_mut(&mut self.groups, id) {
            group.muted = muted;
        }
        self.push_mix();
        Ok(())
    }

    pub fn solo_group(&mut self, name: &str, soloed: bool) -> ArbiterResult<()> {
        let id = self.require_group(name)?;
        if let Some(group) = group_slot_mut(&mut self.groups, id) {
            group.soloed = soloed;
        }
        self.push_mix();
        Ok(())
    }

    pub fn mute_bus(&mut self, name: &str, muted: bool) -> ArbiterResult<()> {
        let id = self.require_bus(name)?;
        if let Some(bus) = self.bus_mut(id) {
            bus.muted = muted;
        }
        self.push_mix();
        Ok(())
    }

    pub fn solo_bus(&mut self, name: &str, soloed: bool) -> ArbiterResult<()> {
        let id = self.require_bus(name)?;
        if let Some(bus) = self.bus_mut(id) {
            bus.soloed = soloed;
        }
        self.push_mix();
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DUCKING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Duck a bus on behalf of a caller token. Cancels any volume fade on the bus.
    pub fn duck_bus(
        &mut self,
        name: &str,
        token: u64,
        level: f32,
        attack_secs: f32,
        release_secs: f32,
    ) -> ArbiterResult<()> {
        let id = self.require_bus(name)?;
        validate_volume(level)?;
        validate_duration("attack_secs", attack_secs)?;
        validate_duration("release_secs", release_secs)?;
        self.fades.bus_volume.cancel(id);
        self.ducks.start(
            id,
            DuckActor::Token(token),
            level,
            attack_secs,
            release_secs,
            None,
            self.clock.now,
        );
        self.push_mix();
        Ok(())
    }

    /// Start releasing the duck a token holds on a bus
    pub fn unduck_bus(&mut self, name: &str, token: u64) -> ArbiterResult<bool> {
        let id = self.require_bus(name)?;
        Ok(self
            .ducks
            .release_on_bus(id, DuckActor::Token(token), self.clock.now))
    }

    pub fn add_duck_rule(&mut self, rule: &DuckRuleDefinition) -> ArbiterResult<()> {
        self.ensure_initialized()?;
        rule.validate()?;
        self.insert_duck_rule(rule)
    }

    pub(crate) fn insert_duck_rule(&mut self, rule: &DuckRuleDefinition) -> ArbiterResult<()> {
        let trigger = self
            .group_id(&rule.trigger_group)
            .ok_or_else(|| ArbiterError::UnknownGroup(rule.trigger_group.clone()))?;
        let bus = self
            .bus_id(&rule.target_bus)
            .ok_or_else(|| ArbiterError::UnknownBus(rule.target_bus.clone()))?;
        self.duck_rules.push(DuckRule {
            trigger,
            bus,
            level: rule.duck_level,
            attack_secs: rule.attack_secs,
            release_secs: rule.release_secs,
            rise_start_percentage: rule.rise_start_percentage,
        });
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SCENE EDITS
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) fn insert_bus(&mut self, def: &BusDefinition) -> BusId {
        let id = BusId(self.buses.len() as u32);
        self.buses.push(Some(Bus::new(id, def)));
        self.bus_names.insert(name_key(&def.name), id);
        id
    }

    pub(crate) fn insert_group(&mut self, def: &GroupDefinition) -> ArbiterResult<GroupId> {
        let bus = match &def.bus {
            Some(name) => Some(
                self.bus_id(name)
                    .ok_or_else(|| ArbiterError::UnknownBus(name.clone()))?,
            ),
            None => None,
        };
        let id = GroupId(self.groups.len() as u32);
        let group = SoundGroup::new(
            id,
            def.name.clone(),
            bus,
            def.settings.clone(),
            &def.variations,
            &mut self.rng,
        );
        self.groups.push(Some(group));
        self.group_names.insert(name_key(&def.name), id);
        Ok(id)
    }

    pub fn create_bus(&mut self, def: &BusDefinition) -> ArbiterResult<BusId> {
        self.ensure_initialized()?;
        def.validate()?;
        if self.bus_id(&def.name).is_some() {
            return Err(ArbiterError::DuplicateBus(def.name.clone()));
        }
        let id = self.insert_bus(def);
        info!("Created bus '{}'", def.name);
        Ok(id)
    }

    /// Delete a bus; its groups fall back to no bus
    pub fn delete_bus(&mut self, name: &str) -> ArbiterResult<()> {
        let id = self.require_bus(name)?;
        for group in self.groups.iter_mut().flatten() {
            if group.bus == Some(id) {
                group.bus = None;
            }
        }
        for voice in self.voices.iter_mut().filter(|v| v.bus == Some(id)) {
            voice.bus = None;
        }
        self.fades.bus_volume.cancel(id);
        self.fades.bus_pitch.cancel(id);
        self.ducks.remove_bus(id);
        self.duck_rules.retain(|r| r.bus != id);
        self.buses[id.0 as usize] = None;
        self.bus_names.remove(&name_key(name));
        self.push_mix();
        info!("Deleted bus '{name}'");
        Ok(())
    }

    pub fn create_group(&mut self, def: &GroupDefinition) -> ArbiterResult<GroupId> {
        self.ensure_initialized()?;
        def.validate()?;
        if self.group_id(&def.name).is_some() {
            return Err(ArbiterError::DuplicateGroup(def.name.clone()));
        }
        let id = self.insert_group(def)?;
        let slots = self.group(id).map_or(0, SoundGroup::slot_count);
        info!("Created sound group '{}' ({slots} slots)", def.name);
        Ok(id)
    }

    /// Delete a group with its voices, fades, chain and duck rules
    pub fn delete_group(&mut self, name: &str) -> ArbiterResult<()> {
        let id = self.require_group(name)?;
        self.stop_chain(id);
        self.stop_voices_where(|v| v.group == id);
        self.fades.group_volume.cancel(id);
        self.fades.group_pitch.cancel(id);
        self.duck_rules.retain(|r| r.trigger != id);
        self.groups[id.0 as usize] = None;
        self.group_names.remove(&name_key(name));
        info!("Deleted sound group '{name}'");
        Ok(())
    }

    /// Route a group through another bus, or none
    pub fn route_group_to_bus(&mut self, group: &str, bus: Option<&str>) -> ArbiterResult<()> {
        let id = self.require_group(group)?;
        let bus = bus.map(|b| self.require_bus(b)).transpose()?;
        if let Some(g) = group_slot_mut(&mut self.groups, id) {
            g.bus = bus;
        }
        for voice in self.voices.iter_mut().filter(|v| v.group == id) {
            voice.bus = bus;
        }
        self.push_mix();
        Ok(())
    }

    /// Replace a group's settings, keeping its rotation state
    pub fn set_group_settings(&mut self, name: &str, settings: GroupSettings) -> ArbiterResult<()> {
        let id = self.require_group(name)?;
        settings.validate()?;
        if let Some(group) = group_slot_mut(&mut self.groups, id) {
            group.apply_settings(settings);
        }
        self.push_mix();
        Ok(())
    }

    /// Append a variation; returns the new slot indices
    pub fn add_variation(
        &mut self,
        group: &str,
        variation: &VariationDefinition,
    ) -> ArbiterResult<Vec<usize>> {
        let id = self.require_group(group)?;
        variation.validate()?;
        Ok(group_slot_mut(&mut self.groups, id)
            .map(|g| g.add_variation(variation))
            .unwrap_or_default())
    }

    /// Remove one slot, stopping it if it plays
    pub fn remove_variation(&mut self, group: &str, index: usize) -> ArbiterResult<()> {
        let id = self.require_group(group)?;
        let voice = self
            .group(id)
            .and_then(|g| g.voice_ref(index))
            .ok_or_else(|| ArbiterError::UnknownSlot {
                group: group.to_string(),
                index,
            })?;
        self.stop_voice_ref(voice, StopMode::Immediate);
        if let Some(g) = group_slot_mut(&mut self.groups, id) {
            g.remove_slot(index, &mut self.rng)?;
        }
        Ok(())
    }
}
