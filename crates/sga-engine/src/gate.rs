//! Per-group admission: replay limits, polyphony and dialog interruption

use sga_core::Clock;

use crate::group::{PlaybackMode, ReplayLimit, SoundGroup};
use crate::selection::SlotProbe;
use crate::trial::DenyReason;

/// Result of the replay and polyphony checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny(DenyReason),
    /// Stop this busy slot and replay it, bypassing selection
    Retrigger(usize),
}

/// Result of the dialog check for one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogDecision {
    /// Candidate may play once these busy slots are stopped
    Proceed { interrupt: Vec<usize> },
    Blocked,
}

/// Run the replay limit, then the polyphony check. Normal mode only.
pub fn check_gate<P: SlotProbe + ?Sized>(
    group: &SoundGroup,
    active_voices: usize,
    requested: Option<&str>,
    probe: &P,
    clock: Clock,
) -> GateDecision {
    if group.settings.playback_mode != PlaybackMode::Normal {
        return GateDecision::Allow;
    }
    if !replay_allowed(group, clock) {
        return GateDecision::Deny(DenyReason::ReplayLimited);
    }
    check_polyphony(group, active_voices, requested, probe)
}

/// Whether enough time or frames passed since the group last played
pub fn replay_allowed(group: &SoundGroup, clock: Clock) -> bool {
    match group.settings.replay_limit {
        ReplayLimit::None => true,
        ReplayLimit::TimeBased(min_secs) => group
            .last_time_played
            .is_none_or(|last| clock.now - last >= min_secs),
        ReplayLimit::FrameBased(min_frames) => group
            .last_frame_played
            .is_none_or(|last| clock.frames_since(last) >= min_frames),
    }
}

/// Voice ceiling with retrigger fallback
pub fn check_polyphony<P: SlotProbe + ?Sized>(
    group: &SoundGroup,
    active_voices: usize,
    requested: Option<&str>,
    probe: &P,
) -> GateDecision {
    let polyphony = group.settings.polyphony;
    if !polyphony.enabled || active_voices < polyphony.max_voices as usize {
        return GateDecision::Allow;
    }

    let retrigger = group.settings.retrigger_percentage;
    group
        .slots()
        .iter()
        .enumerate()
        .filter(|(_, slot)| requested.is_none_or(|name| slot.matches(name)))
        .map(|(index, _)| index)
        .find(|&index| probe.is_busy(index) && probe.played_percentage(index) >= retrigger)
        .map_or(
            GateDecision::Deny(DenyReason::PolyphonyExceeded),
            GateDecision::Retrigger,
        )
}

/// Dialog mode: may `candidate` interrupt what the group is playing?
pub fn check_dialog<P: SlotProbe + ?Sized>(
    group: &SoundGroup,
    candidate: usize,
    probe: &P,
) -> DialogDecision {
    let Some(wanted) = group.slot(candidate) else {
        return DialogDecision::Blocked;
    };

    let mut interrupt = Vec::new();
    for (index, slot) in group.slots().iter().enumerate() {
        if index == candidate || !probe.is_busy(index) {
            continue;
        }
        if slot.uninterruptible || slot.importance > wanted.importance {
            return DialogDecision::Blocked;
        }
        interrupt.push(index);
    }
    DialogDecision::Proceed { interrupt }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{GroupDefinition, VariationDefinition};
    use crate::selection::tests::{FakeProbe, build};
    use std::collections::HashMap;

    fn hits(retrigger: f32) -> SoundGroup {
        build(
            GroupDefinition::new("Hits")
                .with_polyphony(2)
                .with_retrigger_percentage(retrigger)
                .with_variation(VariationDefinition::new("light", "l"))
                .with_variation(VariationDefinition::new("heavy", "h"))
                .with_variation(VariationDefinition::new("heavy", "h2")),
        )
    }

    #[test]
    fn test_time_replay_limit() {
        let mut group = hits(50.0);
        group.settings.replay_limit = ReplayLimit::TimeBased(1.0);
        assert!(replay_allowed(&group, Clock::new(0.0, 0)));
        group.last_time_played = Some(0.0);
        assert!(!replay_allowed(&group, Clock::new(0.5, 30)));
        assert!(replay_allowed(&group, Clock::new(1.1, 66)));
    }

    #[test]
    fn test_frame_replay_limit() {
        let mut group = hits(50.0);
        group.settings.replay_limit = ReplayLimit::FrameBased(10);
        group.last_frame_played = Some(100);
        assert!(!replay_allowed(&group, Clock::new(0.0, 109)));
        assert!(replay_allowed(&group, Clock::new(0.0, 110)));
    }

    #[test]
    fn test_polyphony_below_limit_allows() {
        let group = hits(50.0);
        let probe = FakeProbe(HashMap::from([(0, 10.0)]));
        assert_eq!(
            check_polyphony(&group, 1, None, &probe),
            GateDecision::Allow
        );
    }

    #[test]
    fn test_polyphony_at_limit_retriggers_or_denies() {
        let group = hits(50.0);
        let young = FakeProbe(HashMap::from([(0, 10.0), (1, 20.0)]));
        assert_eq!(
            check_polyphony(&group, 2, None, &young),
            GateDecision::Deny(DenyReason::PolyphonyExceeded)
        );

        let old = FakeProbe(HashMap::from([(0, 80.0), (2, 90.0)]));
        assert_eq!(
            check_polyphony(&group, 2, None, &old),
            GateDecision::Retrigger(0)
        );
        assert_eq!(
            check_polyphony(&group, 2, Some("heavy"), &old),
            GateDecision::Retrigger(2)
        );
    }

    #[test]
    fn test_gate_skips_non_normal_modes() {
        let mut group = hits(50.0);
        group.settings.playback_mode = PlaybackMode::Dialog;
        group.settings.replay_limit = ReplayLimit::TimeBased(10.0);
        group.last_time_played = Some(0.0);
        let probe = FakeProbe(HashMap::from([(0, 1.0), (1, 1.0)]));
        assert_eq!(
            check_gate(&group, 2, None, &probe, Clock::new(0.1, 6)),
            GateDecision::Allow
        );
    }

    #[test]
    fn test_dialog_importance() {
        let group = build(
            GroupDefinition::new("Dialog")
                .with_playback_mode(PlaybackMode::Dialog)
                .with_variation(VariationDefinition::new("idle", "i").with_importance(1.0))
                .with_variation(VariationDefinition::new("alert", "a").with_importance(5.0))
                .with_variation(
                    VariationDefinition::new("death", "d")
                        .with_importance(0.0)
                        .with_uninterruptible(true),
                ),
        );

        let alert_playing = FakeProbe(HashMap::from([(1, 30.0)]));
        assert_eq!(check_dialog(&group, 0, &alert_playing), DialogDecision::Blocked);

        let idle_playing = FakeProbe(HashMap::from([(0, 30.0)]));
        assert_eq!(
            check_dialog(&group, 1, &idle_playing),
            DialogDecision::Proceed { interrupt: vec![0] }
        );

        let death_playing = FakeProbe(HashMap::from([(2, 30.0)]));
        assert_eq!(check_dialog(&group, 1, &death_playing), DialogDecision::Blocked);

        assert_eq!(
            check_dialog(&group, 1, &FakeProbe::default()),
            DialogDecision::Proceed { interrupt: vec![] }
        );
    }
}
