//! Play request arbitration
//!
//! - Replay limits and group polyphony with retriggering
//! - Named variation requests
//! - Bus voice limits and eviction policies
//! - Dialog interruption
//! - Probability rolls and unloaded clips

use sga_engine::{
    BackendCommand, BusDefinition, BusVoiceLimitMode, DenyReason, Engine, EngineConfig,
    GroupDefinition, PlayRequest, PlaybackMode, Position3D, ReplayLimit, SceneDefinition,
    SimulatedBackend, StopMode, VariationDefinition,
};

fn seeded(mut scene: SceneDefinition) -> SceneDefinition {
    scene.config.rng_seed = Some(42);
    scene
}

fn slots(name: &str, count: usize) -> GroupDefinition {
    (0..count).fold(GroupDefinition::new(name), |group, i| {
        group.with_variation(VariationDefinition::new(format!("{name}{i}"), format!("{name}{i}.wav")))
    })
}

fn stops(engine: &Engine<SimulatedBackend>) -> Vec<(sga_engine::VoiceRef, StopMode)> {
    engine
        .backend()
        .commands()
        .iter()
        .filter_map(|c| match c {
            BackendCommand::Stop { voice, mode } => Some((*voice, *mode)),
            _ => None,
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// GROUP GATE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_replay_limit_scenario() {
    let scene = seeded(
        SceneDefinition::new()
            .with_group(slots("Coin", 2).with_replay_limit(ReplayLimit::TimeBased(1.0))),
    );
    let mut engine = Engine::from_scene(SimulatedBackend::new(10.0), &scene).unwrap();

    engine.tick(0.0, 0);
    assert!(engine.request_play("Coin", PlayRequest::new()).is_played());

    engine.tick(0.5, 30);
    assert_eq!(
        engine.request_play("Coin", PlayRequest::new()).deny_reason(),
        Some(DenyReason::ReplayLimited)
    );

    engine.tick(1.1, 66);
    assert!(engine.request_play("Coin", PlayRequest::new()).is_played());
    assert_eq!(engine.backend().start_count(), 2);
}

#[test]
fn test_frame_replay_limit() {
    let scene = seeded(
        SceneDefinition::new()
            .with_group(slots("Coin", 3).with_replay_limit(ReplayLimit::FrameBased(5))),
    );
    let mut engine = Engine::from_scene(SimulatedBackend::new(10.0), &scene).unwrap();

    engine.tick(0.0, 10);
    assert!(engine.request_play("Coin", PlayRequest::new()).is_played());
    engine.tick(0.05, 14);
    assert!(engine.request_play("Coin", PlayRequest::new()).is_denied());
    engine.tick(0.1, 15);
    assert!(engine.request_play("Coin", PlayRequest::new()).is_played());
}

#[test]
fn test_polyphony_ceiling() {
    let scene = seeded(
        SceneDefinition::new().with_group(
            slots("Gun", 4)
                .with_polyphony(2)
                .with_retrigger_percentage(100.0),
        ),
    );
    let mut engine = Engine::from_scene(SimulatedBackend::new(10.0), &scene).unwrap();
    let id = engine.group_id("Gun").unwrap();
    engine.tick(0.0, 0);

    let results: Vec<_> = (0..5)
        .map(|_| engine.request_play("Gun", PlayRequest::new()))
        .collect();
    assert!(results[0].is_played());
    assert!(results[1].is_played());
    for result in &results[2..] {
        assert_eq!(result.deny_reason(), Some(DenyReason::PolyphonyExceeded));
    }
    assert_eq!(engine.active_voice_count(id), 2);
    assert_eq!(engine.backend().playing_voices().len(), 2);
}

#[test]
fn test_polyphony_retriggers_voice_past_threshold() {
    let scene = seeded(
        SceneDefinition::new().with_group(
            slots("Gun", 3)
                .with_polyphony(1)
                .with_retrigger_percentage(50.0),
        ),
    );
    let mut engine = Engine::from_scene(SimulatedBackend::new(1.0), &scene).unwrap();
    engine.tick(0.0, 0);

    let first = engine.request_play("Gun", PlayRequest::new());
    let voice = first.voice().unwrap();

    engine.tick(0.25, 15);
    assert_eq!(
        engine.request_play("Gun", PlayRequest::new()).deny_reason(),
        Some(DenyReason::PolyphonyExceeded)
    );

    engine.tick(0.6, 36);
    let retriggered = engine.request_play("Gun", PlayRequest::new());
    assert!(retriggered.is_played());
    assert_eq!(retriggered.voice(), Some(voice));
    assert!(stops(&engine).contains(&(voice, StopMode::Immediate)));
    assert!(!engine.is_playing(first.playing_id().unwrap()));
}

#[test]
fn test_named_variation_exhaustion() {
    let scene = seeded(
        SceneDefinition::new().with_group(
            GroupDefinition::new("Punch")
                .with_retrigger_percentage(100.0)
                .with_variation(VariationDefinition::new("Hit", "hit_a.wav"))
                .with_variation(VariationDefinition::new("Hit", "hit_b.wav"))
                .with_variation(VariationDefinition::new("Whoosh", "whoosh.wav")),
        ),
    );
    let mut engine = Engine::from_scene(SimulatedBackend::new(5.0), &scene).unwrap();
    engine.tick(0.0, 0);

    let hit = || PlayRequest::new().with_variation("Hit");
    let a = engine.request_play("Punch", hit());
    let b = engine.request_play("Punch", hit());
    let c = engine.request_play("Punch", hit());
    assert!(a.is_played());
    assert!(b.is_played());
    assert_ne!(a.voice(), b.voice());
    assert_eq!(c.deny_reason(), Some(DenyReason::AllVariationsBusy));

    let missing = engine.request_play("Punch", PlayRequest::new().with_variation("Kick"));
    assert_eq!(missing.deny_reason(), Some(DenyReason::UnknownVariation));
    assert!(
        engine
            .request_play("Punch", PlayRequest::new().with_variation("Whoosh"))
            .is_played()
    );
}

#[test]
fn test_alias_matches_named_request() {
    let scene = seeded(
        SceneDefinition::new().with_group(
            GroupDefinition::new("Voice")
                .with_variation(VariationDefinition::new("greeting_01", "g1.wav").with_alias("hello"))
                .with_variation(VariationDefinition::new("farewell_01", "f1.wav")),
        ),
    );
    let mut engine = Engine::from_scene(SimulatedBackend::new(5.0), &scene).unwrap();
    engine.tick(0.0, 0);
    let result = engine.request_play("Voice", PlayRequest::new().with_variation("hello"));
    let voice = result.voice().unwrap();
    assert_eq!(engine.backend().voice_clip(voice), Some("g1.wav"));
}

#[test]
fn test_busy_single_slot_is_denied() {
    let scene = seeded(SceneDefinition::new().with_group(slots("Alarm", 1)));
    let mut engine = Engine::from_scene(SimulatedBackend::new(5.0), &scene).unwrap();
    engine.tick(0.0, 0);
    assert!(engine.request_play("Alarm", PlayRequest::new()).is_played());
    assert_eq!(
        engine.request_play("Alarm", PlayRequest::new()).deny_reason(),
        Some(DenyReason::AllVariationsBusy)
    );
}

#[test]
fn test_invalid_requests_are_denied() {
    let scene = seeded(SceneDefinition::new().with_group(slots("Alarm", 1)));
    let mut engine = Engine::from_scene(SimulatedBackend::new(5.0), &scene).unwrap();
    engine.tick(0.0, 0);

    assert_eq!(
        engine.request_play("Siren", PlayRequest::new()).deny_reason(),
        Some(DenyReason::UnknownGroup)
    );
    assert_eq!(
        engine.request_play("Alarm", PlayRequest::new().with_volume(1.5)).deny_reason(),
        Some(DenyReason::InvalidRequest)
    );
    assert_eq!(
        engine.request_play("Alarm", PlayRequest::new().with_bus("Nowhere")).deny_reason(),
        Some(DenyReason::UnknownBus)
    );
    assert_eq!(engine.backend().start_count(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUS LIMITS
// ═══════════════════════════════════════════════════════════════════════════════

fn limited_bus(mode: BusVoiceLimitMode) -> SceneDefinition {
    seeded(
        SceneDefinition::new()
            .with_bus(BusDefinition::new("SFX").with_voice_limit(2, mode))
            .with_group(slots("Low", 3).with_bus("SFX").with_importance(5))
            .with_group(slots("Lower", 2).with_bus("SFX").with_importance(3))
            .with_group(slots("High", 2).with_bus("SFX").with_importance(9)),
    )
}

#[test]
fn test_bus_do_not_play_new_sound() {
    let mut engine = Engine::from_scene(
        SimulatedBackend::new(10.0),
        &limited_bus(BusVoiceLimitMode::DoNotPlayNewSound),
    )
    .unwrap();
    engine.tick(0.0, 0);
    assert!(engine.request_play("Low", PlayRequest::new()).is_played());
    assert!(engine.request_play("Low", PlayRequest::new()).is_played());
    assert_eq!(
        engine.request_play("High", PlayRequest::new()).deny_reason(),
        Some(DenyReason::BusLimitReached)
    );
    assert_eq!(engine.bus_voice_count(engine.bus_id("SFX").unwrap()), 2);
}

#[test]
fn test_bus_stop_oldest_sound() {
    let mut engine = Engine::from_scene(
        SimulatedBackend::new(10.0),
        &limited_bus(BusVoiceLimitMode::StopOldestSound),
    )
    .unwrap();
    engine.tick(0.0, 0);
    let oldest = engine.request_play("Low", PlayRequest::new());
    engine.tick(0.1, 6);
    engine.request_play("Low", PlayRequest::new());
    engine.tick(0.2, 12);

    let newest = engine.request_play("Low", PlayRequest::new());
    assert!(newest.is_played());
    assert!(stops(&engine).contains(&(oldest.voice().unwrap(), StopMode::Fade(0.1))));
    assert!(engine.voice(oldest.playing_id().unwrap()).unwrap().fading_out);

    engine.tick(0.35, 21);
    assert!(!engine.is_playing(oldest.playing_id().unwrap()));
}

#[test]
fn test_bus_stop_farthest_sound() {
    let mut engine = Engine::from_scene(
        SimulatedBackend::new(10.0).with_listener(Position3D::origin()),
        &limited_bus(BusVoiceLimitMode::StopFarthestSound),
    )
    .unwrap();
    engine.tick(0.0, 0);
    let near = engine.request_play(
        "Low",
        PlayRequest::new().with_position(Position3D::new(1.0, 0.0, 0.0)),
    );
    let far = engine.request_play(
        "Low",
        PlayRequest::new().with_position(Position3D::new(0.0, 0.0, 30.0)),
    );
    assert!(engine.request_play("Low", PlayRequest::new()).is_played());

    let stopped: Vec<_> = stops(&engine).into_iter().map(|(v, _)| v).collect();
    assert!(stopped.contains(&far.voice().unwrap()));
    assert!(!stopped.contains(&near.voice().unwrap()));
}

#[test]
fn test_least_important_never_evicts_equal_or_higher() {
    let mut engine = Engine::from_scene(
        SimulatedBackend::new(10.0),
        &limited_bus(BusVoiceLimitMode::StopLeastImportantSound),
    )
    .unwrap();
    engine.tick(0.0, 0);
    engine.request_play("Low", PlayRequest::new());
    engine.request_play("Low", PlayRequest::new());
    engine.backend_mut().take_commands();

    let lower = engine.request_play("Lower", PlayRequest::new());
    assert_eq!(lower.deny_reason(), Some(DenyReason::NoEvictableVoice));
    let equal = engine.request_play("Low", PlayRequest::new());
    assert_eq!(equal.deny_reason(), Some(DenyReason::NoEvictableVoice));
    assert!(engine.backend().commands().is_empty());

    let high = engine.request_play("High", PlayRequest::new());
    assert!(high.is_played());
    assert_eq!(stops(&engine).len(), 1);
}

#[test]
fn test_immediate_eviction_without_fade() {
    let mut scene = limited_bus(BusVoiceLimitMode::StopOldestSound);
    scene.config = EngineConfig {
        eviction_fade_secs: 0.0,
        ..scene.config
    };
    let mut engine = Engine::from_scene(SimulatedBackend::new(10.0), &scene).unwrap();
    engine.tick(0.0, 0);
    let oldest = engine.request_play("Low", PlayRequest::new());
    engine.request_play("Low", PlayRequest::new());
    engine.request_play("Low", PlayRequest::new());

    assert!(stops(&engine).contains(&(oldest.voice().unwrap(), StopMode::Immediate)));
    assert!(engine.voice(oldest.playing_id().unwrap()).is_none());
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIALOG
// ═══════════════════════════════════════════════════════════════════════════════

fn dialog_scene(fade_out: bool) -> SceneDefinition {
    let mut group = GroupDefinition::new("Narrator")
        .with_playback_mode(PlaybackMode::Dialog)
        .with_variation(VariationDefinition::new("chatter", "chatter.wav").with_importance(1.0))
        .with_variation(VariationDefinition::new("warning", "warning.wav").with_importance(5.0))
        .with_variation(VariationDefinition::new("briefing", "briefing.wav").with_uninterruptible(true));
    group.settings.use_dialog_fade_out = fade_out;
    seeded(SceneDefinition::new().with_group(group))
}

#[test]
fn test_dialog_lower_importance_is_blocked() {
    let mut engine = Engine::from_scene(SimulatedBackend::new(5.0), &dialog_scene(false)).unwrap();
    engine.tick(0.0, 0);
    assert!(
        engine
            .request_play("Narrator", PlayRequest::new().with_variation("warning"))
            .is_played()
    );
    assert_eq!(
        engine
            .request_play("Narrator", PlayRequest::new().with_variation("chatter"))
            .deny_reason(),
        Some(DenyReason::DialogBlocked)
    );
}

#[test]
fn test_dialog_higher_importance_interrupts() {
    let mut engine = Engine::from_scene(SimulatedBackend::new(5.0), &dialog_scene(true)).unwrap();
    engine.tick(0.0, 0);
    let chatter = engine.request_play("Narrator", PlayRequest::new().with_variation("chatter"));
    let warning = engine.request_play("Narrator", PlayRequest::new().with_variation("warning"));
    assert!(warning.is_played());
    assert!(stops(&engine).contains(&(chatter.voice().unwrap(), StopMode::Fade(0.1))));
}

#[test]
fn test_dialog_uninterruptible_blocks_everything() {
    let mut engine = Engine::from_scene(SimulatedBackend::new(5.0), &dialog_scene(false)).unwrap();
    engine.tick(0.0, 0);
    engine.request_play("Narrator", PlayRequest::new().with_variation("briefing"));
    assert_eq!(
        engine
            .request_play("Narrator", PlayRequest::new().with_variation("warning"))
            .deny_reason(),
        Some(DenyReason::DialogBlocked)
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// CANDIDATE CHECKS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_probability_miss_consumes_rotation() {
    let scene = seeded(
        SceneDefinition::new().with_group(
            GroupDefinition::new("Bird")
                .with_variation(VariationDefinition::new("chirp", "chirp.wav").with_probability(0)),
        ),
    );
    let mut engine = Engine::from_scene(SimulatedBackend::new(5.0), &scene).unwrap();
    let id = engine.group_id("Bird").unwrap();
    engine.tick(0.0, 0);

    let result = engine.request_play("Bird", PlayRequest::new());
    assert_eq!(result.deny_reason(), Some(DenyReason::ProbabilityMiss));
    assert_eq!(engine.backend().start_count(), 0);
    assert_eq!(engine.pool(id).unwrap().refill_count(), 1);
}

#[test]
fn test_silent_and_unloaded_slots_fall_through() {
    let scene = seeded(
        SceneDefinition::new().with_group(
            GroupDefinition::new("Door")
                .with_variation(VariationDefinition::silent("nothing"))
                .with_variation(VariationDefinition::new("creak", "creak.wav"))
                .with_variation(VariationDefinition::new("slam", "slam.wav")),
        ),
    );
    let mut backend = SimulatedBackend::new(5.0);
    backend.set_unloaded("creak.wav", false);
    let mut engine = Engine::from_scene(backend, &scene).unwrap();
    engine.tick(0.0, 0);

    for _ in 0..3 {
        let result = engine.request_play("Door", PlayRequest::new());
        let voice = result.voice().unwrap();
        assert_eq!(engine.backend().voice_clip(voice), Some("slam.wav"));
        engine.stop_all();
    }
}

#[test]
fn test_unloaded_clip_is_resolved_once() {
    let scene = seeded(SceneDefinition::new().with_group(slots("Music", 1)));
    let mut backend = SimulatedBackend::new(5.0);
    backend.set_unloaded("Music0.wav", true);
    let mut engine = Engine::from_scene(backend, &scene).unwrap();
    engine.tick(0.0, 0);
    assert!(engine.request_play("Music", PlayRequest::new()).is_played());

    let scene = seeded(SceneDefinition::new().with_group(slots("Music", 1)));
    let mut backend = SimulatedBackend::new(5.0);
    backend.set_unloaded("Music0.wav", false);
    let mut engine = Engine::from_scene(backend, &scene).unwrap();
    engine.tick(0.0, 0);
    assert_eq!(
        engine.request_play("Music", PlayRequest::new()).deny_reason(),
        Some(DenyReason::NoPlayableVariation)
    );
}
