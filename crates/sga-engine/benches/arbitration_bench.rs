//! Play Request Benchmarks
//!
//! Hot path of a play request: gate, bus arbitration, selection, start.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use sga_engine::{
    BusDefinition, BusVoiceLimitMode, Engine, GroupDefinition, PlayRequest, SceneDefinition,
    SimulatedBackend, VariationDefinition,
};

const SLOT_COUNTS: &[usize] = &[4, 16, 64];

fn scene(slots: usize, voice_limit: Option<u32>) -> SceneDefinition {
    let mut bus = BusDefinition::new("SFX");
    if let Some(limit) = voice_limit {
        bus = bus.with_voice_limit(limit, BusVoiceLimitMode::StopOldestSound);
    }
    let group = (0..slots).fold(GroupDefinition::new("Impacts").with_bus("SFX"), |g, i| {
        g.with_variation(VariationDefinition::new(format!("hit{i}"), format!("hit{i}.wav")))
    });
    let mut scene = SceneDefinition::new().with_bus(bus).with_group(group);
    scene.config.rng_seed = Some(1);
    scene
}

/// Play then stop, so every request walks the full rotation path
fn bench_request_play(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_play");

    for &slots in SLOT_COUNTS {
        let mut engine =
            Engine::from_scene(SimulatedBackend::new(1.0), &scene(slots, None)).unwrap();
        engine.tick(0.0, 0);

        group.bench_with_input(BenchmarkId::new("rotate", slots), &slots, |b, _| {
            b.iter(|| {
                let result = engine.request_play("Impacts", PlayRequest::new());
                engine.stop_all();
                engine.backend_mut().take_commands();
                black_box(result)
            })
        });
    }

    group.finish();
}

/// Requests against a full bus, each one evicting the oldest voice
fn bench_bus_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("bus_eviction");

    for &slots in SLOT_COUNTS {
        let limit = (slots / 2) as u32;
        let mut engine =
            Engine::from_scene(SimulatedBackend::new(1_000.0), &scene(slots, Some(limit)))
                .unwrap();
        let mut now = 0.0;
        let mut frame = 0;

        group.bench_with_input(BenchmarkId::new("stop_oldest", slots), &slots, |b, _| {
            b.iter(|| {
                now += 0.01;
                frame += 1;
                engine.tick(now, frame);
                let result = engine.request_play("Impacts", PlayRequest::new());
                engine.backend_mut().take_commands();
                black_box(result)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_request_play, bench_bus_eviction);
criterion_main!(benches);
