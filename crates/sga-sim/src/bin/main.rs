//! sga-sim - sound group arbiter batch simulator
//!
//! Loads a scene and a timed script, drives the engine at a fixed tick rate
//! against the simulated backend and prints what every step resolved to.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use sga_engine::{Engine, SceneDefinition, SimulatedBackend};
use sga_sim::{Script, Simulator};

#[derive(Parser)]
#[command(name = "sga-sim")]
#[command(about = "Run a play script against a sound group scene")]
#[command(version)]
struct Cli {
    /// Scene JSON (buses, groups, duck rules, engine config)
    #[arg(long)]
    scene: PathBuf,

    /// Script JSON (timed play and control steps)
    #[arg(long)]
    script: PathBuf,

    /// Engine ticks per second
    #[arg(long, default_value_t = 60)]
    tick_hz: u32,

    /// RNG seed, overrides the scene config
    #[arg(long)]
    seed: Option<u64>,

    /// Length of clips without an explicit length, in seconds
    #[arg(long, default_value_t = 1.0)]
    clip_secs: f64,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut scene = SceneDefinition::load(&cli.scene)
        .with_context(|| format!("loading scene {}", cli.scene.display()))?;
    if let Some(seed) = cli.seed {
        scene.config.rng_seed = Some(seed);
    }
    let script = Script::load(&cli.script)
        .with_context(|| format!("loading script {}", cli.script.display()))?;

    let engine = Engine::from_scene(SimulatedBackend::new(cli.clip_secs), &scene)
        .context("initializing engine")?;
    log::info!(
        "Running {} steps over {:.2}s at {} Hz",
        script.steps.len(),
        script.end_time(),
        cli.tick_hz
    );

    let report = Simulator::new(engine, cli.tick_hz).run(&script);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for outcome in &report.outcomes {
        println!("{outcome}");
    }
    let summary = &report.summary;
    println!();
    println!(
        "played {}  scheduled {}  denied {}  failed {}",
        summary.played,
        summary.scheduled,
        summary.denied_total(),
        summary.failed
    );
    for (reason, count) in &summary.denied {
        println!("  {reason:<28} {count}");
    }
    println!(
        "voices finished {}  fades completed {}  chains ended {}  ({} ticks, {:.3}s)",
        summary.voices_finished,
        summary.fades_completed,
        summary.chains_ended,
        summary.ticks,
        summary.end_time
    );
    Ok(())
}
