//! Batch simulator
//!
//! Runs a timed script of play and control steps against an engine backed by
//! [`SimulatedBackend`], advancing the clock at a fixed tick rate, and
//! summarizes what happened.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use sga_core::{ArbiterResult, PlayingId};
use sga_engine::{
    DenyReason, Engine, EngineNotification, FadeOptions, PlayRequest, PlaybackOutcome,
    SimulatedBackend,
};

// ═══════════════════════════════════════════════════════════════════════════════
// SCRIPT
// ═══════════════════════════════════════════════════════════════════════════════

/// One thing the script does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Play {
        group: String,
        #[serde(default)]
        request: PlayRequest,
    },
    StopGroup {
        group: String,
    },
    StopBus {
        bus: String,
    },
    StopAll,
    PauseGroup {
        group: String,
    },
    UnpauseGroup {
        group: String,
    },
    FadeGroup {
        group: String,
        volume: f32,
        secs: f32,
        #[serde(default)]
        stop_after: bool,
        #[serde(default)]
        restore_after: bool,
    },
    FadeBus {
        bus: String,
        volume: f32,
        secs: f32,
        #[serde(default)]
        stop_after: bool,
        #[serde(default)]
        restore_after: bool,
    },
    GlideGroup {
        group: String,
        delta: f32,
        secs: f32,
    },
    GlideBus {
        bus: String,
        delta: f32,
        secs: f32,
    },
    Duck {
        bus: String,
        token: u64,
        level: f32,
        #[serde(default)]
        attack_secs: f32,
        #[serde(default)]
        release_secs: f32,
    },
    Unduck {
        bus: String,
        token: u64,
    },
    MuteGroup {
        group: String,
        muted: bool,
    },
    SoloGroup {
        group: String,
        soloed: bool,
    },
}

/// An action with the time it fires at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Seconds from the start of the run
    pub at: f64,
    #[serde(flatten)]
    pub action: Action,
}

/// Timed steps plus how long to keep ticking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Script {
    pub steps: Vec<Step>,
    /// Total run length; defaults to the last step time
    pub duration_secs: Option<f64>,
}

impl Script {
    pub fn from_json(json: &str) -> ArbiterResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_json(&json)?)
    }

    pub fn with_step(mut self, at: f64, action: Action) -> Self {
        self.steps.push(Step { at, action });
        self
    }

    /// Time the run ends at
    pub fn end_time(&self) -> f64 {
        let last = self.steps.iter().map(|s| s.at).fold(0.0, f64::max);
        self.duration_secs.map_or(last, |d| d.max(last))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REPORT
// ═══════════════════════════════════════════════════════════════════════════════

/// What a single step resolved to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StepResult {
    Played { playing_id: PlayingId },
    Scheduled { playing_id: PlayingId },
    Denied { reason: DenyReason },
    Applied,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub at: f64,
    pub frame: u64,
    pub action: Action,
    pub result: StepResult,
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:>8.3}s #{:<6}] {:<40} ", self.at, self.frame, describe(&self.action))?;
        match &self.result {
            StepResult::Played { playing_id } => write!(f, "played (id {playing_id})"),
            StepResult::Scheduled { playing_id } => write!(f, "scheduled (id {playing_id})"),
            StepResult::Denied { reason } => write!(f, "denied: {reason}"),
            StepResult::Applied => write!(f, "ok"),
            StepResult::Failed { error } => write!(f, "error: {error}"),
        }
    }
}

fn describe(action: &Action) -> String {
    match action {
        Action::Play { group, request } => match &request.variation {
            Some(variation) => format!("play {group}/{variation}"),
            None => format!("play {group}"),
        },
        Action::StopGroup { group } => format!("stop group {group}"),
        Action::StopBus { bus } => format!("stop bus {bus}"),
        Action::StopAll => "stop all".to_string(),
        Action::PauseGroup { group } => format!("pause {group}"),
        Action::UnpauseGroup { group } => format!("unpause {group}"),
        Action::FadeGroup { group, volume, secs, .. } => {
            format!("fade group {group} -> {volume} over {secs}s")
        }
        Action::FadeBus { bus, volume, secs, .. } => {
            format!("fade bus {bus} -> {volume} over {secs}s")
        }
        Action::GlideGroup { group, delta, secs } => {
            format!("glide group {group} by {delta} over {secs}s")
        }
        Action::GlideBus { bus, delta, secs } => format!("glide bus {bus} by {delta} over {secs}s"),
        Action::Duck { bus, token, level, .. } => format!("duck {bus} to {level} (token {token})"),
        Action::Unduck { bus, token } => format!("unduck {bus} (token {token})"),
        Action::MuteGroup { group, muted } => format!("mute {group} = {muted}"),
        Action::SoloGroup { group, soloed } => format!("solo {group} = {soloed}"),
    }
}

/// Totals of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimSummary {
    pub played: usize,
    pub scheduled: usize,
    /// Direct denials plus scheduled plays denied when due, by reason
    pub denied: BTreeMap<String, usize>,
    pub failed: usize,
    pub voices_finished: usize,
    pub fades_completed: usize,
    pub chains_ended: usize,
    /// Custom "sound played" events, by name
    pub events: BTreeMap<String, usize>,
    pub ticks: u64,
    pub end_time: f64,
}

impl SimSummary {
    pub fn denied_total(&self) -> usize {
        self.denied.values().sum()
    }

    fn count_notification(&mut self, notification: &EngineNotification) {
        match notification {
            EngineNotification::SoundPlayed { event, .. } => {
                *self.events.entry(event.clone()).or_default() += 1;
            }
            EngineNotification::VoiceFinished { .. } => self.voices_finished += 1,
            EngineNotification::FadeCompleted(_) => self.fades_completed += 1,
            EngineNotification::ChainEnded { .. } => self.chains_ended += 1,
            EngineNotification::ScheduledDenied { reason, .. } => {
                *self.denied.entry(reason.name().to_string()).or_default() += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimReport {
    pub outcomes: Vec<StepOutcome>,
    pub summary: SimSummary,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SIMULATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed-rate driver around an engine
pub struct Simulator {
    engine: Engine<SimulatedBackend>,
    tick_hz: u32,
}

impl Simulator {
    pub fn new(engine: Engine<SimulatedBackend>, tick_hz: u32) -> Self {
        Self {
            engine,
            tick_hz: tick_hz.max(1),
        }
    }

    pub fn engine(&self) -> &Engine<SimulatedBackend> {
        &self.engine
    }

    /// Run `script` to its end time
    pub fn run(&mut self, script: &Script) -> SimReport {
        let mut steps = script.steps.clone();
        steps.sort_by(|a, b| a.at.total_cmp(&b.at));
        let mut pending = steps.into_iter().peekable();

        let end_time = script.end_time();
        let hz = f64::from(self.tick_hz);
        let mut report = SimReport::default();
        let mut frame = 0u64;

        loop {
            let now = frame as f64 / hz;
            self.engine.tick(now, frame);

            while let Some(step) = pending.next_if(|s| s.at <= now + 1e-9) {
                let result = self.apply(&step.action);
                match &result {
                    StepResult::Played { .. } => report.summary.played += 1,
                    StepResult::Scheduled { .. } => report.summary.scheduled += 1,
                    StepResult::Denied { reason } => {
                        *report.summary.denied.entry(reason.name().to_string()).or_default() += 1;
                    }
                    StepResult::Applied => {}
                    StepResult::Failed { error } => {
                        warn!("Step at {:.3}s failed: {error}", step.at);
                        report.summary.failed += 1;
                    }
                }
                let outcome = StepOutcome {
                    at: now,
                    frame,
                    action: step.action,
                    result,
                };
                debug!("{outcome}");
                report.outcomes.push(outcome);
            }

            for notification in self.engine.take_notifications() {
                report.summary.count_notification(&notification);
            }

            if now >= end_time && pending.peek().is_none() {
                report.summary.ticks = frame + 1;
                report.summary.end_time = now;
                return report;
            }
            frame += 1;
        }
    }

    fn apply(&mut self, action: &Action) -> StepResult {
        let engine = &mut self.engine;
        let applied = match action {
            Action::Play { group, request } => {
                let result = engine.request_play(group, request.clone());
                return match (result.outcome, result.playing_id()) {
                    (PlaybackOutcome::Played, Some(playing_id)) => StepResult::Played { playing_id },
                    (PlaybackOutcome::Scheduled, Some(playing_id)) => {
                        StepResult::Scheduled { playing_id }
                    }
                    (PlaybackOutcome::Denied(reason), _) => StepResult::Denied { reason },
                    (_, None) => StepResult::Failed {
                        error: "play result without a playing id".to_string(),
                    },
                };
            }
            Action::StopGroup { group } => engine.stop_group(group).map(drop),
            Action::StopBus { bus } => engine.stop_bus(bus).map(drop),
            Action::StopAll => {
                engine.stop_all();
                Ok(())
            }
            Action::PauseGroup { group } => engine.pause_group(group).map(drop),
            Action::UnpauseGroup { group } => engine.unpause_group(group).map(drop),
            Action::FadeGroup {
                group,
                volume,
                secs,
                stop_after,
                restore_after,
            } => engine.fade_group_to_volume(
                group,
                *volume,
                *secs,
                fade_options(*stop_after, *restore_after),
            ),
            Action::FadeBus {
                bus,
                volume,
                secs,
                stop_after,
                restore_after,
            } => engine.fade_bus_to_volume(
                bus,
                *volume,
                *secs,
                fade_options(*stop_after, *restore_after),
            ),
            Action::GlideGroup { group, delta, secs } => {
                engine.glide_group_pitch(group, *delta, *secs, None)
            }
            Action::GlideBus { bus, delta, secs } => {
                engine.glide_bus_pitch(bus, *delta, *secs, None)
            }
            Action::Duck {
                bus,
                token,
                level,
                attack_secs,
                release_secs,
            } => engine.duck_bus(bus, *token, *level, *attack_secs, *release_secs),
            Action::Unduck { bus, token } => engine.unduck_bus(bus, *token).map(drop),
            Action::MuteGroup { group, muted } => engine.mute_group(group, *muted),
            Action::SoloGroup { group, soloed } => engine.solo_group(group, *soloed),
        };

        match applied {
            Ok(()) => StepResult::Applied,
            Err(e) => StepResult::Failed {
                error: e.to_string(),
            },
        }
    }
}

fn fade_options(stop_after: bool, restore_after: bool) -> FadeOptions {
    let mut options = FadeOptions::new();
    options.stop_after = stop_after;
    options.restore_after = restore_after;
    options
}
