//! Voice backend capability
//!
//! The engine never renders audio. Everything it needs to know about a
//! playing voice, and every command it issues, goes through [`VoiceBackend`].
//! [`SimulatedBackend`] is a deterministic in-memory implementation used by
//! tests, benches and the batch simulator.

use std::collections::{HashMap, HashSet};

use sga_core::{Clock, PlayingId, Position3D, VoiceRef};

// ═══════════════════════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════════════════════

/// How a voice is stopped
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopMode {
    /// Silence at once
    Immediate,
    /// Fade out over the given seconds, then stop
    Fade(f32),
}

/// Parameters of a start command
#[derive(Debug, Clone, PartialEq)]
pub struct StartParams<'a> {
    /// Engine-issued id of the play request
    pub playing_id: PlayingId,
    /// Clip bound to the slot
    pub clip: &'a str,
    /// Effective volume (slot, group, bus, duck, mute/solo)
    pub volume: f32,
    /// Effective pitch
    pub pitch: f32,
    /// Emitter position, if any
    pub position: Option<Position3D>,
}

/// Outbound capability the engine drives
///
/// All calls are synchronous and issued from the thread that owns the engine.
pub trait VoiceBackend {
    /// Whether the clip for this voice is loaded and can start right now
    fn is_ready(&self, voice: VoiceRef, clip: &str) -> bool;

    /// Try once to re-acquire the clip for a voice that is not ready.
    /// Returns whether the voice is ready afterwards.
    fn resolve(&mut self, voice: VoiceRef, clip: &str) -> bool;

    /// Whether the voice is currently sounding (paused counts as sounding)
    fn is_playing(&self, voice: VoiceRef) -> bool;

    /// How far through its clip the voice is, 0 - 100
    fn played_percentage(&self, voice: VoiceRef) -> f32;

    /// Tracked emitter position of a voice
    fn position(&self, voice: VoiceRef) -> Option<Position3D>;

    /// Position of the active listener
    fn listener_position(&self) -> Option<Position3D>;

    fn start(&mut self, voice: VoiceRef, params: &StartParams<'_>);

    fn stop(&mut self, voice: VoiceRef, mode: StopMode);

    fn pause(&mut self, voice: VoiceRef);

    fn unpause(&mut self, voice: VoiceRef);

    fn set_volume(&mut self, voice: VoiceRef, volume: f32);

    fn set_pitch(&mut self, voice: VoiceRef, pitch: f32);

    /// Low-pass cutoff used for occlusion
    fn set_occlusion_cutoff(&mut self, voice: VoiceRef, cutoff_hz: f32);

    /// Called at the start of every engine tick
    fn on_tick(&mut self, _clock: Clock) {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// SIMULATED BACKEND
// ═══════════════════════════════════════════════════════════════════════════════

/// Command recorded by [`SimulatedBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    Start {
        voice: VoiceRef,
        playing_id: PlayingId,
        clip: String,
        volume: f32,
        pitch: f32,
    },
    Stop {
        voice: VoiceRef,
        mode: StopMode,
    },
    Pause {
        voice: VoiceRef,
    },
    Unpause {
        voice: VoiceRef,
    },
}

/// State of one simulated voice
#[derive(Debug, Clone)]
struct SimVoice {
    clip: String,
    started_at: f64,
    length_secs: f64,
    /// Absolute time the voice goes silent after a fade stop
    stop_at: Option<f64>,
    paused_at: Option<f64>,
    paused_total: f64,
    volume: f32,
    pitch: f32,
    cutoff_hz: f32,
    position: Option<Position3D>,
}

impl SimVoice {
    fn elapsed(&self, now: f64) -> f64 {
        let until = self.paused_at.unwrap_or(now);
        (until - self.started_at - self.paused_total).max(0.0)
    }
}

/// Deterministic backend driven by the engine clock
///
/// Clips play for their configured length in seconds. A clip id listed as
/// unloaded is not ready; it becomes ready on `resolve` only when also
/// marked resolvable.
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    now: f64,
    default_clip_secs: f64,
    clip_lengths: HashMap<String, f64>,
    unloaded: HashSet<String>,
    resolvable: HashSet<String>,
    voices: HashMap<VoiceRef, SimVoice>,
    forced_progress: HashMap<VoiceRef, f32>,
    listener: Option<Position3D>,
    commands: Vec<BackendCommand>,
}

impl SimulatedBackend {
    /// Create a backend where unknown clips last `default_clip_secs`
    pub fn new(default_clip_secs: f64) -> Self {
        Self {
            default_clip_secs,
            ..Default::default()
        }
    }

    /// Set the length of a clip
    pub fn with_clip(mut self, clip: impl Into<String>, length_secs: f64) -> Self {
        self.clip_lengths.insert(clip.into(), length_secs);
        self
    }

    /// Set the listener position
    pub fn with_listener(mut self, position: Position3D) -> Self {
        self.listener = Some(position);
        self
    }

    /// Mark a clip as not loaded
    pub fn set_unloaded(&mut self, clip: impl Into<String>, resolvable: bool) {
        let clip = clip.into();
        if resolvable {
            self.resolvable.insert(clip.clone());
        } else {
            self.resolvable.remove(&clip);
        }
        self.unloaded.insert(clip);
    }

    /// Override the played percentage reported for a voice
    pub fn force_progress(&mut self, voice: VoiceRef, percentage: f32) {
        self.forced_progress.insert(voice, percentage);
    }

    pub fn set_listener(&mut self, position: Option<Position3D>) {
        self.listener = position;
    }

    /// Move a playing voice
    pub fn set_voice_position(&mut self, voice: VoiceRef, position: Position3D) {
        if let Some(v) = self.voices.get_mut(&voice) {
            v.position = Some(position);
        }
    }

    /// Every command received so far
    pub fn commands(&self) -> &[BackendCommand] {
        &self.commands
    }

    /// Drain recorded commands
    pub fn take_commands(&mut self) -> Vec<BackendCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Number of start commands received
    pub fn start_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, BackendCommand::Start { .. }))
            .count()
    }

    /// Voices currently sounding
    pub fn playing_voices(&self) -> Vec<VoiceRef> {
        let mut voices: Vec<VoiceRef> = self
            .voices
            .keys()
            .copied()
            .filter(|v| self.is_playing(*v))
            .collect();
        voices.sort();
        voices
    }

    /// Last volume pushed to a voice
    pub fn voice_volume(&self, voice: VoiceRef) -> Option<f32> {
        self.voices.get(&voice).map(|v| v.volume)
    }

    /// Last pitch pushed to a voice
    pub fn voice_pitch(&self, voice: VoiceRef) -> Option<f32> {
        self.voices.get(&voice).map(|v| v.pitch)
    }

    /// Last occlusion cutoff pushed to a voice
    pub fn voice_cutoff(&self, voice: VoiceRef) -> Option<f32> {
        self.voices.get(&voice).map(|v| v.cutoff_hz)
    }

    /// Clip the voice was last started with
    pub fn voice_clip(&self, voice: VoiceRef) -> Option<&str> {
        self.voices.get(&voice).map(|v| v.clip.as_str())
    }

    fn clip_length(&self, clip: &str) -> f64 {
        self.clip_lengths
            .get(clip)
            .copied()
            .unwrap_or(self.default_clip_secs)
    }
}

impl VoiceBackend for SimulatedBackend {
    fn is_ready(&self, _voice: VoiceRef, clip: &str) -> bool {
        !self.unloaded.contains(clip)
    }

    fn resolve(&mut self, _voice: VoiceRef, clip: &str) -> bool {
        if self.resolvable.remove(clip) {
            self.unloaded.remove(clip);
        }
        !self.unloaded.contains(clip)
    }

    fn is_playing(&self, voice: VoiceRef) -> bool {
        let Some(v) = self.voices.get(&voice) else {
            return false;
        };
        if let Some(stop_at) = v.stop_at {
            if self.now >= stop_at {
                return false;
            }
        }
        v.paused_at.is_some() || v.elapsed(self.now) < v.length_secs
    }

    fn played_percentage(&self, voice: VoiceRef) -> f32 {
        if let Some(forced) = self.forced_progress.get(&voice) {
            return *forced;
        }
        match self.voices.get(&voice) {
            Some(v) if v.length_secs > 0.0 => {
                ((v.elapsed(self.now) / v.length_secs) * 100.0).min(100.0) as f32
            }
            _ => 0.0,
        }
    }

    fn position(&self, voice: VoiceRef) -> Option<Position3D> {
        self.voices.get(&voice).and_then(|v| v.position)
    }

    fn listener_position(&self) -> Option<Position3D> {
        self.listener
    }

    fn start(&mut self, voice: VoiceRef, params: &StartParams<'_>) {
        let length_secs = self.clip_length(params.clip);
        self.forced_progress.remove(&voice);
        self.voices.insert(
            voice,
            SimVoice {
                clip: params.clip.to_string(),
                started_at: self.now,
                length_secs,
                stop_at: None,
                paused_at: None,
                paused_total: 0.0,
                volume: params.volume,
                pitch: params.pitch,
                cutoff_hz: 22_000.0,
                position: params.position,
            },
        );
        self.commands.push(BackendCommand::Start {
            voice,
            playing_id: params.playing_id,
            clip: params.clip.to_string(),
            volume: params.volume,
            pitch: params.pitch,
        });
    }

    fn stop(&mut self, voice: VoiceRef, mode: StopMode) {
        match mode {
            StopMode::Immediate => {
                self.voices.remove(&voice);
                self.forced_progress.remove(&voice);
            }
            StopMode::Fade(secs) => {
                if let Some(v) = self.voices.get_mut(&voice) {
                    let at = self.now + f64::from(secs.max(0.0));
                    v.stop_at = Some(v.stop_at.map_or(at, |s| s.min(at)));
                }
            }
        }
        self.commands.push(BackendCommand::Stop { voice, mode });
    }

    fn pause(&mut self, voice: VoiceRef) {
        if let Some(v) = self.voices.get_mut(&voice) {
            if v.paused_at.is_none() {
                v.paused_at = Some(self.now);
            }
        }
        self.commands.push(BackendCommand::Pause { voice });
    }

    fn unpause(&mut self, voice: VoiceRef) {
        if let Some(v) = self.voices.get_mut(&voice) {
            if let Some(paused_at) = v.paused_at.take() {
                v.paused_total += (self.now - paused_at).max(0.0);
            }
        }
        self.commands.push(BackendCommand::Unpause { voice });
    }

    fn set_volume(&mut self, voice: VoiceRef, volume: f32) {
        if let Some(v) = self.voices.get_mut(&voice) {
            v.volume = volume;
        }
    }

    fn set_pitch(&mut self, voice: VoiceRef, pitch: f32) {
        if let Some(v) = self.voices.get_mut(&voice) {
            v.pitch = pitch;
        }
    }

    fn set_occlusion_cutoff(&mut self, voice: VoiceRef, cutoff_hz: f32) {
        if let Some(v) = self.voices.get_mut(&voice) {
            v.cutoff_hz = cutoff_hz;
        }
    }

    fn on_tick(&mut self, clock: Clock) {
        self.now = clock.now;
        let now = self.now;
        self.voices.retain(|_, v| v.stop_at.is_none_or(|s| now < s));
    }
}
