//! Bus ducking
//!
//! A duck is a temporary multiplicative attenuation on a bus, owned by a
//! [`DuckActor`]. It ramps down to its level over the attack time, holds
//! while the actor is active, then ramps back to unity over the release
//! time. Ducks on the same bus multiply.

use serde::{Deserialize, Serialize};

use sga_core::{
    ArbiterError, ArbiterResult, BusId, GroupId, PlayingId, db_to_gain, validate_duration,
    validate_percentage, validate_volume,
};

/// Owner of one duck on a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DuckActor {
    /// Started by a duck rule when this voice played
    Voice(PlayingId),
    /// Started by the host through `duck_bus`
    Token(u64),
}

// ═══════════════════════════════════════════════════════════════════════════════
// DUCK RULES
// ═══════════════════════════════════════════════════════════════════════════════

/// "When this group plays, duck that bus", as authored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuckRuleDefinition {
    pub trigger_group: String,
    pub target_bus: String,
    /// Linear gain while ducked (0.0 - 1.0)
    pub duck_level: f32,
    pub attack_secs: f32,
    pub release_secs: f32,
    /// Release starts once the triggering voice has played this far (0 - 100)
    pub rise_start_percentage: f32,
}

impl Default for DuckRuleDefinition {
    fn default() -> Self {
        Self {
            trigger_group: String::new(),
            target_bus: String::new(),
            duck_level: 0.4,
            attack_secs: 0.0,
            release_secs: 1.0,
            rise_start_percentage: 50.0,
        }
    }
}

impl DuckRuleDefinition {
    pub fn new(trigger_group: impl Into<String>, target_bus: impl Into<String>) -> Self {
        Self {
            trigger_group: trigger_group.into(),
            target_bus: target_bus.into(),
            ..Default::default()
        }
    }

    pub fn with_duck_level(mut self, level: f32) -> Self {
        self.duck_level = level;
        self
    }

    /// Set duck level in dB (negative = quieter)
    pub fn with_duck_db(mut self, db: f32) -> Self {
        self.duck_level = db_to_gain(db).clamp(0.0, 1.0);
        self
    }

    pub fn with_attack(mut self, secs: f32) -> Self {
        self.attack_secs = secs;
        self
    }

    pub fn with_release(mut self, secs: f32) -> Self {
        self.release_secs = secs;
        self
    }

    pub fn with_rise_start(mut self, percentage: f32) -> Self {
        self.rise_start_percentage = percentage;
        self
    }

    pub fn validate(&self) -> ArbiterResult<()> {
        if self.trigger_group.is_empty() || self.target_bus.is_empty() {
            return Err(ArbiterError::InvalidParameter(
                "duck rule needs a trigger group and a target bus".into(),
            ));
        }
        validate_volume(self.duck_level)?;
        validate_duration("attack_secs", self.attack_secs)?;
        validate_duration("release_secs", self.release_secs)?;
        validate_percentage("rise_start_percentage", self.rise_start_percentage)?;
        Ok(())
    }
}

/// Resolved duck rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuckRule {
    pub trigger: GroupId,
    pub bus: BusId,
    pub level: f32,
    pub attack_secs: f32,
    pub release_secs: f32,
    pub rise_start_percentage: f32,
}

// ═══════════════════════════════════════════════════════════════════════════════
// DUCK STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq)]
enum DuckPhase {
    Attack { from: f32, start: f64 },
    Hold,
    Release { from: f32, start: f64 },
}

#[derive(Debug, Clone)]
struct Duck {
    bus: BusId,
    actor: DuckActor,
    level: f32,
    attack_secs: f32,
    release_secs: f32,
    /// Release once the actor voice reaches this percentage
    rise_at: Option<f32>,
    phase: DuckPhase,
    current: f32,
}

fn ramp(from: f32, to: f32, start: f64, secs: f32, now: f64) -> (f32, bool) {
    if secs <= 0.0 {
        return (to, true);
    }
    let t = ((now - start) / f64::from(secs)).clamp(0.0, 1.0) as f32;
    if t >= 1.0 {
        (to, true)
    } else {
        (from + (to - from) * t, false)
    }
}

/// Every duck currently shaping a bus
#[derive(Debug, Default)]
pub struct DuckScheduler {
    ducks: Vec<Duck>,
}

impl DuckScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the duck of `actor` on `bus`
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        bus: BusId,
        actor: DuckActor,
        level: f32,
        attack_secs: f32,
        release_secs: f32,
        rise_at: Option<f32>,
        now: f64,
    ) {
        let from = self
            .ducks
            .iter()
            .find(|d| d.bus == bus && d.actor == actor)
            .map_or(1.0, |d| d.current);
        self.ducks.retain(|d| !(d.bus == bus && d.actor == actor));

        let (current, done) = ramp(from, level, now, attack_secs, now);
        self.ducks.push(Duck {
            bus,
            actor,
            level,
            attack_secs,
            release_secs,
            rise_at,
            phase: if done {
                DuckPhase::Hold
            } else {
                DuckPhase::Attack { from, start: now }
            },
            current,
        });
    }

    /// Begin releasing every duck owned by `actor`
    pub fn release(&mut self, actor: DuckActor, now: f64) -> bool {
        self.release_where(now, |d| d.actor == actor)
    }

    /// Begin releasing the duck of `actor` on `bus`
    pub fn release_on_bus(&mut self, bus: BusId, actor: DuckActor, now: f64) -> bool {
        self.release_where(now, |d| d.bus == bus && d.actor == actor)
    }

    fn release_where(&mut self, now: f64, pred: impl Fn(&Duck) -> bool) -> bool {
        let mut any = false;
        for duck in self.ducks.iter_mut().filter(|d| pred(d)) {
            if !matches!(duck.phase, DuckPhase::Release { .. }) {
                duck.phase = DuckPhase::Release {
                    from: duck.current,
                    start: now,
                };
                any = true;
            }
        }
        any
    }

    /// Drop every duck on `bus` at once
    pub fn remove_bus(&mut self, bus: BusId) {
        self.ducks.retain(|d| d.bus != bus);
    }

    /// Voice actors still waiting for their rise point
    pub fn pending_rises(&self) -> Vec<(PlayingId, f32)> {
        self.ducks
            .iter()
            .filter(|d| !matches!(d.phase, DuckPhase::Release { .. }))
            .filter_map(|d| match (d.actor, d.rise_at) {
                (DuckActor::Voice(id), Some(rise)) => Some((id, rise)),
                _ => None,
            })
            .collect()
    }

    /// Advance every duck to `now`; finished releases are dropped
    pub fn advance(&mut self, now: f64) {
        for duck in &mut self.ducks {
            match duck.phase {
                DuckPhase::Attack { from, start } => {
                    let (value, done) = ramp(from, duck.level, start, duck.attack_secs, now);
                    duck.current = value;
                    if done {
                        duck.phase = DuckPhase::Hold;
                    }
                }
                DuckPhase::Hold => duck.current = duck.level,
                DuckPhase::Release { from, start } => {
                    let (value, _) = ramp(from, 1.0, start, duck.release_secs, now);
                    duck.current = value;
                }
            }
        }
        self.ducks
            .retain(|d| !(matches!(d.phase, DuckPhase::Release { .. }) && d.current >= 1.0));
    }

    /// Combined duck multiplier of a bus
    pub fn level(&self, bus: BusId) -> f32 {
        self.ducks
            .iter()
            .filter(|d| d.bus == bus)
            .map(|d| d.current)
            .product()
    }

    pub fn is_ducking(&self, bus: BusId) -> bool {
        self.ducks.iter().any(|d| d.bus == bus)
    }

    pub fn active_count(&self) -> usize {
        self.ducks.len()
    }
}
