//! Engine configuration and scene definitions

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use sga_core::{ArbiterError, ArbiterResult, validate_duration};

use crate::bus::BusDefinition;
use crate::duck::DuckRuleDefinition;
use crate::group::GroupDefinition;

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stop a group's voices when a group fade reaches zero
    pub stop_zero_volume_groups: bool,
    /// Stop a bus's voices when a bus fade reaches zero
    pub stop_zero_volume_buses: bool,
    /// Fade-out applied to voices evicted by a bus limit
    pub eviction_fade_secs: f32,
    /// Log every arbitration outcome
    pub verbose_logging: bool,
    /// Fixed seed for reproducible selection; random when unset
    pub rng_seed: Option<u64>,
    pub default_occlusion_cutoff_hz: f32,
    /// How many levels of linked groups a play propagates through
    pub max_linked_depth: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_zero_volume_groups: false,
            stop_zero_volume_buses: false,
            eviction_fade_secs: 0.1,
            verbose_logging: false,
            rng_seed: None,
            default_occlusion_cutoff_hz: 22_000.0,
            max_linked_depth: 1,
        }
    }
}

impl EngineConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn validate(&self) -> ArbiterResult<()> {
        validate_duration("eviction_fade_secs", self.eviction_fade_secs)?;
        if self.default_occlusion_cutoff_hz.is_nan() || self.default_occlusion_cutoff_hz <= 0.0 {
            return Err(ArbiterError::Config(format!(
                "default_occlusion_cutoff_hz must be positive, got {}",
                self.default_occlusion_cutoff_hz
            )));
        }
        Ok(())
    }
}

/// Everything the engine is initialized from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDefinition {
    pub config: EngineConfig,
    pub buses: Vec<BusDefinition>,
    pub groups: Vec<GroupDefinition>,
    pub duck_rules: Vec<DuckRuleDefinition>,
}

impl SceneDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a scene from JSON
    pub fn from_json(json: &str) -> ArbiterResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a scene file
    pub fn load(path: impl AsRef<Path>) -> ArbiterResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ArbiterError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> ArbiterResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_bus(mut self, bus: BusDefinition) -> Self {
        self.buses.push(bus);
        self
    }

    pub fn with_group(mut self, group: GroupDefinition) -> Self {
        self.groups.push(group);
        self
    }

    pub fn with_duck_rule(mut self, rule: DuckRuleDefinition) -> Self {
        self.duck_rules.push(rule);
        self
    }

    /// Check the whole scene before anything is built from it
    pub fn validate(&self) -> ArbiterResult<()> {
        self.config.validate()?;

        let mut bus_names = HashSet::new();
        for bus in &self.buses {
            bus.validate()?;
            if !bus_names.insert(bus.name.to_lowercase()) {
                return Err(ArbiterError::DuplicateBus(bus.name.clone()));
            }
        }

        let mut group_names = HashSet::new();
        for group in &self.groups {
            group.validate()?;
            if !group_names.insert(group.name.to_lowercase()) {
                return Err(ArbiterError::DuplicateGroup(group.name.clone()));
            }
            if let Some(bus) = &group.bus {
                if !bus_names.contains(&bus.to_lowercase()) {
                    return Err(ArbiterError::UnknownBus(bus.clone()));
                }
            }
        }

        for group in &self.groups {
            for linked in &group.settings.linked_groups {
                if !group_names.contains(&linked.to_lowercase()) {
                    return Err(ArbiterError::UnknownGroup(linked.clone()));
                }
            }
        }

        for rule in &self.duck_rules {
            rule.validate()?;
            if !group_names.contains(&rule.trigger_group.to_lowercase()) {
                return Err(ArbiterError::UnknownGroup(rule.trigger_group.clone()));
            }
            if !bus_names.contains(&rule.target_bus.to_lowercase()) {
                return Err(ArbiterError::UnknownBus(rule.target_bus.clone()));
            }
        }
        Ok(())
    }
}
