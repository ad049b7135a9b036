//! Candidate selection
//!
//! Turns a play request into a primary slot plus an ordered fallback list.

use rand::Rng;
use rand::seq::IndexedRandom;

use sga_core::VoiceRef;

use crate::backend::VoiceBackend;
use crate::group::{PlaybackMode, SoundGroup};
use crate::trial::DenyReason;

/// Live status of a group's slots, read from the backend
pub trait SlotProbe {
    /// Whether the slot is currently sounding
    fn is_busy(&self, slot: usize) -> bool;

    /// How far through its clip the slot is, 0 - 100
    fn played_percentage(&self, slot: usize) -> f32;

    /// Idle, or busy but past the retrigger threshold
    fn is_available(&self, slot: usize, retrigger_percentage: f32) -> bool {
        !self.is_busy(slot) || self.played_percentage(slot) >= retrigger_percentage
    }
}

/// Busy state of every slot of a group, read once per play attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotSnapshot {
    /// `None` when idle, played percentage when busy
    progress: Vec<Option<f32>>,
}

impl SlotSnapshot {
    pub fn capture<B: VoiceBackend + ?Sized>(group: &SoundGroup, backend: &B) -> Self {
        let progress = group
            .slots()
            .iter()
            .map(|slot| {
                let voice = VoiceRef::new(group.id, slot.key);
                backend
                    .is_playing(voice)
                    .then(|| backend.played_percentage(voice))
            })
            .collect();
        Self { progress }
    }
}

impl SlotProbe for SlotSnapshot {
    fn is_busy(&self, slot: usize) -> bool {
        self.progress.get(slot).is_some_and(Option::is_some)
    }

    fn played_percentage(&self, slot: usize) -> f32 {
        self.progress.get(slot).copied().flatten().unwrap_or(0.0)
    }
}

/// Outcome of candidate selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub primary: usize,
    /// Tried in order when the primary turns out unplayable
    pub fallback: Vec<usize>,
    /// Single-slot chain pick: the pool is left alone, the chain counter advances
    pub loop_continuation: bool,
}

impl Selection {
    pub fn single(slot: usize) -> Self {
        Self {
            primary: slot,
            fallback: Vec::new(),
            loop_continuation: false,
        }
    }
}

/// Pick the slot a request should try first
pub fn select_candidate<P, R>(
    group: &mut SoundGroup,
    requested: Option<&str>,
    probe: &P,
    rng: &mut R,
) -> Result<Selection, DenyReason>
where
    P: SlotProbe + ?Sized,
    R: Rng + ?Sized,
{
    group.pool.begin_attempt();

    if let Some(name) = requested {
        return select_named(group, name, probe, rng);
    }

    if group.slot_count() == 1 {
        return Ok(Selection {
            primary: 0,
            fallback: Vec::new(),
            loop_continuation: group.settings.playback_mode == PlaybackMode::LoopedChain,
        });
    }

    let primary = group
        .pool
        .rotate()
        .ok_or(DenyReason::NoPlayableVariation)?;
    Ok(Selection {
        primary,
        fallback: group.pool.fallback_after(primary),
        loop_continuation: false,
    })
}

fn select_named<P, R>(
    group: &SoundGroup,
    name: &str,
    probe: &P,
    rng: &mut R,
) -> Result<Selection, DenyReason>
where
    P: SlotProbe + ?Sized,
    R: Rng + ?Sized,
{
    let matches = group.matching_slots(name);
    if matches.is_empty() {
        return Err(DenyReason::UnknownVariation);
    }

    let retrigger = group.settings.retrigger_percentage;
    let available: Vec<usize> = matches
        .into_iter()
        .filter(|&slot| probe.is_available(slot, retrigger))
        .collect();

    let &primary = available
        .choose(rng)
        .ok_or(DenyReason::AllVariationsBusy)?;
    Ok(Selection {
        primary,
        fallback: available.into_iter().filter(|&s| s != primary).collect(),
        loop_continuation: false,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::group::{GroupDefinition, VariationDefinition};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use sga_core::GroupId;
    use std::collections::HashMap;

    /// Slot index -> played percentage for busy slots
    #[derive(Default)]
    pub(crate) struct FakeProbe(pub HashMap<usize, f32>);

    impl SlotProbe for FakeProbe {
        fn is_busy(&self, slot: usize) -> bool {
            self.0.contains_key(&slot)
        }

        fn played_percentage(&self, slot: usize) -> f32 {
            self.0.get(&slot).copied().unwrap_or(0.0)
        }
    }

    pub(crate) fn build(def: GroupDefinition) -> SoundGroup {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        SoundGroup::new(GroupId(0), def.name, None, def.settings, &def.variations, &mut rng)
    }

    #[test]
    fn test_unspecified_uses_rotation() {
        let mut group = build(
            GroupDefinition::new("Coins")
                .with_sequencing(crate::group::SequencingMode::TopToBottom)
                .with_variation(VariationDefinition::new("a", "a"))
                .with_variation(VariationDefinition::new("b", "b"))
                .with_variation(VariationDefinition::new("c", "c")),
        );
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let selection = select_candidate(&mut group, None, &FakeProbe::default(), &mut rng).unwrap();
        assert_eq!(selection.primary, 0);
        assert_eq!(selection.fallback, vec![1, 2]);
        assert!(!selection.loop_continuation);
    }

    #[test]
    fn test_named_unknown_and_busy() {
        let mut group = build(
            GroupDefinition::new("Hits")
                .with_retrigger_percentage(100.0)
                .with_variation(VariationDefinition::new("Hit", "h1"))
                .with_variation(VariationDefinition::new("Hit", "h2")),
        );
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(
            select_candidate(&mut group, Some("Miss"), &FakeProbe::default(), &mut rng),
            Err(DenyReason::UnknownVariation)
        );

        let busy = FakeProbe(HashMap::from([(0, 10.0), (1, 20.0)]));
        assert_eq!(
            select_candidate(&mut group, Some("Hit"), &busy, &mut rng),
            Err(DenyReason::AllVariationsBusy)
        );

        let one_busy = FakeProbe(HashMap::from([(0, 10.0)]));
        let selection = select_candidate(&mut group, Some("Hit"), &one_busy, &mut rng).unwrap();
        assert_eq!(selection.primary, 1);
        assert!(selection.fallback.is_empty());
    }

    #[test]
    fn test_named_allows_retriggerable_busy_slot() {
        let mut group = build(
            GroupDefinition::new("Hits")
                .with_retrigger_percentage(50.0)
                .with_variation(VariationDefinition::new("Hit", "h1")),
        );
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let probe = FakeProbe(HashMap::from([(0, 75.0)]));
        let selection = select_candidate(&mut group, Some("Hit"), &probe, &mut rng).unwrap();
        assert_eq!(selection.primary, 0);
    }

    #[test]
    fn test_single_slot_chain_is_loop_continuation() {
        let mut group = build(
            GroupDefinition::new("Ambience")
                .with_playback_mode(PlaybackMode::LoopedChain)
                .with_variation(VariationDefinition::new("wind", "wind")),
        );
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let selection = select_candidate(&mut group, None, &FakeProbe::default(), &mut rng).unwrap();
        assert_eq!(selection.primary, 0);
        assert!(selection.loop_continuation);
    }
}
