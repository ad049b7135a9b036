//! Variation pool
//!
//! Per-group rotation state. Every slot index lives in exactly one of
//! `choices` (not yet played this cycle) or `played_history` (played this
//! cycle, oldest first). `leftovers` is a scratch copy of `choices` for the
//! play attempt in progress.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::group::SequencingMode;

/// Rotation bookkeeping for one sound group
#[derive(Debug, Clone, PartialEq)]
pub struct VariationPool {
    mode: SequencingMode,
    no_repeat: bool,
    choices: Vec<usize>,
    leftovers: Vec<usize>,
    played_history: Vec<usize>,
    last_played: Option<usize>,
    refill_count: u64,
}

impl VariationPool {
    /// Build a pool over `slot_count` slots, arranged for the first cycle
    pub fn new<R: Rng + ?Sized>(
        slot_count: usize,
        mode: SequencingMode,
        no_repeat: bool,
        rng: &mut R,
    ) -> Self {
        let mut choices: Vec<usize> = (0..slot_count).collect();
        if mode == SequencingMode::Randomized {
            choices.shuffle(rng);
        }
        Self {
            mode,
            no_repeat,
            leftovers: choices.clone(),
            choices,
            played_history: Vec::new(),
            last_played: None,
            refill_count: 0,
        }
    }

    /// Change sequencing policy; takes effect at the next refill
    pub fn set_policy(&mut self, mode: SequencingMode, no_repeat: bool) {
        self.mode = mode;
        self.no_repeat = no_repeat;
    }

    #[inline]
    pub fn choices(&self) -> &[usize] {
        &self.choices
    }

    #[inline]
    pub fn leftovers(&self) -> &[usize] {
        &self.leftovers
    }

    #[inline]
    pub fn played_history(&self) -> &[usize] {
        &self.played_history
    }

    #[inline]
    pub fn last_played(&self) -> Option<usize> {
        self.last_played
    }

    /// Number of refills performed since creation
    #[inline]
    pub fn refill_count(&self) -> u64 {
        self.refill_count
    }

    /// Total number of tracked slots
    #[inline]
    pub fn len(&self) -> usize {
        self.choices.len() + self.played_history.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next candidate of the current cycle
    #[inline]
    pub fn rotate(&self) -> Option<usize> {
        self.choices.first().copied()
    }

    /// Start a play attempt: every remaining choice is untried
    pub fn begin_attempt(&mut self) {
        self.leftovers.clone_from(&self.choices);
    }

    /// Untried candidates other than `primary`, in list order
    pub fn fallback_after(&self, primary: usize) -> Vec<usize> {
        self.leftovers
            .iter()
            .copied()
            .filter(|&i| i != primary)
            .collect()
    }

    /// Record that `index` was tried during the current attempt
    pub fn mark_tried(&mut self, index: usize) {
        self.leftovers.retain(|&i| i != index);
    }

    /// Record a play of `index`. Returns whether the pool refilled.
    pub fn consume<R: Rng + ?Sized>(&mut self, index: usize, rng: &mut R) -> bool {
        if let Some(pos) = self.choices.iter().position(|&i| i == index) {
            self.choices.remove(pos);
            self.played_history.push(index);
        }
        self.last_played = Some(index);

        if self.choices.is_empty() {
            self.refill(rng);
            true
        } else {
            false
        }
    }

    /// Start a new cycle from everything played so far
    pub fn refill<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut refilled = std::mem::take(&mut self.played_history);
        // Stragglers never played this cycle still belong in the next one
        refilled.append(&mut self.choices);

        match self.mode {
            SequencingMode::Randomized => {
                refilled.shuffle(rng);
                if self.no_repeat && refilled.len() > 1 && Some(refilled[0]) == self.last_played {
                    let swap_with = rng.random_range(1..refilled.len());
                    refilled.swap(0, swap_with);
                }
            }
            SequencingMode::TopToBottom => refilled.sort_unstable(),
        }

        self.choices = refilled;
        self.leftovers.clone_from(&self.choices);
        self.refill_count += 1;
    }

    /// Track a newly appended slot
    pub fn add_slot(&mut self, index: usize) {
        self.choices.push(index);
        if self.mode == SequencingMode::TopToBottom {
            self.choices.sort_unstable();
        }
    }

    /// Forget slot `index` and shift every higher index down by one.
    /// Returns whether the pool refilled.
    pub fn remove_slot<R: Rng + ?Sized>(&mut self, index: usize, rng: &mut R) -> bool {
        fn renumber(list: &mut Vec<usize>, index: usize) {
            list.retain(|&i| i != index);
            for i in list.iter_mut() {
                if *i > index {
                    *i -= 1;
                }
            }
        }

        renumber(&mut self.choices, index);
        renumber(&mut self.leftovers, index);
        renumber(&mut self.played_history, index);

        self.last_played = match self.last_played {
            Some(i) if i == index => None,
            Some(i) if i > index => Some(i - 1),
            other => other,
        };

        if self.choices.is_empty() && !self.played_history.is_empty() {
            self.refill(rng);
            true
        } else {
            false
        }
    }
}
