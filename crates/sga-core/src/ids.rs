//! Identifiers used on the hot path.
//!
//! Names are resolved to these at the configuration edge; selection and
//! arbitration only ever see integers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sound group identifier (index into the engine's group table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

/// Bus identifier (index into the engine's bus table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BusId(pub u32);

/// Stable identity of one variation slot.
///
/// Positional slot indices shift when a variation is removed; the key does not,
/// so backends can keep keying their sources on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey(pub u32);

/// Opaque reference to one playable voice (a group's slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoiceRef {
    pub group: GroupId,
    pub slot: SlotKey,
}

impl VoiceRef {
    #[inline]
    pub fn new(group: GroupId, slot: SlotKey) -> Self {
        Self { group, slot }
    }
}

impl fmt::Display for VoiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}:s{}", self.group.0, self.slot.0)
    }
}

/// Engine-issued id of one play request
pub type PlayingId = u64;

/// Invalid playing ID (never issued)
pub const INVALID_PLAYING_ID: PlayingId = 0;

/// Monotonic per-engine id source
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Hand out the next id (never returns 0)
    #[inline]
    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next = self.next.wrapping_add(1).max(1);
        id
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
