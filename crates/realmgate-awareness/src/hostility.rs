//! Attackable classification for entities in view.

use std::collections::HashSet;

use crate::entity::{EntityKind, RemoteEntity};

/// Decides whether the local avatar may attack an entity.
pub trait HostilityPolicy: Send + Sync {
    fn is_attackable(&self, entity: &RemoteEntity) -> bool;
}

/// Faction-list policy.
///
/// Objects and dead entities are never attackable. Entities whose faction is
/// in `hostile_factions` are. Creatures with faction `0` (unclassified)
/// follow `unclassified_creatures_hostile`; players with faction `0` are
/// never attackable.
#[derive(Debug, Clone, Default)]
pub struct FactionHostilityPolicy {
    pub hostile_factions: HashSet<u32>,
    pub unclassified_creatures_hostile: bool,
}

impl FactionHostilityPolicy {
    pub fn new(hostile_factions: impl IntoIterator<Item = u32>) -> Self {
        Self {
            hostile_factions: hostile_factions.into_iter().collect(),
            unclassified_creatures_hostile: false,
        }
    }

    pub fn with_unclassified_creatures_hostile(mut self, hostile: bool) -> Self {
        self.unclassified_creatures_hostile = hostile;
        self
    }
}

impl HostilityPolicy for FactionHostilityPolicy {
    fn is_attackable(&self, entity: &RemoteEntity) -> bool {
        if entity.kind == EntityKind::Object || !entity.is_alive() {
            return false;
        }
        if self.hostile_factions.contains(&entity.faction) {
            return true;
        }
        entity.faction == 0
            && entity.kind == EntityKind::Creature
            && self.unclassified_creatures_hostile
    }
}
