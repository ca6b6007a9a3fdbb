//! Registry of remote entities replicated to this client.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use glam::Vec3;

use crate::messages::{ObjectSpawn, ObjectUpdate, UpdateFields};

/// Globally unique entity id assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid(pub u64);

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Broad classification of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Player,
    Creature,
    Object,
}

/// A remote entity as last reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    pub guid: Guid,
    pub kind: EntityKind,
    pub position: Vec3,
    /// Faction template id; `0` means unclassified.
    pub faction: u32,
    pub health: u32,
    pub max_health: u32,
    pub target: Option<Guid>,
}

impl RemoteEntity {
    pub fn is_alive(&self) -> bool {
        self.health > 0
    }
}

/// Something that happened to the registry since the last drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityEvent {
    Spawned(Guid),
    Updated(Guid),
    Despawned(Guid),
}

/// Materializes client-side proxies (models, nameplates) for entities.
pub trait EntityFactory: Send {
    /// Called once when a guid first appears.
    fn materialize(&mut self, entity: &RemoteEntity);
    /// Called once when a guid is removed.
    fn release(&mut self, guid: Guid);
}

/// Owner of every known [`RemoteEntity`], keyed by guid.
#[derive(Default)]
pub struct EntityRegistry {
    entities: HashMap<Guid, RemoteEntity>,
    events: VecDeque<EntityEvent>,
    factory: Option<Box<dyn EntityFactory>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(factory: Box<dyn EntityFactory>) -> Self {
        Self {
            factory: Some(factory),
            ..Self::default()
        }
    }

    /// Insert or overwrite an entity. Returns `true` if the guid was new.
    pub fn spawn(&mut self, entity: RemoteEntity) -> bool {
        let guid = entity.guid;
        let is_new = !self.entities.contains_key(&guid);
        if is_new && let Some(factory) = self.factory.as_mut() {
            factory.materialize(&entity);
        }
        self.entities.insert(guid, entity);
        self.events.push_back(if is_new {
            EntityEvent::Spawned(guid)
        } else {
            EntityEvent::Updated(guid)
        });
        tracing::trace!(%guid, is_new, "Entity spawned");
        is_new
    }

    /// Apply the fields of a server update in place. Returns `false` if the
    /// guid is unknown.
    pub fn update(&mut self, update: &ObjectUpdate) -> bool {
        let Some(entity) = self.entities.get_mut(&update.guid) else {
            tracing::debug!(guid = %update.guid, "Update for unknown entity ignored");
            return false;
        };
        if update.fields.contains(UpdateFields::POSITION) {
            entity.position = update.position;
        }
        if update.fields.contains(UpdateFields::HEALTH) {
            entity.health = update.health;
            entity.max_health = update.max_health;
        }
        if update.fields.contains(UpdateFields::FACTION) {
            entity.faction = update.faction;
        }
        if update.fields.contains(UpdateFields::TARGET) {
            entity.target = update.target;
        }
        self.events.push_back(EntityEvent::Updated(update.guid));
        true
    }

    /// Move an entity. Returns `false` if the guid is unknown.
    pub fn set_position(&mut self, guid: Guid, position: Vec3) -> bool {
        match self.entities.get_mut(&guid) {
            Some(entity) => {
                entity.position = position;
                self.events.push_back(EntityEvent::Updated(guid));
                true
            }
            None => false,
        }
    }

    /// Remove an entity. Absent guids are a no-op; present ones produce a
    /// single [`EntityEvent::Despawned`].
    pub fn despawn(&mut self, guid: Guid) -> bool {
        if self.entities.remove(&guid).is_none() {
            return false;
        }
        if let Some(factory) = self.factory.as_mut() {
            factory.release(guid);
        }
        self.events.push_back(EntityEvent::Despawned(guid));
        tracing::trace!(%guid, "Entity despawned");
        true
    }

    /// Despawn everything, e.g. when the realm connection drops.
    pub fn clear(&mut self) {
        let mut guids: Vec<Guid> = self.entities.keys().copied().collect();
        guids.sort_unstable();
        for guid in guids {
            self.despawn(guid);
        }
    }

    pub fn get(&self, guid: Guid) -> Option<&RemoteEntity> {
        self.entities.get(&guid)
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.entities.contains_key(&guid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteEntity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Take every queued event, oldest first.
    pub fn drain_events(&mut self) -> Vec<EntityEvent> {
        self.events.drain(..).collect()
    }
}

impl From<&ObjectSpawn> for RemoteEntity {
    fn from(spawn: &ObjectSpawn) -> Self {
        Self {
            guid: spawn.guid,
            kind: spawn.kind,
            position: spawn.position,
            faction: spawn.faction,
            health: spawn.health,
            max_health: spawn.max_health,
            target: spawn.target,
        }
    }
}
