//! Spatial awareness: the registry of remote entities replicated to this
//! client and area watches that report which of them came into or left view.

pub mod entity;
pub mod hostility;
pub mod messages;
pub mod watch;

pub use entity::{EntityEvent, EntityFactory, EntityKind, EntityRegistry, Guid, RemoteEntity};
pub use hostility::{FactionHostilityPolicy, HostilityPolicy};
pub use messages::{ObjectDespawn, ObjectSpawn, ObjectUpdate, UpdateFields};
pub use watch::{AreaWatch, AwarenessEvent, within_radius};
