//! Object replication messages: `0x00A9` spawn, `0x00AA` update, `0x00AB`
//! despawn, all server → client.

use bitflags::bitflags;
use glam::Vec3;

use realmgate_net::{Opcode, PacketError, PacketReader, PacketWriter, WireMessage};

use crate::entity::{EntityKind, Guid};

fn put_vec3(writer: &mut PacketWriter, v: Vec3) {
    writer.put_f32(v.x).put_f32(v.y).put_f32(v.z);
}

fn read_vec3(reader: &mut PacketReader<'_>) -> Result<Vec3, PacketError> {
    Ok(Vec3::new(reader.read_f32()?, reader.read_f32()?, reader.read_f32()?))
}

fn put_target(writer: &mut PacketWriter, target: Option<Guid>) {
    writer.put_u64(target.map_or(0, |guid| guid.0));
}

fn read_target(reader: &mut PacketReader<'_>) -> Result<Option<Guid>, PacketError> {
    Ok(match reader.read_u64()? {
        0 => None,
        raw => Some(Guid(raw)),
    })
}

impl EntityKind {
    fn code(self) -> u8 {
        match self {
            Self::Player => 4,
            Self::Creature => 3,
            Self::Object => 5,
        }
    }

    fn from_code(code: u8) -> Result<Self, PacketError> {
        match code {
            4 => Ok(Self::Player),
            3 => Ok(Self::Creature),
            5 => Ok(Self::Object),
            other => Err(PacketError::InvalidValue {
                field: "kind",
                value: u64::from(other),
            }),
        }
    }
}

/// A new entity came into the client's replication range.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSpawn {
    pub guid: Guid,
    pub kind: EntityKind,
    pub position: Vec3,
    pub faction: u32,
    pub health: u32,
    pub max_health: u32,
    pub target: Option<Guid>,
}

impl WireMessage for ObjectSpawn {
    const OPCODE: Opcode = Opcode(0x00A9);

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer.put_u64(self.guid.0).put_u8(self.kind.code());
        put_vec3(writer, self.position);
        writer
            .put_u32(self.faction)
            .put_u32(self.health)
            .put_u32(self.max_health);
        put_target(writer, self.target);
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        Ok(Self {
            guid: Guid(reader.read_u64()?),
            kind: EntityKind::from_code(reader.read_u8()?)?,
            position: read_vec3(reader)?,
            faction: reader.read_u32()?,
            health: reader.read_u32()?,
            max_health: reader.read_u32()?,
            target: read_target(reader)?,
        })
    }
}

bitflags! {
    /// Which fields an [`ObjectUpdate`] carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpdateFields: u8 {
        const POSITION = 0x01;
        const HEALTH = 0x02;
        const FACTION = 0x04;
        const TARGET = 0x08;
    }
}

/// Partial update of a known entity. Only fields named in `fields` are on
/// the wire; the rest hold defaults after decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectUpdate {
    pub guid: Guid,
    pub fields: UpdateFields,
    pub position: Vec3,
    pub health: u32,
    pub max_health: u32,
    pub faction: u32,
    pub target: Option<Guid>,
}

impl ObjectUpdate {
    /// Position-only update.
    pub fn moved(guid: Guid, position: Vec3) -> Self {
        Self {
            guid,
            fields: UpdateFields::POSITION,
            position,
            health: 0,
            max_health: 0,
            faction: 0,
            target: None,
        }
    }
}

impl WireMessage for ObjectUpdate {
    const OPCODE: Opcode = Opcode(0x00AA);

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer.put_u64(self.guid.0).put_u8(self.fields.bits());
        if self.fields.contains(UpdateFields::POSITION) {
            put_vec3(writer, self.position);
        }
        if self.fields.contains(UpdateFields::HEALTH) {
            writer.put_u32(self.health).put_u32(self.max_health);
        }
        if self.fields.contains(UpdateFields::FACTION) {
            writer.put_u32(self.faction);
        }
        if self.fields.contains(UpdateFields::TARGET) {
            put_target(writer, self.target);
        }
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        let guid = Guid(reader.read_u64()?);
        let fields = UpdateFields::from_bits_truncate(reader.read_u8()?);
        let mut update = Self {
            guid,
            fields,
            position: Vec3::ZERO,
            health: 0,
            max_health: 0,
            faction: 0,
            target: None,
        };
        if fields.contains(UpdateFields::POSITION) {
            update.position = read_vec3(reader)?;
        }
        if fields.contains(UpdateFields::HEALTH) {
            update.health = reader.read_u32()?;
            update.max_health = reader.read_u32()?;
        }
        if fields.contains(UpdateFields::FACTION) {
            update.faction = reader.read_u32()?;
        }
        if fields.contains(UpdateFields::TARGET) {
            update.target = read_target(reader)?;
        }
        Ok(update)
    }
}

/// An entity left replication range or ceased to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectDespawn {
    pub guid: Guid,
}

impl WireMessage for ObjectDespawn {
    const OPCODE: Opcode = Opcode(0x00AB);

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer.put_u64(self.guid.0);
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        Ok(Self {
            guid: Guid(reader.read_u64()?),
        })
    }
}
