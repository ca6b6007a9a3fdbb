//! Movement wire messages.
//!
//! | opcode | direction | message |
//! |---|---|---|
//! | `0x00B5` | C→S | start forward |
//! | `0x00B7` | C→S | stop |
//! | `0x00C9` | C→S | fall land |
//! | `0x00EE` | C→S | heartbeat |
//! | `0x00C5` | S→C | [`ForcedTeleport`] |
//! | `0x00C7` | C→S | teleport ack |
//! | `0x00E2` | S→C | [`ForcedSpeedChange`] |
//! | `0x00E3` | C→S | speed change ack |

use realmgate_net::{Opcode, PacketError, PacketReader, PacketWriter, WireMessage};

use crate::snapshot::MovementSnapshot;

pub const MSG_MOVE_START_FORWARD: Opcode = Opcode(0x00B5);
pub const MSG_MOVE_STOP: Opcode = Opcode(0x00B7);
pub const MSG_MOVE_TELEPORT: Opcode = Opcode(0x00C5);
pub const MSG_MOVE_TELEPORT_ACK: Opcode = Opcode(0x00C7);
pub const MSG_MOVE_FALL_LAND: Opcode = Opcode(0x00C9);
pub const SMSG_FORCE_SPEED_CHANGE: Opcode = Opcode(0x00E2);
pub const CMSG_FORCE_SPEED_CHANGE_ACK: Opcode = Opcode(0x00E3);
pub const MSG_MOVE_HEARTBEAT: Opcode = Opcode(0x00EE);

/// Which speed a forced change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MovementType {
    Walk,
    Run,
    RunBack,
    Swim,
    SwimBack,
    Turn,
}

impl MovementType {
    pub fn code(self) -> u8 {
        match self {
            Self::Walk => 0,
            Self::Run => 1,
            Self::RunBack => 2,
            Self::Swim => 3,
            Self::SwimBack => 4,
            Self::Turn => 5,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, PacketError> {
        Ok(match code {
            0 => Self::Walk,
            1 => Self::Run,
            2 => Self::RunBack,
            3 => Self::Swim,
            4 => Self::SwimBack,
            5 => Self::Turn,
            other => {
                return Err(PacketError::InvalidValue {
                    field: "movement_type",
                    value: u64::from(other),
                });
            }
        })
    }
}

/// Server push: the avatar's speed is now `speed`; acknowledge with `ack_id`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForcedSpeedChange {
    pub ack_id: u32,
    pub movement_type: MovementType,
    pub speed: f32,
}

impl WireMessage for ForcedSpeedChange {
    const OPCODE: Opcode = SMSG_FORCE_SPEED_CHANGE;

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer
            .put_u32(self.ack_id)
            .put_u8(self.movement_type.code())
            .put_f32(self.speed);
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        Ok(Self {
            ack_id: reader.read_u32()?,
            movement_type: MovementType::from_code(reader.read_u8()?)?,
            speed: reader.read_f32()?,
        })
    }
}

/// Server push: the avatar is now exactly at `snapshot`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForcedTeleport {
    pub ack_id: u32,
    pub snapshot: MovementSnapshot,
}

impl WireMessage for ForcedTeleport {
    const OPCODE: Opcode = MSG_MOVE_TELEPORT;

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer.put_u32(self.ack_id);
        self.snapshot.encode(writer);
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        Ok(Self {
            ack_id: reader.read_u32()?,
            snapshot: MovementSnapshot::decode(reader)?,
        })
    }
}

/// Acknowledgement of a [`ForcedSpeedChange`]; `ack_id` is echoed verbatim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedAck {
    pub ack_id: u32,
    pub movement_type: MovementType,
    pub snapshot: MovementSnapshot,
    pub speed: f32,
}

/// Everything the client sends about its own movement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutboundMovement {
    StartForward(MovementSnapshot),
    Stop(MovementSnapshot),
    Heartbeat(MovementSnapshot),
    FallLanded(MovementSnapshot),
    SpeedAck(SpeedAck),
    TeleportAck {
        ack_id: u32,
        snapshot: MovementSnapshot,
    },
}

impl OutboundMovement {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::StartForward(_) => MSG_MOVE_START_FORWARD,
            Self::Stop(_) => MSG_MOVE_STOP,
            Self::Heartbeat(_) => MSG_MOVE_HEARTBEAT,
            Self::FallLanded(_) => MSG_MOVE_FALL_LAND,
            Self::SpeedAck(_) => CMSG_FORCE_SPEED_CHANGE_ACK,
            Self::TeleportAck { .. } => MSG_MOVE_TELEPORT_ACK,
        }
    }

    /// The snapshot the packet carries.
    pub fn snapshot(&self) -> &MovementSnapshot {
        match self {
            Self::StartForward(s) | Self::Stop(s) | Self::Heartbeat(s) | Self::FallLanded(s) => s,
            Self::SpeedAck(ack) => &ack.snapshot,
            Self::TeleportAck { snapshot, .. } => snapshot,
        }
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        match self {
            Self::StartForward(s) | Self::Stop(s) | Self::Heartbeat(s) | Self::FallLanded(s) => {
                s.encode(&mut writer);
            }
            Self::SpeedAck(ack) => {
                writer.put_u32(ack.ack_id).put_u8(ack.movement_type.code());
                ack.snapshot.encode(&mut writer);
                writer.put_f32(ack.speed);
            }
            Self::TeleportAck { ack_id, snapshot } => {
                writer.put_u32(*ack_id);
                snapshot.encode(&mut writer);
            }
        }
        writer.finish()
    }

    /// Decode a client movement packet. Returns `Ok(None)` for opcodes that
    /// are not client movement.
    pub fn decode(opcode: Opcode, payload: &[u8]) -> Result<Option<Self>, PacketError> {
        let mut reader = PacketReader::new(payload);
        let message = match opcode {
            MSG_MOVE_START_FORWARD => Self::StartForward(MovementSnapshot::decode(&mut reader)?),
            MSG_MOVE_STOP => Self::Stop(MovementSnapshot::decode(&mut reader)?),
            MSG_MOVE_HEARTBEAT => Self::Heartbeat(MovementSnapshot::decode(&mut reader)?),
            MSG_MOVE_FALL_LAND => Self::FallLanded(MovementSnapshot::decode(&mut reader)?),
            CMSG_FORCE_SPEED_CHANGE_ACK => Self::SpeedAck(SpeedAck {
                ack_id: reader.read_u32()?,
                movement_type: MovementType::from_code(reader.read_u8()?)?,
                snapshot: MovementSnapshot::decode(&mut reader)?,
                speed: reader.read_f32()?,
            }),
            MSG_MOVE_TELEPORT_ACK => Self::TeleportAck {
                ack_id: reader.read_u32()?,
                snapshot: MovementSnapshot::decode(&mut reader)?,
            },
            _ => return Ok(None),
        };
        reader.expect_end()?;
        Ok(Some(message))
    }
}
