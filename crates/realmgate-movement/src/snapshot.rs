//! Movement state as it travels on the wire.

use bitflags::bitflags;
use glam::Vec3;

use realmgate_net::{PacketError, PacketReader, PacketWriter};

bitflags! {
    /// Movement state bits carried in every movement packet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MovementFlags: u32 {
        const FORWARD = 0x0000_0001;
        const BACKWARD = 0x0000_0002;
        const STRAFE_LEFT = 0x0000_0004;
        const STRAFE_RIGHT = 0x0000_0008;
        const TURN_LEFT = 0x0000_0010;
        const TURN_RIGHT = 0x0000_0020;
        const FALLING = 0x0000_2000;
        const FALLING_FAR = 0x0000_4000;
        const SWIMMING = 0x0020_0000;
        const ROOTED = 0x0400_0000;
    }
}

impl MovementFlags {
    /// Any bit that means the avatar is translating.
    pub const MOVING: Self = Self::FORWARD
        .union(Self::BACKWARD)
        .union(Self::STRAFE_LEFT)
        .union(Self::STRAFE_RIGHT);

    /// Any bit that means the avatar is airborne.
    pub const AIRBORNE: Self = Self::FALLING.union(Self::FALLING_FAR);
}

/// Size of an encoded [`MovementSnapshot`].
pub const SNAPSHOT_LEN: usize = 28;

/// One avatar's movement state at an instant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MovementSnapshot {
    pub flags: MovementFlags,
    pub position: Vec3,
    /// Radians, counter-clockwise from +X.
    pub facing: f32,
    /// Milliseconds on the sender's movement clock.
    pub timestamp: u32,
    /// Milliseconds spent falling.
    pub fall_time: u32,
}

impl MovementSnapshot {
    /// Resting snapshot at `position`.
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn is_moving(&self) -> bool {
        self.flags.intersects(MovementFlags::MOVING)
    }

    pub fn is_airborne(&self) -> bool {
        self.flags.intersects(MovementFlags::AIRBORNE)
    }

    pub fn encode(&self, writer: &mut PacketWriter) {
        writer
            .put_u32(self.flags.bits())
            .put_u32(self.timestamp)
            .put_f32(self.position.x)
            .put_f32(self.position.y)
            .put_f32(self.position.z)
            .put_f32(self.facing)
            .put_u32(self.fall_time);
    }

    /// Decode a snapshot. Unknown flag bits are kept.
    pub fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        let flags = MovementFlags::from_bits_retain(reader.read_u32()?);
        let timestamp = reader.read_u32()?;
        let position = Vec3::new(reader.read_f32()?, reader.read_f32()?, reader.read_f32()?);
        Ok(Self {
            flags,
            position,
            facing: reader.read_f32()?,
            timestamp,
            fall_time: reader.read_u32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_layout() {
        let snapshot = MovementSnapshot {
            flags: MovementFlags::FORWARD | MovementFlags::FALLING,
            position: Vec3::new(1.0, 2.0, 3.0),
            facing: 0.5,
            timestamp: 1234,
            fall_time: 40,
        };
        let mut writer = PacketWriter::new();
        snapshot.encode(&mut writer);
        let bytes = writer.finish();
        assert_eq!(bytes.len(), SNAPSHOT_LEN);
        assert_eq!(&bytes[..4], &0x2001u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1234u32.to_le_bytes());

        let decoded = MovementSnapshot::decode(&mut PacketReader::new(&bytes)).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_unknown_flag_bits_survive_decode() {
        let mut writer = PacketWriter::new();
        MovementSnapshot {
            flags: MovementFlags::from_bits_retain(0x8000_0001),
            ..MovementSnapshot::default()
        }
        .encode(&mut writer);
        let bytes = writer.finish();
        let decoded = MovementSnapshot::decode(&mut PacketReader::new(&bytes)).unwrap();
        assert_eq!(decoded.flags.bits(), 0x8000_0001);
        assert!(decoded.is_moving());
    }

    #[test]
    fn test_airborne_and_moving_masks() {
        let mut snapshot = MovementSnapshot::at(Vec3::ZERO);
        assert!(!snapshot.is_moving());
        snapshot.flags |= MovementFlags::FALLING_FAR;
        assert!(snapshot.is_airborne());
        snapshot.flags |= MovementFlags::STRAFE_LEFT;
        assert!(snapshot.is_moving());
    }
}
