//! World entry message.

use realmgate_awareness::Guid;
use realmgate_movement::MovementSnapshot;
use realmgate_net::{Opcode, PacketError, PacketReader, PacketWriter, WireMessage};

/// Realm → client after a successful join: which guid is ours and where the
/// avatar stands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnterWorld {
    pub guid: Guid,
    pub snapshot: MovementSnapshot,
}

impl WireMessage for EnterWorld {
    const OPCODE: Opcode = Opcode(0x0236);

    fn encode(&self, writer: &mut PacketWriter) -> Result<(), PacketError> {
        writer.put_u64(self.guid.0);
        self.snapshot.encode(writer);
        Ok(())
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        Ok(Self {
            guid: Guid(reader.read_u64()?),
            snapshot: MovementSnapshot::decode(reader)?,
        })
    }
}
