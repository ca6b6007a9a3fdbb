//! Transport plumbing for realm sessions: length-prefixed framing, the
//! little-endian packet codec, the post-handshake stream cipher, opcode
//! dispatch, correlated request tracking and the connection lifecycle.

pub mod cipher;
pub mod clock;
pub mod connector;
pub mod dispatcher;
pub mod framing;
pub mod packet;
pub mod peer;
pub mod pending;

pub use cipher::{CipherError, CipherRole, SessionCipher, hmac_sha1};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use connector::{
    CloseReason, ConnectionLossHook, ConnectorConfig, ConnectorEvent, TransportConnector,
    TransportError, TransportState,
};
pub use dispatcher::{HandlerResult, PacketDispatcher, PacketHandler};
pub use framing::{FrameConfig, FrameError, read_frame, write_frame};
pub use packet::{Opcode, PacketError, PacketReader, PacketWriter, WireMessage};
pub use peer::{FramedPeer, PeerError};
pub use pending::{Completion, PendingRequests, RequestError, RequestId};
