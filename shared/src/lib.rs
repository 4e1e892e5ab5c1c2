//! Wire-level types shared between the game server, its worker processes and
//! any test clients: the client/server event protocol, the delta/gamelog
//! schema, and the framing used on the TCP sockets.

pub mod gamelog;
pub mod protocol;

pub use gamelog::{
    ClientInfo, Delta, DeltaConstants, DeltaEvent, FinishedEventData, Gamelog, InvalidEventData,
    PlayerOutcome, PlayerReport, RanEventData, WorkerClientInfo, WorkerMessage, WorkerReport,
};
pub use protocol::{
    frame, ClientEvent, FrameDecoder, FramingError, GameObjectRef, OrderData, RunData,
    ServerEvent, DELTA_LIST_LENGTH, DELTA_REMOVED, EOT, MAX_MESSAGE_SIZE,
};
