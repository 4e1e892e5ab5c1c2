//! The client <-> server event protocol.
//!
//! Every message on the wire is a JSON object `{"event": <name>, "data": ...}`
//! terminated by an EOT byte (0x04). The same encoding is used in both
//! directions; only the set of event names differs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::gamelog::Delta;

/// Message terminator byte. Frames on the socket are EOT-delimited.
pub const EOT: u8 = 0x04;

/// Maximum allowed frame size. Protects against unbounded buffering from a
/// client that never sends an EOT. Deltas for large games stay well under
/// this.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Sentinel value in a delta marking a key deleted from a mapping.
pub const DELTA_REMOVED: &str = "&RM";

/// Sentinel key in a delta carrying a list's new length, so receivers
/// truncate instead of keeping stale trailing elements.
pub const DELTA_LIST_LENGTH: &str = "&LEN";

/// A reference to a game object by id, as it appears on the wire.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GameObjectRef {
    pub id: String,
}

/// An order: a server-initiated call of one of the client AI's functions.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OrderData {
    /// The AI function to invoke.
    pub name: String,
    /// Correlates the client's eventual `finished` response to this order.
    pub index: u64,
    /// Positional, pre-sanitized arguments.
    pub args: Vec<Value>,
}

/// A run: a client-initiated call of a game object's function.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunData {
    pub caller: GameObjectRef,
    #[serde(rename = "functionName")]
    pub function_name: String,
    /// Arguments keyed by declared argument name.
    pub args: serde_json::Map<String, Value>,
}

/// Events the server sends to clients.
///
/// `order`, `ran` and `invalid` are written straight to the addressed
/// client, while `delta`/`meta-delta` travel through the logging pipeline,
/// so a client may see the reply to its own call before the delta that
/// reflects it. Clients must not assume an ordering between the two streams.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Sent once per client when the session starts. Spectators get no id.
    #[serde(rename = "start")]
    Start {
        #[serde(rename = "playerID")]
        player_id: Option<String>,
    },

    /// A game-state diff for clients that did not opt into meta deltas.
    #[serde(rename = "delta")]
    Delta(Value),

    /// The full delta record (diff plus triggering event) for clients that
    /// opted in.
    #[serde(rename = "meta-delta")]
    MetaDelta(Delta),

    /// A server-initiated AI function call.
    #[serde(rename = "order")]
    Order(OrderData),

    /// The returned value for a `run` this client requested.
    #[serde(rename = "ran")]
    Ran(Value),

    /// Why a `run` this client requested was rejected.
    #[serde(rename = "invalid")]
    Invalid { message: String },

    /// Sent once at game end, pointing at the gamelog.
    #[serde(rename = "over")]
    Over {
        #[serde(rename = "gamelogURL")]
        gamelog_url: Option<String>,
        #[serde(rename = "visualizerURL")]
        visualizer_url: Option<String>,
        message: Option<String>,
    },

    /// A fatal server error; the connection will close after this.
    #[serde(rename = "fatal")]
    Fatal { message: String },
}

/// Events clients send to the server.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// The response to an order the server sent.
    #[serde(rename = "finished")]
    Finished {
        #[serde(rename = "orderIndex")]
        order_index: u64,
        returned: Value,
    },

    /// A request to call a game object's function.
    #[serde(rename = "run")]
    Run(RunData),
}

/// Errors from framing or un-framing wire messages.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("message too large: {0} bytes (max {MAX_MESSAGE_SIZE})")]
    TooLarge(usize),
    #[error("could not serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serializes a message and appends the EOT terminator.
pub fn frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, FramingError> {
    let mut bytes = serde_json::to_vec(msg)?;
    if bytes.len() >= MAX_MESSAGE_SIZE {
        return Err(FramingError::TooLarge(bytes.len()));
    }
    bytes.push(EOT);
    Ok(bytes)
}

/// Incremental decoder for EOT-delimited frames.
///
/// Feed raw socket bytes in with [`FrameDecoder::extend`], then drain
/// complete frames with [`FrameDecoder::next_frame`]. Partial frames stay
/// buffered until their terminator arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers more bytes from the socket. Fails if a single frame would
    /// exceed [`MAX_MESSAGE_SIZE`].
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), FramingError> {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_MESSAGE_SIZE && !self.buf.contains(&EOT) {
            return Err(FramingError::TooLarge(self.buf.len()));
        }
        Ok(())
    }

    /// Pops the next complete frame (without its terminator), if any.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == EOT)?;
        let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
        frame.pop(); // drop the EOT
        Some(frame)
    }
}
